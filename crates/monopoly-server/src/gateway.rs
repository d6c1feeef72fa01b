//! Asking the oracle with a bounded retry policy and recording the answer.

use crate::config::RetryPolicy;
use crate::oracle::DecisionOracle;
use crate::store::{DecisionRecord, GameStore};
use monopoly_core::decision::{extract_response, interpret};
use monopoly_core::{PendingDecision, Resolution};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};

pub struct DecisionGateway {
    oracle: Arc<dyn DecisionOracle>,
    store: Arc<dyn GameStore>,
    policy: RetryPolicy,
}

impl DecisionGateway {
    pub fn new(
        oracle: Arc<dyn DecisionOracle>,
        store: Arc<dyn GameStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            oracle,
            store,
            policy,
        }
    }

    /// Get a decision for `pending`. Never fails: transport errors and
    /// unparseable replies are retried, then the kind's fallback is used.
    pub async fn decide(&self, pending: &PendingDecision) -> Resolution {
        let started = Instant::now();
        let mut raw_response = None;
        let mut tokens = None;
        let mut last_error = String::from("no attempts made");
        let mut attempts = 0;

        for attempt in 0..self.policy.attempts() {
            sleep(self.policy.backoff_before(attempt)).await;
            attempts += 1;
            let limit = self.policy.timeout(attempt);

            let reply = match timeout(limit, self.oracle.ask(pending)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    warn!(game_id = %pending.token.game_id, attempt, "Oracle error: {}", e);
                    last_error = e.to_string();
                    continue;
                }
                Err(_) => {
                    warn!(game_id = %pending.token.game_id, attempt, "Oracle timed out after {:?}", limit);
                    last_error = format!("timed out after {}s", limit.as_secs());
                    continue;
                }
            };

            raw_response = Some(reply.text.clone());
            tokens = reply.tokens.or(tokens);
            match extract_response(&reply.text) {
                Ok(response) => {
                    let resolution = interpret(&response, pending);
                    self.audit(pending, &resolution, raw_response, attempts, started, tokens)
                        .await;
                    return resolution;
                }
                Err(e) => {
                    warn!(game_id = %pending.token.game_id, attempt, "Unusable oracle reply: {}", e);
                    last_error = e.to_string();
                }
            }
        }

        let resolution = pending.fallback(format!(
            "oracle gave no usable answer after {attempts} attempts: {last_error}"
        ));
        self.audit(pending, &resolution, raw_response, attempts, started, tokens)
            .await;
        resolution
    }

    async fn audit(
        &self,
        pending: &PendingDecision,
        resolution: &Resolution,
        raw_response: Option<String>,
        attempts: u32,
        started: Instant,
        tokens: Option<u32>,
    ) {
        let record = DecisionRecord {
            game_id: pending.token.game_id,
            turn_number: pending.context.turn_number,
            player: pending.player,
            kind: pending.kind,
            action: resolution.decision.action(),
            reasoning: resolution.reasoning.clone(),
            fallback_reason: resolution.fallback_reason.clone(),
            raw_response,
            attempts,
            latency_ms: started.elapsed().as_millis() as u64,
            tokens,
            recorded_at: OffsetDateTime::now_utc(),
        };

        match &record.fallback_reason {
            Some(reason) => warn!(
                game_id = %record.game_id,
                turn = record.turn_number,
                player = record.player,
                decision = %record.kind,
                oracle = self.oracle.name(),
                "Falling back to {}: {}", record.action, reason
            ),
            None => info!(
                game_id = %record.game_id,
                turn = record.turn_number,
                player = record.player,
                decision = %record.kind,
                oracle = self.oracle.name(),
                latency_ms = record.latency_ms,
                "Decided {}", record.action
            ),
        }

        if let Err(e) = self.store.record_decision(record).await {
            error!(game_id = %pending.token.game_id, "Failed to record decision: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{OracleError, OracleReply};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use monopoly_core::{ActionName, Decision, DecisionKind, GameConfig, GameState};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;
    use uuid::Uuid;

    /// Plays back scripted replies; `None` hangs forever
    struct Scripted {
        replies: Mutex<VecDeque<Option<Result<String, u16>>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(replies: Vec<Option<Result<&str, u16>>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(|r| r.map(str::to_string)))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DecisionOracle for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn ask(&self, _: &PendingDecision) -> Result<OracleReply, OracleError> {
            self.calls.lock().push(Instant::now());
            let next = self.replies.lock().pop_front().flatten();
            match next {
                Some(Ok(text)) => Ok(OracleReply {
                    text,
                    tokens: Some(10),
                }),
                Some(Err(status)) => Err(OracleError::Status(status)),
                None => std::future::pending().await,
            }
        }
    }

    fn pending() -> PendingDecision {
        let mut game = GameState::new(
            Uuid::new_v4(),
            vec!["Ada".into(), "Bob".into()],
            GameConfig::default(),
            5,
        )
        .unwrap();
        game.start().unwrap();
        let token = game.step_token().unwrap();
        game.step(token).unwrap();
        game.pending_decision().cloned().unwrap()
    }

    fn gateway(oracle: Arc<Scripted>) -> (DecisionGateway, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let gateway = DecisionGateway::new(oracle, store.clone(), RetryPolicy::default());
        (gateway, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_good_reply_wins() {
        let oracle = Scripted::new(vec![Some(Ok(
            r#"Let me think. {"action": "done", "reasoning": "saving cash"}"#,
        ))]);
        let (gateway, store) = gateway(oracle.clone());
        let pending = pending();

        let resolution = gateway.decide(&pending).await;
        assert_eq!(resolution.decision, Decision::Done);
        assert_eq!(resolution.reasoning, "saving cash");
        assert_eq!(oracle.calls.lock().len(), 1);

        let records = store.decisions(pending.token.game_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempts, 1);
        assert_eq!(records[0].tokens, Some(10));
        assert_eq!(records[0].kind, DecisionKind::PreRollActions);
        assert!(records[0].raw_response.as_deref().unwrap().contains("saving cash"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_growing_timeouts_and_backoff() {
        // Hang, then garbage, then a good answer
        let oracle = Scripted::new(vec![
            None,
            Some(Ok("no json here")),
            Some(Ok(r#"{"action": "done"}"#)),
        ]);
        let (gateway, _) = gateway(oracle.clone());
        let start = Instant::now();

        let resolution = gateway.decide(&pending()).await;
        assert!(!resolution.is_fallback());

        let calls = oracle.calls.lock().clone();
        assert_eq!(calls.len(), 3);
        // 30s timeout + 1s backoff, then an instant reply + 2s backoff
        assert_eq!(calls[1] - start, Duration::from_secs(31));
        assert_eq!(calls[2] - start, Duration::from_secs(33));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fall_back() {
        let oracle = Scripted::new(vec![None, Some(Err(503)), None]);
        let (gateway, store) = gateway(oracle.clone());
        let pending = pending();
        let start = Instant::now();

        let resolution = gateway.decide(&pending).await;
        assert!(resolution.is_fallback());
        assert_eq!(resolution.decision, Decision::Done);
        assert!(resolution
            .fallback_reason
            .as_deref()
            .unwrap()
            .contains("timed out after 60s"));
        // 30 + 1 + 0 + 2 + 60
        assert_eq!(start.elapsed(), Duration::from_secs(93));

        let records = store.decisions(pending.token.game_id).await.unwrap();
        assert_eq!(records[0].attempts, 3);
        assert_eq!(records[0].action, ActionName::Done);
        assert_eq!(records[0].raw_response, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_action_falls_back_without_retry() {
        let oracle = Scripted::new(vec![Some(Ok(r#"{"action": "buy"}"#))]);
        let (gateway, _) = gateway(oracle.clone());

        let resolution = gateway.decide(&pending()).await;
        assert!(resolution.is_fallback());
        assert_eq!(oracle.calls.lock().len(), 1);
    }
}
