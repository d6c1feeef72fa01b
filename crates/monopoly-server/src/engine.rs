//! Runs games: one step or resume at a time per game, driven by tasks.

use crate::config::ServerConfig;
use crate::gateway::DecisionGateway;
use crate::scheduler::{Scheduler, Task};
use crate::store::{GameStore, StoreError};
use dashmap::DashMap;
use monopoly_core::{
    Effect, GameConfig, GameError, GameState, GameStatus, Resolution, ResumeToken, StepOutcome,
    StepToken,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Game(#[from] GameError),
}

/// What the engine needs to start and police games
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub players: Vec<String>,
    pub game: GameConfig,
    pub stale_after: Duration,
}

impl From<&ServerConfig> for EngineSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            players: config.players.clone(),
            game: config.game.clone(),
            stale_after: config.stale_after,
        }
    }
}

pub struct Engine {
    store: Arc<dyn GameStore>,
    gateway: Arc<DecisionGateway>,
    scheduler: Scheduler,
    settings: EngineSettings,
    /// Serializes all work on one game
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn GameStore>,
        gateway: Arc<DecisionGateway>,
        scheduler: Scheduler,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            scheduler,
            settings,
            locks: DashMap::new(),
        }
    }

    fn lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    /// Forget the lock of a game that can no longer change
    fn release_if_over(&self, game: &GameState) {
        if game.status.is_terminal() {
            self.locks.remove(&game.id);
        }
    }

    /// Handle tasks until the channel closes
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Task>) {
        while let Some(task) = rx.recv().await {
            let engine = Arc::clone(&self);
            tokio::spawn(async move { engine.handle(task).await });
        }
        info!("Task channel closed, engine stopping");
    }

    pub async fn handle(&self, task: Task) {
        let result = match task {
            Task::Step(token) => self.process_step(token).await,
            Task::Resume { token, resolution } => self.resume(token, resolution).await,
            Task::Tick => self.tick().await,
        };
        if let Err(e) = result {
            error!("Task failed: {}", e);
        }
    }

    /// Create and start a game with the configured players
    pub async fn create_game(&self) -> Result<Uuid, EngineError> {
        let id = Uuid::new_v4();
        let mut game =
            GameState::with_random_seed(id, self.settings.players.clone(), self.settings.game.clone())?;
        let lock = self.lock(id);
        let _guard = lock.lock().await;

        let outcome = game.start()?;
        self.store.save(&game).await?;
        info!(game_id = %id, players = ?self.settings.players, "Game started");
        self.apply(&game, outcome).await?;
        Ok(id)
    }

    /// Run the phase named by `token`. Stale or duplicate tokens are dropped.
    pub async fn process_step(&self, token: StepToken) -> Result<(), EngineError> {
        let lock = self.lock(token.game_id);
        let _guard = lock.lock().await;

        let mut game = self.store.load(token.game_id).await?.game;
        let outcome = match game.step(token) {
            Ok(outcome) => outcome,
            Err(
                e @ (GameError::StaleToken | GameError::NotInProgress | GameError::AwaitingDecision),
            ) => {
                debug!(game_id = %token.game_id, revision = token.revision, "Dropping step: {}", e);
                self.release_if_over(&game);
                return Ok(());
            }
            Err(e) => {
                // Integrity failure: leave the game as stored for the watchdog
                error!(game_id = %token.game_id, turn = game.turn_number, "Step aborted: {}", e);
                return Err(e.into());
            }
        };
        self.store.save(&game).await?;
        self.apply(&game, outcome).await
    }

    /// Apply an answered decision. Answers for finished games or for a
    /// suspension that has already been resumed are dropped.
    pub async fn resume(
        &self,
        token: ResumeToken,
        resolution: Resolution,
    ) -> Result<(), EngineError> {
        let lock = self.lock(token.game_id);
        let _guard = lock.lock().await;

        let mut game = self.store.load(token.game_id).await?.game;
        let outcome = match game.resume(token, resolution) {
            Ok(outcome) => outcome,
            Err(
                e @ (GameError::StaleToken
                | GameError::NotInProgress
                | GameError::NoPendingDecision),
            ) => {
                debug!(game_id = %token.game_id, revision = token.revision, "Dropping decision: {}", e);
                self.release_if_over(&game);
                return Ok(());
            }
            Err(e) => {
                error!(game_id = %token.game_id, turn = game.turn_number, "Resume aborted: {}", e);
                return Err(e.into());
            }
        };
        self.store.save(&game).await?;
        self.apply(&game, outcome).await
    }

    /// End a game wherever it is, including mid-decision
    pub async fn abandon(&self, id: Uuid, reason: &str) -> Result<(), EngineError> {
        let lock = self.lock(id);
        let _guard = lock.lock().await;

        let mut game = self.store.load(id).await?.game;
        let events = match game.abandon(reason) {
            Ok(events) => events,
            Err(e) => {
                self.release_if_over(&game);
                return Err(e.into());
            }
        };
        for event in &events {
            info!(game_id = %id, "{}", event.describe(&game.players));
        }
        if let Some(turn) = &game.turn {
            self.store.save_turn(turn).await?;
        }
        self.store.save(&game).await?;
        self.release_if_over(&game);
        warn!(game_id = %id, reason, "Game abandoned");
        Ok(())
    }

    /// Recurring trigger: abandon stale games, then start one if none is running
    pub async fn tick(&self) -> Result<(), EngineError> {
        self.tick_at(OffsetDateTime::now_utc()).await
    }

    pub async fn tick_at(&self, now: OffsetDateTime) -> Result<(), EngineError> {
        let mut active = 0;
        for summary in self.store.games().await? {
            if summary.status != GameStatus::InProgress {
                continue;
            }
            let idle = now - summary.updated_at;
            if idle > self.settings.stale_after {
                let reason = format!("no progress for {}s", idle.whole_seconds());
                if let Err(e) = self.abandon(summary.id, &reason).await {
                    warn!(game_id = %summary.id, "Watchdog could not abandon game: {}", e);
                }
            } else {
                active += 1;
            }
        }

        if active == 0 {
            self.create_game().await?;
        }
        Ok(())
    }

    /// Persist turn records, log events and carry out the outcome's effect
    async fn apply(&self, game: &GameState, outcome: StepOutcome) -> Result<(), EngineError> {
        for event in &outcome.events {
            debug!(game_id = %game.id, turn = game.turn_number, "{}", event.describe(&game.players));
        }
        if let Some(turn) = &outcome.closed_turn {
            self.store.save_turn(turn).await?;
        }
        if let Some(turn) = &game.turn {
            self.store.save_turn(turn).await?;
        }

        match outcome.effect {
            Effect::ScheduleStep { token, delay_ms } => {
                self.scheduler
                    .schedule(Duration::from_millis(delay_ms), Task::Step(token));
            }
            Effect::AwaitDecision { decision } => {
                debug!(
                    game_id = %game.id,
                    turn = game.turn_number,
                    player = decision.player,
                    decision = %decision.kind,
                    "Waiting for decision"
                );
                let gateway = Arc::clone(&self.gateway);
                let scheduler = self.scheduler.clone();
                tokio::spawn(async move {
                    let resolution = gateway.decide(&decision).await;
                    scheduler.send(Task::Resume {
                        token: decision.token,
                        resolution,
                    });
                });
            }
            Effect::Finished { winner, reason } => {
                self.locks.remove(&game.id);
                let winner = winner.and_then(|w| game.players.get(usize::from(w))).map(|p| p.name.as_str());
                info!(game_id = %game.id, turns = game.turn_number, ?reason, winner, "Game over");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::oracle::BotOracle;
    use crate::store::MemoryStore;
    use monopoly_core::{Bot, BotDifficulty, Decision, EndingReason};

    struct Harness {
        engine: Arc<Engine>,
        store: Arc<MemoryStore>,
        rx: mpsc::UnboundedReceiver<Task>,
    }

    fn harness(turn_limit: u32) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(BotOracle::from_bot(Bot::with_seed(BotDifficulty::Medium, 3)));
        let gateway = Arc::new(DecisionGateway::new(
            oracle,
            store.clone(),
            RetryPolicy::default(),
        ));
        let (scheduler, rx) = Scheduler::new();
        let settings = EngineSettings {
            players: vec!["Ada".into(), "Bob".into(), "Cy".into()],
            game: GameConfig {
                turn_limit: Some(turn_limit),
                step_delay_ms: 10,
                ..GameConfig::default()
            },
            stale_after: Duration::from_secs(600),
        };
        Harness {
            engine: Arc::new(Engine::new(store.clone(), gateway, scheduler, settings)),
            store,
            rx,
        }
    }

    /// Handle tasks inline until a game finishes
    async fn drive(h: &mut Harness, id: Uuid) -> GameState {
        loop {
            let game = h.store.load(id).await.unwrap().game;
            if game.status.is_terminal() {
                return game;
            }
            let task = h.rx.recv().await.expect("a task is always pending");
            h.engine.handle(task).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_game_runs_to_completion() {
        let mut h = harness(30);
        let id = h.engine.create_game().await.unwrap();
        let game = drive(&mut h, id).await;

        assert_eq!(game.status, GameStatus::Completed);
        assert!(game.winner.is_some());
        for number in 1..=game.turn_number {
            let turn = h.store.turn(id, number).await.unwrap().unwrap();
            assert!(turn.finished, "turn {number} not closed");
        }
        let decisions = h.store.decisions(id).await.unwrap();
        assert!(!decisions.is_empty());
        assert!(decisions.iter().all(|d| d.fallback_reason.is_none()));
        assert!(h.engine.locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_tasks_are_dropped() {
        let mut h = harness(10);
        let id = h.engine.create_game().await.unwrap();
        let Some(Task::Step(token)) = h.rx.recv().await else {
            panic!("first task is a step");
        };

        h.engine.process_step(token).await.unwrap();
        let after_first = h.store.load(id).await.unwrap().game;
        // Redelivery of the same step changes nothing
        h.engine.process_step(token).await.unwrap();
        let after_second = h.store.load(id).await.unwrap().game;
        assert_eq!(after_first.revision, after_second.revision);

        // Pre-roll suspended, so the gateway answers
        let Some(Task::Resume { token, resolution }) = h.rx.recv().await else {
            panic!("expected the decision result");
        };
        h.engine.resume(token, resolution.clone()).await.unwrap();
        let resumed = h.store.load(id).await.unwrap().game.revision;
        h.engine.resume(token, resolution).await.unwrap();
        assert_eq!(h.store.load(id).await.unwrap().game.revision, resumed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_mid_decision_drops_late_answer() {
        let mut h = harness(10);
        let id = h.engine.create_game().await.unwrap();
        let Some(Task::Step(token)) = h.rx.recv().await else {
            panic!("first task is a step");
        };
        h.engine.process_step(token).await.unwrap();
        assert!(h.store.load(id).await.unwrap().game.waiting_for_decision());

        h.engine.abandon(id, "operator stop").await.unwrap();
        let Some(Task::Resume { token, .. }) = h.rx.recv().await else {
            panic!("expected the decision result");
        };
        h.engine.resume(token, Decision::Done.into()).await.unwrap();

        let game = h.store.load(id).await.unwrap().game;
        assert_eq!(game.status, GameStatus::Abandoned);
        assert_eq!(
            game.ending_reason,
            Some(EndingReason::Abandoned {
                reason: "operator stop".into()
            })
        );
        // Neither the abandon nor the late answer leaves a lock behind
        assert!(h.engine.locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_survives_a_failed_abandon() {
        let h = harness(10);
        let broken = h.engine.create_game().await.unwrap();
        let stale = h.engine.create_game().await.unwrap();
        let long_ago = OffsetDateTime::now_utc() - time::Duration::hours(1);
        h.store.backdate(broken, long_ago);
        h.store.backdate(stale, long_ago);
        h.store.corrupt(broken);

        h.engine.tick().await.unwrap();

        let games = h.store.games().await.unwrap();
        assert_eq!(games.len(), 3);
        let status = |id: Uuid| games.iter().find(|g| g.id == id).unwrap().status;
        assert_eq!(status(stale), GameStatus::Abandoned);
        assert_eq!(status(broken), GameStatus::InProgress);
        assert!(games
            .iter()
            .any(|g| g.id != broken && g.id != stale && g.status == GameStatus::InProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_starts_one_game_and_reaps_stale_ones() {
        let h = harness(10);
        h.engine.tick().await.unwrap();
        h.engine.tick().await.unwrap();
        let games = h.store.games().await.unwrap();
        assert_eq!(games.len(), 1);
        let first = games[0].id;

        h.store
            .backdate(first, OffsetDateTime::now_utc() - time::Duration::hours(1));
        h.engine.tick().await.unwrap();

        let games = h.store.games().await.unwrap();
        assert_eq!(games.len(), 2);
        let old = games.iter().find(|g| g.id == first).unwrap();
        assert_eq!(old.status, GameStatus::Abandoned);
        assert!(games
            .iter()
            .any(|g| g.id != first && g.status == GameStatus::InProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_game_is_an_error() {
        let h = harness(10);
        let token = StepToken {
            game_id: Uuid::new_v4(),
            revision: 0,
        };
        assert!(matches!(
            h.engine.process_step(token).await,
            Err(EngineError::Store(StoreError::GameNotFound(_)))
        ));
    }
}
