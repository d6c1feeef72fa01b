//! Decision oracles: the remote chat-completions model and the local bot.

use crate::config::HttpOracleConfig;
use async_trait::async_trait;
use monopoly_core::{ActionName, Bot, BotDifficulty, DecisionContext, DecisionKind, PendingDecision};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Oracle answered with status {0}")]
    Status(u16),

    #[error("Oracle reply had no content")]
    EmptyReply,
}

/// Raw text from an oracle plus usage metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleReply {
    pub text: String,
    pub tokens: Option<u32>,
}

/// Anything that can be asked for a decision. Replies are untrusted text.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    fn name(&self) -> &str;

    async fn ask(&self, pending: &PendingDecision) -> Result<OracleReply, OracleError>;
}

/// What the oracle is shown
#[derive(Debug, Serialize)]
struct DecisionRequest<'a> {
    decision_type: DecisionKind,
    valid_actions: &'a [ActionName],
    context: &'a DecisionContext,
}

impl<'a> From<&'a PendingDecision> for DecisionRequest<'a> {
    fn from(pending: &'a PendingDecision) -> Self {
        Self {
            decision_type: pending.kind,
            valid_actions: &pending.valid_actions,
            context: &pending.context,
        }
    }
}

const INSTRUCTIONS: &str = "You are playing Monopoly. Reply with a single JSON object \
{\"action\": <one of valid_actions>, \"parameters\": {...}, \"reasoning\": \"...\"}. \
Properties may be given by board position or name.";

/// OpenAI-compatible `/chat/completions` client
pub struct HttpOracle {
    client: reqwest::Client,
    config: HttpOracleConfig,
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

impl HttpOracle {
    pub fn new(config: HttpOracleConfig) -> Result<Self, OracleError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            config,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn ask(&self, pending: &PendingDecision) -> Result<OracleReply, OracleError> {
        let request = DecisionRequest::from(pending);
        let prompt = serde_json::to_string_pretty(&request).unwrap_or_default();
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": INSTRUCTIONS },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.7,
        });

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OracleError::Status(response.status().as_u16()));
        }

        let completion: Completion = response.json().await?;
        let text = completion
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(OracleError::EmptyReply)?;
        Ok(OracleReply {
            text,
            tokens: completion.usage.map(|u| u.total_tokens),
        })
    }
}

/// Local heuristic bot speaking the oracle's reply format
pub struct BotOracle {
    bot: Mutex<Bot>,
    name: String,
}

impl BotOracle {
    pub fn new(difficulty: BotDifficulty) -> Self {
        Self::from_bot(Bot::new(difficulty))
    }

    pub fn from_bot(bot: Bot) -> Self {
        Self {
            name: format!("bot-{:?}", bot.difficulty).to_lowercase(),
            bot: Mutex::new(bot),
        }
    }
}

#[async_trait]
impl DecisionOracle for BotOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ask(&self, pending: &PendingDecision) -> Result<OracleReply, OracleError> {
        Ok(OracleReply {
            text: self.bot.lock().respond(pending),
            tokens: None,
        })
    }
}
