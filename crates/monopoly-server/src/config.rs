//! Server configuration read from the environment.

use monopoly_core::{BotDifficulty, GameConfig};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set to use the HTTP oracle")]
    MissingCredentials(&'static str),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },

    #[error("Need between 2 and 8 player names, got {0}")]
    PlayerCount(usize),
}

/// Connection details for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOracleConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// Which decision-maker answers for the players
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleSettings {
    Bot { difficulty: BotDifficulty },
    Http(HttpOracleConfig),
}

/// How hard the gateway tries before falling back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Timeout of each attempt; its length is the number of attempts
    pub timeouts: Vec<Duration>,
    /// Pause before the 2nd, 3rd, ... attempt
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeouts: vec![
                Duration::from_secs(30),
                Duration::from_secs(45),
                Duration::from_secs(60),
            ],
            backoff: vec![Duration::from_secs(1), Duration::from_secs(2)],
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> usize {
        self.timeouts.len()
    }

    pub fn timeout(&self, attempt: usize) -> Duration {
        self.timeouts
            .get(attempt)
            .or(self.timeouts.last())
            .copied()
            .unwrap_or(Duration::from_secs(30))
    }

    /// Pause before `attempt` (0-based); nothing before the first
    pub fn backoff_before(&self, attempt: usize) -> Duration {
        match attempt {
            0 => Duration::ZERO,
            n => self
                .backoff
                .get(n - 1)
                .or(self.backoff.last())
                .copied()
                .unwrap_or(Duration::ZERO),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub oracle: OracleSettings,
    pub players: Vec<String>,
    pub game: GameConfig,
    /// How often the recurring trigger fires
    pub trigger_interval: Duration,
    /// In-progress games untouched for this long are abandoned
    pub stale_after: Duration,
    pub retry: RetryPolicy,
}

const DEFAULT_PLAYERS: &str = "Ada,Grace,Linus,Barbara";

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let oracle = match get("MONOPOLY_ORACLE").as_deref().unwrap_or("bot") {
            "bot" => OracleSettings::Bot {
                difficulty: match get("MONOPOLY_BOT_DIFFICULTY").as_deref() {
                    None | Some("medium") => BotDifficulty::Medium,
                    Some("easy") => BotDifficulty::Easy,
                    Some("hard") => BotDifficulty::Hard,
                    Some(other) => {
                        return Err(ConfigError::Invalid {
                            var: "MONOPOLY_BOT_DIFFICULTY",
                            value: other.to_string(),
                        })
                    }
                },
            },
            "http" => OracleSettings::Http(HttpOracleConfig {
                base_url: get("MONOPOLY_ORACLE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".into()),
                api_key: get("MONOPOLY_ORACLE_API_KEY")
                    .ok_or(ConfigError::MissingCredentials("MONOPOLY_ORACLE_API_KEY"))?,
                model: get("MONOPOLY_ORACLE_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            }),
            other => {
                return Err(ConfigError::Invalid {
                    var: "MONOPOLY_ORACLE",
                    value: other.to_string(),
                })
            }
        };

        let players: Vec<String> = get("MONOPOLY_PLAYERS")
            .unwrap_or_else(|| DEFAULT_PLAYERS.into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !(2..=8).contains(&players.len()) {
            return Err(ConfigError::PlayerCount(players.len()));
        }

        let defaults = GameConfig::default();
        let game = GameConfig {
            step_delay_ms: parse(&get, "MONOPOLY_STEP_DELAY_MS")?.unwrap_or(defaults.step_delay_ms),
            turn_limit: parse(&get, "MONOPOLY_TURN_LIMIT")?.or(defaults.turn_limit),
            starting_money: parse(&get, "MONOPOLY_STARTING_MONEY")?
                .unwrap_or(defaults.starting_money),
            ..defaults
        };

        let mut retry = RetryPolicy::default();
        if let Some(attempts) = parse::<usize>(&get, "MONOPOLY_ORACLE_ATTEMPTS")? {
            if attempts == 0 {
                return Err(ConfigError::Invalid {
                    var: "MONOPOLY_ORACLE_ATTEMPTS",
                    value: "0".into(),
                });
            }
            retry.timeouts = (0..attempts).map(|i| retry.timeout(i)).collect();
        }
        if let Some(secs) = parse::<u64>(&get, "MONOPOLY_ORACLE_TIMEOUT_SECS")? {
            // Later attempts keep growing by half the base timeout
            retry.timeouts = (0..retry.attempts() as u64)
                .map(|i| Duration::from_secs(secs + i * secs / 2))
                .collect();
        }

        Ok(Self {
            oracle,
            players,
            game,
            trigger_interval: Duration::from_secs(
                parse(&get, "MONOPOLY_TRIGGER_INTERVAL_SECS")?.unwrap_or(300),
            ),
            stale_after: Duration::from_secs(
                parse(&get, "MONOPOLY_STALE_AFTER_SECS")?.unwrap_or(1800),
            ),
            retry,
        })
    }
}

fn parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
