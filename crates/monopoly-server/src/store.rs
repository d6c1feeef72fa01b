//! Persistence for games, turns and the decision audit log.

use async_trait::async_trait;
use dashmap::DashMap;
use monopoly_core::{ActionName, DecisionKind, GameState, GameStatus, PlayerId, Turn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Game {0} not found")]
    GameNotFound(Uuid),

    #[error("Stored game is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A loaded game plus bookkeeping
#[derive(Debug, Clone)]
pub struct GameRecord {
    pub game: GameState,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Summary used by the watchdog and the recurring trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSummary {
    pub id: Uuid,
    pub status: GameStatus,
    pub updated_at: OffsetDateTime,
}

/// One audited decision, fallbacks included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub game_id: Uuid,
    pub turn_number: u32,
    pub player: PlayerId,
    pub kind: DecisionKind,
    pub action: ActionName,
    pub reasoning: String,
    pub fallback_reason: Option<String>,
    /// Last text the oracle sent, if any arrived
    pub raw_response: Option<String>,
    pub attempts: u32,
    pub latency_ms: u64,
    pub tokens: Option<u32>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<GameRecord, StoreError>;

    /// Insert or overwrite a game, stamping `updated_at`
    async fn save(&self, game: &GameState) -> Result<(), StoreError>;

    async fn games(&self) -> Result<Vec<GameSummary>, StoreError>;

    /// Insert or overwrite the turn record for (game, turn number)
    async fn save_turn(&self, turn: &Turn) -> Result<(), StoreError>;

    async fn turn(&self, game_id: Uuid, number: u32) -> Result<Option<Turn>, StoreError>;

    async fn record_decision(&self, record: DecisionRecord) -> Result<(), StoreError>;

    async fn decisions(&self, game_id: Uuid) -> Result<Vec<DecisionRecord>, StoreError>;
}

struct StoredGame {
    /// Serialized so every load is a real round trip
    state: String,
    status: GameStatus,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    games: DashMap<Uuid, StoredGame>,
    turns: DashMap<(Uuid, u32), Turn>,
    decisions: DashMap<Uuid, Vec<DecisionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn load(&self, id: Uuid) -> Result<GameRecord, StoreError> {
        let stored = self.games.get(&id).ok_or(StoreError::GameNotFound(id))?;
        Ok(GameRecord {
            game: serde_json::from_str(&stored.state)?,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
    }

    async fn save(&self, game: &GameState) -> Result<(), StoreError> {
        let state = serde_json::to_string(game)?;
        let now = OffsetDateTime::now_utc();
        self.games
            .entry(game.id)
            .and_modify(|stored| {
                stored.state = state.clone();
                stored.status = game.status;
                stored.updated_at = now;
            })
            .or_insert_with(|| StoredGame {
                state: state.clone(),
                status: game.status,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn games(&self) -> Result<Vec<GameSummary>, StoreError> {
        Ok(self
            .games
            .iter()
            .map(|entry| GameSummary {
                id: *entry.key(),
                status: entry.status,
                updated_at: entry.updated_at,
            })
            .collect())
    }

    async fn save_turn(&self, turn: &Turn) -> Result<(), StoreError> {
        self.turns.insert((turn.game_id, turn.number), turn.clone());
        Ok(())
    }

    async fn turn(&self, game_id: Uuid, number: u32) -> Result<Option<Turn>, StoreError> {
        Ok(self.turns.get(&(game_id, number)).map(|t| t.clone()))
    }

    async fn record_decision(&self, record: DecisionRecord) -> Result<(), StoreError> {
        self.decisions.entry(record.game_id).or_default().push(record);
        Ok(())
    }

    async fn decisions(&self, game_id: Uuid) -> Result<Vec<DecisionRecord>, StoreError> {
        Ok(self
            .decisions
            .get(&game_id)
            .map(|d| d.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Pretend a game was last touched at `when`
    pub fn backdate(&self, id: Uuid, when: OffsetDateTime) {
        if let Some(mut stored) = self.games.get_mut(&id) {
            stored.updated_at = when;
        }
    }

    /// Replace a game's saved state with something that will not load
    pub fn corrupt(&self, id: Uuid) {
        if let Some(mut stored) = self.games.get_mut(&id) {
            stored.state = "{".into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monopoly_core::GameConfig;

    fn game() -> GameState {
        GameState::new(
            Uuid::new_v4(),
            vec!["Ada".into(), "Bob".into()],
            GameConfig::default(),
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let store = MemoryStore::new();
        let mut game = game();
        store.save(&game).await.unwrap();
        game.start().unwrap();
        store.save(&game).await.unwrap();

        let record = store.load(game.id).await.unwrap();
        assert_eq!(record.game.status, GameStatus::InProgress);
        assert_eq!(record.game.revision, game.revision);
        assert!(record.updated_at >= record.created_at);

        let summaries = store.games().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, GameStatus::InProgress);
    }

    #[tokio::test]
    async fn test_missing_game() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.load(id).await,
            Err(StoreError::GameNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_turns_are_keyed_by_number() {
        let store = MemoryStore::new();
        let mut game = game();
        game.start().unwrap();
        let turn = game.turn.clone().unwrap();
        store.save_turn(&turn).await.unwrap();
        store.save_turn(&turn).await.unwrap();

        assert_eq!(store.turn(game.id, 1).await.unwrap(), Some(turn));
        assert_eq!(store.turn(game.id, 2).await.unwrap(), None);
    }
}
