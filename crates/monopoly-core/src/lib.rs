//! Monopoly turn engine driven by external decision-makers
//!
//! This crate holds the rules of the game as a synchronous, serializable
//! state machine. It never sleeps, never blocks and never calls out: each
//! call to [`GameState::step`] runs one phase of the current turn and says
//! what should happen next, and every choice a player has to make suspends
//! the game as a [`PendingDecision`] until [`GameState::resume`] answers it.
//!
//! # Architecture
//!
//! Hosts (see the `monopoly-server` crate) own scheduling, persistence and
//! talking to oracles. Because the whole game including its RNG serializes,
//! a host can store a game between steps and pick it up in another process.
//!
//! # Modules
//!
//! - [`board`]: the forty spaces and the title deeds
//! - [`cards`]: Chance and Community Chest decks
//! - [`rent`]: rent, building and mortgage rules
//! - [`game`]: the turn state machine
//! - [`decision`]: decision requests and parsing oracle replies
//! - [`auction`], [`trade`], [`bankruptcy`]: sub-flows of a turn
//! - [`bot`]: offline heuristic players

pub mod actions;
pub mod auction;
pub mod bankruptcy;
pub mod board;
pub mod bot;
pub mod cards;
pub mod decision;
pub mod game;
pub mod player;
pub mod rent;
pub mod trade;
pub mod turn;

// Re-export commonly used types
pub use actions::{ActionName, Decision, EndingReason, GameEvent, TradeBundle};
pub use board::{PlayerId, PropertyId};
pub use bot::{Bot, BotDifficulty};
pub use decision::{
    resolve, DecisionContext, DecisionKind, OracleResponse, ParseError, PendingDecision,
    Resolution, ResumeToken,
};
pub use game::{
    Effect, GameConfig, GameError, GameState, GameStatus, StepOutcome, StepToken, TurnPhase,
};
pub use player::Player;
pub use trade::{Trade, TradeStatus};
pub use turn::Turn;
