//! Core game state machine.
//!
//! `GameState` advances one phase per [`GameState::step`]. A step either
//! moves to the next phase (the host schedules another step) or suspends
//! with a [`PendingDecision`] (the host asks an oracle and calls
//! [`GameState::resume`]). Both carry a revision-stamped token, so a
//! duplicate or late delivery is rejected without touching state.

use crate::actions::{ActionName, Decision, EndingReason, GameEvent, JailRelease};
use crate::auction::Auction;
use crate::bankruptcy::{Charge, Debt};
use crate::board::{space, space_name, PlayerId, Property, PropertyId, Space};
use crate::cards::{building_counts, card_at, nearest, CardEffect, Deck, DeckKind, Nearest};
use crate::decision::{
    DecisionContext, DecisionDetail, DecisionKind, PendingDecision, PlayerView, PropertyView,
    Resolution, ResumeToken,
};
use crate::player::Player;
use crate::rent::{self, RentModifier};
use crate::trade::Trade;
use crate::turn::Turn;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Fewest players a game can start with
pub const MIN_PLAYERS: usize = 2;

/// Most players a game can start with
pub const MAX_PLAYERS: usize = 8;

/// Lifecycle of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Setup,
    InProgress,
    Completed,
    Abandoned,
}

impl GameStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GameStatus::Completed | GameStatus::Abandoned)
    }
}

/// Phase of the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    PreRoll,
    Rolling,
    PostRoll,
    TurnEnd,
    GameOver,
}

/// Whether the machine can step or is waiting on a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Control {
    Running {
        phase: TurnPhase,
    },
    /// `phase` is where the machine continues once the decision is applied
    Suspended {
        phase: TurnPhase,
        decision: PendingDecision,
    },
}

/// Errors that can occur when stepping or applying decisions
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GameError {
    #[error("Game is not in progress")]
    NotInProgress,

    #[error("Game has already started")]
    AlreadyStarted,

    #[error("Need between 2 and 8 players, got {0}")]
    PlayerCount(usize),

    #[error("Invalid action for current phase")]
    InvalidPhase,

    #[error("Game is waiting for a decision")]
    AwaitingDecision,

    #[error("No decision is pending")]
    NoPendingDecision,

    #[error("Stale or duplicate token")]
    StaleToken,

    #[error("No player {0}")]
    PlayerNotFound(PlayerId),

    #[error("No ownable property at position {0}")]
    PropertyNotFound(PropertyId),

    #[error("{0} is not yours")]
    NotOwner(String),

    #[error("Cannot build on {0}")]
    NotBuildable(String),

    #[error("You don't own the whole group of {0}")]
    IncompleteGroup(String),

    #[error("Part of {0}'s group is mortgaged")]
    GroupMortgaged(String),

    #[error("{0} already has a hotel")]
    MaxBuildings(String),

    #[error("Houses on {0}'s group must stay even")]
    UnevenBuilding(String),

    #[error("{0} has no houses")]
    NoBuildings(String),

    #[error("Sell the houses in {0}'s group first")]
    BuildingsInGroup(String),

    #[error("{0} is already mortgaged")]
    AlreadyMortgaged(String),

    #[error("{0} is not mortgaged")]
    NotMortgaged(String),

    #[error("Cannot afford this: need ${needed}, have ${available}")]
    CannotAfford { needed: u32, available: u32 },

    #[error("Invalid bid: {0}")]
    InvalidBid(String),

    #[error("No auction in progress")]
    NoActiveAuction,

    #[error("Invalid trade: {0}")]
    InvalidTrade(String),

    #[error("No more trades allowed this turn")]
    TradeLimitReached,

    #[error("No active trade")]
    NoActiveTrade,

    #[error("Not in jail")]
    NotInJail,

    #[error("No Get Out of Jail Free card")]
    NoJailCard,

    /// Persisted state is inconsistent; the step must be abandoned
    #[error("Corrupt game state: {0}")]
    Integrity(String),
}

impl GameError {
    /// Integrity errors abort the step; everything else is a rule violation
    pub fn is_integrity(&self) -> bool {
        matches!(self, GameError::Integrity(_))
    }
}

/// Tunable rules and pacing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// End the game after this many turns (winner by net worth)
    pub turn_limit: Option<u32>,
    /// Delay the host waits between steps
    pub step_delay_ms: u64,
    pub starting_money: u32,
    pub go_salary: u32,
    pub jail_fine: u32,
    pub max_trade_attempts_per_turn: u8,
    pub max_actions_per_phase: u8,
    pub max_counter_depth: u8,
    /// Card draws allowed while resolving one landing
    pub max_card_draws: u8,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            turn_limit: None,
            step_delay_ms: 1000,
            starting_money: 1500,
            go_salary: 200,
            jail_fine: 50,
            max_trade_attempts_per_turn: 3,
            max_actions_per_phase: 6,
            max_counter_depth: 3,
            max_card_draws: 2,
        }
    }
}

/// Identifies one scheduled step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepToken {
    pub game_id: Uuid,
    pub revision: u64,
}

/// What the host must do after a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    ScheduleStep {
        token: StepToken,
        delay_ms: u64,
    },
    AwaitDecision {
        decision: PendingDecision,
    },
    Finished {
        winner: Option<PlayerId>,
        reason: EndingReason,
    },
}

/// Result of one transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub events: Vec<GameEvent>,
    pub effect: Effect,
    /// The turn that finished during this transition, if any
    pub closed_turn: Option<Turn>,
}

/// Where a phase handler leaves the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue(TurnPhase),
    Suspend {
        resume_at: TurnPhase,
        player: PlayerId,
        kind: DecisionKind,
        valid_actions: Vec<ActionName>,
        detail: DecisionDetail,
    },
    Over,
}

/// The complete game state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub id: Uuid,
    pub status: GameStatus,
    pub control: Control,
    pub config: GameConfig,
    /// Indexed by seat
    pub players: Vec<Player>,
    pub properties: Vec<Property>,
    pub chance: Deck,
    pub community_chest: Deck,
    pub current_player: PlayerId,
    /// Starts at 1 once the game is started
    pub turn_number: u32,
    pub turn: Option<Turn>,
    pub auction: Option<Auction>,
    /// Every trade ever proposed, in order
    pub trades: Vec<Trade>,
    pub winner: Option<PlayerId>,
    pub ending_reason: Option<EndingReason>,
    /// Bumped on every accepted transition
    pub revision: u64,
    /// Persisted so a retried step reproduces the same dice and shuffles
    rng: ChaCha8Rng,
    #[serde(skip)]
    events: Vec<GameEvent>,
    #[serde(skip)]
    closed_turn: Option<Turn>,
}

impl GameState {
    /// Create a game in `Setup` with players seated in the given order
    pub fn new(
        id: Uuid,
        names: Vec<String>,
        config: GameConfig,
        seed: u64,
    ) -> Result<Self, GameError> {
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&names.len()) {
            return Err(GameError::PlayerCount(names.len()));
        }

        let players = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Player::new(i as PlayerId, name, config.starting_money))
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let chance = Deck::shuffled(DeckKind::Chance, &mut rng);
        let community_chest = Deck::shuffled(DeckKind::CommunityChest, &mut rng);

        Ok(Self {
            id,
            status: GameStatus::Setup,
            control: Control::Running {
                phase: TurnPhase::PreRoll,
            },
            config,
            players,
            properties: Property::all_unowned(),
            chance,
            community_chest,
            current_player: 0,
            turn_number: 0,
            turn: None,
            auction: None,
            trades: Vec::new(),
            winner: None,
            ending_reason: None,
            revision: 0,
            rng,
            events: Vec::new(),
            closed_turn: None,
        })
    }

    /// Create a game with a random seed
    pub fn with_random_seed(
        id: Uuid,
        names: Vec<String>,
        config: GameConfig,
    ) -> Result<Self, GameError> {
        Self::new(id, names, config, rand::thread_rng().gen())
    }

    // ==================== Queries ====================

    pub fn player(&self, id: PlayerId) -> Result<&Player, GameError> {
        self.players
            .get(usize::from(id))
            .ok_or(GameError::PlayerNotFound(id))
    }

    pub(crate) fn player_mut(&mut self, id: PlayerId) -> Result<&mut Player, GameError> {
        self.players
            .get_mut(usize::from(id))
            .ok_or(GameError::PlayerNotFound(id))
    }

    pub fn property(&self, position: PropertyId) -> Option<&Property> {
        rent::find(&self.properties, position)
    }

    pub(crate) fn property_record(&self, position: PropertyId) -> Result<&Property, GameError> {
        self.property(position)
            .ok_or(GameError::PropertyNotFound(position))
    }

    pub(crate) fn property_mut(&mut self, position: PropertyId) -> Result<&mut Property, GameError> {
        self.properties
            .iter_mut()
            .find(|p| p.position == position)
            .ok_or(GameError::PropertyNotFound(position))
    }

    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_active())
    }

    pub fn net_worth(&self, id: PlayerId) -> u32 {
        self.player(id)
            .map(|p| rent::net_worth(&self.properties, id, p.cash))
            .unwrap_or(0)
    }

    pub fn phase(&self) -> TurnPhase {
        match &self.control {
            Control::Running { phase } | Control::Suspended { phase, .. } => *phase,
        }
    }

    pub fn waiting_for_decision(&self) -> bool {
        matches!(self.control, Control::Suspended { .. })
    }

    pub fn pending_decision(&self) -> Option<&PendingDecision> {
        match &self.control {
            Control::Suspended { decision, .. } => Some(decision),
            Control::Running { .. } => None,
        }
    }

    /// Token for the next step, if the machine can step
    pub fn step_token(&self) -> Option<StepToken> {
        match self.control {
            Control::Running { phase } if self.status == GameStatus::InProgress => {
                (phase != TurnPhase::GameOver).then_some(StepToken {
                    game_id: self.id,
                    revision: self.revision,
                })
            }
            _ => None,
        }
    }

    fn ensure_in_progress(&self) -> Result<(), GameError> {
        if self.status != GameStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        Ok(())
    }

    fn current(&self) -> Result<&Player, GameError> {
        self.players
            .get(usize::from(self.current_player))
            .ok_or_else(|| GameError::Integrity(format!("no player {}", self.current_player)))
    }

    fn turn_mut(&mut self) -> Result<&mut Turn, GameError> {
        self.turn
            .as_mut()
            .ok_or_else(|| GameError::Integrity("no open turn".into()))
    }

    /// Record an event and its plain-language form in the turn log
    pub(crate) fn emit(&mut self, event: GameEvent) {
        let line = event.describe(&self.players);
        if let Some(turn) = self.turn.as_mut().or(self.closed_turn.as_mut()) {
            turn.log.push(line);
        }
        self.events.push(event);
    }

    // ==================== Transitions ====================

    /// Move from `Setup` to `InProgress` and open turn 1
    pub fn start(&mut self) -> Result<StepOutcome, GameError> {
        if self.status != GameStatus::Setup {
            return Err(GameError::AlreadyStarted);
        }
        self.status = GameStatus::InProgress;
        self.emit(GameEvent::GameStarted {
            players: self.players.iter().map(|p| p.name.clone()).collect(),
        });
        self.open_turn(0)?;
        Ok(self.finish(Flow::Continue(TurnPhase::PreRoll)))
    }

    /// Process exactly one phase for the current player
    pub fn step(&mut self, token: StepToken) -> Result<StepOutcome, GameError> {
        self.ensure_in_progress()?;
        if token.game_id != self.id || token.revision != self.revision {
            return Err(GameError::StaleToken);
        }
        let phase = match self.control {
            Control::Running { phase } => phase,
            Control::Suspended { .. } => return Err(GameError::AwaitingDecision),
        };

        let flow = match phase {
            TurnPhase::PreRoll => self.pre_roll()?,
            TurnPhase::Rolling => {
                let dice = (self.rng.gen_range(1..=6), self.rng.gen_range(1..=6));
                self.roll(dice)?
            }
            TurnPhase::PostRoll => self.post_roll()?,
            TurnPhase::TurnEnd => self.turn_end()?,
            TurnPhase::GameOver => return Err(GameError::NotInProgress),
        };
        Ok(self.finish(flow))
    }

    /// Run the rolling phase with fixed dice instead of the game's RNG
    pub fn apply_roll(&mut self, dice: (u8, u8)) -> Result<StepOutcome, GameError> {
        self.ensure_in_progress()?;
        if self.control
            != (Control::Running {
                phase: TurnPhase::Rolling,
            })
        {
            return Err(GameError::InvalidPhase);
        }
        if !(1..=6).contains(&dice.0) || !(1..=6).contains(&dice.1) {
            return Err(GameError::InvalidPhase);
        }
        let flow = self.roll(dice)?;
        Ok(self.finish(flow))
    }

    /// Apply the answer to the pending decision named by `token`.
    ///
    /// A decision that is not among the offered actions is replaced by the
    /// decision kind's fallback.
    pub fn resume(
        &mut self,
        token: ResumeToken,
        resolution: Resolution,
    ) -> Result<StepOutcome, GameError> {
        self.ensure_in_progress()?;
        let (phase, pending) = match &self.control {
            Control::Suspended { phase, decision } => (*phase, decision.clone()),
            Control::Running { .. } => return Err(GameError::NoPendingDecision),
        };
        if pending.token != token {
            return Err(GameError::StaleToken);
        }

        let player = pending.player;
        let mut fallback = resolution.is_fallback();
        let mut decision = resolution.decision;
        if !pending.allows(&decision) {
            self.emit(GameEvent::ActionRejected {
                player,
                action: decision.action(),
                reason: format!("not offered for {}", pending.kind),
            });
            decision = pending.kind.fallback();
            fallback = true;
        }
        self.emit(GameEvent::DecisionMade {
            player,
            kind: pending.kind,
            action: decision.action(),
            fallback,
        });

        let flow = match pending.kind {
            DecisionKind::BuyProperty => self.buy_decision(player, decision)?,
            DecisionKind::AuctionBid => self.auction_decision(player, decision)?,
            DecisionKind::JailStrategy => self.jail_decision(player, decision)?,
            DecisionKind::PreRollActions | DecisionKind::PostRollActions => {
                self.turn_action(phase, player, decision)?
            }
            DecisionKind::TradeResponse => self.trade_decision(phase, &pending, decision)?,
        };
        Ok(self.finish(flow))
    }

    /// Terminate the game at any phase, including while suspended
    pub fn abandon(&mut self, reason: impl Into<String>) -> Result<Vec<GameEvent>, GameError> {
        if self.status.is_terminal() {
            return Err(GameError::NotInProgress);
        }
        let reason = EndingReason::Abandoned {
            reason: reason.into(),
        };
        self.status = GameStatus::Abandoned;
        self.control = Control::Running {
            phase: TurnPhase::GameOver,
        };
        self.auction = None;
        self.ending_reason = Some(reason.clone());
        self.revision += 1;
        self.emit(GameEvent::GameOver {
            winner: None,
            reason,
        });
        Ok(std::mem::take(&mut self.events))
    }

    /// Commit a flow: bump the revision, set control and describe the effect
    fn finish(&mut self, flow: Flow) -> StepOutcome {
        self.revision += 1;
        let effect = match flow {
            Flow::Continue(phase) => {
                self.control = Control::Running { phase };
                Effect::ScheduleStep {
                    token: StepToken {
                        game_id: self.id,
                        revision: self.revision,
                    },
                    delay_ms: self.config.step_delay_ms,
                }
            }
            Flow::Suspend {
                resume_at,
                player,
                kind,
                valid_actions,
                detail,
            } => {
                let decision = PendingDecision {
                    token: ResumeToken {
                        game_id: self.id,
                        revision: self.revision,
                        kind,
                    },
                    player,
                    kind,
                    valid_actions,
                    context: self.context(player, resume_at, detail),
                };
                self.control = Control::Suspended {
                    phase: resume_at,
                    decision: decision.clone(),
                };
                Effect::AwaitDecision { decision }
            }
            Flow::Over => {
                self.control = Control::Running {
                    phase: TurnPhase::GameOver,
                };
                Effect::Finished {
                    winner: self.winner,
                    reason: self
                        .ending_reason
                        .clone()
                        .unwrap_or(EndingReason::LastPlayerStanding),
                }
            }
        };
        StepOutcome {
            events: std::mem::take(&mut self.events),
            effect,
            closed_turn: self.closed_turn.take(),
        }
    }

    // ==================== Phases ====================

    fn pre_roll(&mut self) -> Result<Flow, GameError> {
        let player = self.current()?;
        if !player.in_jail {
            return self.offer_turn_actions(TurnPhase::PreRoll);
        }

        let fine = self.config.jail_fine;
        let mut valid_actions = Vec::new();
        if player.cash >= fine {
            valid_actions.push(ActionName::PayFine);
        }
        if player.jail_cards > 0 {
            valid_actions.push(ActionName::UseCard);
        }
        valid_actions.push(ActionName::Roll);
        Ok(Flow::Suspend {
            resume_at: TurnPhase::PreRoll,
            player: player.id,
            kind: DecisionKind::JailStrategy,
            valid_actions,
            detail: DecisionDetail::JailStrategy {
                fine,
                attempts_remaining: player.jail_turns_remaining,
            },
        })
    }

    fn roll(&mut self, dice: (u8, u8)) -> Result<Flow, GameError> {
        let id = self.current()?.id;
        self.turn_mut()?.record_roll(dice);
        self.emit(GameEvent::DiceRolled { player: id, dice });
        let doubles = dice.0 == dice.1;
        let total = i16::from(dice.0 + dice.1);

        if self.current()?.in_jail {
            if doubles {
                let player = self.player_mut(id)?;
                player.release_from_jail();
                player.consecutive_doubles = 1;
                self.emit(GameEvent::ReleasedFromJail {
                    player: id,
                    how: JailRelease::RolledDoubles,
                });
                self.turn_mut()?.extra_roll = true;
                self.move_by(id, total)?;
                return Ok(Flow::Continue(TurnPhase::PostRoll));
            }

            let player = self.player_mut(id)?;
            player.jail_turns_remaining = player.jail_turns_remaining.saturating_sub(1);
            let attempts_remaining = player.jail_turns_remaining;
            self.emit(GameEvent::JailRollFailed {
                player: id,
                attempts_remaining,
            });
            if attempts_remaining == 0 {
                let fine = self.config.jail_fine;
                if self.charge(id, None, fine, Debt::Other("jail fine".into()))? == Charge::Paid {
                    self.player_mut(id)?.release_from_jail();
                    self.emit(GameEvent::ReleasedFromJail {
                        player: id,
                        how: JailRelease::PaidFine,
                    });
                }
            }
            return Ok(Flow::Continue(TurnPhase::TurnEnd));
        }

        let player = self.player_mut(id)?;
        player.consecutive_doubles = if doubles {
            player.consecutive_doubles + 1
        } else {
            0
        };
        if player.consecutive_doubles >= 3 {
            self.emit(GameEvent::ThirdDoubles { player: id });
            self.send_to_jail(id)?;
            return Ok(Flow::Continue(TurnPhase::TurnEnd));
        }

        self.turn_mut()?.extra_roll = doubles;
        self.move_by(id, total)?;
        Ok(Flow::Continue(TurnPhase::PostRoll))
    }

    fn post_roll(&mut self) -> Result<Flow, GameError> {
        let turn = self.turn_mut()?;
        if !turn.landing_resolved {
            turn.landing_resolved = true;
            if let Some(flow) = self.resolve_landing()? {
                return Ok(flow);
            }
        }

        let player = self.current()?;
        if !player.is_active() || player.in_jail {
            return Ok(Flow::Continue(TurnPhase::TurnEnd));
        }
        self.offer_turn_actions(TurnPhase::PostRoll)
    }

    fn turn_end(&mut self) -> Result<Flow, GameError> {
        let player = self.current()?;
        let (id, position, cash) = (player.id, player.position, player.cash);
        let number = self.turn_number;
        self.emit(GameEvent::TurnEnded {
            turn: number,
            player: id,
        });
        let mut turn = self.turn.take().ok_or_else(|| GameError::Integrity("no open turn".into()))?;
        turn.close(position, cash);
        self.closed_turn = Some(turn);

        if self.active_players().count() <= 1 {
            return Ok(self.end_game(EndingReason::LastPlayerStanding));
        }
        if self.config.turn_limit.is_some_and(|limit| number >= limit) {
            return Ok(self.end_game(EndingReason::TurnLimitReached));
        }

        let next = self.next_active_after(id)?;
        self.open_turn(next)?;
        Ok(Flow::Continue(TurnPhase::PreRoll))
    }

    fn open_turn(&mut self, player: PlayerId) -> Result<(), GameError> {
        self.turn_number += 1;
        self.current_player = player;
        let p = self.player_mut(player)?;
        p.consecutive_doubles = 0;
        let (position, cash) = (p.position, p.cash);
        self.turn = Some(Turn::new(self.id, self.turn_number, player, position, cash));
        self.emit(GameEvent::TurnStarted {
            turn: self.turn_number,
            player,
        });
        Ok(())
    }

    fn next_active_after(&self, id: PlayerId) -> Result<PlayerId, GameError> {
        let count = self.players.len();
        (1..=count)
            .map(|offset| (usize::from(id) + offset) % count)
            .find(|&seat| self.players[seat].is_active())
            .map(|seat| seat as PlayerId)
            .ok_or_else(|| GameError::Integrity("no active players".into()))
    }

    /// Rank survivors by net worth (ties by seat) and close the game
    fn end_game(&mut self, reason: EndingReason) -> Flow {
        let mut ranking: Vec<(PlayerId, u32)> = self
            .active_players()
            .map(|p| (p.id, rent::net_worth(&self.properties, p.id, p.cash)))
            .collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (rank, (id, worth)) in ranking.iter().enumerate() {
            if let Some(player) = self.players.get_mut(usize::from(*id)) {
                player.final_position = Some(rank as u8 + 1);
                player.final_net_worth = Some(*worth);
            }
        }
        self.winner = ranking.first().map(|(id, _)| *id);
        self.status = GameStatus::Completed;
        self.ending_reason = Some(reason.clone());
        self.auction = None;
        self.emit(GameEvent::GameOver {
            winner: self.winner,
            reason,
        });
        Flow::Over
    }

    // ==================== Movement and landing ====================

    fn move_by(&mut self, id: PlayerId, steps: i16) -> Result<(), GameError> {
        let player = self.player_mut(id)?;
        let from = player.position;
        let passed = player.advance(steps);
        let to = player.position;
        self.emit(GameEvent::Moved { player: id, from, to });
        if passed {
            self.pay_salary(id)?;
        }
        Ok(())
    }

    fn move_to(&mut self, id: PlayerId, target: u8) -> Result<(), GameError> {
        let player = self.player_mut(id)?;
        let from = player.position;
        let passed = player.advance_to(target);
        self.emit(GameEvent::Moved {
            player: id,
            from,
            to: target,
        });
        if passed {
            self.pay_salary(id)?;
        }
        Ok(())
    }

    fn pay_salary(&mut self, id: PlayerId) -> Result<(), GameError> {
        let amount = self.config.go_salary;
        self.player_mut(id)?.receive(amount);
        if let Some(turn) = self.turn.as_mut() {
            turn.passed_go = true;
        }
        self.emit(GameEvent::SalaryCollected { player: id, amount });
        Ok(())
    }

    fn send_to_jail(&mut self, id: PlayerId) -> Result<(), GameError> {
        self.player_mut(id)?.send_to_jail();
        if let Some(turn) = self.turn.as_mut() {
            turn.extra_roll = false;
        }
        self.emit(GameEvent::SentToJail { player: id });
        Ok(())
    }

    /// Resolve the current player's space. Card moves loop, bounded by
    /// `max_card_draws`.
    fn resolve_landing(&mut self) -> Result<Option<Flow>, GameError> {
        let player = self.current()?;
        let (id, position) = (player.id, player.position);
        self.turn_mut()?.landed_on = Some(position);
        let mut modifier = RentModifier::Standard;
        let mut draws = 0;

        loop {
            let player = self.player(id)?;
            if !player.is_active() || player.in_jail {
                return Ok(None);
            }
            let position = player.position;
            let deck = match space(position) {
                Space::Property(property) => return self.land_on_property(id, property, modifier),
                Space::Tax { amount } => {
                    self.charge(id, None, amount, Debt::Other(space_name(position).into()))?;
                    return Ok(None);
                }
                Space::GoToJail => {
                    self.send_to_jail(id)?;
                    return Ok(None);
                }
                Space::Chance => DeckKind::Chance,
                Space::CommunityChest => DeckKind::CommunityChest,
                Space::Go | Space::Jail | Space::FreeParking => return Ok(None),
            };

            if draws >= self.config.max_card_draws {
                return Ok(None);
            }
            draws += 1;
            match self.draw_card(id, deck)? {
                Some(next) => modifier = next,
                None => return Ok(None),
            }
        }
    }

    fn land_on_property(
        &mut self,
        id: PlayerId,
        position: PropertyId,
        modifier: RentModifier,
    ) -> Result<Option<Flow>, GameError> {
        let property = self.property_record(position)?.clone();
        match property.owner {
            None => {
                let price = property.deed().price;
                if self.player(id)?.cash < price {
                    return self.start_auction(position).map(Some);
                }
                Ok(Some(Flow::Suspend {
                    resume_at: TurnPhase::PostRoll,
                    player: id,
                    kind: DecisionKind::BuyProperty,
                    valid_actions: vec![ActionName::Buy, ActionName::Auction],
                    detail: DecisionDetail::BuyProperty {
                        property: self.property_view(&property),
                    },
                }))
            }
            Some(owner) if owner == id => Ok(None),
            Some(owner) => {
                if property.mortgaged {
                    self.emit(GameEvent::NoRentMortgaged {
                        player: id,
                        property: position,
                    });
                    return Ok(None);
                }
                let dice = self.turn.as_ref().map_or(7, Turn::dice_total);
                let amount = rent::rent(&property, &self.properties, id, dice, modifier);
                self.charge(id, Some(owner), amount, Debt::Rent(position))?;
                Ok(None)
            }
        }
    }

    /// Draw and apply a card. Returns the rent modifier to continue with
    /// when the card moved the player, `None` when the landing is settled.
    fn draw_card(&mut self, id: PlayerId, kind: DeckKind) -> Result<Option<RentModifier>, GameError> {
        let index = match kind {
            DeckKind::Chance => self.chance.draw(&mut self.rng),
            DeckKind::CommunityChest => self.community_chest.draw(&mut self.rng),
        };
        let card = card_at(kind, index);
        self.emit(GameEvent::CardDrawn {
            player: id,
            deck: kind,
            text: card.text.to_string(),
        });
        let reason = || Debt::Other(format!("{} card", kind.name()));

        match card.effect {
            CardEffect::MoveTo(target) => {
                self.move_to(id, target)?;
                return Ok(Some(RentModifier::Standard));
            }
            CardEffect::MoveRelative(steps) => {
                self.move_by(id, i16::from(steps))?;
                return Ok(Some(RentModifier::Standard));
            }
            CardEffect::MoveToNearest(target) => {
                let from = self.player(id)?.position;
                self.move_to(id, nearest(from, target))?;
                return Ok(Some(match target {
                    Nearest::Railroad => RentModifier::NearestRailroad,
                    Nearest::Utility => RentModifier::NearestUtility,
                }));
            }
            CardEffect::Receive(amount) => {
                self.player_mut(id)?.receive(amount);
                self.emit(GameEvent::Payment {
                    from: None,
                    to: Some(id),
                    amount,
                    reason: card.text.to_string(),
                });
            }
            CardEffect::Pay(amount) => {
                self.charge(id, None, amount, reason())?;
            }
            CardEffect::PayEach(amount) => {
                let others: Vec<PlayerId> = self
                    .active_players()
                    .filter(|p| p.id != id)
                    .map(|p| p.id)
                    .collect();
                for other in others {
                    if self.charge(id, Some(other), amount, reason())? == Charge::Bankrupt {
                        break;
                    }
                }
            }
            CardEffect::CollectFromEach(amount) => {
                let others: Vec<PlayerId> = self
                    .active_players()
                    .filter(|p| p.id != id)
                    .map(|p| p.id)
                    .collect();
                for other in others {
                    self.charge(other, Some(id), amount, reason())?;
                }
            }
            CardEffect::PayPerBuilding { house, hotel } => {
                let (houses, hotels) = building_counts(
                    self.properties
                        .iter()
                        .filter(|p| p.owner == Some(id))
                        .map(|p| p.houses),
                );
                self.charge(id, None, houses * house + hotels * hotel, reason())?;
            }
            CardEffect::GoToJail => self.send_to_jail(id)?,
            CardEffect::GetOutOfJailFree => {
                self.player_mut(id)?.jail_cards += 1;
                self.emit(GameEvent::JailCardReceived { player: id });
            }
        }
        Ok(None)
    }

    // ==================== Decisions ====================

    fn buy_decision(&mut self, id: PlayerId, decision: Decision) -> Result<Flow, GameError> {
        let position = self.current()?.position;
        if decision == Decision::Buy {
            let price = self.property_record(position)?.deed().price;
            let player = self.player_mut(id)?;
            let available = player.cash;
            if player.try_pay(price) {
                self.property_mut(position)?.owner = Some(id);
                self.emit(GameEvent::PropertyPurchased {
                    player: id,
                    property: position,
                    price,
                });
                return Ok(Flow::Continue(TurnPhase::PostRoll));
            }
            self.emit(GameEvent::ActionRejected {
                player: id,
                action: ActionName::Buy,
                reason: GameError::CannotAfford {
                    needed: price,
                    available,
                }
                .to_string(),
            });
        }
        self.start_auction(position)
    }

    fn jail_decision(&mut self, id: PlayerId, decision: Decision) -> Result<Flow, GameError> {
        let fine = self.config.jail_fine;
        let result = match decision {
            Decision::PayFine => {
                let player = self.player_mut(id)?;
                let available = player.cash;
                if player.try_pay(fine) {
                    self.emit(GameEvent::Payment {
                        from: Some(id),
                        to: None,
                        amount: fine,
                        reason: "jail fine".into(),
                    });
                    Ok(JailRelease::PaidFine)
                } else {
                    Err(GameError::CannotAfford {
                        needed: fine,
                        available,
                    })
                }
            }
            Decision::UseJailCard => {
                let player = self.player_mut(id)?;
                if player.jail_cards > 0 {
                    player.jail_cards -= 1;
                    Ok(JailRelease::UsedCard)
                } else {
                    Err(GameError::NoJailCard)
                }
            }
            _ => return Ok(Flow::Continue(TurnPhase::Rolling)),
        };

        match result {
            Ok(how) => {
                self.player_mut(id)?.release_from_jail();
                self.emit(GameEvent::ReleasedFromJail { player: id, how });
                Ok(Flow::Continue(TurnPhase::PreRoll))
            }
            Err(e) => {
                self.emit(GameEvent::ActionRejected {
                    player: id,
                    action: decision.action(),
                    reason: e.to_string(),
                });
                Ok(Flow::Continue(TurnPhase::Rolling))
            }
        }
    }

    /// Ask for pre/post roll actions, or move on when only `done` is possible
    fn offer_turn_actions(&mut self, phase: TurnPhase) -> Result<Flow, GameError> {
        let id = self.current()?.id;
        let taken = self.turn_mut()?.phase_actions;
        if taken >= self.config.max_actions_per_phase {
            return self.end_action_phase(phase);
        }
        let (valid_actions, detail) = self.turn_options(id, phase)?;
        if valid_actions == [ActionName::Done] {
            return self.end_action_phase(phase);
        }
        let kind = if phase == TurnPhase::PreRoll {
            DecisionKind::PreRollActions
        } else {
            DecisionKind::PostRollActions
        };
        Ok(Flow::Suspend {
            resume_at: phase,
            player: id,
            kind,
            valid_actions,
            detail,
        })
    }

    fn end_action_phase(&mut self, phase: TurnPhase) -> Result<Flow, GameError> {
        if phase == TurnPhase::PreRoll {
            return Ok(Flow::Continue(TurnPhase::Rolling));
        }
        let player = self.current()?;
        if !player.is_active() || player.in_jail {
            return Ok(Flow::Continue(TurnPhase::TurnEnd));
        }
        let turn = self.turn_mut()?;
        if turn.extra_roll {
            turn.extra_roll = false;
            turn.phase_actions = 0;
            return Ok(Flow::Continue(TurnPhase::PreRoll));
        }
        Ok(Flow::Continue(TurnPhase::TurnEnd))
    }

    fn turn_action(
        &mut self,
        phase: TurnPhase,
        id: PlayerId,
        decision: Decision,
    ) -> Result<Flow, GameError> {
        let action = decision.action();
        let result = match decision {
            Decision::Done => return self.end_action_phase(phase),
            Decision::Build { property, count } => self.build(id, property, count),
            Decision::SellHouse { property } => self.sell_house(id, property),
            Decision::Mortgage { property } => self.mortgage(id, property),
            Decision::Unmortgage { property } => self.unmortgage(id, property),
            Decision::ProposeTrade {
                recipient,
                offer,
                request,
            } if phase == TurnPhase::PreRoll => {
                match self.propose_trade(id, recipient, offer, request) {
                    Ok(trade) => {
                        self.turn_mut()?.phase_actions += 1;
                        return self.trade_response_flow(trade, phase);
                    }
                    Err(e) => Err(e),
                }
            }
            _ => Err(GameError::InvalidPhase),
        };

        match result {
            Ok(()) => self.after_turn_action(phase),
            Err(e) if e.is_integrity() => Err(e),
            Err(e) => {
                self.emit(GameEvent::ActionRejected {
                    player: id,
                    action,
                    reason: e.to_string(),
                });
                self.end_action_phase(phase)
            }
        }
    }

    fn after_turn_action(&mut self, phase: TurnPhase) -> Result<Flow, GameError> {
        self.turn_mut()?.phase_actions += 1;
        self.continue_actions(phase)
    }

    /// Re-offer the action decision unless the phase budget is spent
    fn continue_actions(&mut self, phase: TurnPhase) -> Result<Flow, GameError> {
        if self.turn_mut()?.phase_actions >= self.config.max_actions_per_phase {
            return self.end_action_phase(phase);
        }
        Ok(Flow::Continue(phase))
    }

    fn trade_decision(
        &mut self,
        phase: TurnPhase,
        pending: &PendingDecision,
        decision: Decision,
    ) -> Result<Flow, GameError> {
        let DecisionDetail::TradeResponse { trade } = &pending.context.detail else {
            return Err(GameError::Integrity("trade response without a trade".into()));
        };
        let id = trade.id;
        let result = match decision {
            Decision::AcceptTrade => self.accept_trade(id),
            Decision::CounterTrade { offer, request } => {
                match self.counter_trade(id, offer, request) {
                    Ok(counter) => return self.trade_response_flow(counter, phase),
                    Err(e) => Err(e),
                }
            }
            _ => self.reject_trade(id),
        };
        match result {
            Err(e) if e.is_integrity() => Err(e),
            // Accept/counter failures already closed the trade with a reason
            _ => self.continue_actions(phase),
        }
    }

    // ==================== Improvements ====================

    fn build(&mut self, id: PlayerId, position: PropertyId, count: u8) -> Result<(), GameError> {
        let cost_each = self
            .property_record(position)?
            .deed()
            .house_cost()
            .ok_or_else(|| GameError::NotBuildable(space_name(position).into()))?;
        let mut built = 0;
        for _ in 0..count.max(1) {
            let check = rent::can_build(&self.properties, position, id).and_then(|()| {
                let cash = self.player(id)?.cash;
                if cash < cost_each {
                    Err(GameError::CannotAfford {
                        needed: cost_each,
                        available: cash,
                    })
                } else {
                    Ok(())
                }
            });
            if let Err(e) = check {
                if built == 0 {
                    return Err(e);
                }
                break;
            }
            self.player_mut(id)?.cash -= cost_each;
            self.property_mut(position)?.houses += 1;
            built += 1;
        }
        self.emit(GameEvent::HousesBuilt {
            player: id,
            property: position,
            count: built,
            cost: cost_each * u32::from(built),
        });
        Ok(())
    }

    fn sell_house(&mut self, id: PlayerId, position: PropertyId) -> Result<(), GameError> {
        rent::can_sell_house(&self.properties, position, id)?;
        let refund = self.property_record(position)?.deed().house_cost().unwrap_or(0) / 2;
        self.property_mut(position)?.houses -= 1;
        self.player_mut(id)?.receive(refund);
        self.emit(GameEvent::HouseSold {
            player: id,
            property: position,
            refund,
        });
        Ok(())
    }

    fn mortgage(&mut self, id: PlayerId, position: PropertyId) -> Result<(), GameError> {
        rent::can_mortgage(&self.properties, position, id)?;
        let amount = self.property_record(position)?.deed().mortgage_value();
        self.property_mut(position)?.mortgaged = true;
        self.player_mut(id)?.receive(amount);
        self.emit(GameEvent::Mortgaged {
            player: id,
            property: position,
            amount,
        });
        Ok(())
    }

    fn unmortgage(&mut self, id: PlayerId, position: PropertyId) -> Result<(), GameError> {
        rent::can_unmortgage(&self.properties, position, id)?;
        let cost = self.property_record(position)?.deed().unmortgage_cost();
        let player = self.player_mut(id)?;
        let available = player.cash;
        if !player.try_pay(cost) {
            return Err(GameError::CannotAfford {
                needed: cost,
                available,
            });
        }
        self.property_mut(position)?.mortgaged = false;
        self.emit(GameEvent::Unmortgaged {
            player: id,
            property: position,
            cost,
        });
        Ok(())
    }

    // ==================== Decision context ====================

    /// Legal pre/post-roll actions and the matching context detail
    fn turn_options(
        &self,
        id: PlayerId,
        phase: TurnPhase,
    ) -> Result<(Vec<ActionName>, DecisionDetail), GameError> {
        let cash = self.player(id)?.cash;
        let owned: Vec<&Property> = self
            .properties
            .iter()
            .filter(|p| p.owner == Some(id))
            .collect();
        let views = |keep: &dyn Fn(&Property) -> bool| -> Vec<PropertyView> {
            owned
                .iter()
                .copied()
                .filter(|p| keep(p))
                .map(|p| self.property_view(p))
                .collect()
        };

        let buildable = views(&|p| {
            rent::can_build(&self.properties, p.position, id).is_ok()
                && p.deed().house_cost().is_some_and(|c| c <= cash)
        });
        let sellable = views(&|p| rent::can_sell_house(&self.properties, p.position, id).is_ok());
        let mortgageable = views(&|p| rent::can_mortgage(&self.properties, p.position, id).is_ok());
        let unmortgageable = views(&|p| {
            rent::can_unmortgage(&self.properties, p.position, id).is_ok()
                && p.deed().unmortgage_cost() <= cash
        });

        let attempts = self.turn.as_ref().map_or(0, |t| t.trade_attempts);
        let has_partner = self.active_players().any(|p| p.id != id);
        let trades_remaining = if phase == TurnPhase::PreRoll && has_partner {
            self.config.max_trade_attempts_per_turn.saturating_sub(attempts)
        } else {
            0
        };

        let mut valid = Vec::new();
        if !buildable.is_empty() {
            valid.push(ActionName::Build);
        }
        if !sellable.is_empty() {
            valid.push(ActionName::SellHouse);
        }
        if !mortgageable.is_empty() {
            valid.push(ActionName::Mortgage);
        }
        if !unmortgageable.is_empty() {
            valid.push(ActionName::Unmortgage);
        }
        if trades_remaining > 0 {
            valid.push(ActionName::Trade);
        }
        valid.push(ActionName::Done);

        Ok((
            valid,
            DecisionDetail::TurnActions {
                buildable,
                sellable,
                mortgageable,
                unmortgageable,
                trades_remaining,
            },
        ))
    }

    pub fn property_view(&self, property: &Property) -> PropertyView {
        let deed = property.deed();
        PropertyView {
            position: property.position,
            name: deed.name.to_string(),
            group: deed.group(),
            price: deed.price,
            owner: property.owner,
            houses: property.houses,
            mortgaged: property.mortgaged,
            house_cost: deed.house_cost(),
            mortgage_value: deed.mortgage_value(),
            unmortgage_cost: deed.unmortgage_cost(),
            current_rent: rent::rent(
                property,
                &self.properties,
                PlayerId::MAX,
                7,
                RentModifier::Standard,
            ),
        }
    }

    pub fn player_view(&self, player: &Player) -> PlayerView {
        PlayerView {
            id: player.id,
            name: player.name.clone(),
            cash: player.cash,
            position: player.position,
            in_jail: player.in_jail,
            jail_cards: player.jail_cards,
            net_worth: rent::net_worth(&self.properties, player.id, player.cash),
            properties: self
                .properties
                .iter()
                .filter(|p| p.owner == Some(player.id))
                .map(|p| p.position)
                .collect(),
        }
    }

    fn context(&self, id: PlayerId, phase: TurnPhase, detail: DecisionDetail) -> DecisionContext {
        let me = self
            .players
            .get(usize::from(id))
            .map(|p| self.player_view(p))
            .unwrap_or_else(|| self.player_view(&Player::new(id, String::new(), 0)));
        DecisionContext {
            game_id: self.id,
            turn_number: self.turn_number,
            phase,
            me,
            opponents: self
                .active_players()
                .filter(|p| p.id != id)
                .map(|p| self.player_view(p))
                .collect(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::TradeBundle;
    use crate::trade::TradeStatus;
    use pretty_assertions::assert_eq;

    fn names(n: usize) -> Vec<String> {
        ["Ada", "Bob", "Cy", "Dee"][..n]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn started(n: usize) -> GameState {
        let mut game = GameState::new(Uuid::nil(), names(n), GameConfig::default(), 11).unwrap();
        game.start().unwrap();
        game
    }

    fn step(game: &mut GameState) -> StepOutcome {
        let token = game.step_token().expect("game should be runnable");
        game.step(token).unwrap()
    }

    /// Step through pre_roll, answering `done` if actions are offered
    fn to_rolling(game: &mut GameState) {
        step(game);
        if let Some(pending) = game.pending_decision().cloned() {
            assert_eq!(pending.kind, DecisionKind::PreRollActions);
            game.resume(pending.token, Decision::Done.into()).unwrap();
        }
        assert_eq!(game.phase(), TurnPhase::Rolling);
    }

    #[test]
    fn test_new_game_validation() {
        assert!(matches!(
            GameState::new(Uuid::nil(), names(1), GameConfig::default(), 0),
            Err(GameError::PlayerCount(1))
        ));
        let game = GameState::new(Uuid::nil(), names(4), GameConfig::default(), 0).unwrap();
        assert_eq!(game.status, GameStatus::Setup);
        assert_eq!(game.players.len(), 4);
        assert_eq!(game.properties.len(), 28);
        assert!(game.players.iter().all(|p| p.cash == 1500));
        assert_eq!(game.step_token(), None);
    }

    #[test]
    fn test_start_opens_first_turn() {
        let mut game = GameState::new(Uuid::nil(), names(2), GameConfig::default(), 0).unwrap();
        let outcome = game.start().unwrap();
        assert_eq!(game.status, GameStatus::InProgress);
        assert_eq!(game.turn_number, 1);
        assert_eq!(game.current_player, 0);
        assert!(matches!(outcome.effect, Effect::ScheduleStep { .. }));
        assert!(matches!(game.start(), Err(GameError::AlreadyStarted)));
    }

    #[test]
    fn test_stale_step_token_is_rejected() {
        let mut game = started(2);
        let token = game.step_token().unwrap();
        game.step(token).unwrap();
        let revision = game.revision;
        assert_eq!(game.step(token), Err(GameError::StaleToken));
        assert_eq!(game.revision, revision);
    }

    #[test]
    fn test_pre_roll_offers_trade_and_done() {
        let mut game = started(2);
        step(&mut game);
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.kind, DecisionKind::PreRollActions);
        assert_eq!(pending.valid_actions, vec![ActionName::Trade, ActionName::Done]);
        assert_eq!(pending.context.opponents.len(), 1);
        game.resume(pending.token, Decision::Done.into()).unwrap();
        assert_eq!(game.phase(), TurnPhase::Rolling);
    }

    #[test]
    fn test_pre_roll_with_only_done_skips_the_decision() {
        let config = GameConfig {
            max_trade_attempts_per_turn: 0,
            ..GameConfig::default()
        };
        let mut game = GameState::new(Uuid::nil(), names(2), config, 11).unwrap();
        game.start().unwrap();
        step(&mut game);
        assert_eq!(game.phase(), TurnPhase::Rolling);
        assert!(!game.waiting_for_decision());
    }

    #[test]
    fn test_three_doubles_sends_to_jail_without_moving() {
        let mut game = started(2);
        game.players[0].consecutive_doubles = 2;
        game.players[0].position = 20;
        to_rolling(&mut game);
        let outcome = game.apply_roll((4, 4)).unwrap();

        let player = &game.players[0];
        assert!(player.in_jail);
        assert_eq!(player.position, 10);
        assert_eq!(game.phase(), TurnPhase::TurnEnd);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::ThirdDoubles { player: 0 })));
        assert!(!outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::Moved { .. })));
    }

    #[test]
    fn test_doubles_passing_go_collects_salary_and_rolls_again() {
        let mut game = started(2);
        game.players[0].position = 29;
        to_rolling(&mut game);
        game.apply_roll((6, 6)).unwrap();

        assert_eq!(game.players[0].position, 1);
        assert_eq!(game.players[0].cash, 1700);
        let turn = game.turn.as_ref().unwrap();
        assert!(turn.passed_go);
        assert!(turn.extra_roll);
        assert!(turn.was_doubles);

        // Mediterranean Avenue is for sale
        step(&mut game);
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.kind, DecisionKind::BuyProperty);
        assert_eq!(game.turn.as_ref().unwrap().landed_on, Some(1));
        game.resume(pending.token, Decision::Buy.into()).unwrap();
        assert_eq!(game.property(1).unwrap().owner, Some(0));

        // Done after the purchase; the extra roll goes back to pre_roll
        step(&mut game);
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.kind, DecisionKind::PostRollActions);
        assert_eq!(
            pending.valid_actions,
            vec![ActionName::Mortgage, ActionName::Done]
        );
        game.resume(pending.token, Decision::Done.into()).unwrap();
        assert_eq!(game.phase(), TurnPhase::PreRoll);
        assert_eq!(game.current_player, 0);
    }

    #[test]
    fn test_rent_is_charged_once() {
        let mut game = started(2);
        game.property_mut(39).unwrap().owner = Some(1);
        game.players[0].position = 35;
        to_rolling(&mut game);
        game.apply_roll((1, 3)).unwrap();
        step(&mut game);
        assert_eq!(game.players[0].cash, 1450);
        assert_eq!(game.players[1].cash, 1550);
        assert!(game.turn.as_ref().unwrap().landing_resolved);
    }

    #[test]
    fn test_jail_forced_fine_bankruptcy() {
        let mut game = started(3);
        let player = &mut game.players[0];
        player.send_to_jail();
        player.jail_turns_remaining = 1;
        player.cash = 30;

        step(&mut game);
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.kind, DecisionKind::JailStrategy);
        assert_eq!(pending.valid_actions, vec![ActionName::Roll]);
        game.resume(pending.token, Decision::RollForDoubles.into())
            .unwrap();
        assert_eq!(game.phase(), TurnPhase::Rolling);

        game.apply_roll((1, 2)).unwrap();
        let player = &game.players[0];
        assert!(player.bankrupt);
        assert_eq!(player.cash, 0);
        assert_eq!(player.final_position, Some(3));
        assert_eq!(game.phase(), TurnPhase::TurnEnd);
    }

    #[test]
    fn test_jail_fine_paid_from_cash() {
        let mut game = started(2);
        game.players[0].send_to_jail();
        step(&mut game);
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(
            pending.valid_actions,
            vec![ActionName::PayFine, ActionName::Roll]
        );
        game.resume(pending.token, Decision::PayFine.into()).unwrap();
        assert!(!game.players[0].in_jail);
        assert_eq!(game.players[0].cash, 1450);
        assert_eq!(game.phase(), TurnPhase::PreRoll);
    }

    #[test]
    fn test_leaving_jail_on_doubles() {
        let mut game = started(2);
        game.players[0].send_to_jail();
        step(&mut game);
        let token = game.pending_decision().unwrap().token;
        game.resume(token, Decision::RollForDoubles.into()).unwrap();
        game.apply_roll((2, 2)).unwrap();

        let player = &game.players[0];
        assert!(!player.in_jail);
        assert_eq!(player.position, 14);
        assert_eq!(player.consecutive_doubles, 1);
        assert_eq!(game.phase(), TurnPhase::PostRoll);
    }

    #[test]
    fn test_unoffered_decision_falls_back() {
        let mut game = started(2);
        game.players[0].send_to_jail();
        game.players[0].cash = 10;
        step(&mut game);
        let token = game.pending_decision().unwrap().token;
        let outcome = game.resume(token, Decision::PayFine.into()).unwrap();
        assert!(outcome.events.iter().any(|e| matches!(
            e,
            GameEvent::DecisionMade {
                fallback: true,
                action: ActionName::Roll,
                ..
            }
        )));
        assert_eq!(game.phase(), TurnPhase::Rolling);
    }

    #[test]
    fn test_duplicate_resume_is_rejected() {
        let mut game = started(2);
        game.players[0].send_to_jail();
        step(&mut game);
        let token = game.pending_decision().unwrap().token;
        game.resume(token, Decision::RollForDoubles.into()).unwrap();
        assert_eq!(
            game.resume(token, Decision::RollForDoubles.into()),
            Err(GameError::NoPendingDecision)
        );
    }

    #[test]
    fn test_declined_purchase_goes_to_auction() {
        let mut game = started(3);
        game.players[0].position = 35;
        to_rolling(&mut game);
        game.apply_roll((1, 3)).unwrap();
        step(&mut game);
        let token = game.pending_decision().unwrap().token;
        game.resume(token, Decision::DeclineBuy.into()).unwrap();

        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.kind, DecisionKind::AuctionBid);
        assert_eq!(pending.player, 0);
        game.resume(pending.token, Decision::Bid { amount: 100 }.into())
            .unwrap();
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.player, 1);
        game.resume(pending.token, Decision::Bid { amount: 150 }.into())
            .unwrap();
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.player, 2);
        let outcome = game.resume(pending.token, Decision::PassBid.into()).unwrap();

        assert!(outcome.events.contains(&GameEvent::AuctionWon {
            player: 1,
            property: 39,
            amount: 150
        }));
        assert_eq!(game.property(39).unwrap().owner, Some(1));
        assert_eq!(game.players[1].cash, 1350);
        assert!(game.auction.is_none());
        assert_eq!(game.phase(), TurnPhase::PostRoll);
    }

    #[test]
    fn test_build_loop_and_rejection() {
        let mut game = started(2);
        for p in [37, 39] {
            game.property_mut(p).unwrap().owner = Some(0);
        }
        step(&mut game);
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.kind, DecisionKind::PreRollActions);
        assert!(pending.valid_actions.contains(&ActionName::Build));

        game.resume(
            pending.token,
            Decision::Build {
                property: 39,
                count: 1,
            }
            .into(),
        )
        .unwrap();
        assert_eq!(game.property(39).unwrap().houses, 1);
        assert_eq!(game.players[0].cash, 1300);
        assert_eq!(game.phase(), TurnPhase::PreRoll);

        // Re-offered; an uneven build is rejected and ends the phase
        step(&mut game);
        let token = game.pending_decision().unwrap().token;
        let outcome = game
            .resume(
                token,
                Decision::Build {
                    property: 39,
                    count: 1,
                }
                .into(),
            )
            .unwrap();
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::ActionRejected { .. })));
        assert_eq!(game.property(39).unwrap().houses, 1);
        assert_eq!(game.phase(), TurnPhase::Rolling);
    }

    #[test]
    fn test_turn_limit_ranks_by_net_worth() {
        let config = GameConfig {
            turn_limit: Some(1),
            ..GameConfig::default()
        };
        let mut game = GameState::new(Uuid::nil(), names(3), config, 5).unwrap();
        game.start().unwrap();
        game.players[2].cash = 2000;
        game.players[1].cash = 1000;
        game.control = Control::Running {
            phase: TurnPhase::TurnEnd,
        };

        let outcome = step(&mut game);
        assert!(matches!(
            outcome.effect,
            Effect::Finished {
                winner: Some(2),
                reason: EndingReason::TurnLimitReached
            }
        ));
        assert_eq!(game.status, GameStatus::Completed);
        assert_eq!(game.players[2].final_position, Some(1));
        assert_eq!(game.players[0].final_position, Some(2));
        assert_eq!(game.players[1].final_position, Some(3));
        assert_eq!(outcome.closed_turn.unwrap().number, 1);
        assert_eq!(game.step_token(), None);
    }

    #[test]
    fn test_abandon_while_suspended() {
        let mut game = started(2);
        game.players[0].send_to_jail();
        step(&mut game);
        let token = game.pending_decision().unwrap().token;
        game.abandon("watchdog").unwrap();
        assert_eq!(game.status, GameStatus::Abandoned);
        assert_eq!(
            game.resume(token, Decision::PayFine.into()),
            Err(GameError::NotInProgress)
        );
        assert_eq!(game.abandon("again"), Err(GameError::NotInProgress));
    }

    /// Put the current player on `position` with the given card order and roll `dice`
    fn land_with_cards(
        game: &mut GameState,
        position: u8,
        chance: &[u8],
        chest: &[u8],
        dice: (u8, u8),
    ) {
        game.players[0].position = position;
        game.chance.remaining = chance.iter().copied().collect();
        game.community_chest.remaining = chest.iter().copied().collect();
        to_rolling(game);
        game.apply_roll(dice).unwrap();
        step(game);
    }

    #[test]
    fn test_card_move_draws_a_second_card() {
        let mut game = started(2);
        // Chance 36, "Go Back 3 Spaces" onto Community Chest 33, "Bank error" pays 200
        land_with_cards(&mut game, 32, &[9], &[1], (1, 3));

        assert_eq!(game.players[0].position, 33);
        assert_eq!(game.players[0].cash, 1700);
        assert!(game.chance.is_empty());
        assert!(game.community_chest.is_empty());
        assert_eq!(game.phase(), TurnPhase::TurnEnd);

        let closed = step(&mut game).closed_turn.unwrap();
        assert_eq!(closed.landed_on, Some(36));
        assert!(!closed.was_doubles);
        assert_eq!(closed.position_after, Some(33));
        assert_eq!(closed.cash_after, Some(1700));
    }

    #[test]
    fn test_card_chain_stops_at_draw_limit() {
        let config = GameConfig {
            max_card_draws: 1,
            ..GameConfig::default()
        };
        let mut game = GameState::new(Uuid::nil(), names(2), config, 11).unwrap();
        game.start().unwrap();
        land_with_cards(&mut game, 32, &[9], &[1], (1, 3));

        // Moved back onto Community Chest but no second card is drawn
        assert_eq!(game.players[0].position, 33);
        assert_eq!(game.players[0].cash, 1500);
        assert_eq!(game.community_chest.len(), 1);
        assert_eq!(game.turn.as_ref().unwrap().landed_on, Some(36));
    }

    #[test]
    fn test_nearest_railroad_card_doubles_rent() {
        let mut game = started(2);
        game.property_mut(15).unwrap().owner = Some(1);
        land_with_cards(&mut game, 3, &[4], &[], (1, 3));

        assert_eq!(game.players[0].position, 15);
        assert_eq!(game.players[0].cash, 1450);
        assert_eq!(game.players[1].cash, 1550);
    }

    #[test]
    fn test_nearest_utility_card_charges_ten_times_dice() {
        let mut game = started(2);
        game.property_mut(28).unwrap().owner = Some(1);
        land_with_cards(&mut game, 18, &[6], &[], (1, 3));

        assert_eq!(game.players[0].position, 28);
        assert_eq!(game.players[0].cash, 1460);
        assert_eq!(game.players[1].cash, 1540);
    }

    #[test]
    fn test_trade_counter_and_accept_in_pre_roll() {
        let mut game = started(2);
        game.property_mut(1).unwrap().owner = Some(0);
        step(&mut game);
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.kind, DecisionKind::PreRollActions);
        game.resume(
            pending.token,
            Decision::ProposeTrade {
                recipient: 1,
                offer: TradeBundle::properties(vec![1]),
                request: TradeBundle::money(100),
            }
            .into(),
        )
        .unwrap();

        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.kind, DecisionKind::TradeResponse);
        assert_eq!(pending.player, 1);
        game.resume(
            pending.token,
            Decision::CounterTrade {
                offer: TradeBundle::money(80),
                request: TradeBundle::properties(vec![1]),
            }
            .into(),
        )
        .unwrap();

        // The counter goes back to Ada
        let pending = game.pending_decision().unwrap().clone();
        assert_eq!(pending.kind, DecisionKind::TradeResponse);
        assert_eq!(pending.player, 0);
        game.resume(pending.token, Decision::AcceptTrade.into())
            .unwrap();

        assert_eq!(game.phase(), TurnPhase::PreRoll);
        assert_eq!(game.current_player, 0);
        assert_eq!(game.property(1).unwrap().owner, Some(1));
        assert_eq!(game.players[0].cash, 1580);
        assert_eq!(game.players[1].cash, 1420);
        assert_eq!(game.trades[0].status, TradeStatus::Countered);
        assert_eq!(game.trades[1].status, TradeStatus::Accepted);
        assert_eq!(game.turn.as_ref().unwrap().trade_attempts, 2);
    }

    #[test]
    fn test_final_positions_across_bankruptcies() {
        let mut game = started(3);
        for p in [37, 39] {
            game.property_mut(p).unwrap().owner = Some(1);
        }
        game.players[0].cash = 10;
        game.players[0].position = 35;
        to_rolling(&mut game);
        game.apply_roll((1, 3)).unwrap();
        step(&mut game);

        // First out takes last place
        assert!(game.players[0].bankrupt);
        assert_eq!(game.players[0].final_position, Some(3));
        assert_eq!(game.players[1].cash, 1510);
        step(&mut game);
        assert_eq!(game.current_player, 1);
        assert_eq!(game.status, GameStatus::InProgress);

        game.charge(2, Some(1), 5000, Debt::Other("test".into()))
            .unwrap();
        assert_eq!(game.players[2].final_position, Some(2));

        game.control = Control::Running {
            phase: TurnPhase::TurnEnd,
        };
        let outcome = step(&mut game);
        assert!(matches!(
            outcome.effect,
            Effect::Finished {
                winner: Some(1),
                reason: EndingReason::LastPlayerStanding
            }
        ));
        let positions: Vec<_> = game.players.iter().map(|p| p.final_position).collect();
        assert_eq!(positions, vec![Some(3), Some(1), Some(2)]);
    }

    #[test]
    fn test_state_survives_serialization() {
        let mut game = started(2);
        game.players[0].send_to_jail();
        step(&mut game);
        let json = serde_json::to_string(&game).unwrap();
        let mut restored: GameState = serde_json::from_str(&json).unwrap();
        let token = restored.pending_decision().unwrap().token;
        restored
            .resume(token, Decision::RollForDoubles.into())
            .unwrap();

        // The restored RNG yields the same dice as the original
        game.resume(token, Decision::RollForDoubles.into()).unwrap();
        let a = step(&mut game);
        let b = step(&mut restored);
        assert_eq!(a.events, b.events);
    }
}
