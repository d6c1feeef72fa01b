//! Trade negotiation: propose, accept, reject and counter.
//!
//! Trades are immutable once resolved; a counter-offer is a new trade that
//! points back at the one it answers.

use crate::actions::{ActionName, GameEvent, TradeBundle};
use crate::board::PlayerId;
use crate::decision::{DecisionDetail, DecisionKind};
use crate::game::{Flow, GameError, GameState, TurnPhase};
use crate::rent;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
}

/// A trade offer: `offer` goes from proposer to recipient, `request` the other way
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u32,
    pub proposer: PlayerId,
    pub recipient: PlayerId,
    pub offer: TradeBundle,
    pub request: TradeBundle,
    pub status: TradeStatus,
    pub counter_depth: u8,
    /// The trade this one counters
    pub parent: Option<u32>,
    pub turn_number: u32,
}

impl Trade {
    /// Same parties, same bundles, same direction
    fn mirrors(&self, offer: &TradeBundle, request: &TradeBundle) -> bool {
        // A counter is sent by the original recipient, so its offer mirrors
        // the original request
        self.request.same_as(offer) && self.offer.same_as(request)
    }
}

impl GameState {
    /// Check that `owner` can hand over everything in `bundle`
    pub(crate) fn validate_bundle(
        &self,
        owner: PlayerId,
        bundle: &TradeBundle,
    ) -> Result<(), GameError> {
        let player = self.player(owner)?;
        if !player.is_active() {
            return Err(GameError::InvalidTrade(format!("{} is bankrupt", player.name)));
        }
        if player.cash < bundle.money {
            return Err(GameError::InvalidTrade(format!(
                "{} cannot pay ${}",
                player.name, bundle.money
            )));
        }
        if player.jail_cards < bundle.jail_cards {
            return Err(GameError::InvalidTrade(format!(
                "{} does not hold {} jail card(s)",
                player.name, bundle.jail_cards
            )));
        }

        let mut seen = HashSet::new();
        for &position in &bundle.properties {
            if !seen.insert(position) {
                return Err(GameError::InvalidTrade(format!(
                    "property {position} listed twice"
                )));
            }
            let property = rent::find(&self.properties, position)
                .ok_or(GameError::PropertyNotFound(position))?;
            let name = property.deed().name;
            if property.owner != Some(owner) {
                return Err(GameError::InvalidTrade(format!(
                    "{} does not own {name}",
                    player.name
                )));
            }
            let group = property.group();
            if self
                .properties
                .iter()
                .any(|p| p.group() == group && p.houses > 0)
            {
                return Err(GameError::InvalidTrade(format!(
                    "{name}'s group has buildings"
                )));
            }
        }
        Ok(())
    }

    /// Open a new trade from the current player. Counts against the per-turn cap.
    pub fn propose_trade(
        &mut self,
        proposer: PlayerId,
        recipient: PlayerId,
        offer: TradeBundle,
        request: TradeBundle,
    ) -> Result<u32, GameError> {
        self.check_trade_budget()?;
        if proposer == recipient {
            return Err(GameError::InvalidTrade("cannot trade with yourself".into()));
        }
        if offer.is_empty() && request.is_empty() {
            return Err(GameError::InvalidTrade("trade is empty".into()));
        }
        self.validate_bundle(proposer, &offer)?;
        self.validate_bundle(recipient, &request)?;

        let id = self.open_trade(proposer, recipient, offer.clone(), request.clone(), 0, None)?;
        self.emit(GameEvent::TradeProposed {
            trade: id,
            proposer,
            recipient,
            offer,
            request,
        });
        Ok(id)
    }

    /// Execute a pending trade after re-validating it against the current state.
    /// A trade that no longer validates is rejected.
    pub fn accept_trade(&mut self, id: u32) -> Result<(), GameError> {
        let trade = self.pending_trade(id)?.clone();
        let check = self
            .validate_bundle(trade.proposer, &trade.offer)
            .and_then(|()| self.validate_bundle(trade.recipient, &trade.request));
        if let Err(e) = check {
            self.close_trade(id, TradeStatus::Rejected);
            self.emit(GameEvent::TradeRejected {
                trade: id,
                reason: Some(e.to_string()),
            });
            return Err(e);
        }

        self.transfer(trade.proposer, trade.recipient, &trade.offer)?;
        self.transfer(trade.recipient, trade.proposer, &trade.request)?;
        self.close_trade(id, TradeStatus::Accepted);
        self.emit(GameEvent::TradeAccepted { trade: id });
        Ok(())
    }

    pub fn reject_trade(&mut self, id: u32) -> Result<(), GameError> {
        self.pending_trade(id)?;
        self.close_trade(id, TradeStatus::Rejected);
        self.emit(GameEvent::TradeRejected {
            trade: id,
            reason: None,
        });
        Ok(())
    }

    /// Answer trade `id` with a counter-offer from its recipient. `offer` and
    /// `request` are from the countering player's side. Any failure rejects
    /// the original trade.
    pub fn counter_trade(
        &mut self,
        id: u32,
        offer: TradeBundle,
        request: TradeBundle,
    ) -> Result<u32, GameError> {
        let original = self.pending_trade(id)?.clone();
        let check = self.check_counter(&original, &offer, &request);
        if let Err(e) = check {
            self.close_trade(id, TradeStatus::Rejected);
            self.emit(GameEvent::TradeRejected {
                trade: id,
                reason: Some(format!("counter-offer refused: {e}")),
            });
            return Err(e);
        }

        self.close_trade(id, TradeStatus::Countered);
        let counter = self.open_trade(
            original.recipient,
            original.proposer,
            offer,
            request,
            original.counter_depth + 1,
            Some(id),
        )?;
        self.emit(GameEvent::TradeCountered {
            trade: id,
            counter,
        });
        Ok(counter)
    }

    fn check_counter(
        &self,
        original: &Trade,
        offer: &TradeBundle,
        request: &TradeBundle,
    ) -> Result<(), GameError> {
        if original.counter_depth >= self.config.max_counter_depth {
            return Err(GameError::InvalidTrade("too many counter-offers".into()));
        }
        if offer.is_empty() && request.is_empty() {
            return Err(GameError::InvalidTrade("trade is empty".into()));
        }
        if original.mirrors(offer, request) {
            return Err(GameError::InvalidTrade(
                "counter-offer repeats the original".into(),
            ));
        }
        self.check_trade_budget()?;
        self.validate_bundle(original.recipient, offer)?;
        self.validate_bundle(original.proposer, request)
    }

    fn check_trade_budget(&self) -> Result<(), GameError> {
        let attempts = self.turn.as_ref().map_or(0, |t| t.trade_attempts);
        if attempts >= self.config.max_trade_attempts_per_turn {
            return Err(GameError::TradeLimitReached);
        }
        Ok(())
    }

    fn pending_trade(&self, id: u32) -> Result<&Trade, GameError> {
        self.trades
            .iter()
            .find(|t| t.id == id && t.status == TradeStatus::Pending)
            .ok_or(GameError::NoActiveTrade)
    }

    fn open_trade(
        &mut self,
        proposer: PlayerId,
        recipient: PlayerId,
        offer: TradeBundle,
        request: TradeBundle,
        counter_depth: u8,
        parent: Option<u32>,
    ) -> Result<u32, GameError> {
        let id = self.trades.len() as u32 + 1;
        let turn = self
            .turn
            .as_mut()
            .ok_or_else(|| GameError::Integrity("no open turn".into()))?;
        turn.trade_attempts += 1;
        let turn_number = turn.number;
        self.trades.push(Trade {
            id,
            proposer,
            recipient,
            offer,
            request,
            status: TradeStatus::Pending,
            counter_depth,
            parent,
            turn_number,
        });
        Ok(id)
    }

    fn close_trade(&mut self, id: u32, status: TradeStatus) {
        if let Some(trade) = self.trades.iter_mut().find(|t| t.id == id) {
            trade.status = status;
        }
    }

    fn transfer(
        &mut self,
        from: PlayerId,
        to: PlayerId,
        bundle: &TradeBundle,
    ) -> Result<(), GameError> {
        let giver = self.player_mut(from)?;
        giver.cash -= bundle.money;
        giver.jail_cards -= bundle.jail_cards;
        let taker = self.player_mut(to)?;
        taker.receive(bundle.money);
        taker.jail_cards += bundle.jail_cards;
        for &position in &bundle.properties {
            self.property_mut(position)?.owner = Some(to);
        }
        Ok(())
    }

    /// Suspend for the recipient of trade `id`
    pub(crate) fn trade_response_flow(
        &self,
        id: u32,
        resume_at: TurnPhase,
    ) -> Result<Flow, GameError> {
        let trade = self.pending_trade(id)?.clone();
        Ok(Flow::Suspend {
            resume_at,
            player: trade.recipient,
            kind: DecisionKind::TradeResponse,
            valid_actions: vec![ActionName::Accept, ActionName::Reject, ActionName::Counter],
            detail: DecisionDetail::TradeResponse { trade },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameConfig;
    use uuid::Uuid;

    fn game() -> GameState {
        let mut game = GameState::new(
            Uuid::nil(),
            vec!["Ada".into(), "Bob".into(), "Cy".into()],
            GameConfig::default(),
            1,
        )
        .unwrap();
        game.start().unwrap();
        game
    }

    fn own(game: &mut GameState, positions: &[u8], owner: PlayerId) {
        for &p in positions {
            game.property_mut(p).unwrap().owner = Some(owner);
        }
    }

    #[test]
    fn test_accepted_trade_swaps_assets() {
        let mut game = game();
        own(&mut game, &[1], 0);
        own(&mut game, &[3], 1);
        game.players[1].jail_cards = 1;

        let id = game
            .propose_trade(
                0,
                1,
                TradeBundle {
                    money: 100,
                    properties: vec![1],
                    jail_cards: 0,
                },
                TradeBundle {
                    money: 0,
                    properties: vec![3],
                    jail_cards: 1,
                },
            )
            .unwrap();
        game.accept_trade(id).unwrap();

        assert_eq!(game.players[0].cash, 1400);
        assert_eq!(game.players[1].cash, 1600);
        assert_eq!(game.players[0].jail_cards, 1);
        assert_eq!(game.property(1).unwrap().owner, Some(1));
        assert_eq!(game.property(3).unwrap().owner, Some(0));
        assert_eq!(game.trades[0].status, TradeStatus::Accepted);
    }

    #[test]
    fn test_accept_revalidates() {
        let mut game = game();
        own(&mut game, &[39], 1);
        let id = game
            .propose_trade(0, 1, TradeBundle::money(500), TradeBundle::properties(vec![39]))
            .unwrap();

        // Ada spends the cash before Bob answers
        game.players[0].cash = 100;
        assert!(matches!(
            game.accept_trade(id),
            Err(GameError::InvalidTrade(_))
        ));
        assert_eq!(game.trades[0].status, TradeStatus::Rejected);
        assert_eq!(game.property(39).unwrap().owner, Some(1));
        assert_eq!(game.players[1].cash, 1500);
    }

    #[test]
    fn test_accept_refused_when_offered_property_changed_hands() {
        let mut game = game();
        own(&mut game, &[1], 0);
        let id = game
            .propose_trade(0, 1, TradeBundle::properties(vec![1]), TradeBundle::money(60))
            .unwrap();

        // Mediterranean Avenue goes to Cy before Bob answers
        own(&mut game, &[1], 2);
        let result = game.accept_trade(id);
        assert!(
            matches!(&result, Err(GameError::InvalidTrade(reason)) if reason.contains("does not own")),
            "{:?}",
            result
        );
        assert_eq!(game.trades[0].status, TradeStatus::Rejected);
        assert_eq!(game.property(1).unwrap().owner, Some(2));
        assert_eq!(game.players[0].cash, 1500);
        assert_eq!(game.players[1].cash, 1500);
    }

    #[test]
    fn test_proposal_validation() {
        let mut game = game();
        own(&mut game, &[1, 3], 0);
        game.property_mut(3).unwrap().houses = 1;

        let empty = game.propose_trade(0, 1, TradeBundle::default(), TradeBundle::default());
        assert!(matches!(empty, Err(GameError::InvalidTrade(_))));

        let self_trade = game.propose_trade(0, 0, TradeBundle::money(5), TradeBundle::default());
        assert!(matches!(self_trade, Err(GameError::InvalidTrade(_))));

        let improved = game.propose_trade(0, 1, TradeBundle::properties(vec![1]), TradeBundle::money(50));
        assert!(matches!(improved, Err(GameError::InvalidTrade(_))));

        let not_theirs = game.propose_trade(0, 1, TradeBundle::money(5), TradeBundle::properties(vec![1]));
        assert!(matches!(not_theirs, Err(GameError::InvalidTrade(_))));

        assert!(game.trades.is_empty());
    }

    #[test]
    fn test_attempt_cap_covers_counters() {
        let mut game = game();
        let first = game
            .propose_trade(0, 1, TradeBundle::money(10), TradeBundle::default())
            .unwrap();
        let counter = game
            .counter_trade(first, TradeBundle::default(), TradeBundle::money(20))
            .unwrap();
        assert_eq!(game.trades[0].status, TradeStatus::Countered);
        assert_eq!(game.trades[1].counter_depth, 1);
        assert_eq!(game.trades[1].parent, Some(first));
        assert_eq!(game.trades[1].proposer, 1);

        game.counter_trade(counter, TradeBundle::money(15), TradeBundle::default())
            .unwrap();
        assert!(matches!(
            game.propose_trade(0, 2, TradeBundle::money(10), TradeBundle::default()),
            Err(GameError::TradeLimitReached)
        ));
    }

    #[test]
    fn test_mirror_counter_rejects_original() {
        let mut game = game();
        let id = game
            .propose_trade(0, 1, TradeBundle::money(10), TradeBundle::default())
            .unwrap();
        let result = game.counter_trade(id, TradeBundle::default(), TradeBundle::money(10));
        assert!(matches!(result, Err(GameError::InvalidTrade(_))));
        assert_eq!(game.trades[0].status, TradeStatus::Rejected);
        assert_eq!(game.trades.len(), 1);
    }

    #[test]
    fn test_counter_depth_limit() {
        let mut game = game();
        game.config.max_trade_attempts_per_turn = 10;
        let mut id = game
            .propose_trade(0, 1, TradeBundle::money(10), TradeBundle::default())
            .unwrap();
        for round in 1..=3u32 {
            id = game
                .counter_trade(id, TradeBundle::default(), TradeBundle::money(10 + round))
                .unwrap();
        }
        let too_deep = game.counter_trade(id, TradeBundle::default(), TradeBundle::money(99));
        assert!(matches!(too_deep, Err(GameError::InvalidTrade(_))));
    }
}
