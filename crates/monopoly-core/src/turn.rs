//! The per-turn record: what happened, plus the bookkeeping flags that make
//! a retried step safe.

use crate::board::{PlayerId, PropertyId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One player's turn, including any extra rolls from doubles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub game_id: Uuid,
    pub number: u32,
    pub player: PlayerId,
    /// Most recent roll of this turn
    pub dice: Option<(u8, u8)>,
    /// Every roll of this turn, in order
    pub rolls: Vec<(u8, u8)>,
    pub position_before: u8,
    pub position_after: Option<u8>,
    pub cash_before: u32,
    pub cash_after: Option<u32>,
    pub passed_go: bool,
    /// Space reached by the last roll, before any card moved the player
    pub landed_on: Option<PropertyId>,
    /// Whether the last roll was a double
    pub was_doubles: bool,
    /// Plain-language log of everything that happened
    pub log: Vec<String>,
    pub trade_attempts: u8,
    /// Set before the landing is resolved so a re-run of post_roll never
    /// charges rent or draws a card twice
    pub landing_resolved: bool,
    /// Successful actions in the current action phase
    pub phase_actions: u8,
    /// Doubles were rolled; go round again after post_roll
    pub extra_roll: bool,
    pub finished: bool,
}

impl Turn {
    pub fn new(game_id: Uuid, number: u32, player: PlayerId, position: u8, cash: u32) -> Self {
        Self {
            game_id,
            number,
            player,
            dice: None,
            rolls: Vec::new(),
            position_before: position,
            position_after: None,
            cash_before: cash,
            cash_after: None,
            passed_go: false,
            landed_on: None,
            was_doubles: false,
            log: Vec::new(),
            trade_attempts: 0,
            landing_resolved: false,
            phase_actions: 0,
            extra_roll: false,
            finished: false,
        }
    }

    /// Sum of the last roll (7 when nothing was rolled, e.g. a card move before any roll)
    pub fn dice_total(&self) -> u8 {
        self.dice.map_or(7, |(a, b)| a + b)
    }

    /// Record a roll and reset the per-landing flags
    pub fn record_roll(&mut self, dice: (u8, u8)) {
        self.dice = Some(dice);
        self.was_doubles = dice.0 == dice.1;
        self.rolls.push(dice);
        self.landing_resolved = false;
        self.phase_actions = 0;
    }

    pub fn close(&mut self, position: u8, cash: u32) {
        self.position_after = Some(position);
        self.cash_after = Some(cash);
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roll_resets_landing() {
        let mut turn = Turn::new(Uuid::nil(), 1, 0, 0, 1500);
        assert_eq!(turn.dice_total(), 7);
        turn.landing_resolved = true;
        turn.phase_actions = 4;
        turn.record_roll((3, 3));
        assert!(turn.was_doubles);
        assert!(!turn.landing_resolved);
        assert_eq!(turn.phase_actions, 0);
        turn.record_roll((2, 5));
        assert_eq!(turn.rolls, vec![(3, 3), (2, 5)]);
        assert_eq!(turn.dice_total(), 7);
        assert!(!turn.was_doubles);
    }
}
