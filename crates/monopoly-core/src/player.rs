//! Player state.
//!
//! A player's seat (`id`) is fixed for the whole game and doubles as their
//! turn order. Bankrupt players keep their record (final standing, net worth)
//! but are skipped by the turn rotation forever.

use crate::board::{PlayerId, BOARD_SIZE, JAIL_POSITION};
use serde::{Deserialize, Serialize};

/// Rolls a jailed player gets before the fine is forced
pub const JAIL_ATTEMPTS: u8 = 3;

/// A single player's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Seat in turn order (0-based), never reassigned
    pub id: PlayerId,
    /// Display name
    pub name: String,
    pub cash: u32,
    /// Board position, 0-39
    pub position: u8,
    pub in_jail: bool,
    /// Rolls left before the fine is forced
    pub jail_turns_remaining: u8,
    pub jail_cards: u8,
    pub bankrupt: bool,
    /// Doubles rolled in a row during the current turn
    pub consecutive_doubles: u8,
    /// 1 = winner; assigned on bankruptcy or at game end
    pub final_position: Option<u8>,
    pub final_net_worth: Option<u32>,
}

impl Player {
    /// Create a new player on GO
    pub fn new(id: PlayerId, name: String, cash: u32) -> Self {
        Self {
            id,
            name,
            cash,
            position: 0,
            in_jail: false,
            jail_turns_remaining: 0,
            jail_cards: 0,
            bankrupt: false,
            consecutive_doubles: 0,
            final_position: None,
            final_net_worth: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.bankrupt
    }

    /// Move forward (or backward) by `steps`, returning true if GO was passed or landed on.
    ///
    /// Moving backwards never passes GO.
    pub fn advance(&mut self, steps: i16) -> bool {
        let size = i16::from(BOARD_SIZE);
        let raw = i16::from(self.position) + steps;
        self.position = raw.rem_euclid(size) as u8;
        steps > 0 && raw >= size
    }

    /// Advance to an absolute position, returning true if GO was passed or landed on
    pub fn advance_to(&mut self, target: u8) -> bool {
        let passed = target <= self.position;
        self.position = target % BOARD_SIZE;
        passed
    }

    /// Send to jail: no salary, streak broken
    pub fn send_to_jail(&mut self) {
        self.position = JAIL_POSITION;
        self.in_jail = true;
        self.jail_turns_remaining = JAIL_ATTEMPTS;
        self.consecutive_doubles = 0;
    }

    pub fn release_from_jail(&mut self) {
        self.in_jail = false;
        self.jail_turns_remaining = 0;
    }

    /// Try to pay from cash alone; false (and nothing deducted) if short
    pub fn try_pay(&mut self, amount: u32) -> bool {
        if self.cash < amount {
            return false;
        }
        self.cash -= amount;
        true
    }

    pub fn receive(&mut self, amount: u32) {
        self.cash = self.cash.saturating_add(amount);
    }
}
