//! Paying debts: cash first, then liquidation, then bankruptcy.

use crate::actions::GameEvent;
use crate::board::{PlayerId, PropertyId};
use crate::game::{GameError, GameState};
use crate::rent;

/// What a debt is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Debt {
    Rent(PropertyId),
    Other(String),
}

/// How a charge ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Charge {
    Paid,
    Bankrupt,
}

impl GameState {
    /// Charge `amount` from `debtor` to `creditor` (`None` = the bank),
    /// raising cash from the debtor's assets or bankrupting them as needed
    pub(crate) fn charge(
        &mut self,
        debtor: PlayerId,
        creditor: Option<PlayerId>,
        amount: u32,
        debt: Debt,
    ) -> Result<Charge, GameError> {
        if amount == 0 {
            return Ok(Charge::Paid);
        }
        let cash = self.player(debtor)?.cash;
        if cash < amount {
            let raisable = rent::liquidation_value(&self.properties, debtor);
            if cash + raisable < amount {
                self.declare_bankruptcy(debtor, creditor)?;
                return Ok(Charge::Bankrupt);
            }
            self.liquidate(debtor, amount)?;
        }

        if !self.player_mut(debtor)?.try_pay(amount) {
            return Err(GameError::Integrity(format!(
                "player {debtor} still short of ${amount} after liquidation"
            )));
        }
        if let Some(creditor) = creditor {
            self.player_mut(creditor)?.receive(amount);
        }
        let event = match debt {
            Debt::Rent(property) => GameEvent::RentPaid {
                payer: debtor,
                owner: creditor.unwrap_or(debtor),
                property,
                amount,
            },
            Debt::Other(reason) => GameEvent::Payment {
                from: Some(debtor),
                to: creditor,
                amount,
                reason,
            },
        };
        self.emit(event);
        Ok(Charge::Paid)
    }

    /// Sell houses (most improved first) and then mortgage (cheapest first)
    /// until the player holds `target` cash
    fn liquidate(&mut self, player: PlayerId, target: u32) -> Result<(), GameError> {
        while self.player(player)?.cash < target {
            if let Some(position) = self.next_house_to_sell(player) {
                let refund = self.property_record(position)?.deed().house_cost().unwrap_or(0) / 2;
                self.property_mut(position)?.houses -= 1;
                self.player_mut(player)?.receive(refund);
                self.emit(GameEvent::HouseSold {
                    player,
                    property: position,
                    refund,
                });
            } else if let Some(position) = self.next_to_mortgage(player) {
                let amount = self.property_record(position)?.deed().mortgage_value();
                self.property_mut(position)?.mortgaged = true;
                self.player_mut(player)?.receive(amount);
                self.emit(GameEvent::Mortgaged {
                    player,
                    property: position,
                    amount,
                });
            } else {
                break;
            }
        }
        Ok(())
    }

    fn next_house_to_sell(&self, player: PlayerId) -> Option<PropertyId> {
        self.properties
            .iter()
            .filter(|p| rent::can_sell_house(&self.properties, p.position, player).is_ok())
            .max_by_key(|p| (p.houses, p.position))
            .map(|p| p.position)
    }

    fn next_to_mortgage(&self, player: PlayerId) -> Option<PropertyId> {
        self.properties
            .iter()
            .filter(|p| rent::can_mortgage(&self.properties, p.position, player).is_ok())
            .min_by_key(|p| (p.deed().mortgage_value(), p.position))
            .map(|p| p.position)
    }

    /// Hand everything to the creditor (or the bank) and retire the player
    pub(crate) fn declare_bankruptcy(
        &mut self,
        debtor: PlayerId,
        creditor: Option<PlayerId>,
    ) -> Result<(), GameError> {
        for property in self.properties.iter_mut() {
            if property.owner != Some(debtor) {
                continue;
            }
            match creditor {
                Some(creditor) => property.owner = Some(creditor),
                None => property.reset(),
            }
        }

        let remaining = self.active_players().filter(|p| p.id != debtor).count();
        let final_position = remaining as u8 + 1;
        let player = self.player_mut(debtor)?;
        let cash = std::mem::take(&mut player.cash);
        let jail_cards = std::mem::take(&mut player.jail_cards);
        player.bankrupt = true;
        player.in_jail = false;
        player.jail_turns_remaining = 0;
        player.consecutive_doubles = 0;
        player.final_position = Some(final_position);
        player.final_net_worth = Some(0);

        if let Some(creditor) = creditor {
            let creditor = self.player_mut(creditor)?;
            creditor.receive(cash);
            creditor.jail_cards += jail_cards;
        }
        if let Some(turn) = self.turn.as_mut() {
            if turn.player == debtor {
                turn.extra_roll = false;
            }
        }

        self.emit(GameEvent::Bankrupt {
            player: debtor,
            creditor,
            final_position,
        });
        Ok(())
    }
}
