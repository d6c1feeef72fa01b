//! Single round-robin auctions for declined properties.
//!
//! Every active player is asked once, in seat order, for a bid strictly
//! above the running high bid. When everyone has acted the highest bid wins.

use crate::actions::{ActionName, Decision, GameEvent};
use crate::board::{PlayerId, PropertyId};
use crate::decision::{DecisionDetail, DecisionKind};
use crate::game::{Flow, GameError, GameState, TurnPhase};
use serde::{Deserialize, Serialize};

/// An auction in progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub property: PropertyId,
    /// Bidders in the order they are asked
    pub bidders: Vec<PlayerId>,
    /// Index into `bidders` of whoever acts next
    pub next: usize,
    pub high_bid: u32,
    pub high_bidder: Option<PlayerId>,
}

impl Auction {
    pub fn new(property: PropertyId, bidders: Vec<PlayerId>) -> Self {
        Self {
            property,
            bidders,
            next: 0,
            high_bid: 0,
            high_bidder: None,
        }
    }

    pub fn current_bidder(&self) -> Option<PlayerId> {
        self.bidders.get(self.next).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.next >= self.bidders.len()
    }

    /// Record a bid from the current bidder. A bid that does not beat the
    /// high bid, or exceeds `cash`, is an error and the bidder has passed.
    pub fn bid(&mut self, amount: u32, cash: u32) -> Result<(), GameError> {
        let bidder = self.current_bidder().ok_or(GameError::NoActiveAuction)?;
        self.next += 1;
        if amount <= self.high_bid {
            return Err(GameError::InvalidBid(format!(
                "${amount} does not beat the high bid of ${}",
                self.high_bid
            )));
        }
        if amount > cash {
            return Err(GameError::CannotAfford {
                needed: amount,
                available: cash,
            });
        }
        self.high_bid = amount;
        self.high_bidder = Some(bidder);
        Ok(())
    }

    pub fn pass(&mut self) {
        self.next += 1;
    }

    /// Winner and price, once complete
    pub fn winner(&self) -> Option<(PlayerId, u32)> {
        if !self.is_complete() || self.high_bid == 0 {
            return None;
        }
        self.high_bidder.map(|b| (b, self.high_bid))
    }
}

impl GameState {
    /// Put a property up for auction among all active players
    pub(crate) fn start_auction(&mut self, property: PropertyId) -> Result<Flow, GameError> {
        let bidders: Vec<PlayerId> = self.active_players().map(|p| p.id).collect();
        self.emit(GameEvent::AuctionStarted {
            property,
            bidders: bidders.clone(),
        });
        self.auction = Some(Auction::new(property, bidders));
        self.continue_auction()
    }

    /// Ask the next bidder who can still outbid, or settle
    pub(crate) fn continue_auction(&mut self) -> Result<Flow, GameError> {
        loop {
            let auction = self.auction.as_ref().ok_or(GameError::NoActiveAuction)?;
            let Some(bidder) = auction.current_bidder() else {
                self.settle_auction()?;
                return Ok(Flow::Continue(TurnPhase::PostRoll));
            };
            let high_bid = auction.high_bid;
            let high_bidder = auction.high_bidder;
            let property = auction.property;

            if self.player(bidder)?.cash <= high_bid {
                if let Some(auction) = self.auction.as_mut() {
                    auction.pass();
                }
                self.emit(GameEvent::BidPassed { player: bidder });
                continue;
            }

            let property = self.property_view(self.property_record(property)?);
            return Ok(Flow::Suspend {
                resume_at: TurnPhase::PostRoll,
                player: bidder,
                kind: DecisionKind::AuctionBid,
                valid_actions: vec![ActionName::Bid, ActionName::Pass],
                detail: DecisionDetail::AuctionBid {
                    property,
                    high_bid,
                    high_bidder,
                },
            });
        }
    }

    /// Apply the current bidder's answer
    pub(crate) fn auction_decision(
        &mut self,
        bidder: PlayerId,
        decision: Decision,
    ) -> Result<Flow, GameError> {
        let cash = self.player(bidder)?.cash;
        let auction = self.auction.as_mut().ok_or(GameError::NoActiveAuction)?;
        if auction.current_bidder() != Some(bidder) {
            return Err(GameError::Integrity(format!(
                "player {bidder} is not the current bidder"
            )));
        }

        match decision {
            Decision::Bid { amount } => match auction.bid(amount, cash) {
                Ok(()) => self.emit(GameEvent::BidPlaced {
                    player: bidder,
                    amount,
                }),
                Err(e) => {
                    self.emit(GameEvent::ActionRejected {
                        player: bidder,
                        action: ActionName::Bid,
                        reason: e.to_string(),
                    });
                    self.emit(GameEvent::BidPassed { player: bidder });
                }
            },
            _ => {
                auction.pass();
                self.emit(GameEvent::BidPassed { player: bidder });
            }
        }
        self.continue_auction()
    }

    fn settle_auction(&mut self) -> Result<(), GameError> {
        let auction = self.auction.take().ok_or(GameError::NoActiveAuction)?;
        match auction.winner() {
            Some((winner, amount)) => {
                let player = self.player_mut(winner)?;
                if !player.try_pay(amount) {
                    return Err(GameError::Integrity(format!(
                        "auction winner {winner} cannot cover ${amount}"
                    )));
                }
                self.property_mut(auction.property)?.owner = Some(winner);
                self.emit(GameEvent::AuctionWon {
                    player: winner,
                    property: auction.property,
                    amount,
                });
            }
            None => self.emit(GameEvent::AuctionUnsold {
                property: auction.property,
            }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_bid_wins() {
        let mut auction = Auction::new(39, vec![0, 1, 2]);
        auction.bid(100, 1500).unwrap();
        auction.bid(150, 1500).unwrap();
        auction.pass();
        assert!(auction.is_complete());
        assert_eq!(auction.winner(), Some((1, 150)));
    }

    #[test]
    fn test_low_or_unaffordable_bids_are_passes() {
        let mut auction = Auction::new(39, vec![0, 1, 2]);
        auction.bid(100, 1500).unwrap();
        assert!(matches!(
            auction.bid(100, 1500),
            Err(GameError::InvalidBid(_))
        ));
        assert!(matches!(
            auction.bid(500, 200),
            Err(GameError::CannotAfford { .. })
        ));
        assert!(auction.is_complete());
        assert_eq!(auction.winner(), Some((0, 100)));
    }

    #[test]
    fn test_no_bids_leaves_property_unsold() {
        let mut auction = Auction::new(1, vec![0, 1]);
        auction.pass();
        assert_eq!(auction.winner(), None);
        auction.pass();
        assert_eq!(auction.winner(), None);
        assert!(matches!(auction.bid(10, 100), Err(GameError::NoActiveAuction)));
    }
}
