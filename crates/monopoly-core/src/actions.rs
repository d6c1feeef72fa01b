//! Decisions players make and the events they cause.
//!
//! `Decision` is the closed set of typed answers the engine accepts from a
//! decision-maker. `GameEvent` is what happened as a result; its rendered
//! form is the plain-language turn log.

use crate::board::{space_name, PlayerId, PropertyId};
use crate::cards::DeckKind;
use crate::decision::DecisionKind;
use crate::player::Player;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire names of the actions an oracle may choose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    Buy,
    Auction,
    Bid,
    Pass,
    PayFine,
    UseCard,
    Roll,
    Build,
    SellHouse,
    Mortgage,
    Unmortgage,
    Trade,
    Done,
    Accept,
    Reject,
    Counter,
}

impl ActionName {
    pub const ALL: [ActionName; 16] = [
        ActionName::Buy,
        ActionName::Auction,
        ActionName::Bid,
        ActionName::Pass,
        ActionName::PayFine,
        ActionName::UseCard,
        ActionName::Roll,
        ActionName::Build,
        ActionName::SellHouse,
        ActionName::Mortgage,
        ActionName::Unmortgage,
        ActionName::Trade,
        ActionName::Done,
        ActionName::Accept,
        ActionName::Reject,
        ActionName::Counter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionName::Buy => "buy",
            ActionName::Auction => "auction",
            ActionName::Bid => "bid",
            ActionName::Pass => "pass",
            ActionName::PayFine => "pay_fine",
            ActionName::UseCard => "use_card",
            ActionName::Roll => "roll",
            ActionName::Build => "build",
            ActionName::SellHouse => "sell_house",
            ActionName::Mortgage => "mortgage",
            ActionName::Unmortgage => "unmortgage",
            ActionName::Trade => "trade",
            ActionName::Done => "done",
            ActionName::Accept => "accept",
            ActionName::Reject => "reject",
            ActionName::Counter => "counter",
        }
    }

    /// Parse an exact wire name
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a trade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeBundle {
    #[serde(default)]
    pub money: u32,
    #[serde(default)]
    pub properties: Vec<PropertyId>,
    #[serde(default)]
    pub jail_cards: u8,
}

impl TradeBundle {
    pub fn money(amount: u32) -> Self {
        Self {
            money: amount,
            ..Self::default()
        }
    }

    pub fn properties(properties: Vec<PropertyId>) -> Self {
        Self {
            properties,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.money == 0 && self.properties.is_empty() && self.jail_cards == 0
    }

    /// Equality ignoring property order
    pub fn same_as(&self, other: &TradeBundle) -> bool {
        let mut a = self.properties.clone();
        let mut b = other.properties.clone();
        a.sort_unstable();
        b.sort_unstable();
        self.money == other.money && self.jail_cards == other.jail_cards && a == b
    }
}

impl fmt::Display for TradeBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.money > 0 {
            parts.push(format!("${}", self.money));
        }
        for p in &self.properties {
            parts.push(space_name(*p).to_string());
        }
        if self.jail_cards > 0 {
            parts.push(format!("{} Get Out of Jail Free card(s)", self.jail_cards));
        }
        if parts.is_empty() {
            f.write_str("nothing")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// A typed answer to a pending decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    // ==================== buy_property ====================
    Buy,
    /// Decline and send the property to auction
    DeclineBuy,

    // ==================== jail_strategy ====================
    PayFine,
    UseJailCard,
    RollForDoubles,

    // ==================== pre/post roll actions ====================
    Build {
        property: PropertyId,
        count: u8,
    },
    SellHouse {
        property: PropertyId,
    },
    Mortgage {
        property: PropertyId,
    },
    Unmortgage {
        property: PropertyId,
    },
    ProposeTrade {
        recipient: PlayerId,
        offer: TradeBundle,
        request: TradeBundle,
    },
    Done,

    // ==================== auction_bid ====================
    Bid {
        amount: u32,
    },
    PassBid,

    // ==================== trade_response ====================
    AcceptTrade,
    RejectTrade,
    /// Offer/request are from the countering player's point of view
    CounterTrade {
        offer: TradeBundle,
        request: TradeBundle,
    },
}

impl Decision {
    /// The wire action this decision answers with
    pub fn action(&self) -> ActionName {
        match self {
            Decision::Buy => ActionName::Buy,
            Decision::DeclineBuy => ActionName::Auction,
            Decision::PayFine => ActionName::PayFine,
            Decision::UseJailCard => ActionName::UseCard,
            Decision::RollForDoubles => ActionName::Roll,
            Decision::Build { .. } => ActionName::Build,
            Decision::SellHouse { .. } => ActionName::SellHouse,
            Decision::Mortgage { .. } => ActionName::Mortgage,
            Decision::Unmortgage { .. } => ActionName::Unmortgage,
            Decision::ProposeTrade { .. } => ActionName::Trade,
            Decision::Done => ActionName::Done,
            Decision::Bid { .. } => ActionName::Bid,
            Decision::PassBid => ActionName::Pass,
            Decision::AcceptTrade => ActionName::Accept,
            Decision::RejectTrade => ActionName::Reject,
            Decision::CounterTrade { .. } => ActionName::Counter,
        }
    }
}

/// How a player left jail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JailRelease {
    PaidFine,
    UsedCard,
    RolledDoubles,
}

/// Why a game ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndingReason {
    LastPlayerStanding,
    TurnLimitReached,
    Abandoned { reason: String },
}

impl fmt::Display for EndingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndingReason::LastPlayerStanding => f.write_str("last player standing"),
            EndingReason::TurnLimitReached => f.write_str("turn limit reached"),
            EndingReason::Abandoned { reason } => write!(f, "abandoned: {reason}"),
        }
    }
}

/// Events that occur as a result of steps and decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    GameStarted {
        players: Vec<String>,
    },
    TurnStarted {
        turn: u32,
        player: PlayerId,
    },
    /// A decision was taken (by the oracle or by fallback)
    DecisionMade {
        player: PlayerId,
        kind: DecisionKind,
        action: ActionName,
        fallback: bool,
    },
    /// A decision asked for something the rules do not allow
    ActionRejected {
        player: PlayerId,
        action: ActionName,
        reason: String,
    },
    DiceRolled {
        player: PlayerId,
        dice: (u8, u8),
    },
    Moved {
        player: PlayerId,
        from: u8,
        to: u8,
    },
    SalaryCollected {
        player: PlayerId,
        amount: u32,
    },
    ThirdDoubles {
        player: PlayerId,
    },
    SentToJail {
        player: PlayerId,
    },
    ReleasedFromJail {
        player: PlayerId,
        how: JailRelease,
    },
    JailRollFailed {
        player: PlayerId,
        attempts_remaining: u8,
    },
    CardDrawn {
        player: PlayerId,
        deck: DeckKind,
        text: String,
    },
    JailCardReceived {
        player: PlayerId,
    },
    /// Cash moved between players or to/from the bank (`None`)
    Payment {
        from: Option<PlayerId>,
        to: Option<PlayerId>,
        amount: u32,
        reason: String,
    },
    RentPaid {
        payer: PlayerId,
        owner: PlayerId,
        property: PropertyId,
        amount: u32,
    },
    NoRentMortgaged {
        player: PlayerId,
        property: PropertyId,
    },
    PropertyPurchased {
        player: PlayerId,
        property: PropertyId,
        price: u32,
    },
    HousesBuilt {
        player: PlayerId,
        property: PropertyId,
        count: u8,
        cost: u32,
    },
    HouseSold {
        player: PlayerId,
        property: PropertyId,
        refund: u32,
    },
    Mortgaged {
        player: PlayerId,
        property: PropertyId,
        amount: u32,
    },
    Unmortgaged {
        player: PlayerId,
        property: PropertyId,
        cost: u32,
    },
    Bankrupt {
        player: PlayerId,
        creditor: Option<PlayerId>,
        final_position: u8,
    },
    AuctionStarted {
        property: PropertyId,
        bidders: Vec<PlayerId>,
    },
    BidPlaced {
        player: PlayerId,
        amount: u32,
    },
    BidPassed {
        player: PlayerId,
    },
    AuctionWon {
        player: PlayerId,
        property: PropertyId,
        amount: u32,
    },
    AuctionUnsold {
        property: PropertyId,
    },
    TradeProposed {
        trade: u32,
        proposer: PlayerId,
        recipient: PlayerId,
        offer: TradeBundle,
        request: TradeBundle,
    },
    TradeAccepted {
        trade: u32,
    },
    TradeRejected {
        trade: u32,
        reason: Option<String>,
    },
    TradeCountered {
        trade: u32,
        counter: u32,
    },
    TurnEnded {
        turn: u32,
        player: PlayerId,
    },
    GameOver {
        winner: Option<PlayerId>,
        reason: EndingReason,
    },
}

fn name(players: &[Player], id: PlayerId) -> String {
    players
        .get(usize::from(id))
        .map(|p| p.name.clone())
        .unwrap_or_else(|| format!("Player {id}"))
}

fn party(players: &[Player], id: Option<PlayerId>) -> String {
    id.map_or_else(|| "the bank".to_string(), |id| name(players, id))
}

impl GameEvent {
    /// Plain-language rendering for the turn log
    pub fn describe(&self, players: &[Player]) -> String {
        let n = |id: PlayerId| name(players, id);
        match self {
            GameEvent::GameStarted { players } => {
                format!("Game started with {}", players.join(", "))
            }
            GameEvent::TurnStarted { turn, player } => {
                format!("Turn {turn} begins for {}", n(*player))
            }
            GameEvent::DecisionMade {
                player,
                kind,
                action,
                fallback,
            } => {
                if *fallback {
                    format!(
                        "{} could not decide on {kind}; defaulted to {action}",
                        n(*player)
                    )
                } else {
                    format!("{} chose {action} for {kind}", n(*player))
                }
            }
            GameEvent::ActionRejected {
                player,
                action,
                reason,
            } => format!("{}'s {action} was rejected: {reason}", n(*player)),
            GameEvent::DiceRolled { player, dice } => {
                let doubles = if dice.0 == dice.1 { " (doubles)" } else { "" };
                format!(
                    "{} rolled {} and {}{doubles}",
                    n(*player),
                    dice.0,
                    dice.1
                )
            }
            GameEvent::Moved { player, from, to } => format!(
                "{} moved from {} to {}",
                n(*player),
                space_name(*from),
                space_name(*to)
            ),
            GameEvent::SalaryCollected { player, amount } => {
                format!("{} passed GO and collected ${amount}", n(*player))
            }
            GameEvent::ThirdDoubles { player } => {
                format!("{} rolled doubles three times in a row", n(*player))
            }
            GameEvent::SentToJail { player } => format!("{} was sent to jail", n(*player)),
            GameEvent::ReleasedFromJail { player, how } => {
                let how = match how {
                    JailRelease::PaidFine => "paying the fine",
                    JailRelease::UsedCard => "using a Get Out of Jail Free card",
                    JailRelease::RolledDoubles => "rolling doubles",
                };
                format!("{} got out of jail by {how}", n(*player))
            }
            GameEvent::JailRollFailed {
                player,
                attempts_remaining,
            } => format!(
                "{} failed to roll doubles in jail ({attempts_remaining} attempts left)",
                n(*player)
            ),
            GameEvent::CardDrawn { player, deck, text } => {
                format!("{} drew {}: \"{text}\"", n(*player), deck.name())
            }
            GameEvent::JailCardReceived { player } => {
                format!("{} kept a Get Out of Jail Free card", n(*player))
            }
            GameEvent::Payment {
                from,
                to,
                amount,
                reason,
            } => format!(
                "{} paid {} ${amount} ({reason})",
                party(players, *from),
                party(players, *to)
            ),
            GameEvent::RentPaid {
                payer,
                owner,
                property,
                amount,
            } => format!(
                "{} paid {} ${amount} rent for {}",
                n(*payer),
                n(*owner),
                space_name(*property)
            ),
            GameEvent::NoRentMortgaged { player, property } => format!(
                "{} owes no rent: {} is mortgaged",
                n(*player),
                space_name(*property)
            ),
            GameEvent::PropertyPurchased {
                player,
                property,
                price,
            } => format!(
                "{} bought {} for ${price}",
                n(*player),
                space_name(*property)
            ),
            GameEvent::HousesBuilt {
                player,
                property,
                count,
                cost,
            } => format!(
                "{} built {count} house(s) on {} for ${cost}",
                n(*player),
                space_name(*property)
            ),
            GameEvent::HouseSold {
                player,
                property,
                refund,
            } => format!(
                "{} sold a house on {} for ${refund}",
                n(*player),
                space_name(*property)
            ),
            GameEvent::Mortgaged {
                player,
                property,
                amount,
            } => format!(
                "{} mortgaged {} for ${amount}",
                n(*player),
                space_name(*property)
            ),
            GameEvent::Unmortgaged {
                player,
                property,
                cost,
            } => format!(
                "{} lifted the mortgage on {} for ${cost}",
                n(*player),
                space_name(*property)
            ),
            GameEvent::Bankrupt {
                player,
                creditor,
                final_position,
            } => format!(
                "{} went bankrupt to {} and finished in position {final_position}",
                n(*player),
                party(players, *creditor)
            ),
            GameEvent::AuctionStarted { property, bidders } => format!(
                "{} goes to auction among {}",
                space_name(*property),
                bidders.iter().map(|b| n(*b)).collect::<Vec<_>>().join(", ")
            ),
            GameEvent::BidPlaced { player, amount } => format!("{} bid ${amount}", n(*player)),
            GameEvent::BidPassed { player } => format!("{} passed", n(*player)),
            GameEvent::AuctionWon {
                player,
                property,
                amount,
            } => format!(
                "{} won {} at auction for ${amount}",
                n(*player),
                space_name(*property)
            ),
            GameEvent::AuctionUnsold { property } => {
                format!("Nobody bid on {}; it stays with the bank", space_name(*property))
            }
            GameEvent::TradeProposed {
                trade,
                proposer,
                recipient,
                offer,
                request,
            } => format!(
                "{} proposed trade #{trade} to {}: {offer} for {request}",
                n(*proposer),
                n(*recipient)
            ),
            GameEvent::TradeAccepted { trade } => format!("Trade #{trade} was accepted"),
            GameEvent::TradeRejected { trade, reason } => match reason {
                Some(reason) => format!("Trade #{trade} was rejected: {reason}"),
                None => format!("Trade #{trade} was rejected"),
            },
            GameEvent::TradeCountered { trade, counter } => {
                format!("Trade #{trade} was countered with trade #{counter}")
            }
            GameEvent::TurnEnded { turn, player } => {
                format!("Turn {turn} for {} is over", n(*player))
            }
            GameEvent::GameOver { winner, reason } => match winner {
                Some(w) => format!("Game over ({reason}); {} wins", n(*w)),
                None => format!("Game over ({reason})"),
            },
        }
    }
}
