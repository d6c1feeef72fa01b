//! Heuristic bot players.
//!
//! A bot answers a [`PendingDecision`] the same way a remote oracle does:
//! with a JSON object carrying `action`, `parameters` and `reasoning`. This
//! lets hosts run whole games offline and exercises the same parsing path.
//!
//! - Easy: random valid moves
//! - Medium: keeps a cash reserve, buys what it can afford, builds when rich
//! - Hard: bids to value, chases monopolies through trades, counters offers

use crate::actions::{ActionName, TradeBundle};
use crate::board::{deed, Group, PropertyId};
use crate::decision::{DecisionDetail, PendingDecision, PlayerView, PropertyView};
use crate::trade::Trade;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Bot difficulty level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotDifficulty {
    Easy,
    Medium,
    Hard,
}

impl BotDifficulty {
    /// Cash the bot tries to keep in hand
    fn reserve(&self) -> u32 {
        match self {
            BotDifficulty::Easy => 0,
            BotDifficulty::Medium => 200,
            BotDifficulty::Hard => 150,
        }
    }
}

/// What a bot decided, in oracle reply shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub action: ActionName,
    pub parameters: Value,
    pub reasoning: String,
}

impl Choice {
    fn new(action: ActionName, reasoning: impl Into<String>) -> Self {
        Self {
            action,
            parameters: json!({}),
            reasoning: reasoning.into(),
        }
    }

    fn with(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// The reply text an oracle would send
    pub fn to_json(&self) -> String {
        json!({
            "action": self.action,
            "parameters": self.parameters,
            "reasoning": self.reasoning,
        })
        .to_string()
    }
}

/// A bot that can answer any pending decision
pub struct Bot {
    pub difficulty: BotDifficulty,
    rng: StdRng,
}

impl Bot {
    pub fn new(difficulty: BotDifficulty) -> Self {
        Self {
            difficulty,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(difficulty: BotDifficulty, seed: u64) -> Self {
        Self {
            difficulty,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Answer as oracle reply text
    pub fn respond(&mut self, pending: &PendingDecision) -> String {
        self.choose(pending).to_json()
    }

    /// Choose an answer to the pending decision
    pub fn choose(&mut self, pending: &PendingDecision) -> Choice {
        if self.difficulty == BotDifficulty::Easy {
            if let Some(choice) = self.choose_easy(pending) {
                return choice;
            }
        }

        let me = &pending.context.me;
        match &pending.context.detail {
            DecisionDetail::BuyProperty { property } => self.buy(me, property),
            DecisionDetail::AuctionBid {
                property, high_bid, ..
            } => self.bid(me, property, *high_bid),
            DecisionDetail::JailStrategy {
                attempts_remaining, ..
            } => self.jail(pending, *attempts_remaining),
            DecisionDetail::TurnActions {
                buildable,
                unmortgageable,
                trades_remaining,
                ..
            } => {
                if let Some(choice) = self.improve(me, buildable, unmortgageable) {
                    return choice;
                }
                if *trades_remaining > 0 && pending.valid_actions.contains(&ActionName::Trade) {
                    if let Some(choice) = self.propose(pending) {
                        return choice;
                    }
                }
                Choice::new(ActionName::Done, "nothing worth doing")
            }
            DecisionDetail::TradeResponse { trade } => self.answer_trade(pending, trade),
        }
    }

    /// Easy: pick any valid action and fill in random parameters
    fn choose_easy(&mut self, pending: &PendingDecision) -> Option<Choice> {
        let simple: Vec<ActionName> = pending
            .valid_actions
            .iter()
            .copied()
            .filter(|a| !matches!(a, ActionName::Trade | ActionName::Counter))
            .collect();
        let action = *simple.choose(&mut self.rng)?;
        let me = &pending.context.me;

        let pick = |rng: &mut StdRng, list: &[PropertyView]| {
            list.choose(rng).map(|p| json!({ "property": p.position }))
        };
        let parameters = match (&pending.context.detail, action) {
            (DecisionDetail::TurnActions { buildable, .. }, ActionName::Build) => {
                pick(&mut self.rng, buildable.as_slice())?
            }
            (DecisionDetail::TurnActions { sellable, .. }, ActionName::SellHouse) => {
                pick(&mut self.rng, sellable.as_slice())?
            }
            (DecisionDetail::TurnActions { mortgageable, .. }, ActionName::Mortgage) => {
                pick(&mut self.rng, mortgageable.as_slice())?
            }
            (DecisionDetail::TurnActions { unmortgageable, .. }, ActionName::Unmortgage) => {
                pick(&mut self.rng, unmortgageable.as_slice())?
            }
            (
                DecisionDetail::AuctionBid {
                    property, high_bid, ..
                },
                ActionName::Bid,
            ) => {
                let ceiling = me.cash.min(property.price);
                if ceiling <= *high_bid {
                    return Some(Choice::new(ActionName::Pass, "too rich for me"));
                }
                json!({ "amount": self.rng.gen_range(high_bid + 1..=ceiling) })
            }
            _ => json!({}),
        };
        Some(Choice::new(action, "felt lucky").with(parameters))
    }

    fn buy(&mut self, me: &PlayerView, property: &PropertyView) -> Choice {
        let reserve = self.difficulty.reserve();
        let after = me.cash.saturating_sub(property.price);
        let completes = completes_group(me, property.position);
        let eager = self.difficulty == BotDifficulty::Hard
            && matches!(property.group, Group::Railroad)
            && after >= 50;

        if me.cash >= property.price && (after >= reserve || completes || eager) {
            let why = if completes {
                format!("{} completes a group", property.name)
            } else {
                format!("{} is affordable at ${}", property.name, property.price)
            };
            Choice::new(ActionName::Buy, why)
        } else {
            Choice::new(
                ActionName::Auction,
                format!("keeping cash instead of paying ${}", property.price),
            )
        }
    }

    fn bid(&mut self, me: &PlayerView, property: &PropertyView, high_bid: u32) -> Choice {
        let mut value = match self.difficulty {
            BotDifficulty::Hard => property.price,
            _ => property.price * 4 / 5,
        };
        if completes_group(me, property.position) {
            value = value * 13 / 10;
        }
        let limit = value.min(me.cash.saturating_sub(self.difficulty.reserve() / 2));
        if limit <= high_bid {
            return Choice::new(
                ActionName::Pass,
                format!("not worth more than ${high_bid} to me"),
            );
        }
        let step = (property.price / 10).max(10);
        let amount = (high_bid + step).min(limit);
        Choice::new(ActionName::Bid, format!("{} is worth up to ${limit}", property.name))
            .with(json!({ "amount": amount }))
    }

    fn jail(&mut self, pending: &PendingDecision, attempts_remaining: u8) -> Choice {
        let can = |a: ActionName| pending.valid_actions.contains(&a);
        let cash = pending.context.me.cash;
        if can(ActionName::UseCard) {
            return Choice::new(ActionName::UseCard, "using my card");
        }
        let pay_threshold = match self.difficulty {
            BotDifficulty::Hard => 500,
            _ => 300,
        };
        if can(ActionName::PayFine) && (cash > pay_threshold || attempts_remaining <= 1) {
            return Choice::new(ActionName::PayFine, "back on the board");
        }
        Choice::new(ActionName::Roll, "trying for doubles")
    }

    fn improve(
        &mut self,
        me: &PlayerView,
        buildable: &[PropertyView],
        unmortgageable: &[PropertyView],
    ) -> Option<Choice> {
        let reserve = self.difficulty.reserve();
        if let Some(p) = unmortgageable
            .iter()
            .filter(|p| me.cash.saturating_sub(p.unmortgage_cost) >= reserve * 2)
            .min_by_key(|p| p.unmortgage_cost)
        {
            return Some(
                Choice::new(ActionName::Unmortgage, format!("{} can earn rent again", p.name))
                    .with(json!({ "property": p.position })),
            );
        }
        let p = buildable
            .iter()
            .filter(|p| {
                p.house_cost
                    .is_some_and(|c| me.cash.saturating_sub(c) >= reserve)
            })
            .max_by_key(|p| (p.price, p.position))?;
        Some(
            Choice::new(ActionName::Build, format!("building on {}", p.name))
                .with(json!({ "property": p.position, "count": 1 })),
        )
    }

    /// Hard only: offer cash for the last property of a nearly complete group
    fn propose(&mut self, pending: &PendingDecision) -> Option<Choice> {
        if self.difficulty != BotDifficulty::Hard || !self.rng.gen_bool(0.3) {
            return None;
        }
        let me = &pending.context.me;
        for &mine in &me.properties {
            let group = deed(mine)?.group();
            if !matches!(group, Group::Color(_)) {
                continue;
            }
            let missing: Vec<PropertyId> = group
                .members()
                .filter(|p| !me.properties.contains(p))
                .collect();
            let &[wanted] = missing.as_slice() else {
                continue;
            };
            let Some(owner) = pending
                .context
                .opponents
                .iter()
                .find(|o| o.properties.contains(&wanted))
            else {
                continue;
            };
            let offer = deed(wanted)?.price * 3 / 2;
            if me.cash.saturating_sub(offer) < self.difficulty.reserve() {
                continue;
            }
            return Some(
                Choice::new(
                    ActionName::Trade,
                    format!("{} would complete my group", deed(wanted)?.name),
                )
                .with(json!({
                    "recipient": owner.id,
                    "offer": TradeBundle::money(offer),
                    "request": TradeBundle::properties(vec![wanted]),
                })),
            );
        }
        None
    }

    fn answer_trade(&mut self, pending: &PendingDecision, trade: &Trade) -> Choice {
        let me = &pending.context.me;
        let incoming = bundle_value(&trade.offer);
        let outgoing = bundle_value(&trade.request);

        let breaks_monopoly = trade.request.properties.iter().any(|&p| {
            deed(p).is_some_and(|d| {
                matches!(d.group(), Group::Color(_))
                    && d.group().members().all(|m| me.properties.contains(&m))
            })
        });
        if breaks_monopoly {
            return Choice::new(ActionName::Reject, "not breaking up a monopoly");
        }

        let margin = match self.difficulty {
            BotDifficulty::Hard => 11,
            _ => 12,
        };
        if incoming * 10 >= outgoing * margin {
            return Choice::new(
                ActionName::Accept,
                format!("getting ${incoming} of value for ${outgoing}"),
            );
        }

        let proposer_cash = pending
            .context
            .opponents
            .iter()
            .find(|o| o.id == trade.proposer)
            .map_or(0, |o| o.cash);
        if self.difficulty == BotDifficulty::Hard
            && pending.valid_actions.contains(&ActionName::Counter)
            && incoming * 10 >= outgoing * 8
        {
            let extra = (outgoing * margin / 10).saturating_sub(incoming).div_ceil(10) * 10;
            let mut ask = trade.offer.clone();
            ask.money += extra.max(10);
            if ask.money <= proposer_cash {
                return Choice::new(ActionName::Counter, format!("close; asking ${extra} more"))
                    .with(json!({ "offer": trade.request, "request": ask }));
            }
        }
        Choice::new(
            ActionName::Reject,
            format!("${incoming} of value is not enough for ${outgoing}"),
        )
    }
}

/// Whether acquiring `position` gives `me` the whole group
fn completes_group(me: &PlayerView, position: PropertyId) -> bool {
    let Some(d) = deed(position) else {
        return false;
    };
    d.group()
        .members()
        .all(|m| m == position || me.properties.contains(&m))
}

/// Rough cash value of a trade bundle
fn bundle_value(bundle: &TradeBundle) -> u32 {
    bundle.money
        + bundle
            .properties
            .iter()
            .filter_map(|&p| deed(p))
            .map(|d| d.price)
            .sum::<u32>()
        + u32::from(bundle.jail_cards) * 50
}
