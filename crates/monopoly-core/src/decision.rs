//! The decision-suspension protocol.
//!
//! When the engine needs a choice it suspends with a [`PendingDecision`]:
//! who decides, what kind of decision, which actions are legal and a
//! structured [`DecisionContext`]. The host asks an oracle, then turns the
//! oracle's free text into a typed [`Decision`] with [`resolve`]. Text
//! without a usable JSON object is a [`ParseError`] (worth retrying); a
//! well-formed reply naming an illegal action or bad parameters resolves to
//! the kind's fallback instead.

use crate::actions::{ActionName, Decision, TradeBundle};
use crate::board::{find_by_name, Group, PlayerId, PropertyId, BOARD_SIZE};
use crate::game::TurnPhase;
use crate::trade::Trade;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// What the engine is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    BuyProperty,
    AuctionBid,
    JailStrategy,
    PreRollActions,
    PostRollActions,
    TradeResponse,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::BuyProperty => "buy_property",
            DecisionKind::AuctionBid => "auction_bid",
            DecisionKind::JailStrategy => "jail_strategy",
            DecisionKind::PreRollActions => "pre_roll_actions",
            DecisionKind::PostRollActions => "post_roll_actions",
            DecisionKind::TradeResponse => "trade_response",
        }
    }

    /// The safe default used when the oracle fails or answers illegally
    pub fn fallback(&self) -> Decision {
        match self {
            DecisionKind::BuyProperty => Decision::DeclineBuy,
            DecisionKind::AuctionBid => Decision::PassBid,
            DecisionKind::JailStrategy => Decision::RollForDoubles,
            DecisionKind::PreRollActions | DecisionKind::PostRollActions => Decision::Done,
            DecisionKind::TradeResponse => Decision::RejectTrade,
        }
    }

    /// Common synonyms oracles use for each kind's actions
    fn aliases(&self) -> &'static [(&'static str, ActionName)] {
        match self {
            DecisionKind::BuyProperty => &[
                ("purchase", ActionName::Buy),
                ("buy_property", ActionName::Buy),
                ("yes", ActionName::Buy),
                ("decline", ActionName::Auction),
                ("pass", ActionName::Auction),
                ("skip", ActionName::Auction),
                ("no", ActionName::Auction),
            ],
            DecisionKind::AuctionBid => &[
                ("raise", ActionName::Bid),
                ("place_bid", ActionName::Bid),
                ("decline", ActionName::Pass),
                ("fold", ActionName::Pass),
                ("no_bid", ActionName::Pass),
                ("skip", ActionName::Pass),
            ],
            DecisionKind::JailStrategy => &[
                ("pay", ActionName::PayFine),
                ("pay_bail", ActionName::PayFine),
                ("bail", ActionName::PayFine),
                ("card", ActionName::UseCard),
                ("use_jail_card", ActionName::UseCard),
                ("get_out_of_jail_free", ActionName::UseCard),
                ("roll_dice", ActionName::Roll),
                ("roll_for_doubles", ActionName::Roll),
            ],
            DecisionKind::PreRollActions | DecisionKind::PostRollActions => &[
                ("end", ActionName::Done),
                ("end_turn", ActionName::Done),
                ("finish", ActionName::Done),
                ("pass", ActionName::Done),
                ("skip", ActionName::Done),
                ("none", ActionName::Done),
                ("build_house", ActionName::Build),
                ("build_houses", ActionName::Build),
                ("sell", ActionName::SellHouse),
                ("propose_trade", ActionName::Trade),
                ("lift_mortgage", ActionName::Unmortgage),
                ("pay_off_mortgage", ActionName::Unmortgage),
            ],
            DecisionKind::TradeResponse => &[
                ("yes", ActionName::Accept),
                ("accept_trade", ActionName::Accept),
                ("no", ActionName::Reject),
                ("decline", ActionName::Reject),
                ("reject_trade", ActionName::Reject),
                ("counter_offer", ActionName::Counter),
                ("counteroffer", ActionName::Counter),
                ("counter_trade", ActionName::Counter),
            ],
        }
    }

    /// Map a raw oracle action name onto a wire action for this kind
    pub fn normalize_action(&self, raw: &str) -> Option<ActionName> {
        let key: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        self.aliases()
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, action)| *action)
            .or_else(|| ActionName::from_wire(&key))
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies exactly one suspension. Any resume carrying a different
/// revision or kind is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken {
    pub game_id: Uuid,
    pub revision: u64,
    pub kind: DecisionKind,
}

/// A player's public state, as shown to a decision-maker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub cash: u32,
    pub position: u8,
    pub in_jail: bool,
    pub jail_cards: u8,
    pub net_worth: u32,
    pub properties: Vec<PropertyId>,
}

/// A property as shown to a decision-maker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyView {
    pub position: PropertyId,
    pub name: String,
    pub group: Group,
    pub price: u32,
    pub owner: Option<PlayerId>,
    pub houses: u8,
    pub mortgaged: bool,
    pub house_cost: Option<u32>,
    pub mortgage_value: u32,
    pub unmortgage_cost: u32,
    /// What a visitor would owe right now (average dice for utilities)
    pub current_rent: u32,
}

/// Kind-specific part of the context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionDetail {
    BuyProperty {
        property: PropertyView,
    },
    AuctionBid {
        property: PropertyView,
        high_bid: u32,
        high_bidder: Option<PlayerId>,
    },
    JailStrategy {
        fine: u32,
        attempts_remaining: u8,
    },
    TurnActions {
        buildable: Vec<PropertyView>,
        sellable: Vec<PropertyView>,
        mortgageable: Vec<PropertyView>,
        unmortgageable: Vec<PropertyView>,
        trades_remaining: u8,
    },
    TradeResponse {
        trade: Trade,
    },
}

/// Everything a decision-maker is told
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub game_id: Uuid,
    pub turn_number: u32,
    pub phase: TurnPhase,
    pub me: PlayerView,
    pub opponents: Vec<PlayerView>,
    pub detail: DecisionDetail,
}

/// A suspension point: the engine waits until this is answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub token: ResumeToken,
    pub player: PlayerId,
    pub kind: DecisionKind,
    pub valid_actions: Vec<ActionName>,
    pub context: DecisionContext,
}

impl PendingDecision {
    pub fn allows(&self, decision: &Decision) -> bool {
        self.valid_actions.contains(&decision.action())
    }

    /// The fallback resolution for this decision
    pub fn fallback(&self, reason: impl Into<String>) -> Resolution {
        Resolution {
            decision: self.kind.fallback(),
            reasoning: String::new(),
            fallback_reason: Some(reason.into()),
        }
    }
}

/// The JSON object an oracle answers with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub reasoning: String,
}

/// Oracle text that could not be read at all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoJsonObject,

    #[error("JSON object has no action")]
    MissingAction,

    #[error("malformed JSON: {0}")]
    Malformed(String),
}

/// A typed decision plus where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub decision: Decision,
    pub reasoning: String,
    /// Set when the decision is the kind's fallback rather than the oracle's choice
    pub fallback_reason: Option<String>,
}

impl Resolution {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

impl From<Decision> for Resolution {
    fn from(decision: Decision) -> Self {
        Self {
            decision,
            reasoning: String::new(),
            fallback_reason: None,
        }
    }
}

/// Byte ranges of balanced top-level `{...}` spans, string-literal aware
fn object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, i + 1));
                }
            }
            _ => {}
        }
    }
    spans
}

/// Pull the decision object out of free text
pub fn extract_response(text: &str) -> Result<OracleResponse, ParseError> {
    let spans = object_spans(text);
    if spans.is_empty() {
        return Err(ParseError::NoJsonObject);
    }

    let mut error = ParseError::NoJsonObject;
    for (start, end) in spans {
        let value: Value = match serde_json::from_str(&text[start..end]) {
            Ok(value) => value,
            Err(e) => {
                error = ParseError::Malformed(e.to_string());
                continue;
            }
        };
        let has_action = value
            .get("action")
            .and_then(Value::as_str)
            .is_some_and(|a| !a.trim().is_empty());
        if !has_action {
            error = ParseError::MissingAction;
            continue;
        }
        return serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()));
    }
    Err(error)
}

/// Turn a parsed response into a typed decision, falling back when it is
/// not legal for `pending`
pub fn interpret(response: &OracleResponse, pending: &PendingDecision) -> Resolution {
    let Some(action) = pending.kind.normalize_action(&response.action) else {
        return pending.fallback(format!("unknown action '{}'", response.action));
    };
    if !pending.valid_actions.contains(&action) {
        return pending.fallback(format!(
            "action '{action}' is not valid for {}",
            pending.kind
        ));
    }

    match decision_for(action, &response.parameters, pending) {
        Ok(decision) => Resolution {
            decision,
            reasoning: response.reasoning.clone(),
            fallback_reason: None,
        },
        Err(reason) => pending.fallback(format!("invalid parameters for '{action}': {reason}")),
    }
}

/// Extract and interpret in one go
pub fn resolve(text: &str, pending: &PendingDecision) -> Result<Resolution, ParseError> {
    let response = extract_response(text)?;
    Ok(interpret(&response, pending))
}

fn decision_for(
    action: ActionName,
    params: &Map<String, Value>,
    pending: &PendingDecision,
) -> Result<Decision, String> {
    let decision = match action {
        ActionName::Buy => Decision::Buy,
        ActionName::Auction => Decision::DeclineBuy,
        ActionName::PayFine => Decision::PayFine,
        ActionName::UseCard => Decision::UseJailCard,
        ActionName::Roll => Decision::RollForDoubles,
        ActionName::Done => Decision::Done,
        ActionName::Pass => Decision::PassBid,
        ActionName::Accept => Decision::AcceptTrade,
        ActionName::Reject => Decision::RejectTrade,
        ActionName::Bid => {
            let amount = lookup(params, &["amount", "bid", "value"])
                .ok_or("missing amount")
                .and_then(|v| as_u32(v).ok_or("amount must be a whole number"))?;
            if amount == 0 {
                return Err("bid must be positive".into());
            }
            Decision::Bid { amount }
        }
        ActionName::Build => {
            let property = property_param(params)?;
            let count = match lookup(params, &["count", "houses", "quantity"]) {
                Some(v) => as_u32(v).ok_or("count must be a whole number")?,
                None => 1,
            };
            if count == 0 || count > 5 {
                return Err(format!("cannot build {count} houses"));
            }
            Decision::Build {
                property,
                count: count as u8,
            }
        }
        ActionName::SellHouse => Decision::SellHouse {
            property: property_param(params)?,
        },
        ActionName::Mortgage => Decision::Mortgage {
            property: property_param(params)?,
        },
        ActionName::Unmortgage => Decision::Unmortgage {
            property: property_param(params)?,
        },
        ActionName::Trade => {
            let recipient = lookup(params, &["recipient", "to", "player", "with"])
                .ok_or("missing recipient")
                .and_then(|v| player_ref(v, pending).ok_or("unknown recipient"))?;
            Decision::ProposeTrade {
                recipient,
                offer: bundle_param(params, &["offer", "give", "offering"])?,
                request: bundle_param(params, &["request", "receive", "requesting", "want"])?,
            }
        }
        ActionName::Counter => Decision::CounterTrade {
            offer: bundle_param(params, &["offer", "give", "offering"])?,
            request: bundle_param(params, &["request", "receive", "requesting", "want"])?,
        },
    };
    Ok(decision)
}

fn lookup<'a>(params: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| params.get(*k)).filter(|v| !v.is_null())
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
        _ => None,
    }
}

/// A property given by board position or by (case-insensitive) name
fn property_ref(value: &Value) -> Option<PropertyId> {
    let position = match value {
        Value::String(s) => as_u32(value).or_else(|| find_by_name(s).map(u32::from))?,
        _ => as_u32(value)?,
    };
    u8::try_from(position).ok().filter(|p| *p < BOARD_SIZE)
}

fn property_param(params: &Map<String, Value>) -> Result<PropertyId, String> {
    let value = lookup(params, &["property", "property_id", "position", "property_name"])
        .ok_or("missing property")?;
    property_ref(value).ok_or_else(|| format!("unknown property {value}"))
}

/// A player given by seat number or by name
fn player_ref(value: &Value, pending: &PendingDecision) -> Option<PlayerId> {
    let players = || {
        std::iter::once(&pending.context.me).chain(pending.context.opponents.iter())
    };
    if let Some(seat) = as_u32(value) {
        return players().find(|p| u32::from(p.id) == seat).map(|p| p.id);
    }
    let name = value.as_str()?.trim();
    players()
        .find(|p| p.name.eq_ignore_ascii_case(name))
        .map(|p| p.id)
}

fn bundle_param(params: &Map<String, Value>, keys: &[&str]) -> Result<TradeBundle, String> {
    let Some(value) = lookup(params, keys) else {
        return Ok(TradeBundle::default());
    };
    let object = value
        .as_object()
        .ok_or_else(|| format!("{} must be an object", keys[0]))?;

    let money = match lookup(object, &["money", "cash"]) {
        Some(v) => as_u32(v).ok_or("money must be a whole number")?,
        None => 0,
    };
    let jail_cards = match lookup(object, &["jail_cards", "get_out_of_jail_free_cards"]) {
        Some(v) => as_u32(v)
            .and_then(|n| u8::try_from(n).ok())
            .ok_or("jail_cards must be a small whole number")?,
        None => 0,
    };
    let properties = match lookup(object, &["properties", "property_ids"]) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| property_ref(item).ok_or_else(|| format!("unknown property {item}")))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err("properties must be a list".into()),
        None => Vec::new(),
    };

    Ok(TradeBundle {
        money,
        properties,
        jail_cards,
    })
}
