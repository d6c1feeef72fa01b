//! Chance and Community Chest cards and the per-game draw piles.
//!
//! Each deck is persisted as the ordered list of card indices still to be
//! drawn. A deck is reshuffled from a fresh `[0..16)` only once it is empty,
//! so no card repeats before every card has been seen.

use crate::board::{PropertyId, HOTEL};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cards per deck
pub const DECK_SIZE: u8 = 16;

/// Which of the two decks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckKind {
    Chance,
    CommunityChest,
}

impl DeckKind {
    pub fn name(&self) -> &'static str {
        match self {
            DeckKind::Chance => "Chance",
            DeckKind::CommunityChest => "Community Chest",
        }
    }
}

/// Target kind for "advance to nearest" cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nearest {
    Railroad,
    Utility,
}

/// The typed effect of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardEffect {
    /// Advance to a board position, collecting salary if GO is passed
    MoveTo(u8),
    /// Move by a signed number of spaces (never collects salary going backwards)
    MoveRelative(i8),
    /// Advance to the nearest railroad or utility with a rent override
    MoveToNearest(Nearest),
    Receive(u32),
    Pay(u32),
    /// Pay every other active player
    PayEach(u32),
    /// Collect from every other active player
    CollectFromEach(u32),
    /// Repairs: per house, per hotel
    PayPerBuilding { house: u32, hotel: u32 },
    GoToJail,
    GetOutOfJailFree,
}

/// A card: printed text plus its effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Card {
    pub text: &'static str,
    pub effect: CardEffect,
}

const fn card(text: &'static str, effect: CardEffect) -> Card {
    Card { text, effect }
}

/// The Chance card table
pub static CHANCE: [Card; 16] = [
    card("Advance to Boardwalk", CardEffect::MoveTo(39)),
    card("Advance to GO (Collect $200)", CardEffect::MoveTo(0)),
    card("Advance to Illinois Avenue", CardEffect::MoveTo(24)),
    card("Advance to St. Charles Place", CardEffect::MoveTo(11)),
    card(
        "Advance to the nearest Railroad and pay the owner twice the rental",
        CardEffect::MoveToNearest(Nearest::Railroad),
    ),
    card(
        "Advance to the nearest Railroad and pay the owner twice the rental",
        CardEffect::MoveToNearest(Nearest::Railroad),
    ),
    card(
        "Advance to the nearest Utility and pay the owner ten times the dice roll",
        CardEffect::MoveToNearest(Nearest::Utility),
    ),
    card("Bank pays you dividend of $50", CardEffect::Receive(50)),
    card("Get Out of Jail Free", CardEffect::GetOutOfJailFree),
    card("Go Back 3 Spaces", CardEffect::MoveRelative(-3)),
    card("Go to Jail", CardEffect::GoToJail),
    card(
        "Make general repairs on all your property: $25 per house, $100 per hotel",
        CardEffect::PayPerBuilding {
            house: 25,
            hotel: 100,
        },
    ),
    card("Speeding fine $15", CardEffect::Pay(15)),
    card("Take a trip to Reading Railroad", CardEffect::MoveTo(5)),
    card(
        "You have been elected Chairman of the Board. Pay each player $50",
        CardEffect::PayEach(50),
    ),
    card("Your building loan matures. Collect $150", CardEffect::Receive(150)),
];

/// The Community Chest card table
pub static COMMUNITY_CHEST: [Card; 16] = [
    card("Advance to GO (Collect $200)", CardEffect::MoveTo(0)),
    card("Bank error in your favor. Collect $200", CardEffect::Receive(200)),
    card("Doctor's fee. Pay $50", CardEffect::Pay(50)),
    card("From sale of stock you get $50", CardEffect::Receive(50)),
    card("Get Out of Jail Free", CardEffect::GetOutOfJailFree),
    card("Go to Jail", CardEffect::GoToJail),
    card("Holiday fund matures. Receive $100", CardEffect::Receive(100)),
    card("Income tax refund. Collect $20", CardEffect::Receive(20)),
    card(
        "It is your birthday. Collect $10 from every player",
        CardEffect::CollectFromEach(10),
    ),
    card("Life insurance matures. Collect $100", CardEffect::Receive(100)),
    card("Pay hospital fees of $100", CardEffect::Pay(100)),
    card("Pay school fees of $50", CardEffect::Pay(50)),
    card("Receive $25 consultancy fee", CardEffect::Receive(25)),
    card(
        "You are assessed for street repairs: $40 per house, $115 per hotel",
        CardEffect::PayPerBuilding {
            house: 40,
            hotel: 115,
        },
    ),
    card(
        "You have won second prize in a beauty contest. Collect $10",
        CardEffect::Receive(10),
    ),
    card("You inherit $100", CardEffect::Receive(100)),
];

/// Look up a card by deck and index
pub fn card_at(kind: DeckKind, index: u8) -> &'static Card {
    let table = match kind {
        DeckKind::Chance => &CHANCE,
        DeckKind::CommunityChest => &COMMUNITY_CHEST,
    };
    &table[(index % DECK_SIZE) as usize]
}

/// Board position of the nearest railroad/utility ahead of `from`
pub fn nearest(from: u8, target: Nearest) -> PropertyId {
    let candidates: &[u8] = match target {
        Nearest::Railroad => &[5, 15, 25, 35],
        Nearest::Utility => &[12, 28],
    };
    candidates
        .iter()
        .copied()
        .find(|&p| p > from)
        .unwrap_or(candidates[0])
}

/// A draw pile: the ordered indices still to be drawn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    pub kind: DeckKind,
    pub remaining: VecDeque<u8>,
}

impl Deck {
    /// A freshly shuffled deck
    pub fn shuffled<R: Rng>(kind: DeckKind, rng: &mut R) -> Self {
        let mut deck = Self {
            kind,
            remaining: VecDeque::new(),
        };
        deck.reshuffle(rng);
        deck
    }

    /// Replace the pile with an unbiased (Fisher-Yates) permutation of every card
    pub fn reshuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut order: Vec<u8> = (0..DECK_SIZE).collect();
        order.shuffle(rng);
        self.remaining = order.into();
    }

    /// Draw the next card, reshuffling first if the pile is exhausted
    pub fn draw<R: Rng>(&mut self, rng: &mut R) -> u8 {
        if self.remaining.is_empty() {
            self.reshuffle(rng);
        }
        // Non-empty after a reshuffle
        self.remaining.pop_front().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Count a player's houses and hotels for repair cards
pub fn building_counts<I>(houses: I) -> (u32, u32)
where
    I: IntoIterator<Item = u8>,
{
    houses.into_iter().fold((0, 0), |(h, hotels), n| {
        if n == HOTEL {
            (h, hotels + 1)
        } else {
            (h + u32::from(n), hotels)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    #[test]
    fn test_shuffled_deck_is_a_permutation() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let deck = Deck::shuffled(DeckKind::Chance, &mut rng);
        let seen: HashSet<u8> = deck.remaining.iter().copied().collect();
        assert_eq!(deck.len(), 16);
        assert_eq!(seen.len(), 16);
    }

    #[test]
    fn test_seventeenth_draw_reshuffles() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut deck = Deck::shuffled(DeckKind::CommunityChest, &mut rng);
        for _ in 0..16 {
            deck.draw(&mut rng);
        }
        assert!(deck.is_empty());

        deck.draw(&mut rng);
        assert_eq!(deck.len(), 15);
    }

    #[test]
    fn test_nearest_wraps_around() {
        assert_eq!(nearest(7, Nearest::Railroad), 15);
        assert_eq!(nearest(22, Nearest::Railroad), 25);
        assert_eq!(nearest(36, Nearest::Railroad), 5);
        assert_eq!(nearest(7, Nearest::Utility), 12);
        assert_eq!(nearest(22, Nearest::Utility), 28);
        assert_eq!(nearest(36, Nearest::Utility), 12);
    }

    #[test]
    fn test_building_counts() {
        assert_eq!(building_counts([0, 3, 5, 4, 5]), (7, 2));
        assert_eq!(building_counts(Vec::<u8>::new()), (0, 0));
    }

    #[test]
    fn test_card_tables() {
        assert_eq!(card_at(DeckKind::Chance, 10).effect, CardEffect::GoToJail);
        assert_eq!(
            card_at(DeckKind::CommunityChest, 8).effect,
            CardEffect::CollectFromEach(10)
        );
    }

    proptest! {
        #[test]
        fn prop_no_repeat_within_a_cycle(seed in any::<u64>(), cycles in 1usize..4) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut deck = Deck::shuffled(DeckKind::Chance, &mut rng);
            for _ in 0..cycles {
                let mut seen = HashSet::new();
                for _ in 0..DECK_SIZE {
                    prop_assert!(seen.insert(deck.draw(&mut rng)));
                }
                prop_assert!(deck.is_empty());
            }
        }
    }
}
