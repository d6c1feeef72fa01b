//! Static board layout and mutable property state.
//!
//! This module contains:
//! - The 40-space board and what each space does
//! - Title deeds (prices, rent tables, house costs) for the 28 ownable spaces
//! - Group membership (color groups, railroads, utilities)
//! - `Property`, the per-game ownership/improvement record for a deed

use serde::{Deserialize, Serialize};

/// Player identifier: the player's fixed seat in turn order (0-based)
pub type PlayerId = u8;

/// Property identifier: the board position of the deed
pub type PropertyId = u8;

/// Number of spaces on the board
pub const BOARD_SIZE: u8 = 40;

/// The start space
pub const GO_POSITION: u8 = 0;

/// Jail / just visiting
pub const JAIL_POSITION: u8 = 10;

/// The "Go To Jail" corner
pub const GO_TO_JAIL_POSITION: u8 = 30;

/// A hotel is stored as five houses
pub const HOTEL: u8 = 5;

/// Color groups of the street properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorGroup {
    Brown,
    LightBlue,
    Pink,
    Orange,
    Red,
    Yellow,
    Green,
    DarkBlue,
}

impl ColorGroup {
    /// All color groups in board order
    pub const ALL: [ColorGroup; 8] = [
        ColorGroup::Brown,
        ColorGroup::LightBlue,
        ColorGroup::Pink,
        ColorGroup::Orange,
        ColorGroup::Red,
        ColorGroup::Yellow,
        ColorGroup::Green,
        ColorGroup::DarkBlue,
    ];
}

/// Membership group of an ownable space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    Color(ColorGroup),
    Railroad,
    Utility,
}

impl Group {
    /// Board positions belonging to this group
    pub fn members(self) -> impl Iterator<Item = PropertyId> {
        DEEDS
            .iter()
            .filter(move |d| d.group() == self)
            .map(|d| d.position)
    }

    /// Number of deeds in this group
    pub fn size(self) -> usize {
        self.members().count()
    }
}

/// What kind of ownable a deed describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeedKind {
    /// A color street; `rents[0]` is the base rent, `rents[n]` the rent with n houses
    Street {
        group: ColorGroup,
        rents: [u32; 6],
        house_cost: u32,
    },
    Railroad,
    Utility,
}

/// A title deed: the static rule data for one ownable space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deed {
    pub position: PropertyId,
    pub name: &'static str,
    pub price: u32,
    pub kind: DeedKind,
}

impl Deed {
    pub fn group(&self) -> Group {
        match self.kind {
            DeedKind::Street { group, .. } => Group::Color(group),
            DeedKind::Railroad => Group::Railroad,
            DeedKind::Utility => Group::Utility,
        }
    }

    /// Cash received from the bank when mortgaging
    pub fn mortgage_value(&self) -> u32 {
        self.price / 2
    }

    /// Cash owed to the bank to lift the mortgage (value plus 10%, rounded up)
    pub fn unmortgage_cost(&self) -> u32 {
        let value = self.mortgage_value();
        value + value.div_ceil(10)
    }

    /// Cost of one house, if this deed can be built on
    pub fn house_cost(&self) -> Option<u32> {
        match self.kind {
            DeedKind::Street { house_cost, .. } => Some(house_cost),
            _ => None,
        }
    }

    /// Street rent table, if any
    pub fn rents(&self) -> Option<&[u32; 6]> {
        match &self.kind {
            DeedKind::Street { rents, .. } => Some(rents),
            _ => None,
        }
    }

    pub fn is_street(&self) -> bool {
        matches!(self.kind, DeedKind::Street { .. })
    }
}

const fn street(
    position: PropertyId,
    name: &'static str,
    price: u32,
    group: ColorGroup,
    rents: [u32; 6],
    house_cost: u32,
) -> Deed {
    Deed {
        position,
        name,
        price,
        kind: DeedKind::Street {
            group,
            rents,
            house_cost,
        },
    }
}

const fn railroad(position: PropertyId, name: &'static str) -> Deed {
    Deed {
        position,
        name,
        price: 200,
        kind: DeedKind::Railroad,
    }
}

const fn utility(position: PropertyId, name: &'static str) -> Deed {
    Deed {
        position,
        name,
        price: 150,
        kind: DeedKind::Utility,
    }
}

use ColorGroup::*;

/// All 28 deeds, sorted by board position
pub static DEEDS: [Deed; 28] = [
    street(1, "Mediterranean Avenue", 60, Brown, [2, 10, 30, 90, 160, 250], 50),
    street(3, "Baltic Avenue", 60, Brown, [4, 20, 60, 180, 320, 450], 50),
    railroad(5, "Reading Railroad"),
    street(6, "Oriental Avenue", 100, LightBlue, [6, 30, 90, 270, 400, 550], 50),
    street(8, "Vermont Avenue", 100, LightBlue, [6, 30, 90, 270, 400, 550], 50),
    street(9, "Connecticut Avenue", 120, LightBlue, [8, 40, 100, 300, 450, 600], 50),
    street(11, "St. Charles Place", 140, Pink, [10, 50, 150, 450, 625, 750], 100),
    utility(12, "Electric Company"),
    street(13, "States Avenue", 140, Pink, [10, 50, 150, 450, 625, 750], 100),
    street(14, "Virginia Avenue", 160, Pink, [12, 60, 180, 500, 700, 900], 100),
    railroad(15, "Pennsylvania Railroad"),
    street(16, "St. James Place", 180, Orange, [14, 70, 200, 550, 750, 950], 100),
    street(18, "Tennessee Avenue", 180, Orange, [14, 70, 200, 550, 750, 950], 100),
    street(19, "New York Avenue", 200, Orange, [16, 80, 220, 600, 800, 1000], 100),
    street(21, "Kentucky Avenue", 220, Red, [18, 90, 250, 700, 875, 1050], 150),
    street(23, "Indiana Avenue", 220, Red, [18, 90, 250, 700, 875, 1050], 150),
    street(24, "Illinois Avenue", 240, Red, [20, 100, 300, 750, 925, 1100], 150),
    railroad(25, "B. & O. Railroad"),
    street(26, "Atlantic Avenue", 260, Yellow, [22, 110, 330, 800, 975, 1150], 150),
    street(27, "Ventnor Avenue", 260, Yellow, [22, 110, 330, 800, 975, 1150], 150),
    utility(28, "Water Works"),
    street(29, "Marvin Gardens", 280, Yellow, [24, 120, 360, 850, 1025, 1200], 150),
    street(31, "Pacific Avenue", 300, Green, [26, 130, 390, 900, 1100, 1275], 200),
    street(32, "North Carolina Avenue", 300, Green, [26, 130, 390, 900, 1100, 1275], 200),
    street(34, "Pennsylvania Avenue", 320, Green, [28, 150, 450, 1000, 1200, 1400], 200),
    railroad(35, "Short Line"),
    street(37, "Park Place", 350, DarkBlue, [35, 175, 500, 1100, 1300, 1500], 200),
    street(39, "Boardwalk", 400, DarkBlue, [50, 200, 600, 1400, 1700, 2000], 200),
];

/// What a board space does when landed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Space {
    Go,
    Property(PropertyId),
    CommunityChest,
    Chance,
    Tax { amount: u32 },
    Jail,
    FreeParking,
    GoToJail,
}

impl Space {
    /// Whether landing here draws a card
    pub fn is_card_space(&self) -> bool {
        matches!(self, Space::Chance | Space::CommunityChest)
    }
}

/// Look up the space at a board position
pub fn space(position: u8) -> Space {
    match position % BOARD_SIZE {
        0 => Space::Go,
        2 | 17 | 33 => Space::CommunityChest,
        7 | 22 | 36 => Space::Chance,
        4 => Space::Tax { amount: 200 },
        38 => Space::Tax { amount: 100 },
        10 => Space::Jail,
        20 => Space::FreeParking,
        30 => Space::GoToJail,
        p => Space::Property(p),
    }
}

/// Look up the deed at a board position
pub fn deed(position: PropertyId) -> Option<&'static Deed> {
    DEEDS
        .binary_search_by_key(&position, |d| d.position)
        .ok()
        .map(|i| &DEEDS[i])
}

/// Find a deed by name, ignoring case and surrounding whitespace
pub fn find_by_name(name: &str) -> Option<PropertyId> {
    let needle = name.trim();
    DEEDS
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(needle))
        .map(|d| d.position)
}

/// Human-readable name of a board position
pub fn space_name(position: u8) -> &'static str {
    match space(position) {
        Space::Go => "GO",
        Space::CommunityChest => "Community Chest",
        Space::Chance => "Chance",
        Space::Tax { amount: 200 } => "Income Tax",
        Space::Tax { .. } => "Luxury Tax",
        Space::Jail => "Jail",
        Space::FreeParking => "Free Parking",
        Space::GoToJail => "Go To Jail",
        Space::Property(p) => deed(p).map(|d| d.name).unwrap_or("Unknown"),
    }
}

/// Ownership and improvement state of one deed within a game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Board position (doubles as the property id)
    pub position: PropertyId,
    /// Owning player, or `None` for the bank
    pub owner: Option<PlayerId>,
    /// 0-4 houses, 5 = hotel
    pub houses: u8,
    pub mortgaged: bool,
}

impl Property {
    pub fn new(position: PropertyId) -> Self {
        Self {
            position,
            owner: None,
            houses: 0,
            mortgaged: false,
        }
    }

    /// One fresh, unowned record per deed
    pub fn all_unowned() -> Vec<Property> {
        DEEDS.iter().map(|d| Property::new(d.position)).collect()
    }

    /// Static rule data for this property
    pub fn deed(&self) -> &'static Deed {
        // Property records are only ever created from DEEDS positions
        deed(self.position).unwrap_or(&DEEDS[0])
    }

    pub fn group(&self) -> Group {
        self.deed().group()
    }

    pub fn has_hotel(&self) -> bool {
        self.houses == HOTEL
    }

    /// Return to the bank: unowned, unimproved, unmortgaged
    pub fn reset(&mut self) {
        self.owner = None;
        self.houses = 0;
        self.mortgaged = false;
    }
}
