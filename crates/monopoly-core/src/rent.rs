//! Rent, building legality and valuation.
//!
//! Everything here is a pure function of the property table, so the state
//! machine, the bot and the decision context all share one source of truth.

use crate::board::{deed, DeedKind, Group, PlayerId, Property, PropertyId, HOTEL};
use crate::game::GameError;
use serde::{Deserialize, Serialize};

/// Rent override applied by "advance to nearest" cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentModifier {
    #[default]
    Standard,
    /// Twice the normal railroad rent
    NearestRailroad,
    /// Ten times the dice, regardless of how many utilities the owner holds
    NearestUtility,
}

/// Find a property record by board position
pub fn find(all: &[Property], position: PropertyId) -> Option<&Property> {
    all.iter().find(|p| p.position == position)
}

/// Properties of one group held by `owner`
pub fn owned_in_group(all: &[Property], owner: PlayerId, group: Group) -> usize {
    all.iter()
        .filter(|p| p.owner == Some(owner) && p.group() == group)
        .count()
}

/// Whether `owner` holds every property of the group
pub fn owns_full_group(all: &[Property], owner: PlayerId, group: Group) -> bool {
    owned_in_group(all, owner, group) == group.size()
}

fn group_members<'a>(all: &'a [Property], group: Group) -> impl Iterator<Item = &'a Property> {
    all.iter().filter(move |p| p.group() == group)
}

/// Rent owed by `payer` for landing on `property`
pub fn rent(
    property: &Property,
    all: &[Property],
    payer: PlayerId,
    dice_total: u8,
    modifier: RentModifier,
) -> u32 {
    if property.mortgaged {
        return 0;
    }
    let owner = match property.owner {
        Some(owner) if owner != payer => owner,
        _ => return 0,
    };
    let deed = property.deed();
    let dice = u32::from(dice_total);

    match deed.kind {
        DeedKind::Railroad => {
            let owned = owned_in_group(all, owner, Group::Railroad).clamp(1, 4) as u32;
            let base = 25 * (1 << (owned - 1));
            match modifier {
                RentModifier::NearestRailroad => base * 2,
                _ => base,
            }
        }
        DeedKind::Utility => {
            if modifier == RentModifier::NearestUtility {
                return dice * 10;
            }
            match owned_in_group(all, owner, Group::Utility) {
                0 | 1 => dice * 4,
                _ => dice * 10,
            }
        }
        DeedKind::Street { group, rents, .. } => {
            if property.houses > 0 {
                rents[usize::from(property.houses.min(HOTEL))]
            } else if owns_full_group(all, owner, Group::Color(group)) {
                rents[0] * 2
            } else {
                rents[0]
            }
        }
    }
}

fn owned_by<'a>(
    all: &'a [Property],
    position: PropertyId,
    player: PlayerId,
) -> Result<&'a Property, GameError> {
    let property = find(all, position).ok_or(GameError::PropertyNotFound(position))?;
    if property.owner != Some(player) {
        return Err(GameError::NotOwner(property.deed().name.to_string()));
    }
    Ok(property)
}

/// Whether `player` may add one house to the property at `position` (cash not considered)
pub fn can_build(all: &[Property], position: PropertyId, player: PlayerId) -> Result<(), GameError> {
    let property = owned_by(all, position, player)?;
    let deed = property.deed();
    let name = deed.name.to_string();
    if !deed.is_street() {
        return Err(GameError::NotBuildable(name));
    }
    let group = deed.group();
    if !owns_full_group(all, player, group) {
        return Err(GameError::IncompleteGroup(name));
    }
    if group_members(all, group).any(|p| p.mortgaged) {
        return Err(GameError::GroupMortgaged(name));
    }
    if property.houses >= HOTEL {
        return Err(GameError::MaxBuildings(name));
    }
    let min = group_members(all, group)
        .map(|p| p.houses)
        .min()
        .unwrap_or(0);
    if property.houses + 1 > min + 1 {
        return Err(GameError::UnevenBuilding(name));
    }
    Ok(())
}

/// Whether `player` may sell one house from the property at `position`
pub fn can_sell_house(
    all: &[Property],
    position: PropertyId,
    player: PlayerId,
) -> Result<(), GameError> {
    let property = owned_by(all, position, player)?;
    let name = property.deed().name.to_string();
    if property.houses == 0 {
        return Err(GameError::NoBuildings(name));
    }
    let max = group_members(all, property.group())
        .map(|p| p.houses)
        .max()
        .unwrap_or(0);
    if property.houses - 1 < max.saturating_sub(1) {
        return Err(GameError::UnevenBuilding(name));
    }
    Ok(())
}

/// Whether `player` may mortgage the property at `position`
pub fn can_mortgage(
    all: &[Property],
    position: PropertyId,
    player: PlayerId,
) -> Result<(), GameError> {
    let property = owned_by(all, position, player)?;
    let name = property.deed().name.to_string();
    if property.mortgaged {
        return Err(GameError::AlreadyMortgaged(name));
    }
    if group_members(all, property.group()).any(|p| p.houses > 0) {
        return Err(GameError::BuildingsInGroup(name));
    }
    Ok(())
}

/// Whether `player` may lift the mortgage on the property at `position` (cash not considered)
pub fn can_unmortgage(
    all: &[Property],
    position: PropertyId,
    player: PlayerId,
) -> Result<(), GameError> {
    let property = owned_by(all, position, player)?;
    if !property.mortgaged {
        return Err(GameError::NotMortgaged(property.deed().name.to_string()));
    }
    Ok(())
}

/// Asset value of one property: price (or mortgage value) plus what its houses cost
pub fn property_value(property: &Property) -> u32 {
    let deed = property.deed();
    let base = if property.mortgaged {
        deed.mortgage_value()
    } else {
        deed.price
    };
    base + deed.house_cost().unwrap_or(0) * u32::from(property.houses)
}

/// Cash plus the value of every property held
pub fn net_worth(all: &[Property], player: PlayerId, cash: u32) -> u32 {
    cash + all
        .iter()
        .filter(|p| p.owner == Some(player))
        .map(property_value)
        .sum::<u32>()
}

/// Cash a player could raise by selling every house (at half cost) and mortgaging everything
pub fn liquidation_value(all: &[Property], player: PlayerId) -> u32 {
    all.iter()
        .filter(|p| p.owner == Some(player))
        .map(|p| {
            let deed = p.deed();
            let houses = deed.house_cost().unwrap_or(0) / 2 * u32::from(p.houses);
            let mortgage = if p.mortgaged { 0 } else { deed.mortgage_value() };
            houses + mortgage
        })
        .sum()
}

/// Price of the deed at `position`, if ownable
pub fn price(position: PropertyId) -> Option<u32> {
    deed(position).map(|d| d.price)
}
