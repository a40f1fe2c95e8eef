//! Applying received items to the game.

use anyhow::{Result, bail};
use log::*;

use crate::items::{self, EventFlag, ItemDef, ItemHandler};

/// The parts of the game's state that granting items reads and writes.
pub trait GameState {
    /// The number of `item_id` in the player's inventory.
    fn inventory_count(&self, item_id: u8) -> Result<u16>;

    /// Adds `quantity` of `item_id` through the game's own inventory routine.
    fn give_item(&mut self, item_id: u8, quantity: i32) -> Result<()>;

    /// Whether the brush technique at `brush_index` has been obtained.
    fn has_brush(&self, brush_index: u32) -> Result<bool>;

    /// Marks the brush technique at `brush_index` as both obtained and
    /// usable.
    fn unlock_brush(&mut self, brush_index: u32) -> Result<()>;

    fn has_brush_upgrade(&self, bit: u32) -> Result<bool>;

    fn set_brush_upgrade(&mut self, bit: u32) -> Result<()>;

    fn set_flag(&mut self, flag: EventFlag) -> Result<()>;
}

/// What granting an item actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// Unlocked a brush technique.
    Brush(u32),

    /// Set a bit in the brush upgrade bitfield.
    BrushUpgrade(u32),

    /// Gave a game item.
    Item { item_id: u8, quantity: i32 },

    /// Set this many story flags.
    Flags(usize),

    /// The player already had everything this item can give.
    AlreadyMaxed,
}

/// Grants the Archipelago item `id`.
pub fn grant_id(state: &mut impl GameState, id: i64) -> Result<Grant> {
    let Some(item) = items::find_item(id) else {
        bail!("Unknown Archipelago item {id:#x}");
    };
    grant(state, item, 1)
}

/// Applies `item` to `state`. `quantity` only matters for plain inventory
/// items; everything else is granted once per call.
pub fn grant(state: &mut impl GameState, item: &ItemDef, quantity: i32) -> Result<Grant> {
    let result = match item.handler {
        ItemHandler::Brush { brush_index } => {
            state.unlock_brush(brush_index)?;
            Grant::Brush(brush_index)
        }
        ItemHandler::ProgressiveBrush {
            brush_index,
            upgrade_bits,
        } => grant_progressive_brush(state, brush_index, upgrade_bits)?,
        ItemHandler::Inventory { item_id } => {
            state.give_item(item_id, quantity)?;
            Grant::Item { item_id, quantity }
        }
        ItemHandler::Progressive { stages } => match next_stage(&*state, stages)? {
            Some(item_id) => {
                state.give_item(item_id, 1)?;
                Grant::Item {
                    item_id,
                    quantity: 1,
                }
            }
            None => Grant::AlreadyMaxed,
        },
        ItemHandler::EventFlags { flags } => {
            for flag in flags {
                debug!("Setting {} bit {}", flag.category, flag.bit);
                state.set_flag(*flag)?;
            }
            Grant::Flags(flags.len())
        }
    };

    if result == Grant::AlreadyMaxed {
        info!("{} is already fully upgraded, ignoring the extra copy", item.name);
    } else {
        debug!("Granted {}: {result:?}", item.name);
    }
    Ok(result)
}

fn grant_progressive_brush(
    state: &mut impl GameState,
    brush_index: u32,
    upgrade_bits: &[u32],
) -> Result<Grant> {
    if !state.has_brush(brush_index)? {
        state.unlock_brush(brush_index)?;
        return Ok(Grant::Brush(brush_index));
    }

    for &bit in upgrade_bits {
        if !state.has_brush_upgrade(bit)? {
            state.set_brush_upgrade(bit)?;
            return Ok(Grant::BrushUpgrade(bit));
        }
    }
    Ok(Grant::AlreadyMaxed)
}

/// Returns the stage after the highest one the player owns, or `None` if
/// they already own the last one.
pub fn next_stage(state: &impl GameState, stages: &[u8]) -> Result<Option<u8>> {
    let mut next = 0;
    for (i, &stage) in stages.iter().enumerate() {
        if state.inventory_count(stage)? > 0 {
            next = i + 1;
        }
    }
    Ok(stages.get(next).copied())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;
    use crate::items::FlagCategory;

    /// An in-memory stand-in for the game.
    #[derive(Default)]
    pub(crate) struct FakeState {
        pub inventory: HashMap<u8, u16>,
        pub brushes: HashSet<u32>,
        pub upgrades: HashSet<u32>,
        pub flags: HashSet<EventFlag>,
        pub given: Vec<(u8, i32)>,
    }

    impl GameState for FakeState {
        fn inventory_count(&self, item_id: u8) -> Result<u16> {
            Ok(self.inventory.get(&item_id).copied().unwrap_or(0))
        }

        fn give_item(&mut self, item_id: u8, quantity: i32) -> Result<()> {
            let count = self.inventory.entry(item_id).or_default();
            *count = (*count as i32 + quantity).clamp(0, u16::MAX as i32) as u16;
            self.given.push((item_id, quantity));
            Ok(())
        }

        fn has_brush(&self, brush_index: u32) -> Result<bool> {
            Ok(self.brushes.contains(&brush_index))
        }

        fn unlock_brush(&mut self, brush_index: u32) -> Result<()> {
            self.brushes.insert(brush_index);
            Ok(())
        }

        fn has_brush_upgrade(&self, bit: u32) -> Result<bool> {
            Ok(self.upgrades.contains(&bit))
        }

        fn set_brush_upgrade(&mut self, bit: u32) -> Result<()> {
            self.upgrades.insert(bit);
            Ok(())
        }

        fn set_flag(&mut self, flag: EventFlag) -> Result<()> {
            self.flags.insert(flag);
            Ok(())
        }
    }

    #[test]
    fn test_progressive_mirror_advances() {
        let mut state = FakeState::default();
        assert_eq!(
            grant_id(&mut state, 0x300).unwrap(),
            Grant::Item {
                item_id: 0x13,
                quantity: 1
            }
        );
        assert_eq!(
            grant_id(&mut state, 0x300).unwrap(),
            Grant::Item {
                item_id: 0x14,
                quantity: 1
            }
        );
        assert_eq!(grant_id(&mut state, 0x300).unwrap(), Grant::AlreadyMaxed);
        assert_eq!(state.given, vec![(0x13, 1), (0x14, 1)]);
    }

    #[test]
    fn test_progressive_skips_to_after_highest_owned() {
        let mut state = FakeState::default();
        state.inventory.insert(0x17, 1);
        assert_eq!(
            grant_id(&mut state, 0x301).unwrap(),
            Grant::Item {
                item_id: 0x18,
                quantity: 1
            }
        );
    }

    #[test]
    fn test_power_slash_upgrade_order() {
        let mut state = FakeState::default();
        assert_eq!(grant_id(&mut state, 0x102).unwrap(), Grant::Brush(2));
        assert_eq!(grant_id(&mut state, 0x102).unwrap(), Grant::BrushUpgrade(0));
        assert_eq!(grant_id(&mut state, 0x102).unwrap(), Grant::BrushUpgrade(10));
        assert_eq!(grant_id(&mut state, 0x102).unwrap(), Grant::AlreadyMaxed);
        assert_eq!(state.upgrades, HashSet::from([0, 10]));
    }

    #[test]
    fn test_cherry_bomb_resumes_from_existing_upgrade() {
        let mut state = FakeState::default();
        state.brushes.insert(3);
        state.upgrades.insert(6);
        assert_eq!(grant_id(&mut state, 0x103).unwrap(), Grant::BrushUpgrade(11));
    }

    #[test]
    fn test_simple_brush() {
        let mut state = FakeState::default();
        assert_eq!(grant_id(&mut state, 0x10F).unwrap(), Grant::Brush(15));
        assert!(state.brushes.contains(&15));
    }

    #[test]
    fn test_inventory_quantity() {
        let mut state = FakeState::default();
        let item = items::find_item(0xB).unwrap();
        grant(&mut state, item, 3).unwrap();
        grant(&mut state, item, -5).unwrap();
        assert_eq!(state.inventory_count(0xB).unwrap(), 0);
        assert_eq!(state.given, vec![(0xB, 3), (0xB, -5)]);
    }

    #[test]
    fn test_event_flags() {
        let mut state = FakeState::default();
        assert_eq!(grant_id(&mut state, 0x308).unwrap(), Grant::Flags(1));
        assert!(state.flags.contains(&EventFlag {
            category: FlagCategory::KeyItemsAcquired,
            bit: 5
        }));
    }

    #[test]
    fn test_unknown_item_fails() {
        let mut state = FakeState::default();
        assert!(grant_id(&mut state, 0xFFFF).is_err());
    }
}
