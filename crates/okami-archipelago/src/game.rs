//! Okami's own state, reached through the runtime's memory API.

use anyhow::{Context, Result, bail};
use wolf_runtime::ModApi;
use wolf_runtime::bitfield::BitfieldBuf;

use crate::items::{EventFlag, FlagCategory};
use crate::rewards::GameState;

use self::offsets::*;

/// The module all of the offsets below are relative to.
pub const MAIN_MODULE: &str = "main.dll";

/// Where Okami keeps its state, as offsets into [MAIN_MODULE].
pub mod offsets {
    /// `CollectionData`: inventory and world state.
    pub const COLLECTION_DATA: usize = 0xB205D0;
    pub const INVENTORY: usize = COLLECTION_DATA + 0x60;
    pub const INVENTORY_SLOTS: usize = 256;
    pub const WORLD: usize = COLLECTION_DATA + 0x260;
    pub const USABLE_BRUSH_TECHNIQUES: usize = WORLD + 0x10;
    pub const OBTAINED_BRUSH_TECHNIQUES: usize = WORLD + 0x18;
    pub const KEY_ITEMS_ACQUIRED: usize = WORLD + 0x80;
    pub const GOLD_DUSTS_ACQUIRED: usize = WORLD + 0x84;

    /// One 256-bit field per map.
    pub const MAP_STATE_BITS: usize = WORLD + 0xFC;
    pub const MAP_STATE_BITS_BYTES: usize = 32;

    /// `TrackerData`: progress the game tracks outside the world state.
    pub const TRACKER_DATA: usize = 0xB21780;
    pub const GAME_PROGRESS_BITS: usize = TRACKER_DATA + 0x20;
    pub const GAME_PROGRESS_BYTES: usize = 12;
    pub const BRUSH_UPGRADES: usize = TRACKER_DATA + 0x3C;

    /// 86 story flags, not part of any save structure.
    pub const GLOBAL_FLAGS: usize = 0xB6B2AC;
    pub const GLOBAL_FLAG_BYTES: usize = 11;

    /// The `MapState` array, one record per map.
    pub const MAP_STATES: usize = 0xB322B0;
    pub const MAP_STATE_SIZE: usize = 0xE4;
    pub const MAP_COUNT: usize = 83;
    pub const COLLECTED_OBJECTS: usize = 0x8C;
    pub const AREAS_RESTORED: usize = 0xA0;
    pub const MAP_FLAG_BYTES: usize = 12;

    /// Sizes in bytes of the brush and item flag bitfields.
    pub const BRUSH_BYTES: usize = 8;
    pub const FLAG_BYTES: usize = 4;
}

/// The handful of runtime calls the client needs, so the game state can be
/// driven by something other than a live process.
pub trait GameAccess {
    fn module_base(&self, module: &str) -> Option<usize>;

    fn read(&self, address: usize, buf: &mut [u8]) -> wolf_runtime::error::Result<()>;

    fn write(&self, address: usize, data: &[u8]) -> wolf_runtime::error::Result<()>;

    /// Hands an item to the game's inventory routine. Returns whether the
    /// game took it.
    fn give_item(&self, item_id: i32, quantity: i32) -> bool;
}

impl GameAccess for ModApi {
    fn module_base(&self, module: &str) -> Option<usize> {
        ModApi::module_base(self, Some(module))
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> wolf_runtime::error::Result<()> {
        ModApi::read(self, address, buf)
    }

    fn write(&self, address: usize, data: &[u8]) -> wolf_runtime::error::Result<()> {
        ModApi::write(self, address, data)
    }

    // The runtime's slot doesn't report a result, so a call that leaves the
    // inventory count untouched is treated as refused.
    fn give_item(&self, item_id: i32, quantity: i32) -> bool {
        let slot = usize::try_from(item_id)
            .ok()
            .filter(|&id| id < INVENTORY_SLOTS)
            .zip(GameAccess::module_base(self, MAIN_MODULE))
            .map(|(id, base)| base + INVENTORY + id * 2);
        let Some(slot) = slot else {
            return false;
        };
        let count = |api: &ModApi| {
            let mut bytes = [0u8; 2];
            ModApi::read(api, slot, &mut bytes).map(|_| u16::from_le_bytes(bytes))
        };

        let before = count(self);
        ModApi::give_item(self, item_id, quantity);
        match (before, count(self)) {
            (Ok(before), Ok(after)) => quantity == 0 || before != after,
            _ => false,
        }
    }
}

/// Okami's memory, resolved against the loaded `main.dll`.
pub struct GameMemory<A: GameAccess> {
    access: A,
    base: usize,
}

impl<A: GameAccess> GameMemory<A> {
    /// Locates `main.dll`. Fails if the game module isn't loaded, in which
    /// case nothing else here could work.
    pub fn new(access: A) -> Result<Self> {
        let Some(base) = access.module_base(MAIN_MODULE) else {
            bail!("{MAIN_MODULE} isn't loaded");
        };
        Ok(Self { access, base })
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// Returns the whole inventory, indexed by game item id.
    pub fn inventory(&self) -> Result<Vec<u16>> {
        let mut bytes = vec![0u8; INVENTORY_SLOTS * 2];
        self.access.read(self.base + INVENTORY, &mut bytes)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    fn read_bits(&self, offset: usize, len: usize) -> Result<BitfieldBuf> {
        let mut bytes = vec![0u8; len];
        self.access
            .read(self.base + offset, &mut bytes)
            .with_context(|| format!("Reading bitfield at {MAIN_MODULE}+{offset:#x}"))?;
        Ok(BitfieldBuf::from_bytes(bytes))
    }

    fn has_bit(&self, offset: usize, len: usize, bit: u32) -> Result<bool> {
        Ok(self.read_bits(offset, len)?.get(bit)?)
    }

    /// Sets `bit` in the bitfield at `offset` with a read-modify-write.
    fn set_bit(&self, offset: usize, len: usize, bit: u32) -> Result<()> {
        let mut bits = self.read_bits(offset, len)?;
        bits.set(bit)?;
        self.access
            .write(self.base + offset, bits.as_bytes())
            .with_context(|| format!("Writing bitfield at {MAIN_MODULE}+{offset:#x}"))?;
        Ok(())
    }
}

impl<A: GameAccess> GameState for GameMemory<A> {
    fn inventory_count(&self, item_id: u8) -> Result<u16> {
        let mut bytes = [0u8; 2];
        self.access
            .read(self.base + INVENTORY + item_id as usize * 2, &mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn give_item(&mut self, item_id: u8, quantity: i32) -> Result<()> {
        if !self.access.give_item(item_id.into(), quantity) {
            bail!("The game refused {quantity} of item {item_id:#x}");
        }
        Ok(())
    }

    fn has_brush(&self, brush_index: u32) -> Result<bool> {
        self.has_bit(OBTAINED_BRUSH_TECHNIQUES, BRUSH_BYTES, brush_index)
    }

    fn unlock_brush(&mut self, brush_index: u32) -> Result<()> {
        self.set_bit(USABLE_BRUSH_TECHNIQUES, BRUSH_BYTES, brush_index)?;
        self.set_bit(OBTAINED_BRUSH_TECHNIQUES, BRUSH_BYTES, brush_index)
    }

    fn has_brush_upgrade(&self, bit: u32) -> Result<bool> {
        self.has_bit(BRUSH_UPGRADES, FLAG_BYTES, bit)
    }

    fn set_brush_upgrade(&mut self, bit: u32) -> Result<()> {
        self.set_bit(BRUSH_UPGRADES, FLAG_BYTES, bit)
    }

    fn set_flag(&mut self, flag: EventFlag) -> Result<()> {
        let offset = match flag.category {
            FlagCategory::KeyItemsAcquired => KEY_ITEMS_ACQUIRED,
            FlagCategory::GoldDustsAcquired => GOLD_DUSTS_ACQUIRED,
        };
        self.set_bit(offset, FLAG_BYTES, flag.bit)
    }
}
