//! The table of every item the Archipelago server can send to Okami.
//!
//! Item ids are Archipelago ids. The ranges follow the apworld: `0x00..=0xFF`
//! are plain inventory items, `0x100..=0x115` are brush techniques,
//! `0x300..=0x302` are progressive weapons and `0x303..=0x308` are story
//! flags.

use std::collections::HashMap;
use std::sync::LazyLock;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// A bitfield in the world state that holds story flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr)]
pub enum FlagCategory {
    KeyItemsAcquired,
    GoldDustsAcquired,
}

impl FlagCategory {
    /// The number of bits in this category's bitfield.
    pub const fn bits(self) -> u32 {
        match self {
            FlagCategory::KeyItemsAcquired | FlagCategory::GoldDustsAcquired => 32,
        }
    }
}

/// A single story flag to set when an item is received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventFlag {
    pub category: FlagCategory,
    pub bit: u32,
}

impl EventFlag {
    pub const fn key_item(bit: u32) -> Self {
        Self {
            category: FlagCategory::KeyItemsAcquired,
            bit,
        }
    }
}

/// What receiving an item does to the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemHandler {
    /// Unlocks the brush technique at `brush_index`.
    Brush { brush_index: u32 },

    /// Unlocks the brush technique at `brush_index` the first time, then each
    /// later copy sets the next unset bit of `upgrade_bits` in the brush
    /// upgrade bitfield.
    ProgressiveBrush {
        brush_index: u32,
        upgrade_bits: &'static [u32],
    },

    /// Adds the game item `item_id` to the inventory.
    Inventory { item_id: u8 },

    /// Gives the stage after the highest one the player already owns.
    Progressive { stages: &'static [u8] },

    /// Sets every listed story flag.
    EventFlags { flags: &'static [EventFlag] },
}

/// The broad kind of an item, derived from where its id falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum RewardCategory {
    GameItem,
    Brush,
    EventFlag,
    Unknown,
}

/// An item the server can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemDef {
    /// The Archipelago item id.
    pub id: i64,

    /// The name the apworld uses for this item.
    pub name: &'static str,

    pub handler: ItemHandler,
}

impl ItemDef {
    pub fn category(&self) -> RewardCategory {
        category(self.id)
    }
}

const GAME_ITEM_MAX: i64 = 0xFF;

const POWER_SLASH_UPGRADES: &[u32] = &[0, 10];
const CHERRY_BOMB_UPGRADES: &[u32] = &[6, 11];

const MIRROR_STAGES: &[u8] = &[0x13, 0x14];
const ROSARY_STAGES: &[u8] = &[0x15, 0x16, 0x17, 0x18, 0x19];
const SWORD_STAGES: &[u8] = &[0x1A, 0x1B, 0x1C, 0x1D, 0x1E];

const SAVE_REI: &[EventFlag] = &[EventFlag::key_item(0)];
const SAVE_SHIN: &[EventFlag] = &[EventFlag::key_item(1)];
const SAVE_CHI: &[EventFlag] = &[EventFlag::key_item(2)];
const SAVE_KO: &[EventFlag] = &[EventFlag::key_item(3)];
const SAVE_TEI: &[EventFlag] = &[EventFlag::key_item(4)];
const SERPENT_CRYSTAL: &[EventFlag] = &[EventFlag::key_item(5)];

const fn brush(id: i64, name: &'static str, brush_index: u32) -> ItemDef {
    ItemDef {
        id,
        name,
        handler: ItemHandler::Brush { brush_index },
    }
}

const fn progressive_brush(
    id: i64,
    name: &'static str,
    brush_index: u32,
    upgrade_bits: &'static [u32],
) -> ItemDef {
    ItemDef {
        id,
        name,
        handler: ItemHandler::ProgressiveBrush {
            brush_index,
            upgrade_bits,
        },
    }
}

const fn inventory(id: i64, name: &'static str, item_id: u8) -> ItemDef {
    ItemDef {
        id,
        name,
        handler: ItemHandler::Inventory { item_id },
    }
}

const fn progressive(id: i64, name: &'static str, stages: &'static [u8]) -> ItemDef {
    ItemDef {
        id,
        name,
        handler: ItemHandler::Progressive { stages },
    }
}

const fn event_flags(id: i64, name: &'static str, flags: &'static [EventFlag]) -> ItemDef {
    ItemDef {
        id,
        name,
        handler: ItemHandler::EventFlags { flags },
    }
}

/// Every item the client knows how to grant.
pub static ITEMS: &[ItemDef] = &[
    brush(0x100, "Sunrise", 0),
    brush(0x101, "Rejuvenation", 1),
    progressive_brush(0x102, "Power Slash", 2, POWER_SLASH_UPGRADES),
    progressive_brush(0x103, "Cherry Bomb", 3, CHERRY_BOMB_UPGRADES),
    brush(0x104, "Greensprout (Bloom)", 4),
    brush(0x105, "Greensprout (Waterlily)", 5),
    brush(0x106, "Greensprout (Vine)", 6),
    brush(0x107, "Watersprout", 7),
    brush(0x108, "Crescent", 8),
    brush(0x109, "Galestorm", 9),
    brush(0x10A, "Inferno", 10),
    brush(0x10B, "Veil of Mist", 11),
    brush(0x10C, "Catwalk", 12),
    brush(0x10D, "Thunderstorm", 13),
    brush(0x10E, "Blizzard", 14),
    brush(0x10F, "Mist Warp", 15),
    brush(0x110, "Fireburst", 16),
    brush(0x111, "Whirlwind", 17),
    brush(0x112, "Deluge", 18),
    brush(0x113, "Fountain", 19),
    brush(0x114, "Thunderbolt", 20),
    brush(0x115, "Icestorm", 21),
    inventory(0xB, "Peace Bell", 0xB),
    inventory(0x95, "Golden Lucky Cat", 0x95),
    inventory(0x96, "Thief's Glove", 0x96),
    inventory(0x97, "Wood Mat", 0x97),
    inventory(0x98, "Golden Ink Pot", 0x98),
    inventory(0x9D, "Fire Tablet", 0x9D),
    inventory(0x42, "Canine Tracker", 0x42),
    inventory(0x43, "Lucky Mallet", 0x43),
    inventory(0x44, "Border Key", 0x44),
    inventory(0x45, "Dragon Orb", 0x45),
    inventory(0x46, "Fox Rods", 0x46),
    inventory(0x47, "Thunder Brew", 0x47),
    inventory(0x48, "Shell Amulet", 0x48),
    inventory(0x49, "Mask", 0x49),
    inventory(0x4A, "Ogre Liver", 0x4A),
    inventory(0x4B, "Lips of Ice", 0x4B),
    inventory(0x4C, "Eyeball of Fire", 0x4C),
    inventory(0x4D, "Black Demon Horn", 0x4D),
    inventory(0x5F, "Golden Mushroom", 0x5F),
    inventory(0x60, "Gimmick Gear", 0x60),
    inventory(0x62, "8 Purification Sake", 0x62),
    inventory(0x63, "Sewaprolo", 0x63),
    inventory(0x71, "Charcoal", 0x71),
    inventory(0x72, "Blinding Snow", 0x72),
    inventory(0x73, "Treasure Box", 0x73),
    inventory(0x75, "Herbal Medicine", 0x75),
    inventory(0x76, "Pinwheel", 0x76),
    inventory(0x77, "Marlin Rod", 0x77),
    inventory(0x5C, "Vista of the Gods", 0x5C),
    inventory(0x40, "Tsuta Ruins Key", 0x40),
    inventory(0x5, "Sun Fragment", 0x5),
    inventory(0x6, "Astral Pouch", 0x6),
    inventory(0xCC, "Stray Bead", 0xCC),
    inventory(0x1F, "Demon Fang", 0x1F),
    inventory(0xE, "Mermaid Coin", 0xE),
    inventory(0xF, "Golden Peach", 0xF),
    inventory(0x9E, "Gold Dust", 0x9E),
    inventory(0x4, "Holy Bone L", 0x4),
    inventory(0x8, "Exorcism Slip L", 0x8),
    inventory(0x9, "Exorcism Slip M", 0x9),
    inventory(0xA, "Exorcism Slip S", 0xA),
    inventory(0xC, "Vengeance Slip", 0xC),
    inventory(0xD, "Inkfinity Stone", 0xD),
    inventory(0x70, "Traveler's Charm", 0x70),
    inventory(0x8E, "Holy Bone M", 0x8E),
    inventory(0x8F, "Holy Bone S", 0x8F),
    inventory(0x90, "Feedbag (Meat)", 0x90),
    inventory(0x91, "Feedbag (Herbs)", 0x91),
    inventory(0x92, "Feedbag (Seeds)", 0x92),
    inventory(0x93, "Feedbag (Fish)", 0x93),
    inventory(0x99, "Steel Fist Sake", 0x99),
    inventory(0x9A, "Steel Soul Sake", 0x9A),
    inventory(0x9B, "Godly Charm", 0x9B),
    inventory(0xA0, "White porcelain pot", 0xA0),
    inventory(0xA1, "Kutani Pottery", 0xA1),
    inventory(0xA3, "Incense Burner", 0xA3),
    inventory(0xA4, "Vase", 0xA4),
    inventory(0xA5, "Silver Pocket Watch", 0xA5),
    inventory(0xA6, "Rat Statue", 0xA6),
    inventory(0xA7, "Bull Horn", 0xA7),
    inventory(0xA9, "Etched Glass", 0xA9),
    inventory(0xAA, "Lacquerware Set", 0xAA),
    inventory(0xAB, "Wooden Bear", 0xAB),
    inventory(0xAD, "Glass Beads", 0xAD),
    inventory(0xAE, "Dragonfly Bead", 0xAE),
    inventory(0xB0, "Coral Fragment", 0xB0),
    inventory(0xB1, "Crystal", 0xB1),
    inventory(0xB2, "Pearl", 0xB2),
    inventory(0xB3, "Ruby Tassels", 0xB3),
    inventory(0xB4, "Bull Statue", 0xB4),
    inventory(0xB5, "Tiger Statue", 0xB5),
    inventory(0xB6, "Rabbit Statue", 0xB6),
    inventory(0xB7, "Dragon Statue", 0xB7),
    inventory(0xB8, "Snake Statue", 0xB8),
    inventory(0xB9, "Horse Statue", 0xB9),
    inventory(0xBA, "Sheep Statue", 0xBA),
    inventory(0xBB, "Monkey Statue", 0xBB),
    inventory(0xBC, "Rooster Statue", 0xBC),
    inventory(0xBD, "Dog Statue", 0xBD),
    inventory(0xBE, "Boar Statue", 0xBE),
    inventory(0xBF, "Cat Statue", 0xBF),
    inventory(0xC0, "Sapphire Tassels", 0xC0),
    inventory(0xC1, "Emerald Tassels", 0xC1),
    inventory(0xC2, "Turquoise Tassels", 0xC2),
    inventory(0xC3, "Agate Tassels", 0xC3),
    inventory(0xC4, "Amber Tassels", 0xC4),
    inventory(0xC5, "Cat's Eye Tassels", 0xC5),
    inventory(0xC6, "Amethyst Tassels", 0xC6),
    inventory(0xC7, "Jade Tassels", 0xC7),
    event_flags(0x303, "Save Rei", SAVE_REI),
    event_flags(0x304, "Save Shin", SAVE_SHIN),
    event_flags(0x305, "Save Chi", SAVE_CHI),
    event_flags(0x306, "Save Ko", SAVE_KO),
    event_flags(0x307, "Save Tei", SAVE_TEI),
    inventory(0x4E, "Loyalty Orb", 0x4E),
    inventory(0x4F, "Justice Orb", 0x4F),
    inventory(0x50, "Duty Orb", 0x50),
    event_flags(0x308, "Serpent Crystal", SERPENT_CRYSTAL),
    inventory(0x10, "Divine Retribution", 0x10),
    inventory(0x11, "Snarling Beast", 0x11),
    inventory(0x12, "Infinity Judge", 0x12),
    inventory(0x13, "Trinity Mirror", 0x13),
    inventory(0x14, "Solar Flare", 0x14),
    inventory(0x15, "Devout Beads", 0x15),
    inventory(0x16, "Life Beads", 0x16),
    inventory(0x17, "Exorcism Beads", 0x17),
    inventory(0x18, "Resurrection Beads", 0x18),
    inventory(0x19, "Tundra Beads", 0x19),
    inventory(0x1A, "Tsumugari", 0x1A),
    inventory(0x1B, "Seven Strike", 0x1B),
    inventory(0x1C, "Blade of Kusanagi", 0x1C),
    inventory(0x1D, "Eight Wonder", 0x1D),
    inventory(0x1E, "Thunder Edge", 0x1E),
    progressive(0x300, "Progressive Mirror", MIRROR_STAGES),
    progressive(0x301, "Progressive Rosary", ROSARY_STAGES),
    progressive(0x302, "Progressive Sword", SWORD_STAGES),
    inventory(0xC8, "Karmic Returner", 0xC8),
    inventory(0x5B, "Karmic Transformer 1", 0x5B),
    inventory(0xC9, "Karmic Transformer 2", 0xC9),
    inventory(0x79, "Karmic Transformer 3", 0x79),
    inventory(0xCF, "Karmic Transformer 4", 0xCF),
    inventory(0xCB, "Karmic Transformer 5", 0xCB),
    inventory(0xCA, "Karmic Transformer 6", 0xCA),
    inventory(0x7B, "Karmic Transformer 7", 0x7B),
    inventory(0x7A, "Karmic Transformer 8", 0x7A),
    inventory(0x7C, "Karmic Transformer 9", 0x7C),
];

static INDEX: LazyLock<HashMap<i64, &'static ItemDef>> =
    LazyLock::new(|| ITEMS.iter().map(|item| (item.id, item)).collect());

/// Returns the definition for the Archipelago item `id`.
pub fn find_item(id: i64) -> Option<&'static ItemDef> {
    INDEX.get(&id).copied()
}

/// Returns the definition whose name matches `name`, ignoring case.
pub fn find_item_by_name(name: &str) -> Option<&'static ItemDef> {
    ITEMS.iter().find(|item| item.name.eq_ignore_ascii_case(name))
}

/// Classifies `id` by the range it falls in, whether or not the table has an
/// entry for it.
pub fn category(id: i64) -> RewardCategory {
    match id {
        0..=GAME_ITEM_MAX | 0x300..=0x302 => RewardCategory::GameItem,
        0x100..=0x115 => RewardCategory::Brush,
        0x303..=0x308 => RewardCategory::EventFlag,
        _ => RewardCategory::Unknown,
    }
}

/// Whether `id` is granted by putting a single game item in the inventory.
pub fn is_game_item(id: i64) -> bool {
    game_item_id(id).is_some()
}

/// Returns the in-game item id that `id` maps to directly, if any.
/// Progressive items don't count, since their game item depends on what the
/// player already has.
pub fn game_item_id(id: i64) -> Option<u8> {
    match find_item(id)?.handler {
        ItemHandler::Inventory { item_id } => Some(item_id),
        _ => None,
    }
}
