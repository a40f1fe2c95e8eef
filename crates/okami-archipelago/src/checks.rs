//! Turning what the player does into Archipelago location checks.
//!
//! Every location has an id built from its category's base and the game's
//! own identifiers for it, such as an item id or a map and bit index. Checks
//! come from two places: pickup events and bitfield monitors over the save
//! data, which report each flag that goes from clear to set.

use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::*;
use strum::{EnumIter, IntoEnumIterator};
use wolf_runtime::ModApi;
use wolf_runtime::sdk::RemoteMonitor;

use crate::game::{MAIN_MODULE, offsets};

/// The kinds of location the client reports, in ascending id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum CheckCategory {
    ItemPickup,
    BrushAcquisition,
    ShopPurchase,
    WorldState,
    CollectedObject,
    AreaRestored,
    GlobalFlag,
    GameProgress,
    Container,
}

impl CheckCategory {
    /// The lowest id in this category's range.
    pub const fn base(self) -> i64 {
        match self {
            Self::ItemPickup => 100_000,
            Self::BrushAcquisition => 200_000,
            Self::ShopPurchase => 300_000,
            Self::WorldState => 400_000,
            Self::CollectedObject => 500_000,
            Self::AreaRestored => 600_000,
            Self::GlobalFlag => 700_000,
            Self::GameProgress => 800_000,
            Self::Container => 900_000,
        }
    }

    /// The category `id` falls in, or `None` if it's below every range.
    /// Containers have no upper bound.
    pub fn of(id: i64) -> Option<Self> {
        Self::iter().rev().find(|category| id >= category.base())
    }
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ItemPickup => "item pickup",
            Self::BrushAcquisition => "brush",
            Self::ShopPurchase => "shop purchase",
            Self::WorldState => "world state",
            Self::CollectedObject => "collected object",
            Self::AreaRestored => "area restored",
            Self::GlobalFlag => "global flag",
            Self::GameProgress => "game progress",
            Self::Container => "container",
        };
        f.write_str(name)
    }
}

pub fn item_check_id(item_id: i32) -> i64 {
    CheckCategory::ItemPickup.base() + i64::from(item_id)
}

pub fn brush_check_id(brush_index: u32) -> i64 {
    CheckCategory::BrushAcquisition.base() + i64::from(brush_index)
}

pub fn shop_check_id(shop_id: i32, slot: i32) -> i64 {
    CheckCategory::ShopPurchase.base() + i64::from(shop_id) * 1000 + i64::from(slot)
}

/// Ids for the per-map categories are `base + map_id * 10000 + bit`.
pub fn map_check_id(category: CheckCategory, map_id: usize, bit: u32) -> i64 {
    category.base() + map_id as i64 * 10_000 + i64::from(bit)
}

pub fn global_flag_check_id(bit: u32) -> i64 {
    CheckCategory::GlobalFlag.base() + i64::from(bit)
}

pub fn game_progress_check_id(bit: u32) -> i64 {
    CheckCategory::GameProgress.base() + i64::from(bit)
}

pub fn container_check_id(level_id: u16, spawn_index: i32) -> i64 {
    CheckCategory::Container.base() + (i64::from(level_id) << 8) + i64::from(spawn_index)
}

/// Deduplicates checks and holds them until they're handed to the server.
///
/// Checks are only accepted during gameplay, and not while received items
/// are being granted, since granting writes the same flags the player
/// would.
#[derive(Default)]
pub struct CheckTracker {
    in_gameplay: AtomicBool,
    granting: AtomicBool,

    /// Every check sent this session, including ones the server confirmed.
    sent: Mutex<HashSet<i64>>,

    /// Checks waiting to go out, oldest first.
    outbox: Mutex<Vec<i64>>,
}

impl CheckTracker {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_in_gameplay(&self, in_gameplay: bool) {
        self.in_gameplay.store(in_gameplay, Ordering::SeqCst);
    }

    pub fn set_granting(&self, granting: bool) {
        self.granting.store(granting, Ordering::SeqCst);
    }

    pub fn is_sending(&self) -> bool {
        self.in_gameplay.load(Ordering::SeqCst) && !self.granting.load(Ordering::SeqCst)
    }

    /// Records the check `id` and queues it for the server. Returns whether
    /// it was new.
    pub fn send(&self, id: i64) -> bool {
        if !self.is_sending() {
            debug!("Sending disabled, dropping check {id}");
            return false;
        }
        let Ok(mut sent) = self.sent.lock() else {
            return false;
        };
        if !sent.insert(id) {
            debug!("Check {id} was already sent");
            return false;
        }
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.push(id);
        }

        match CheckCategory::of(id) {
            Some(category) => info!("Sent {category} check {id} ({} total)", sent.len()),
            None => info!("Sent check {id} ({} total)", sent.len()),
        }
        true
    }

    /// Reports picking up `quantity` of `item_id`. Losing items isn't a
    /// check.
    pub fn on_item_pickup(&self, item_id: i32, quantity: i32) -> bool {
        quantity > 0 && self.send(item_check_id(item_id))
    }

    pub fn on_shop_purchase(&self, shop_id: i32, slot: i32) -> bool {
        self.send(shop_check_id(shop_id, slot))
    }

    /// Merges the checks the server already knows about. Returns the ones
    /// only this client knows, which are queued to go out again.
    pub fn sync_with_server(&self, server_checked: &[i64]) -> Vec<i64> {
        let Ok(mut sent) = self.sent.lock() else {
            return Vec::new();
        };
        let known: HashSet<i64> = server_checked.iter().copied().collect();
        let mut missing: Vec<i64> = sent.difference(&known).copied().collect();
        missing.sort_unstable();
        sent.extend(known);

        if !missing.is_empty() {
            info!("Resending {} check(s) the server doesn't have", missing.len());
            if let Ok(mut outbox) = self.outbox.lock() {
                for id in &missing {
                    if !outbox.contains(id) {
                        outbox.push(*id);
                    }
                }
            }
        }
        info!("Synced with the server, {} check(s) tracked", sent.len());
        missing
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map_or(0, |s| s.len())
    }

    /// Returns and clears the checks waiting for the server.
    pub fn take_outbox(&self) -> Vec<i64> {
        self.outbox
            .lock()
            .map(|mut o| mem::take(&mut *o))
            .unwrap_or_default()
    }

    /// Forgets every check, for when a different save is loaded.
    pub fn reset(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.clear();
        }
    }
}

/// Called with `(bit_index, old_value, new_value)` for each changed bit.
pub type FlagCallback = Box<dyn Fn(u32, bool, bool) + Send + Sync>;

/// Where the client's bitfield monitors live.
pub trait MonitorHost {
    type Handle: Copy;

    /// Monitors `size` bytes at `offset` into the game module.
    fn create_monitor(
        &self,
        offset: usize,
        size: usize,
        description: &str,
        callback: FlagCallback,
    ) -> Option<Self::Handle>;

    fn update_monitor(&self, handle: Self::Handle) -> bool;

    fn reset_monitor(&self, handle: Self::Handle) -> bool;

    fn destroy_monitor(&self, handle: Self::Handle);
}

impl MonitorHost for ModApi {
    type Handle = RemoteMonitor;

    fn create_monitor(
        &self,
        offset: usize,
        size: usize,
        description: &str,
        callback: FlagCallback,
    ) -> Option<RemoteMonitor> {
        self.create_bitfield_monitor(MAIN_MODULE, offset, size, description, callback)
    }

    fn update_monitor(&self, handle: RemoteMonitor) -> bool {
        ModApi::update_monitor(self, handle)
    }

    fn reset_monitor(&self, handle: RemoteMonitor) -> bool {
        ModApi::reset_monitor(self, handle)
    }

    fn destroy_monitor(&self, handle: RemoteMonitor) {
        ModApi::destroy_monitor(self, handle)
    }
}

/// One region of flags whose rising edges are checks.
struct FlagRegion {
    description: &'static str,
    offset: usize,
    size: usize,
    check_id: Box<dyn Fn(u32) -> i64 + Send + Sync>,
}

fn flag_regions() -> Vec<FlagRegion> {
    let mut regions = vec![
        FlagRegion {
            description: "Game progress",
            offset: offsets::GAME_PROGRESS_BITS,
            size: offsets::GAME_PROGRESS_BYTES,
            check_id: Box::new(game_progress_check_id),
        },
        FlagRegion {
            description: "Global flags",
            offset: offsets::GLOBAL_FLAGS,
            size: offsets::GLOBAL_FLAG_BYTES,
            check_id: Box::new(global_flag_check_id),
        },
        FlagRegion {
            description: "Brushes obtained",
            offset: offsets::OBTAINED_BRUSH_TECHNIQUES,
            size: offsets::BRUSH_BYTES,
            check_id: Box::new(brush_check_id),
        },
    ];

    for map_id in 0..offsets::MAP_COUNT {
        let map_state = offsets::MAP_STATES + map_id * offsets::MAP_STATE_SIZE;
        regions.push(FlagRegion {
            description: "World state",
            offset: offsets::MAP_STATE_BITS + map_id * offsets::MAP_STATE_BITS_BYTES,
            size: offsets::MAP_STATE_BITS_BYTES,
            check_id: Box::new(move |bit| map_check_id(CheckCategory::WorldState, map_id, bit)),
        });
        regions.push(FlagRegion {
            description: "Collected objects",
            offset: map_state + offsets::COLLECTED_OBJECTS,
            size: offsets::MAP_FLAG_BYTES,
            check_id: Box::new(move |bit| map_check_id(CheckCategory::CollectedObject, map_id, bit)),
        });
        regions.push(FlagRegion {
            description: "Areas restored",
            offset: map_state + offsets::AREAS_RESTORED,
            size: offsets::MAP_FLAG_BYTES,
            check_id: Box::new(move |bit| map_check_id(CheckCategory::AreaRestored, map_id, bit)),
        });
    }
    regions
}

/// The bitfield monitors that turn save data flags into checks.
pub struct LocationMonitors<H: MonitorHost> {
    host: H,
    tracker: Arc<CheckTracker>,
    handles: Vec<H::Handle>,
}

impl<H: MonitorHost> LocationMonitors<H> {
    /// Creates a monitor for every flag region that reports to `tracker`.
    /// Regions the host refuses are logged and skipped.
    pub fn create(host: H, tracker: Arc<CheckTracker>) -> Self {
        let mut handles = Vec::new();
        for region in flag_regions() {
            let sink = tracker.clone();
            let check_id = region.check_id;
            let callback: FlagCallback = Box::new(move |bit, old, new| {
                if !old && new {
                    sink.send(check_id(bit));
                }
            });
            match host.create_monitor(region.offset, region.size, region.description, callback) {
                Some(handle) => handles.push(handle),
                None => warn!(
                    "Couldn't monitor {} at {MAIN_MODULE}+{:#x}",
                    region.description, region.offset
                ),
            }
        }
        debug!("Created {} location monitor(s)", handles.len());
        Self {
            host,
            tracker,
            handles,
        }
    }

    pub fn tracker(&self) -> &Arc<CheckTracker> {
        &self.tracker
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Reports every flag that changed since the last poll. Returns how many
    /// monitors saw a change.
    pub fn poll(&self) -> usize {
        self.handles
            .iter()
            .filter(|&&handle| self.host.update_monitor(handle))
            .count()
    }

    /// Takes the current flags as the new baseline without reporting
    /// anything.
    pub fn resync(&self) {
        for &handle in &self.handles {
            self.host.reset_monitor(handle);
        }
    }

    /// Starts reporting. The loaded save's flags are the player's own, so
    /// they become the baseline first.
    pub fn enter_gameplay(&self) {
        self.resync();
        self.tracker.set_in_gameplay(true);
    }

    pub fn leave_gameplay(&self) {
        self.tracker.set_in_gameplay(false);
    }

    /// Called before received items are written to the game. Anything the
    /// player did since the last poll is reported first.
    pub fn begin_grants(&self) {
        self.poll();
        self.tracker.set_granting(true);
    }

    /// Called once received items are written. What they changed becomes
    /// the new baseline.
    pub fn end_grants(&self) {
        self.resync();
        self.tracker.set_granting(false);
    }
}

impl<H: MonitorHost> Drop for LocationMonitors<H> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.host.destroy_monitor(handle);
        }
    }
}
