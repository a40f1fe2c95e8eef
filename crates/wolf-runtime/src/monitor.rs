//! Change detection over regions of game memory.
//!
//! A *bitfield monitor* snapshots a flag region and, when updated, reports
//! every bit that flipped since the last snapshot. A *memory watch* is the
//! byte-level equivalent that's polled automatically on each game tick.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::*;

use crate::bitfield::{BitChange, BitfieldBuf};
use crate::error::{Error, Result};
use crate::memory::ProcessMemory;
use crate::mods::{ModId, run_as};

/// Called with `(bit_index, old_value, new_value)` for each bit that changed.
pub type BitfieldChangeCallback = Arc<dyn Fn(u32, bool, bool) + Send + Sync>;

/// Called with `(start_address, old_bytes, new_bytes)` when a watched region
/// changes.
pub type MemoryWatchCallback = Arc<dyn Fn(usize, &[u8], &[u8]) + Send + Sync>;

/// An opaque reference to a bitfield monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorHandle(NonZeroU64);

impl MonitorHandle {
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn into_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitor {}", self.0)
    }
}

struct BitfieldMonitor {
    owner: ModId,
    address: usize,
    description: String,

    /// The last state we reported. Its length is the monitored size.
    baseline: BitfieldBuf,

    callback: BitfieldChangeCallback,
}

struct MemoryWatch {
    owner: ModId,
    description: String,
    baseline: Vec<u8>,
    callback: MemoryWatchCallback,
}

/// A summary of a live monitor, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    pub handle: MonitorHandle,
    pub owner: ModId,
    pub address: usize,
    pub size: usize,
    pub description: String,
}

/// Owns every bitfield monitor and memory watch in the runtime.
///
/// The registry's own maps are only locked long enough to find an entry.
/// Memory reads happen under the individual entry's lock and callbacks run
/// with no locks held at all, so a callback may create or destroy monitors.
pub struct MonitorRegistry {
    memory: Arc<dyn ProcessMemory>,
    next_handle: AtomicU64,
    monitors: Mutex<BTreeMap<MonitorHandle, Arc<Mutex<BitfieldMonitor>>>>,
    watches: Mutex<BTreeMap<(ModId, usize), Arc<Mutex<MemoryWatch>>>>,
}

impl MonitorRegistry {
    pub fn new(memory: Arc<dyn ProcessMemory>) -> Self {
        Self {
            memory,
            next_handle: AtomicU64::new(1),
            monitors: Default::default(),
            watches: Default::default(),
        }
    }

    fn lookup(&self, handle: MonitorHandle) -> Option<Arc<Mutex<BitfieldMonitor>>> {
        self.monitors.lock().ok()?.get(&handle).cloned()
    }

    /// Starts monitoring `size` bytes at `address` on behalf of `owner`.
    ///
    /// The current contents become the baseline, so nothing is reported until
    /// the memory actually changes.
    pub fn create(
        &self,
        owner: ModId,
        address: usize,
        size: usize,
        callback: BitfieldChangeCallback,
        description: impl Into<String>,
    ) -> Result<MonitorHandle> {
        if !owner.is_valid() {
            return Err(Error::InvalidArgument(
                "bitfield monitors need an owning mod".to_string(),
            ));
        }
        if size == 0 {
            return Err(Error::InvalidArgument(
                "bitfield monitor size must be non-zero".to_string(),
            ));
        }
        if !self.memory.is_valid_address(address) {
            return Err(Error::memory(address, "cannot monitor an unmapped address"));
        }
        let baseline = BitfieldBuf::from_bytes(self.memory.read_bytes(address, size)?);

        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = MonitorHandle::from_raw(raw)
            .ok_or_else(|| Error::InvalidArgument("monitor handles exhausted".to_string()))?;
        let description = description.into();
        debug!("Created {handle} for {owner} at {address:#x}+{size}: {description}");

        let monitor = BitfieldMonitor {
            owner,
            address,
            description,
            baseline,
            callback,
        };
        self.monitors
            .lock()
            .map_err(|_| Error::InvalidArgument("monitor registry poisoned".to_string()))?
            .insert(handle, Arc::new(Mutex::new(monitor)));
        Ok(handle)
    }

    /// Like [create](Self::create), with the address given relative to the
    /// base of `module`.
    pub fn create_in_module(
        &self,
        owner: ModId,
        module: &str,
        offset: usize,
        size: usize,
        callback: BitfieldChangeCallback,
        description: impl Into<String>,
    ) -> Result<MonitorHandle> {
        let base = self
            .memory
            .module_base(module)
            .ok_or_else(|| Error::ModuleNotFound(module.to_string()))?;
        let address = base.checked_add(offset).ok_or_else(|| {
            Error::memory(base, format!("offset {offset:#x} runs past the end of {module}"))
        })?;
        self.create(owner, address, size, callback, description)
    }

    /// Re-reads the monitored memory and reports each changed bit to the
    /// monitor's callback, in ascending bit order. Returns whether anything
    /// changed.
    ///
    /// If the memory can't be read the baseline is left untouched and this
    /// returns `false`.
    pub fn update(&self, handle: MonitorHandle) -> bool {
        let Some(monitor) = self.lookup(handle) else {
            return false;
        };

        let (owner, callback, changes): (ModId, BitfieldChangeCallback, Vec<BitChange>) = {
            let Ok(mut monitor) = monitor.lock() else {
                return false;
            };
            let current = match self.memory.read_bytes(monitor.address, monitor.baseline.len()) {
                Ok(bytes) => BitfieldBuf::from_bytes(bytes),
                Err(e) => {
                    debug!("Skipping update of {handle}: {e}");
                    return false;
                }
            };
            let changes = monitor.baseline.view().changed_bits(current.view());
            if changes.is_empty() {
                return false;
            }
            monitor.baseline = current;
            (monitor.owner, monitor.callback.clone(), changes)
        };

        for change in changes {
            run_as(owner, "bitfield monitor", || {
                callback(change.bit, change.old, change.new)
            });
        }
        true
    }

    /// Replaces the baseline with the current memory contents without
    /// reporting anything.
    pub fn reset(&self, handle: MonitorHandle) -> bool {
        let Some(monitor) = self.lookup(handle) else {
            return false;
        };
        let Ok(mut monitor) = monitor.lock() else {
            return false;
        };
        match self.memory.read_bytes(monitor.address, monitor.baseline.len()) {
            Ok(bytes) => {
                monitor.baseline = BitfieldBuf::from_bytes(bytes);
                true
            }
            Err(e) => {
                debug!("Failed to reset {handle}: {e}");
                false
            }
        }
    }

    /// Destroys a monitor. Returns `false` if it didn't exist.
    pub fn destroy(&self, handle: MonitorHandle) -> bool {
        let removed = self
            .monitors
            .lock()
            .ok()
            .and_then(|mut monitors| monitors.remove(&handle));
        if removed.is_some() {
            debug!("Destroyed {handle}");
        }
        removed.is_some()
    }

    /// Updates every monitor. Returns the number that changed.
    pub fn update_all(&self) -> usize {
        self.handles()
            .into_iter()
            .filter(|handle| self.update(*handle))
            .count()
    }

    /// Returns every live monitor handle in creation order.
    pub fn handles(&self) -> Vec<MonitorHandle> {
        self.monitors
            .lock()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn info(&self, handle: MonitorHandle) -> Option<MonitorInfo> {
        let monitor = self.lookup(handle)?;
        let monitor = monitor.lock().ok()?;
        Some(MonitorInfo {
            handle,
            owner: monitor.owner,
            address: monitor.address,
            size: monitor.baseline.len(),
            description: monitor.description.clone(),
        })
    }

    /// Starts watching `size` bytes at `start`. Each `(owner, start)` pair can
    /// only be watched once.
    pub fn watch(
        &self,
        owner: ModId,
        start: usize,
        size: usize,
        callback: MemoryWatchCallback,
        description: impl Into<String>,
    ) -> Result<()> {
        if !owner.is_valid() || size == 0 {
            return Err(Error::InvalidArgument(format!(
                "invalid watch of {size} bytes for {owner}"
            )));
        }
        let baseline = self.memory.read_bytes(start, size)?;
        let mut watches = self
            .watches
            .lock()
            .map_err(|_| Error::InvalidArgument("watch registry poisoned".to_string()))?;
        if watches.contains_key(&(owner, start)) {
            return Err(Error::InvalidArgument(format!(
                "{owner} already watches {start:#x}"
            )));
        }
        let watch = MemoryWatch {
            owner,
            description: description.into(),
            baseline,
            callback,
        };
        debug!("{owner} watching {start:#x}+{size}: {}", watch.description);
        watches.insert((owner, start), Arc::new(Mutex::new(watch)));
        Ok(())
    }

    /// Stops watching `start`. Returns `false` if `owner` wasn't watching it.
    pub fn unwatch(&self, owner: ModId, start: usize) -> bool {
        self.watches
            .lock()
            .ok()
            .and_then(|mut watches| watches.remove(&(owner, start)))
            .is_some()
    }

    /// Checks every memory watch and notifies the ones whose memory changed.
    pub fn poll_watches(&self) {
        let watches: Vec<_> = self
            .watches
            .lock()
            .map(|w| w.iter().map(|(k, v)| (k.1, v.clone())).collect())
            .unwrap_or_default();

        for (start, watch) in watches {
            let fired = {
                let Ok(mut watch) = watch.lock() else {
                    continue;
                };
                let Ok(current) = self.memory.read_bytes(start, watch.baseline.len()) else {
                    continue;
                };
                if current == watch.baseline {
                    continue;
                }
                let old = std::mem::replace(&mut watch.baseline, current.clone());
                (watch.owner, watch.callback.clone(), old, current)
            };
            let (owner, callback, old, new) = fired;
            run_as(owner, "memory watch", || callback(start, &old, &new));
        }
    }

    /// Drops every monitor and watch owned by `owner`.
    pub fn remove_mod(&self, owner: ModId) {
        if let Ok(mut monitors) = self.monitors.lock() {
            monitors.retain(|_, m| m.lock().map(|m| m.owner != owner).unwrap_or(false));
        }
        if let Ok(mut watches) = self.watches.lock() {
            watches.retain(|(o, _), _| *o != owner);
        }
    }

    pub fn len(&self) -> usize {
        self.monitors.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;
    use crate::memory::BufferMemory;

    const BASE: usize = 0x40_0000;

    fn setup() -> (Arc<BufferMemory>, MonitorRegistry) {
        let memory = Arc::new(BufferMemory::new().with_module("main.dll", BASE, 0x100));
        let registry = MonitorRegistry::new(memory.clone());
        (memory, registry)
    }

    fn recorder() -> (Arc<Mutex<Vec<(u32, bool, bool)>>>, BitfieldChangeCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: BitfieldChangeCallback =
            Arc::new(move |bit: u32, old: bool, new: bool| sink.lock().unwrap().push((bit, old, new)));
        (seen, callback)
    }

    #[test]
    fn test_update_without_change_is_silent() {
        let (_, registry) = setup();
        let (seen, callback) = recorder();
        let handle = registry.create(ModId(1), BASE, 8, callback, "flags").unwrap();

        assert!(!registry.update(handle));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_update_reports_each_changed_bit() {
        let (memory, registry) = setup();
        memory.write(BASE + 3, &[0x80]).unwrap();
        let (seen, callback) = recorder();
        let handle = registry.create(ModId(1), BASE, 8, callback, "flags").unwrap();

        // Clear bit 0, set bits 1 and 32.
        memory.write(BASE + 3, &[0x40]).unwrap();
        memory.write(BASE + 7, &[0x80]).unwrap();
        assert!(registry.update(handle));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(0, true, false), (1, false, true), (32, false, true)]
        );

        // The baseline moved, so a second update sees nothing.
        assert!(!registry.update(handle));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_reset_is_silent_and_idempotent() {
        let (memory, registry) = setup();
        let (seen, callback) = recorder();
        let handle = registry.create(ModId(1), BASE, 4, callback, "").unwrap();

        memory.write(BASE, &[0xFF]).unwrap();
        assert!(registry.reset(handle));
        assert!(registry.reset(handle));
        assert!(!registry.update(handle));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_bad_arguments() {
        let (_, registry) = setup();
        let (_, callback) = recorder();
        assert!(registry.create(ModId::NONE, BASE, 4, callback.clone(), "").is_err());
        assert!(registry.create(ModId(1), BASE, 0, callback.clone(), "").is_err());
        assert!(registry.create(ModId(1), 0x10, 4, callback.clone(), "").is_err());
        assert!(registry.create(ModId(1), BASE + 0xFE, 4, callback, "").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_create_in_module_resolves_base() {
        let (memory, registry) = setup();
        let (seen, callback) = recorder();
        let handle = registry
            .create_in_module(ModId(2), "MAIN.dll", 0x10, 4, callback.clone(), "world")
            .unwrap();
        assert_eq!(registry.info(handle).unwrap().address, BASE + 0x10);

        memory.write(BASE + 0x13, &[0x01]).unwrap();
        assert!(registry.update(handle));
        assert_eq!(*seen.lock().unwrap(), vec![(7, false, true)]);

        assert!(matches!(
            registry.create_in_module(ModId(2), "nope.dll", 0, 4, callback, ""),
            Err(Error::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_create_in_module_rejects_overflowing_offset() {
        let (_, registry) = setup();
        let (_, callback) = recorder();
        assert!(matches!(
            registry.create_in_module(ModId(2), "main.dll", usize::MAX, 4, callback.clone(), ""),
            Err(Error::MemoryAccess { address: BASE, .. })
        ));
        assert!(matches!(
            registry.create_in_module(ModId(2), "main.dll", usize::MAX - BASE + 1, 4, callback, ""),
            Err(Error::MemoryAccess { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_destroy() {
        let (memory, registry) = setup();
        let (seen, callback) = recorder();
        let handle = registry.create(ModId(1), BASE, 4, callback, "").unwrap();
        assert!(registry.destroy(handle));
        assert!(!registry.destroy(handle));

        memory.write(BASE, &[1]).unwrap();
        assert!(!registry.update(handle));
        assert!(!registry.reset(handle));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_callback_may_destroy_its_own_monitor() {
        let (memory, registry) = setup();
        let registry = Arc::new(registry);
        let handle_slot: Arc<OnceLock<MonitorHandle>> = Arc::default();

        let weak = Arc::downgrade(&registry);
        let slot = handle_slot.clone();
        let callback: BitfieldChangeCallback = Arc::new(move |_, _, _| {
            if let (Some(registry), Some(handle)) = (weak.upgrade(), slot.get()) {
                registry.destroy(*handle);
            }
        });
        let handle = registry.create(ModId(1), BASE, 4, callback, "").unwrap();
        handle_slot.set(handle).unwrap();

        memory.write(BASE, &[0x03]).unwrap();
        assert!(registry.update(handle));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_all_and_remove_mod() {
        let (memory, registry) = setup();
        let (_, callback) = recorder();
        registry.create(ModId(1), BASE, 4, callback.clone(), "").unwrap();
        registry.create(ModId(2), BASE + 4, 4, callback, "").unwrap();

        memory.write(BASE + 4, &[9]).unwrap();
        assert_eq!(registry.update_all(), 1);

        registry.remove_mod(ModId(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_memory_watch() {
        let (memory, registry) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry
            .watch(
                ModId(1),
                BASE + 8,
                2,
                Arc::new(move |addr: usize, old: &[u8], new: &[u8]| {
                    sink.lock().unwrap().push((addr, old.to_vec(), new.to_vec()))
                }),
                "yen",
            )
            .unwrap();
        assert!(registry
            .watch(ModId(1), BASE + 8, 2, Arc::new(|_: usize, _: &[u8], _: &[u8]| {}), "")
            .is_err());

        registry.poll_watches();
        memory.write(BASE + 9, &[5]).unwrap();
        registry.poll_watches();
        registry.poll_watches();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(BASE + 8, vec![0, 0], vec![0, 5])]
        );

        assert!(registry.unwatch(ModId(1), BASE + 8));
        assert!(!registry.unwatch(ModId(1), BASE + 8));
    }
}
