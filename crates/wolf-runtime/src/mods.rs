use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use log::*;
use strum::{Display, FromRepr};

/// The runtime's version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The runtime's version packed as `major << 24 | minor << 16 | patch`.
pub const VERSION_INT: u32 = pack_version(0, 2, 0);

/// Packs a version triple the same way [VERSION_INT] is packed.
pub const fn pack_version(major: u8, minor: u8, patch: u16) -> u32 {
    (major as u32) << 24 | (minor as u32) << 16 | patch as u32
}

/// An identifier the runtime hands out to each registered mod.
///
/// Ids start at 1 and are never reused within a process. `0` means "no mod".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ModId(pub i32);

impl ModId {
    /// The id used when there's no mod, or as a failure sentinel.
    pub const NONE: ModId = ModId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Severity of a message a mod logs through the runtime. The discriminants
/// are part of the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(i32)]
pub enum ModLogLevel {
    Info = 0,
    Warning = 1,
    Error = 2,
    Debug = 3,
}

impl From<ModLogLevel> for Level {
    fn from(value: ModLogLevel) -> Self {
        match value {
            ModLogLevel::Info => Level::Info,
            ModLogLevel::Warning => Level::Warn,
            ModLogLevel::Error => Level::Error,
            ModLogLevel::Debug => Level::Debug,
        }
    }
}

/// The lifecycle hooks and metadata a mod provides when it registers.
pub trait ModLifecycle: Send + Sync {
    /// The mod's display name.
    fn name(&self) -> String;

    /// The mod's version string.
    fn version(&self) -> String {
        "unknown".to_string()
    }

    /// The runtime version the mod was built against.
    fn framework_version(&self) -> u32 {
        VERSION_INT
    }

    /// Called before the game's own systems have started up.
    fn early_init(&self) {}

    /// Called once the game is fully initialized.
    fn late_init(&self) {}

    /// Called when the mod is unloaded or the game shuts down.
    fn shutdown(&self) {}
}

thread_local! {
    static CURRENT_MOD: Cell<ModId> = const { Cell::new(ModId::NONE) };
}

/// Returns the mod whose code is currently running on this thread, or
/// [ModId::NONE] outside any mod callback.
pub fn current_mod_id() -> ModId {
    CURRENT_MOD.with(|c| c.get())
}

/// Marks a mod as the current one on this thread until dropped. Contexts
/// nest: dropping restores whichever mod was current before.
#[must_use]
pub struct ModContext {
    previous: ModId,
    _not_send: PhantomData<*const ()>,
}

impl ModContext {
    pub fn enter(id: ModId) -> Self {
        Self {
            previous: CURRENT_MOD.with(|c| c.replace(id)),
            _not_send: PhantomData,
        }
    }
}

impl Drop for ModContext {
    fn drop(&mut self) {
        CURRENT_MOD.with(|c| c.set(self.previous));
    }
}

/// Runs `f` as mod `owner`, catching any panic so that one misbehaving mod
/// can't take down the others. Returns `None` if `f` panicked.
pub fn run_as<R>(owner: ModId, what: &str, f: impl FnOnce() -> R) -> Option<R> {
    let _context = ModContext::enter(owner);
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!("Mod {owner} panicked in {what}: {message}");
            None
        }
    }
}

/// A registered mod.
#[derive(Clone)]
pub struct ModEntry {
    pub id: ModId,
    pub name: String,
    pub version: String,
    pub framework_version: u32,

    /// The prefix prepended to each message this mod logs.
    pub log_prefix: String,

    lifecycle: Arc<dyn ModLifecycle>,
}

impl fmt::Debug for ModEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("framework_version", &self.framework_version)
            .field("log_prefix", &self.log_prefix)
            .finish_non_exhaustive()
    }
}

/// The set of mods loaded into the runtime, in registration order.
pub struct ModRegistry {
    next_id: AtomicI32,
    mods: RwLock<Vec<ModEntry>>,
}

impl ModRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1),
            mods: Default::default(),
        }
    }

    /// Registers a mod and returns its freshly issued id.
    pub fn register(&self, lifecycle: Arc<dyn ModLifecycle>) -> ModId {
        let id = ModId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = lifecycle.name();
        let version = lifecycle.version();
        let framework_version = lifecycle.framework_version();
        if framework_version >> 16 != VERSION_INT >> 16 {
            warn!(
                "{name} was built for runtime {}, this is {VERSION}",
                format_version(framework_version)
            );
        }

        info!("Registered mod {name} v{version} as {id}");
        let entry = ModEntry {
            id,
            log_prefix: format!("[{name}]"),
            name,
            version,
            framework_version,
            lifecycle,
        };
        if let Ok(mut mods) = self.mods.write() {
            mods.push(entry);
        }
        id
    }

    /// Removes a mod from the registry, running its shutdown hook.
    pub fn unregister(&self, id: ModId) -> bool {
        let removed = self.mods.write().ok().and_then(|mut mods| {
            let index = mods.iter().position(|m| m.id == id)?;
            Some(mods.remove(index))
        });
        match removed {
            Some(entry) => {
                run_as(id, "shutdown", || entry.lifecycle.shutdown());
                info!("Unregistered mod {} ({id})", entry.name);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ModId) -> bool {
        self.get(id).is_some()
    }

    /// Returns a copy of the entry for `id`.
    pub fn get(&self, id: ModId) -> Option<ModEntry> {
        self.mods
            .read()
            .ok()?
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    /// Returns every registered mod in registration order.
    pub fn entries(&self) -> Vec<ModEntry> {
        self.mods.read().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.mods.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overrides the prefix used for `id`'s log messages.
    pub fn set_log_prefix(&self, id: ModId, prefix: impl Into<String>) -> bool {
        let Ok(mut mods) = self.mods.write() else {
            return false;
        };
        match mods.iter_mut().find(|m| m.id == id) {
            Some(entry) => {
                entry.log_prefix = prefix.into();
                true
            }
            None => false,
        }
    }

    /// Returns the log prefix for `id`, or a generic one if it isn't
    /// registered.
    pub fn log_prefix(&self, id: ModId) -> String {
        self.get(id)
            .map(|m| m.log_prefix)
            .unwrap_or_else(|| format!("[mod {id}]"))
    }

    /// Runs every mod's early init hook in registration order.
    pub fn early_init_all(&self) {
        for entry in self.entries() {
            run_as(entry.id, "early init", || entry.lifecycle.early_init());
        }
    }

    /// Runs every mod's late init hook in registration order.
    pub fn late_init_all(&self) {
        for entry in self.entries() {
            run_as(entry.id, "late init", || entry.lifecycle.late_init());
        }
    }

    /// Shuts every mod down in reverse registration order and empties the
    /// registry. Returns the ids that were shut down.
    pub fn shutdown_all(&self) -> Vec<ModId> {
        let entries = self
            .mods
            .write()
            .map(|mut mods| std::mem::take(&mut *mods))
            .unwrap_or_default();
        entries
            .iter()
            .rev()
            .map(|entry| {
                run_as(entry.id, "shutdown", || entry.lifecycle.shutdown());
                entry.id
            })
            .collect()
    }
}

impl Default for ModRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a packed version as `major.minor.patch`.
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version >> 24,
        (version >> 16) & 0xFF,
        version & 0xFFFF
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingMod {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ModLifecycle for RecordingMod {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn late_init(&self) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} late {}", self.name, current_mod_id().0));
        }

        fn shutdown(&self) {
            self.calls.lock().unwrap().push(format!("{} shutdown", self.name));
        }
    }

    fn recording(name: &'static str, calls: &Arc<Mutex<Vec<String>>>) -> Arc<dyn ModLifecycle> {
        Arc::new(RecordingMod {
            name,
            calls: calls.clone(),
        })
    }

    #[test]
    fn test_register_issues_distinct_nonzero_ids() {
        let registry = ModRegistry::new();
        let calls = Arc::default();
        let a = registry.register(recording("A", &calls));
        let b = registry.register(recording("B", &calls));
        assert!(a.is_valid());
        assert!(b.is_valid());
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let registry = ModRegistry::new();
        let calls = Arc::default();
        let a = registry.register(recording("A", &calls));
        assert!(registry.unregister(a));
        let b = registry.register(recording("B", &calls));
        assert!(b > a);
        assert!(!registry.unregister(a));
    }

    #[test]
    fn test_log_prefix_defaults_to_name() {
        let registry = ModRegistry::new();
        let id = registry.register(recording("Okami AP", &Arc::default()));
        assert_eq!(registry.log_prefix(id), "[Okami AP]");
        assert!(registry.set_log_prefix(id, "[AP]"));
        assert_eq!(registry.log_prefix(id), "[AP]");
        assert!(!registry.set_log_prefix(ModId(999), "[x]"));
    }

    #[test]
    fn test_lifecycle_runs_in_context_and_order() {
        let registry = ModRegistry::new();
        let calls: Arc<Mutex<Vec<String>>> = Arc::default();
        let a = registry.register(recording("A", &calls));
        let b = registry.register(recording("B", &calls));

        registry.late_init_all();
        assert_eq!(registry.shutdown_all(), vec![b, a]);
        assert!(registry.is_empty());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                format!("A late {}", a.0),
                format!("B late {}", b.0),
                "B shutdown".to_string(),
                "A shutdown".to_string(),
            ]
        );
    }

    #[test]
    fn test_context_nests_and_restores() {
        assert_eq!(current_mod_id(), ModId::NONE);
        {
            let _outer = ModContext::enter(ModId(1));
            {
                let _inner = ModContext::enter(ModId(2));
                assert_eq!(current_mod_id(), ModId(2));
            }
            assert_eq!(current_mod_id(), ModId(1));
        }
        assert_eq!(current_mod_id(), ModId::NONE);
    }

    #[test]
    fn test_run_as_catches_panics() {
        let result = run_as(ModId(7), "test", || -> i32 { panic!("boom") });
        assert_eq!(result, None);
        assert_eq!(current_mod_id(), ModId::NONE);
        assert_eq!(run_as(ModId(7), "test", || current_mod_id()), Some(ModId(7)));
    }

    #[test]
    fn test_log_level_from_abi_value() {
        assert_eq!(ModLogLevel::from_repr(3), Some(ModLogLevel::Debug));
        assert_eq!(ModLogLevel::from_repr(0), Some(ModLogLevel::Info));
        assert_eq!(ModLogLevel::from_repr(4), None);
        assert_eq!(format_version(VERSION_INT), "0.2.0");
    }
}
