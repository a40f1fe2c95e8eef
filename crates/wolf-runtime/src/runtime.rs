use std::sync::{Arc, RwLock};

use log::*;

use crate::config::RuntimeConfig;
use crate::console::Console;
use crate::events::{EventBus, GameEvent};
use crate::gui::GuiRegistry;
use crate::hooks::HookRegistry;
use crate::memory::ProcessMemory;
use crate::mods::{ModId, ModLifecycle, ModLogLevel, ModRegistry};
use crate::monitor::MonitorRegistry;
use crate::resources::ResourceInterceptor;

/// Adds `(item_id, quantity)` to the player's inventory. Returns `false` if
/// the item couldn't be given.
pub type GiveItemFn = Arc<dyn Fn(i32, i32) -> bool + Send + Sync>;

/// Everything the runtime tracks on behalf of mods.
///
/// The host drives a [Runtime] by calling its event methods from the game's
/// hooks. Mods reach it through the C function table in [crate::api].
pub struct Runtime {
    config: RuntimeConfig,
    memory: Arc<dyn ProcessMemory>,
    mods: ModRegistry,
    events: EventBus,
    monitors: MonitorRegistry,
    console: Console,
    resources: ResourceInterceptor,
    gui: GuiRegistry,
    hooks: HookRegistry,

    /// The game's own inventory routine, once the host has located it.
    give_item: RwLock<Option<GiveItemFn>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, memory: Arc<dyn ProcessMemory>) -> Self {
        Self {
            monitors: MonitorRegistry::new(memory.clone()),
            console: Console::new(config.console_buffer_limit),
            config,
            memory,
            mods: Default::default(),
            events: Default::default(),
            resources: Default::default(),
            gui: Default::default(),
            hooks: Default::default(),
            give_item: Default::default(),
        }
    }

    /// Creates a runtime over the current process's memory.
    #[cfg(windows)]
    pub fn for_current_process(config: RuntimeConfig) -> Self {
        Self::new(config, Arc::new(crate::memory::HostMemory::new()))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn memory(&self) -> &dyn ProcessMemory {
        self.memory.as_ref()
    }

    pub fn mods(&self) -> &ModRegistry {
        &self.mods
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn monitors(&self) -> &MonitorRegistry {
        &self.monitors
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn resources(&self) -> &ResourceInterceptor {
        &self.resources
    }

    pub fn gui(&self) -> &GuiRegistry {
        &self.gui
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn register_mod(&self, lifecycle: Arc<dyn ModLifecycle>) -> ModId {
        self.mods.register(lifecycle)
    }

    /// Unloads a mod: runs its shutdown hook and drops everything it
    /// registered with any part of the runtime.
    pub fn unregister_mod(&self, id: ModId) -> bool {
        if !self.mods.unregister(id) {
            return false;
        }
        self.remove_registrations(id);
        true
    }

    fn remove_registrations(&self, id: ModId) {
        self.events.remove_mod(id);
        self.monitors.remove_mod(id);
        self.console.remove_mod(id);
        self.resources.remove_mod(id);
        self.gui.remove_mod(id);
    }

    /// Logs `message` on behalf of `id`, prefixed with the mod's log prefix.
    pub fn log(&self, id: ModId, level: ModLogLevel, message: &str) {
        let prefix = self.mods.log_prefix(id);
        log!(Level::from(level), "{prefix} {message}");
    }

    /// Installs the function that puts items in the player's inventory.
    pub fn set_give_item(&self, give_item: GiveItemFn) {
        if let Ok(mut current) = self.give_item.write() {
            *current = Some(give_item);
        }
    }

    /// Gives the player `quantity` of `item_id` through the game's own
    /// inventory routine.
    pub fn give_item(&self, item_id: i32, quantity: i32) -> bool {
        let give_item = self.give_item.read().ok().and_then(|g| g.clone());
        match give_item {
            Some(give_item) => give_item(item_id, quantity),
            None => {
                warn!("Can't give item {item_id:#x}: the inventory routine isn't available yet");
                false
            }
        }
    }

    /// Runs every mod's early init hook. Called before the game has set up
    /// its own systems.
    pub fn early_init(&self) {
        info!("Running early init for {} mod(s)", self.mods.len());
        self.mods.early_init_all();
    }

    /// Runs every mod's late init hook. Called once the game is ready.
    pub fn late_init(&self) {
        info!("Running late init for {} mod(s)", self.mods.len());
        self.mods.late_init_all();
    }

    /// Called once per frame of the game's main loop.
    pub fn tick(&self) {
        self.events.dispatch(GameEvent::GameTick);
        self.monitors.poll_watches();
        if self.config.poll_monitors_on_tick {
            self.monitors.update_all();
        }
    }

    pub fn game_start(&self) {
        self.events.dispatch(GameEvent::GameStart);
    }

    /// Notifies mods that the game is exiting, then shuts every mod down.
    pub fn game_stop(&self) {
        self.events.dispatch(GameEvent::GameStop);
        for id in self.mods.shutdown_all() {
            self.remove_registrations(id);
        }
    }

    pub fn play_start(&self) {
        self.events.dispatch(GameEvent::PlayStart);
    }

    pub fn return_to_menu(&self) {
        self.events.dispatch(GameEvent::ReturnToMenu);
    }

    /// Called when the player is about to pick up an item. Returns `true` if a
    /// mod blocked the pickup, in which case the game shouldn't give it.
    ///
    /// Non-blocking observers only hear about pickups that go through.
    pub fn item_pickup(&self, item_id: i32, count: i32) -> bool {
        if self.events.dispatch_item_pickup_blocking(item_id, count) {
            debug!("Pickup of item {item_id:#x} x{count} was blocked");
            return true;
        }
        self.events.dispatch_item_pickup(item_id, count);
        false
    }

    /// Called when a brush technique bit is about to change. Returns `true` if
    /// a mod blocked the edit.
    pub fn brush_edit(&self, bit_index: i32, operation: i32) -> bool {
        self.events.dispatch_brush_edit(bit_index, operation)
    }

    /// Returns the path the game should load instead of `path`, if any.
    pub fn resolve_resource(&self, path: &str) -> Option<String> {
        self.resources.resolve(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::memory::{BufferMemory, Protection};

    struct NamedMod(&'static str);

    impl ModLifecycle for NamedMod {
        fn name(&self) -> String {
            self.0.to_string()
        }
    }

    fn runtime() -> Runtime {
        let memory = BufferMemory::new().with_region(0x1000, vec![0u8; 16], Protection::all());
        Runtime::new(Default::default(), Arc::new(memory))
    }

    #[test]
    fn test_unregister_mod_cleans_up_registrations() {
        let runtime = runtime();
        let id = runtime.register_mod(Arc::new(NamedMod("Test")));
        runtime.events().on(GameEvent::GameTick, id, Arc::new(|| {}));
        runtime
            .console()
            .add_command(id, "test", Arc::new(|_: &[String]| {}), "");
        runtime
            .monitors()
            .create(id, 0x1000, 4, Arc::new(|_: u32, _: bool, _: bool| {}), "flags")
            .unwrap();

        assert!(runtime.unregister_mod(id));
        assert_eq!(runtime.events().count(GameEvent::GameTick), 0);
        assert!(runtime.console().commands().is_empty());
        assert!(runtime.monitors().is_empty());
        assert!(!runtime.unregister_mod(id));
    }

    #[test]
    fn test_tick_polls_memory_watches() {
        let memory = Arc::new(BufferMemory::new().with_region(0x1000, vec![0u8; 16], Protection::all()));
        let runtime = Runtime::new(Default::default(), memory.clone());
        let id = runtime.register_mod(Arc::new(NamedMod("Watcher")));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        runtime
            .monitors()
            .watch(
                id,
                0x1000,
                4,
                Arc::new(move |_: usize, _: &[u8], _: &[u8]| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                "watch",
            )
            .unwrap();

        runtime.tick();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        memory.write(0x1002, &[1]).unwrap();
        runtime.tick();
        runtime.tick();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocked_pickup_skips_observers() {
        let runtime = runtime();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        runtime
            .events()
            .on_item_pickup(ModId(1), Arc::new(move |item, _| sink.lock().unwrap().push(item)));
        runtime
            .events()
            .on_item_pickup_blocking(ModId(1), Arc::new(|item, _| item == 0x13));

        assert!(runtime.item_pickup(0x13, 1));
        assert!(!runtime.item_pickup(0x14, 1));
        assert_eq!(*seen.lock().unwrap(), vec![0x14]);
    }

    #[test]
    fn test_give_item_needs_bridge() {
        let runtime = runtime();
        assert!(!runtime.give_item(0x13, 1));
        let given = Arc::new(Mutex::new(Vec::new()));
        let sink = given.clone();
        runtime.set_give_item(Arc::new(move |item, qty| {
            sink.lock().unwrap().push((item, qty));
            true
        }));
        assert!(runtime.give_item(0x13, 2));
        assert_eq!(*given.lock().unwrap(), vec![(0x13, 2)]);
    }

    #[test]
    fn test_game_stop_shuts_down_mods() {
        let runtime = runtime();
        let id = runtime.register_mod(Arc::new(NamedMod("Test")));
        runtime.events().on(GameEvent::PlayStart, id, Arc::new(|| {}));
        runtime.game_stop();
        assert!(runtime.mods().is_empty());
        assert_eq!(runtime.events().count(GameEvent::PlayStart), 0);
    }
}
