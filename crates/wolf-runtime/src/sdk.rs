//! Safe bindings for mods written in Rust.
//!
//! A mod crate builds as a `cdylib`, implements [ModLifecycle] and exports its
//! entry point with [wolf_mod!](crate::wolf_mod). From then on it talks to the
//! runtime through a [ModApi], which wraps the raw function table and turns
//! closures into the C callbacks the table expects.
//!
//! Closures handed to the runtime are leaked. They live as long as the mod
//! does, which is until the process exits.

use std::ffi::{CString, c_char, c_int, c_uint, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Mutex, OnceLock};

use log::*;

use crate::api::{WolfModInterface, WolfRuntimeApi, c_string};
use crate::error::{Error, Result};
use crate::events::GameEvent;
use crate::mods::{ModId, ModLifecycle, ModLogLevel, VERSION_INT};

/// Exports `wolfGetModInterface` for a mod. `$lifecycle` is evaluated once,
/// when the runtime loads the mod.
#[macro_export]
macro_rules! wolf_mod {
    ($lifecycle:expr) => {
        /// The entry point the runtime calls to load this mod.
        ///
        /// # Safety
        ///
        /// `runtime` must point to the runtime's function table.
        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn wolfGetModInterface(
            runtime: *mut $crate::api::WolfRuntimeApi,
        ) -> $crate::api::WolfModInterface {
            unsafe { $crate::sdk::connect(runtime, $lifecycle) }
        }
    };
}

static LIFECYCLE: OnceLock<Box<dyn ModLifecycle>> = OnceLock::new();
static NAME: OnceLock<CString> = OnceLock::new();
static VERSION: OnceLock<CString> = OnceLock::new();
static CONNECTION: OnceLock<ModApi> = OnceLock::new();

/// Returns this mod's connection to the runtime, once it has loaded.
pub fn api() -> Option<ModApi> {
    CONNECTION.get().copied()
}

/// Registers `lifecycle` with the runtime behind `runtime` and returns the
/// interface to hand back from `wolfGetModInterface`.
///
/// Also routes this mod's [log] output through the runtime, so messages get
/// the mod's prefix and land in the runtime's log file.
///
/// # Safety
///
/// `runtime` must be null or point to a function table that outlives the mod.
pub unsafe fn connect(
    runtime: *mut WolfRuntimeApi,
    lifecycle: impl ModLifecycle + 'static,
) -> WolfModInterface {
    let interface = WolfModInterface {
        early_game_init: Some(early_game_init),
        late_game_init: Some(late_game_init),
        shutdown: Some(shutdown),
        get_name: Some(get_name),
        get_version: Some(get_version),
        framework_version_int: VERSION_INT,
        imgui_version_int: 0,
    };
    let Some(table) = (unsafe { runtime.as_ref() }) else {
        return interface;
    };

    let _ = NAME.set(to_c_string(lifecycle.name()));
    let _ = VERSION.set(to_c_string(lifecycle.version()));
    if LIFECYCLE.set(Box::new(lifecycle)).is_err() {
        return interface;
    }

    let id = ModId(unsafe { (table.register_mod)(&interface) });
    let api = ModApi::new(table, id);
    let _ = CONNECTION.set(api);
    if log::set_boxed_logger(Box::new(RuntimeLogger(api))).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
    interface
}

/// Converts `value` to a C string, dropping any interior NULs.
fn to_c_string(value: impl Into<String>) -> CString {
    CString::new(value.into().replace('\0', "")).unwrap_or_default()
}

/// Runs `f`, turning a panic into `R::default()` so it can't unwind into the
/// runtime.
fn guard<R: Default>(what: &str, f: impl FnOnce() -> R) -> R {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!("Panicked in {what}");
        R::default()
    })
}

fn with_lifecycle(what: &str, f: impl FnOnce(&dyn ModLifecycle)) {
    if let Some(lifecycle) = LIFECYCLE.get() {
        guard(what, || f(lifecycle.as_ref()));
    }
}

unsafe extern "C" fn early_game_init() {
    with_lifecycle("early init", |m| m.early_init());
}

unsafe extern "C" fn late_game_init() {
    with_lifecycle("late init", |m| m.late_init());
}

unsafe extern "C" fn shutdown() {
    with_lifecycle("shutdown", |m| m.shutdown());
}

unsafe extern "C" fn get_name() -> *const c_char {
    NAME.get().map_or(ptr::null(), |n| n.as_ptr())
}

unsafe extern "C" fn get_version() -> *const c_char {
    VERSION.get().map_or(ptr::null(), |v| v.as_ptr())
}

/// Forwards [log] records to the runtime.
struct RuntimeLogger(ModApi);

impl Log for RuntimeLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let level = match record.level() {
            Level::Error => ModLogLevel::Error,
            Level::Warn => ModLogLevel::Warning,
            Level::Info => ModLogLevel::Info,
            Level::Debug | Level::Trace => ModLogLevel::Debug,
        };
        self.0.log(level, &record.args().to_string());
    }

    fn flush(&self) {}
}

fn leak<T>(value: T) -> *mut c_void {
    Box::into_raw(Box::new(value)).cast()
}

/// # Safety
///
/// `userdata` must have come from [leak] with the same `T`.
unsafe fn leaked<'a, T>(userdata: *mut c_void) -> &'a T {
    unsafe { &*userdata.cast::<T>() }
}

unsafe extern "C" fn event_trampoline<F: Fn() + Send + Sync + 'static>(userdata: *mut c_void) {
    let f = unsafe { leaked::<F>(userdata) };
    guard("event callback", f);
}

unsafe extern "C" fn pickup_trampoline<F: Fn(i32, i32) + Send + Sync + 'static>(
    item_id: c_int,
    count: c_int,
    userdata: *mut c_void,
) {
    let f = unsafe { leaked::<F>(userdata) };
    guard("item pickup callback", || f(item_id, count));
}

unsafe extern "C" fn blocking_trampoline<F: Fn(i32, i32) -> bool + Send + Sync + 'static>(
    a: c_int,
    b: c_int,
    userdata: *mut c_void,
) -> c_int {
    let f = unsafe { leaked::<F>(userdata) };
    guard("blocking callback", || f(a, b)) as c_int
}

unsafe extern "C" fn command_trampoline<F: Fn(&[String]) + Send + Sync + 'static>(
    argc: c_int,
    argv: *const *const c_char,
    userdata: *mut c_void,
) {
    let f = unsafe { leaked::<F>(userdata) };
    let args: Vec<String> = if argv.is_null() || argc <= 0 {
        Vec::new()
    } else {
        // argv[0] is the command's own name.
        unsafe { std::slice::from_raw_parts(argv, argc as usize) }
            .iter()
            .skip(1)
            .filter_map(|arg| unsafe { c_string(*arg) })
            .collect()
    };
    guard("console command", || f(&args));
}

struct ProviderState<F> {
    provider: F,

    /// Keeps the last replacement path alive for the runtime to copy.
    last: Mutex<CString>,
}

unsafe extern "C" fn resource_trampoline<F: Fn(&str) -> Option<String> + Send + Sync + 'static>(
    path: *const c_char,
    userdata: *mut c_void,
) -> *const c_char {
    let state = unsafe { leaked::<ProviderState<F>>(userdata) };
    let Some(path) = (unsafe { c_string(path) }) else {
        return ptr::null();
    };
    match guard("resource provider", || (state.provider)(&path)) {
        Some(replacement) => match state.last.lock() {
            Ok(mut last) => {
                *last = to_c_string(replacement);
                last.as_ptr()
            }
            Err(_) => ptr::null(),
        },
        None => ptr::null(),
    }
}

unsafe extern "C" fn bitfield_trampoline<F: Fn(u32, bool, bool) + Send + Sync + 'static>(
    bit: c_uint,
    old: c_int,
    new: c_int,
    userdata: *mut c_void,
) {
    let f = unsafe { leaked::<F>(userdata) };
    guard("bitfield monitor", || f(bit, old != 0, new != 0));
}

unsafe extern "C" fn watch_trampoline<F: Fn(usize, &[u8], &[u8]) + Send + Sync + 'static>(
    address: usize,
    old: *const c_void,
    new: *const c_void,
    size: usize,
    userdata: *mut c_void,
) {
    if old.is_null() || new.is_null() {
        return;
    }
    let f = unsafe { leaked::<F>(userdata) };
    let old = unsafe { std::slice::from_raw_parts(old.cast::<u8>(), size) };
    let new = unsafe { std::slice::from_raw_parts(new.cast::<u8>(), size) };
    guard("memory watch", || f(address, old, new));
}

unsafe extern "C" fn window_trampoline<F: Fn(i32, i32, f32) + Send + Sync + 'static>(
    width: c_int,
    height: c_int,
    scale: f32,
    userdata: *mut c_void,
) {
    let f = unsafe { leaked::<F>(userdata) };
    guard("GUI window", || f(width, height, scale));
}

unsafe extern "C" fn collect_address(address: usize, userdata: *mut c_void) {
    let found = unsafe { &mut *userdata.cast::<Vec<usize>>() };
    found.push(address);
}

/// A bitfield monitor created through [ModApi].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMonitor(usize);

impl RemoteMonitor {
    fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

/// A mod's handle on the runtime.
#[derive(Clone, Copy)]
pub struct ModApi {
    table: &'static WolfRuntimeApi,
    id: ModId,
}

impl ModApi {
    pub fn new(table: &'static WolfRuntimeApi, id: ModId) -> Self {
        Self { table, id }
    }

    /// The id the runtime gave this mod.
    pub fn id(&self) -> ModId {
        self.id
    }

    /// The raw function table, for anything these bindings don't cover.
    pub fn table(&self) -> &'static WolfRuntimeApi {
        self.table
    }

    pub fn runtime_version(&self) -> String {
        unsafe { c_string((self.table.get_runtime_version)()) }.unwrap_or_default()
    }

    pub fn log(&self, level: ModLogLevel, message: &str) {
        let message = to_c_string(message);
        unsafe { (self.table.log)(self.id.0, level as c_int, message.as_ptr()) }
    }

    pub fn set_log_prefix(&self, prefix: &str) {
        let prefix = to_c_string(prefix);
        unsafe { (self.table.set_log_prefix)(self.id.0, prefix.as_ptr()) }
    }

    /// Returns the base address of `module`, or of the main executable if
    /// `module` is `None`.
    pub fn module_base(&self, module: Option<&str>) -> Option<usize> {
        let module = module.map(to_c_string);
        let base = unsafe {
            (self.table.get_module_base)(module.as_ref().map_or(ptr::null(), |m| m.as_ptr()))
        };
        (base != 0).then_some(base)
    }

    pub fn is_valid_address(&self, address: usize) -> bool {
        unsafe { (self.table.is_valid_address)(address) != 0 }
    }

    pub fn read(&self, address: usize, buf: &mut [u8]) -> Result<()> {
        let ok = unsafe { (self.table.read_memory)(address, buf.as_mut_ptr().cast(), buf.len()) };
        if ok != 0 {
            Ok(())
        } else {
            Err(Error::memory(address, format!("failed to read {} bytes", buf.len())))
        }
    }

    pub fn read_bytes(&self, address: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read(address, &mut buf)?;
        Ok(buf)
    }

    pub fn write(&self, address: usize, data: &[u8]) -> Result<()> {
        let ok = unsafe { (self.table.write_memory)(address, data.as_ptr().cast(), data.len()) };
        if ok != 0 {
            Ok(())
        } else {
            Err(Error::memory(address, format!("failed to write {} bytes", data.len())))
        }
    }

    /// Returns every address where the hex `pattern` matches. See
    /// [parse_pattern](crate::memory::pattern::parse_pattern) for the syntax.
    pub fn find_pattern(&self, pattern: &str, mask: &str, module: Option<&str>) -> Vec<usize> {
        let pattern = to_c_string(pattern);
        let mask = to_c_string(mask);
        let module = module.map(to_c_string);
        let mut found: Vec<usize> = Vec::new();
        unsafe {
            (self.table.find_pattern)(
                pattern.as_ptr(),
                mask.as_ptr(),
                module.as_ref().map_or(ptr::null(), |m| m.as_ptr()),
                Some(collect_address),
                ptr::from_mut(&mut found).cast(),
            )
        };
        found
    }

    pub fn on<F: Fn() + Send + Sync + 'static>(&self, event: GameEvent, f: F) {
        let register = match event {
            GameEvent::GameTick => self.table.register_game_tick,
            GameEvent::GameStart => self.table.register_game_start,
            GameEvent::GameStop => self.table.register_game_stop,
            GameEvent::PlayStart => self.table.register_play_start,
            GameEvent::ReturnToMenu => self.table.register_return_to_menu,
        };
        unsafe { register(self.id.0, Some(event_trampoline::<F>), leak(f)) }
    }

    pub fn on_item_pickup<F: Fn(i32, i32) + Send + Sync + 'static>(&self, f: F) {
        unsafe {
            (self.table.register_item_pickup)(self.id.0, Some(pickup_trampoline::<F>), leak(f))
        }
    }

    /// Registers a pickup handler that can return `true` to stop the game
    /// from giving the item.
    pub fn on_item_pickup_blocking<F: Fn(i32, i32) -> bool + Send + Sync + 'static>(&self, f: F) -> bool {
        unsafe {
            (self.table.register_item_pickup_blocking)(
                self.id.0,
                Some(blocking_trampoline::<F>),
                leak(f),
            ) != 0
        }
    }

    /// Registers a handler for brush technique edits. Returning `true` blocks
    /// the edit.
    pub fn on_brush_edit<F: Fn(i32, i32) -> bool + Send + Sync + 'static>(&self, f: F) -> bool {
        unsafe {
            (self.table.register_brush_edit)(self.id.0, Some(blocking_trampoline::<F>), leak(f)) != 0
        }
    }

    /// Redirects `target` into `detour`. Returns the trampoline to the
    /// original function.
    pub fn hook_function(&self, target: usize, detour: usize) -> Option<usize> {
        let mut original = ptr::null_mut();
        let ok = unsafe { (self.table.hook_function)(target, detour as *mut c_void, &mut original) };
        (ok != 0).then_some(original as usize)
    }

    pub fn add_command<F: Fn(&[String]) + Send + Sync + 'static>(
        &self,
        name: &str,
        description: &str,
        f: F,
    ) {
        let name = to_c_string(name);
        let description = to_c_string(description);
        unsafe {
            (self.table.add_command)(
                self.id.0,
                name.as_ptr(),
                Some(command_trampoline::<F>),
                leak(f),
                description.as_ptr(),
            )
        }
    }

    pub fn remove_command(&self, name: &str) {
        let name = to_c_string(name);
        unsafe { (self.table.remove_command)(self.id.0, name.as_ptr()) }
    }

    pub fn execute_command(&self, line: &str) {
        let line = to_c_string(line);
        unsafe { (self.table.execute_command)(line.as_ptr()) }
    }

    pub fn console_print(&self, message: &str) {
        let message = to_c_string(message);
        unsafe { (self.table.console_print)(message.as_ptr()) }
    }

    pub fn is_console_visible(&self) -> bool {
        unsafe { (self.table.is_console_visible)() != 0 }
    }

    /// Supplies replacements for the file named `filename`.
    pub fn intercept_resource<F>(&self, filename: &str, provider: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let filename = to_c_string(filename);
        let state = ProviderState {
            provider,
            last: Default::default(),
        };
        unsafe {
            (self.table.intercept_resource)(
                self.id.0,
                filename.as_ptr(),
                Some(resource_trampoline::<F>),
                leak(state),
            )
        }
    }

    /// Supplies replacements for every file matching the wildcard `pattern`.
    pub fn intercept_resource_pattern<F>(&self, pattern: &str, provider: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let pattern = to_c_string(pattern);
        let state = ProviderState {
            provider,
            last: Default::default(),
        };
        unsafe {
            (self.table.intercept_resource_pattern)(
                self.id.0,
                pattern.as_ptr(),
                Some(resource_trampoline::<F>),
                leak(state),
            )
        }
    }

    pub fn remove_resource_interception(&self, filename: &str) {
        let filename = to_c_string(filename);
        unsafe { (self.table.remove_resource_interception)(self.id.0, filename.as_ptr()) }
    }

    /// Watches `size` bytes at `start`, calling `f` with the old and new
    /// contents once per tick in which they changed.
    pub fn watch_memory<F: Fn(usize, &[u8], &[u8]) + Send + Sync + 'static>(
        &self,
        start: usize,
        size: usize,
        description: &str,
        f: F,
    ) -> bool {
        let description = to_c_string(description);
        unsafe {
            (self.table.watch_memory)(
                self.id.0,
                start,
                size,
                Some(watch_trampoline::<F>),
                leak(f),
                description.as_ptr(),
            ) != 0
        }
    }

    pub fn unwatch_memory(&self, start: usize) -> bool {
        unsafe { (self.table.unwatch_memory)(self.id.0, start) != 0 }
    }

    /// Monitors the flags `size` bytes long at `offset` into `module`.
    pub fn create_bitfield_monitor<F: Fn(u32, bool, bool) + Send + Sync + 'static>(
        &self,
        module: &str,
        offset: usize,
        size: usize,
        description: &str,
        f: F,
    ) -> Option<RemoteMonitor> {
        let module = to_c_string(module);
        let description = to_c_string(description);
        let handle = unsafe {
            (self.table.create_bitfield_monitor_module)(
                self.id.0,
                module.as_ptr(),
                offset,
                size,
                Some(bitfield_trampoline::<F>),
                leak(f),
                description.as_ptr(),
            )
        };
        (!handle.is_null()).then_some(RemoteMonitor(handle as usize))
    }

    /// Reports any flag changes since the last update. Returns whether
    /// anything changed.
    pub fn update_monitor(&self, monitor: RemoteMonitor) -> bool {
        unsafe { (self.table.update_bitfield_monitor)(monitor.as_ptr()) != 0 }
    }

    pub fn reset_monitor(&self, monitor: RemoteMonitor) -> bool {
        unsafe { (self.table.reset_bitfield_monitor)(monitor.as_ptr()) != 0 }
    }

    pub fn destroy_monitor(&self, monitor: RemoteMonitor) {
        unsafe { (self.table.destroy_bitfield_monitor)(monitor.as_ptr()) }
    }

    pub fn register_gui_window<F: Fn(i32, i32, f32) + Send + Sync + 'static>(
        &self,
        name: &str,
        visible: bool,
        f: F,
    ) -> bool {
        let name = to_c_string(name);
        unsafe {
            (self.table.register_gui_window)(
                self.id.0,
                name.as_ptr(),
                Some(window_trampoline::<F>),
                leak(f),
                visible as c_int,
            ) != 0
        }
    }

    pub fn toggle_gui_window(&self, name: &str) -> bool {
        let name = to_c_string(name);
        unsafe { (self.table.toggle_gui_window)(self.id.0, name.as_ptr()) != 0 }
    }

    pub fn set_gui_window_visible(&self, name: &str, visible: bool) -> bool {
        let name = to_c_string(name);
        unsafe { (self.table.set_gui_window_visible)(self.id.0, name.as_ptr(), visible as c_int) != 0 }
    }

    /// Puts `quantity` of the game item `item_id` in the player's inventory.
    pub fn give_item(&self, item_id: i32, quantity: i32) {
        unsafe { (self.table.give_inv_item)(item_id, quantity) }
    }
}
