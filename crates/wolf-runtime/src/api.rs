//! The C function table mods are handed when they load.
//!
//! Every slot is an `extern "C"` thunk over the installed [Runtime]. The
//! order of the slots in [WolfRuntimeApi] is the ABI: mods built against an
//! older table keep working as long as slots are only ever appended.
//!
//! Thunks never unwind into C. A panic inside the runtime is logged and the
//! thunk returns its failure value instead.

use std::ffi::{CStr, CString, c_char, c_float, c_int, c_uint, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, OnceLock};

use log::*;

use crate::error::{Error, Result};
use crate::events::GameEvent;
use crate::gui::{GuiHost, WndProcMessage};
use crate::memory::pattern;
use crate::mods::{ModId, ModLifecycle, ModLogLevel, current_mod_id};
use crate::monitor::MonitorHandle;
use crate::runtime::Runtime;

pub type WolfModId = c_int;

pub type WolfGameEventCallback = Option<unsafe extern "C" fn(userdata: *mut c_void)>;
pub type WolfItemPickupCallback =
    Option<unsafe extern "C" fn(item_id: c_int, count: c_int, userdata: *mut c_void)>;
pub type WolfItemPickupBlockingCallback =
    Option<unsafe extern "C" fn(item_id: c_int, count: c_int, userdata: *mut c_void) -> c_int>;
pub type WolfBrushEditCallback =
    Option<unsafe extern "C" fn(bit_index: c_int, operation: c_int, userdata: *mut c_void) -> c_int>;
pub type WolfPatternCallback = Option<unsafe extern "C" fn(address: usize, userdata: *mut c_void)>;
pub type WolfMemoryWatchCallback = Option<
    unsafe extern "C" fn(
        address: usize,
        old_data: *const c_void,
        new_data: *const c_void,
        size: usize,
        userdata: *mut c_void,
    ),
>;
pub type WolfConsoleCommandCallback =
    Option<unsafe extern "C" fn(argc: c_int, argv: *const *const c_char, userdata: *mut c_void)>;
pub type WolfResourceProvider =
    Option<unsafe extern "C" fn(original_path: *const c_char, userdata: *mut c_void) -> *const c_char>;
pub type WolfBitfieldChangeCallback = Option<
    unsafe extern "C" fn(bit_index: c_uint, old_value: c_int, new_value: c_int, userdata: *mut c_void),
>;
pub type WolfGuiWindowCallback = Option<
    unsafe extern "C" fn(outer_width: c_int, outer_height: c_int, ui_scale: c_float, userdata: *mut c_void),
>;
pub type WolfWndProcCallback = Option<
    unsafe extern "C" fn(
        hwnd: *mut c_void,
        msg: c_uint,
        wparam: usize,
        lparam: isize,
        userdata: *mut c_void,
    ) -> c_int,
>;

/// An opaque bitfield monitor handle. Null means failure.
pub type WolfBitfieldMonitorHandle = *mut c_void;

/// What a mod tells the runtime about itself when it registers.
///
/// `shutdown` and `get_name` are required. The other hooks may be null.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WolfModInterface {
    pub early_game_init: Option<unsafe extern "C" fn()>,
    pub late_game_init: Option<unsafe extern "C" fn()>,
    pub shutdown: Option<unsafe extern "C" fn()>,
    pub get_name: Option<unsafe extern "C" fn() -> *const c_char>,
    pub get_version: Option<unsafe extern "C" fn() -> *const c_char>,
    pub framework_version_int: c_uint,
    pub imgui_version_int: c_uint,
}

/// The signature of the `wolfGetModInterface` symbol every mod exports.
pub type WolfGetModInterface =
    unsafe extern "C" fn(runtime: *mut WolfRuntimeApi) -> WolfModInterface;

/// The name of the symbol every mod exports.
pub const MOD_ENTRY_SYMBOL: &CStr = c"wolfGetModInterface";

/// The runtime function table. Integer results use `1` for success and `0`
/// for failure.
#[repr(C)]
pub struct WolfRuntimeApi {
    pub get_runtime_version: unsafe extern "C" fn() -> *const c_char,
    pub get_runtime_build_info: unsafe extern "C" fn() -> *const c_char,
    pub get_current_mod_id: unsafe extern "C" fn() -> WolfModId,
    pub register_mod: unsafe extern "C" fn(interface: *const WolfModInterface) -> WolfModId,
    pub log: unsafe extern "C" fn(mod_id: WolfModId, level: c_int, message: *const c_char),
    pub set_log_prefix: unsafe extern "C" fn(mod_id: WolfModId, prefix: *const c_char),

    pub get_module_base: unsafe extern "C" fn(module_name: *const c_char) -> usize,
    pub is_valid_address: unsafe extern "C" fn(address: usize) -> c_int,
    pub read_memory: unsafe extern "C" fn(address: usize, buffer: *mut c_void, size: usize) -> c_int,
    pub write_memory:
        unsafe extern "C" fn(address: usize, buffer: *const c_void, size: usize) -> c_int,
    pub find_pattern: unsafe extern "C" fn(
        pattern: *const c_char,
        mask: *const c_char,
        module_name: *const c_char,
        callback: WolfPatternCallback,
        userdata: *mut c_void,
    ),
    pub watch_memory: unsafe extern "C" fn(
        mod_id: WolfModId,
        start: usize,
        size: usize,
        callback: WolfMemoryWatchCallback,
        userdata: *mut c_void,
        description: *const c_char,
    ) -> c_int,
    pub unwatch_memory: unsafe extern "C" fn(mod_id: WolfModId, start: usize) -> c_int,

    pub register_game_tick:
        unsafe extern "C" fn(mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void),
    pub register_game_start:
        unsafe extern "C" fn(mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void),
    pub register_game_stop:
        unsafe extern "C" fn(mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void),
    pub register_play_start:
        unsafe extern "C" fn(mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void),
    pub register_return_to_menu:
        unsafe extern "C" fn(mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void),
    pub register_item_pickup:
        unsafe extern "C" fn(mod_id: WolfModId, callback: WolfItemPickupCallback, userdata: *mut c_void),
    pub register_item_pickup_blocking: unsafe extern "C" fn(
        mod_id: WolfModId,
        callback: WolfItemPickupBlockingCallback,
        userdata: *mut c_void,
    ) -> c_int,
    pub register_brush_edit: unsafe extern "C" fn(
        mod_id: WolfModId,
        callback: WolfBrushEditCallback,
        userdata: *mut c_void,
    ) -> c_int,

    pub hook_function:
        unsafe extern "C" fn(address: usize, detour: *mut c_void, original: *mut *mut c_void) -> c_int,

    pub add_command: unsafe extern "C" fn(
        mod_id: WolfModId,
        name: *const c_char,
        callback: WolfConsoleCommandCallback,
        userdata: *mut c_void,
        description: *const c_char,
    ),
    pub remove_command: unsafe extern "C" fn(mod_id: WolfModId, name: *const c_char),
    pub execute_command: unsafe extern "C" fn(command_line: *const c_char),
    pub console_print: unsafe extern "C" fn(message: *const c_char),
    pub is_console_visible: unsafe extern "C" fn() -> c_int,

    pub intercept_resource: unsafe extern "C" fn(
        mod_id: WolfModId,
        filename: *const c_char,
        provider: WolfResourceProvider,
        userdata: *mut c_void,
    ),
    pub remove_resource_interception:
        unsafe extern "C" fn(mod_id: WolfModId, filename: *const c_char),
    pub intercept_resource_pattern: unsafe extern "C" fn(
        mod_id: WolfModId,
        pattern: *const c_char,
        provider: WolfResourceProvider,
        userdata: *mut c_void,
    ),

    pub create_bitfield_monitor: unsafe extern "C" fn(
        mod_id: WolfModId,
        address: usize,
        size_in_bytes: usize,
        callback: WolfBitfieldChangeCallback,
        userdata: *mut c_void,
        description: *const c_char,
    ) -> WolfBitfieldMonitorHandle,
    pub create_bitfield_monitor_module: unsafe extern "C" fn(
        mod_id: WolfModId,
        module_name: *const c_char,
        offset: usize,
        size_in_bytes: usize,
        callback: WolfBitfieldChangeCallback,
        userdata: *mut c_void,
        description: *const c_char,
    ) -> WolfBitfieldMonitorHandle,
    pub destroy_bitfield_monitor: unsafe extern "C" fn(monitor: WolfBitfieldMonitorHandle),
    pub update_bitfield_monitor: unsafe extern "C" fn(monitor: WolfBitfieldMonitorHandle) -> c_int,
    pub reset_bitfield_monitor: unsafe extern "C" fn(monitor: WolfBitfieldMonitorHandle) -> c_int,

    pub register_gui_window: unsafe extern "C" fn(
        mod_id: WolfModId,
        window_name: *const c_char,
        callback: WolfGuiWindowCallback,
        userdata: *mut c_void,
        initially_visible: c_int,
    ) -> c_int,
    pub unregister_gui_window:
        unsafe extern "C" fn(mod_id: WolfModId, window_name: *const c_char) -> c_int,
    pub toggle_gui_window: unsafe extern "C" fn(mod_id: WolfModId, window_name: *const c_char) -> c_int,
    pub set_gui_window_visible:
        unsafe extern "C" fn(mod_id: WolfModId, window_name: *const c_char, visible: c_int) -> c_int,
    pub execute_in_imgui_context: unsafe extern "C" fn(
        mod_id: WolfModId,
        render: Option<unsafe extern "C" fn(userdata: *mut c_void)>,
        userdata: *mut c_void,
    ) -> c_int,

    pub get_imgui_context: unsafe extern "C" fn() -> *mut c_void,
    pub get_imgui_alloc_func: unsafe extern "C" fn() -> *mut c_void,
    pub get_imgui_free_func: unsafe extern "C" fn() -> *mut c_void,
    pub get_imgui_alloc_user_data: unsafe extern "C" fn() -> *mut c_void,
    pub get_imgui_font_atlas: unsafe extern "C" fn() -> *mut c_void,
    pub get_imgui_io: unsafe extern "C" fn() -> *mut c_void,
    pub get_d3d11_device: unsafe extern "C" fn() -> *mut c_void,
    pub get_d3d11_device_context: unsafe extern "C" fn() -> *mut c_void,

    pub register_mod_draw_data: unsafe extern "C" fn(mod_id: WolfModId, draw_data: *mut c_void),
    pub register_mod_context: unsafe extern "C" fn(mod_id: WolfModId, context: *mut c_void),
    pub unregister_mod_context: unsafe extern "C" fn(mod_id: WolfModId, context: *mut c_void),

    pub register_wndproc_hook:
        unsafe extern "C" fn(mod_id: WolfModId, callback: WolfWndProcCallback, userdata: *mut c_void),
    pub unregister_wndproc_hook: unsafe extern "C" fn(mod_id: WolfModId),

    pub give_inv_item: unsafe extern "C" fn(item_id: c_int, quantity: c_int),
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Makes `runtime` the process-wide runtime and returns the function table
/// to hand to mods. Only the first call succeeds.
pub fn install(runtime: Runtime) -> Result<&'static WolfRuntimeApi> {
    RUNTIME.set(runtime).map_err(|_| Error::AlreadyInstalled)?;
    info!("Wolf runtime {} installed", crate::VERSION);
    Ok(&API)
}

/// Returns the installed runtime, if any.
pub fn installed() -> Option<&'static Runtime> {
    RUNTIME.get()
}

/// Calls a mod's entry point with the function table. The mod registers
/// itself from inside the call.
///
/// # Safety
///
/// `entry` must be a mod's `wolfGetModInterface` export.
pub unsafe fn connect_mod(entry: WolfGetModInterface) -> WolfModInterface {
    unsafe { entry(ptr::from_ref(&API).cast_mut()) }
}

/// Runs `f` against the installed runtime. Returns `fallback` if there's no
/// runtime or if `f` panics.
fn with_runtime<R>(what: &str, fallback: R, f: impl FnOnce(&'static Runtime) -> R) -> R {
    let Some(runtime) = RUNTIME.get() else {
        warn!("{what} called before the runtime was installed");
        return fallback;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| f(runtime))) {
        Ok(value) => value,
        Err(_) => {
            error!("Runtime panicked in {what}");
            fallback
        }
    }
}

/// Like [with_runtime], but refuses to act for a mod id the registry never
/// handed out, since nothing could clean up after it.
fn with_mod<R>(
    what: &str,
    mod_id: WolfModId,
    fallback: R,
    f: impl FnOnce(&'static Runtime, ModId) -> R,
) -> R {
    let id = ModId(mod_id);
    if let Some(runtime) = RUNTIME.get()
        && !runtime.mods().contains(id)
    {
        warn!("{what} called with unregistered mod id {mod_id}");
        return fallback;
    }
    with_runtime(what, fallback, |rt| f(rt, id))
}

/// Copies a C string, replacing invalid UTF-8. Returns `None` for null.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// A mod's userdata pointer. The runtime never dereferences it, only hands it
/// back to the callback it was registered with.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(self) -> *mut c_void {
        self.0
    }
}

/// A mod registered through [WolfModInterface].
struct FfiMod(WolfModInterface);

impl ModLifecycle for FfiMod {
    fn name(&self) -> String {
        self.0
            .get_name
            .and_then(|f| unsafe { c_string(f()) })
            .unwrap_or_else(|| "unnamed mod".to_string())
    }

    fn version(&self) -> String {
        self.0
            .get_version
            .and_then(|f| unsafe { c_string(f()) })
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn framework_version(&self) -> u32 {
        self.0.framework_version_int
    }

    fn early_init(&self) {
        if let Some(f) = self.0.early_game_init {
            unsafe { f() }
        }
    }

    fn late_init(&self) {
        if let Some(f) = self.0.late_game_init {
            unsafe { f() }
        }
    }

    fn shutdown(&self) {
        if let Some(f) = self.0.shutdown {
            unsafe { f() }
        }
    }
}

const VERSION_C: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
const BUILD_INFO_C: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " ",
    env!("CARGO_PKG_VERSION"),
    " (Rust)\0"
);

unsafe extern "C" fn get_runtime_version() -> *const c_char {
    VERSION_C.as_ptr().cast()
}

unsafe extern "C" fn get_runtime_build_info() -> *const c_char {
    BUILD_INFO_C.as_ptr().cast()
}

unsafe extern "C" fn get_current_mod_id() -> WolfModId {
    current_mod_id().0
}

unsafe extern "C" fn register_mod(interface: *const WolfModInterface) -> WolfModId {
    let Some(interface) = (unsafe { interface.as_ref() }).copied() else {
        warn!("registerMod called with a null interface");
        return ModId::NONE.0;
    };
    if interface.shutdown.is_none() || interface.get_name.is_none() {
        warn!("Rejecting a mod without a shutdown or getName callback");
        return ModId::NONE.0;
    }
    with_runtime("registerMod", ModId::NONE.0, |rt| {
        rt.register_mod(Arc::new(FfiMod(interface))).0
    })
}

unsafe extern "C" fn log_message(mod_id: WolfModId, level: c_int, message: *const c_char) {
    let Some(message) = (unsafe { c_string(message) }) else {
        return;
    };
    let level = ModLogLevel::from_repr(level).unwrap_or(ModLogLevel::Info);
    with_runtime("log", (), |rt| rt.log(ModId(mod_id), level, &message));
}

unsafe extern "C" fn set_log_prefix(mod_id: WolfModId, prefix: *const c_char) {
    let Some(prefix) = (unsafe { c_string(prefix) }) else {
        return;
    };
    with_runtime("setLogPrefix", (), |rt| {
        rt.mods().set_log_prefix(ModId(mod_id), prefix);
    });
}

unsafe extern "C" fn get_module_base(module_name: *const c_char) -> usize {
    let name = unsafe { c_string(module_name) };
    with_runtime("getModuleBase", 0, |rt| match name {
        Some(name) => rt.memory().module_base(&name).unwrap_or(0),
        None => rt.memory().modules().first().map_or(0, |m| m.base),
    })
}

unsafe extern "C" fn is_valid_address(address: usize) -> c_int {
    with_runtime("isValidAddress", 0, |rt| {
        rt.memory().is_valid_address(address) as c_int
    })
}

unsafe extern "C" fn read_memory(address: usize, buffer: *mut c_void, size: usize) -> c_int {
    if buffer.is_null() {
        return 0;
    }
    let buffer = unsafe { std::slice::from_raw_parts_mut(buffer.cast::<u8>(), size) };
    with_runtime("readMemory", 0, |rt| match rt.memory().read(address, buffer) {
        Ok(()) => 1,
        Err(e) => {
            debug!("readMemory failed: {e}");
            0
        }
    })
}

unsafe extern "C" fn write_memory(address: usize, buffer: *const c_void, size: usize) -> c_int {
    if buffer.is_null() {
        return 0;
    }
    let buffer = unsafe { std::slice::from_raw_parts(buffer.cast::<u8>(), size) };
    with_runtime("writeMemory", 0, |rt| match rt.memory().write(address, buffer) {
        Ok(()) => 1,
        Err(e) => {
            warn!("writeMemory failed: {e}");
            0
        }
    })
}

unsafe extern "C" fn find_pattern(
    pattern: *const c_char,
    mask: *const c_char,
    module_name: *const c_char,
    callback: WolfPatternCallback,
    userdata: *mut c_void,
) {
    let (Some(pattern), Some(callback)) = (unsafe { c_string(pattern) }, callback) else {
        return;
    };
    let mask = unsafe { c_string(mask) }.unwrap_or_default();
    let module = unsafe { c_string(module_name) };
    let matches = with_runtime("findPattern", Vec::new(), |rt| {
        pattern::find_pattern(rt.memory(), &pattern, &mask, module.as_deref()).unwrap_or_else(|e| {
            warn!("findPattern failed: {e}");
            Vec::new()
        })
    });
    for address in matches {
        unsafe { callback(address, userdata) };
    }
}

unsafe extern "C" fn watch_memory(
    mod_id: WolfModId,
    start: usize,
    size: usize,
    callback: WolfMemoryWatchCallback,
    userdata: *mut c_void,
    description: *const c_char,
) -> c_int {
    let Some(callback) = callback else {
        return 0;
    };
    let userdata = UserData(userdata);
    let description = unsafe { c_string(description) }.unwrap_or_default();
    with_mod("watchMemory", mod_id, 0, |rt, owner| {
        let result = rt.monitors().watch(
            owner,
            start,
            size,
            Arc::new(move |address: usize, old: &[u8], new: &[u8]| unsafe {
                callback(
                    address,
                    old.as_ptr().cast(),
                    new.as_ptr().cast(),
                    new.len(),
                    userdata.get(),
                )
            }),
            description,
        );
        match result {
            Ok(()) => 1,
            Err(e) => {
                warn!("watchMemory failed: {e}");
                0
            }
        }
    })
}

unsafe extern "C" fn unwatch_memory(mod_id: WolfModId, start: usize) -> c_int {
    with_mod("unwatchMemory", mod_id, 0, |rt, owner| {
        rt.monitors().unwatch(owner, start) as c_int
    })
}

fn register_event(event: GameEvent, mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void) {
    let Some(callback) = callback else {
        return;
    };
    let userdata = UserData(userdata);
    with_mod("registerEvent", mod_id, (), |rt, owner| {
        rt.events().on(
            event,
            owner,
            Arc::new(move || unsafe { callback(userdata.get()) }),
        )
    });
}

unsafe extern "C" fn register_game_tick(mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void) {
    register_event(GameEvent::GameTick, mod_id, callback, userdata);
}

unsafe extern "C" fn register_game_start(mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void) {
    register_event(GameEvent::GameStart, mod_id, callback, userdata);
}

unsafe extern "C" fn register_game_stop(mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void) {
    register_event(GameEvent::GameStop, mod_id, callback, userdata);
}

unsafe extern "C" fn register_play_start(mod_id: WolfModId, callback: WolfGameEventCallback, userdata: *mut c_void) {
    register_event(GameEvent::PlayStart, mod_id, callback, userdata);
}

unsafe extern "C" fn register_return_to_menu(
    mod_id: WolfModId,
    callback: WolfGameEventCallback,
    userdata: *mut c_void,
) {
    register_event(GameEvent::ReturnToMenu, mod_id, callback, userdata);
}

unsafe extern "C" fn register_item_pickup(
    mod_id: WolfModId,
    callback: WolfItemPickupCallback,
    userdata: *mut c_void,
) {
    let Some(callback) = callback else {
        return;
    };
    let userdata = UserData(userdata);
    with_mod("registerItemPickup", mod_id, (), |rt, owner| {
        rt.events().on_item_pickup(
            owner,
            Arc::new(move |item, count| unsafe { callback(item, count, userdata.get()) }),
        )
    });
}

unsafe extern "C" fn register_item_pickup_blocking(
    mod_id: WolfModId,
    callback: WolfItemPickupBlockingCallback,
    userdata: *mut c_void,
) -> c_int {
    let Some(callback) = callback else {
        return 0;
    };
    let userdata = UserData(userdata);
    with_mod("registerItemPickupBlocking", mod_id, 0, |rt, owner| {
        rt.events().on_item_pickup_blocking(
            owner,
            Arc::new(move |item, count| unsafe { callback(item, count, userdata.get()) != 0 }),
        );
        1
    })
}

unsafe extern "C" fn register_brush_edit(
    mod_id: WolfModId,
    callback: WolfBrushEditCallback,
    userdata: *mut c_void,
) -> c_int {
    let Some(callback) = callback else {
        return 0;
    };
    let userdata = UserData(userdata);
    with_mod("registerBrushEdit", mod_id, 0, |rt, owner| {
        rt.events().on_brush_edit(
            owner,
            Arc::new(move |bit, operation| unsafe { callback(bit, operation, userdata.get()) != 0 }),
        );
        1
    })
}

unsafe extern "C" fn hook_function(address: usize, detour: *mut c_void, original: *mut *mut c_void) -> c_int {
    let owner = current_mod_id();
    let trampoline = with_runtime("hookFunction", None, |rt| {
        match rt.hooks().hook(owner, address, detour as usize) {
            Ok(trampoline) => Some(trampoline),
            Err(e) => {
                warn!("hookFunction failed: {e}");
                None
            }
        }
    });
    match trampoline {
        Some(trampoline) => {
            if !original.is_null() {
                unsafe { *original = trampoline as *mut c_void };
            }
            1
        }
        None => 0,
    }
}

unsafe extern "C" fn add_command(
    mod_id: WolfModId,
    name: *const c_char,
    callback: WolfConsoleCommandCallback,
    userdata: *mut c_void,
    description: *const c_char,
) {
    let (Some(name), Some(callback)) = (unsafe { c_string(name) }, callback) else {
        return;
    };
    let description = unsafe { c_string(description) }.unwrap_or_default();
    let userdata = UserData(userdata);
    let command_name = name.clone();
    with_mod("addCommand", mod_id, (), |rt, owner| {
        rt.console().add_command(
            owner,
            name,
            Arc::new(move |args: &[String]| {
                // C commands see their own name as argv[0].
                let words = std::iter::once(command_name.as_str())
                    .chain(args.iter().map(String::as_str))
                    .filter_map(|word| CString::new(word).ok())
                    .collect::<Vec<_>>();
                let argv = words.iter().map(|w| w.as_ptr()).collect::<Vec<_>>();
                unsafe { callback(argv.len() as c_int, argv.as_ptr(), userdata.get()) }
            }),
            description,
        )
    });
}

unsafe extern "C" fn remove_command(mod_id: WolfModId, name: *const c_char) {
    let Some(name) = (unsafe { c_string(name) }) else {
        return;
    };
    with_mod("removeCommand", mod_id, (), |rt, owner| {
        rt.console().remove_command(owner, &name);
    });
}

unsafe extern "C" fn execute_command(command_line: *const c_char) {
    let Some(line) = (unsafe { c_string(command_line) }) else {
        return;
    };
    with_runtime("executeCommand", (), |rt| {
        rt.console().execute(&line);
    });
}

unsafe extern "C" fn console_print(message: *const c_char) {
    let Some(message) = (unsafe { c_string(message) }) else {
        return;
    };
    with_runtime("consolePrint", (), |rt| rt.console().print(message));
}

unsafe extern "C" fn is_console_visible() -> c_int {
    with_runtime("isConsoleVisible", 0, |rt| rt.console().is_visible() as c_int)
}

fn resource_provider(
    provider: unsafe extern "C" fn(*const c_char, *mut c_void) -> *const c_char,
    userdata: UserData,
) -> crate::resources::ResourceProvider {
    Arc::new(move |path: &str| {
        let path = CString::new(path).ok()?;
        unsafe { c_string(provider(path.as_ptr(), userdata.get())) }
    })
}

unsafe extern "C" fn intercept_resource(
    mod_id: WolfModId,
    filename: *const c_char,
    provider: WolfResourceProvider,
    userdata: *mut c_void,
) {
    let (Some(filename), Some(provider)) = (unsafe { c_string(filename) }, provider) else {
        return;
    };
    let provider = resource_provider(provider, UserData(userdata));
    with_mod("interceptResource", mod_id, (), |rt, owner| {
        rt.resources().intercept(owner, &filename, provider)
    });
}

unsafe extern "C" fn remove_resource_interception(mod_id: WolfModId, filename: *const c_char) {
    let Some(filename) = (unsafe { c_string(filename) }) else {
        return;
    };
    with_mod("removeResourceInterception", mod_id, (), |rt, owner| {
        rt.resources().remove(owner, &filename);
    });
}

unsafe extern "C" fn intercept_resource_pattern(
    mod_id: WolfModId,
    pattern: *const c_char,
    provider: WolfResourceProvider,
    userdata: *mut c_void,
) {
    let (Some(pattern), Some(provider)) = (unsafe { c_string(pattern) }, provider) else {
        return;
    };
    let provider = resource_provider(provider, UserData(userdata));
    with_mod("interceptResourcePattern", mod_id, (), |rt, owner| {
        if let Err(e) = rt.resources().intercept_pattern(owner, &pattern, provider) {
            warn!("interceptResourcePattern failed: {e}");
        }
    });
}

fn monitor_callback(
    callback: unsafe extern "C" fn(c_uint, c_int, c_int, *mut c_void),
    userdata: UserData,
) -> crate::monitor::BitfieldChangeCallback {
    Arc::new(move |bit: u32, old: bool, new: bool| unsafe {
        callback(bit, old as c_int, new as c_int, userdata.get())
    })
}

fn handle_into_ptr(handle: Result<MonitorHandle>) -> WolfBitfieldMonitorHandle {
    match handle {
        Ok(handle) => handle.into_raw() as usize as WolfBitfieldMonitorHandle,
        Err(e) => {
            warn!("Failed to create bitfield monitor: {e}");
            ptr::null_mut()
        }
    }
}

fn handle_from_ptr(handle: WolfBitfieldMonitorHandle) -> Option<MonitorHandle> {
    MonitorHandle::from_raw(handle as usize as u64)
}

unsafe extern "C" fn create_bitfield_monitor(
    mod_id: WolfModId,
    address: usize,
    size_in_bytes: usize,
    callback: WolfBitfieldChangeCallback,
    userdata: *mut c_void,
    description: *const c_char,
) -> WolfBitfieldMonitorHandle {
    let Some(callback) = callback else {
        return ptr::null_mut();
    };
    let callback = monitor_callback(callback, UserData(userdata));
    let description = unsafe { c_string(description) }.unwrap_or_default();
    with_mod("createBitfieldMonitor", mod_id, ptr::null_mut(), |rt, owner| {
        handle_into_ptr(rt.monitors().create(
            owner,
            address,
            size_in_bytes,
            callback,
            description,
        ))
    })
}

unsafe extern "C" fn create_bitfield_monitor_module(
    mod_id: WolfModId,
    module_name: *const c_char,
    offset: usize,
    size_in_bytes: usize,
    callback: WolfBitfieldChangeCallback,
    userdata: *mut c_void,
    description: *const c_char,
) -> WolfBitfieldMonitorHandle {
    let (Some(module), Some(callback)) = (unsafe { c_string(module_name) }, callback) else {
        return ptr::null_mut();
    };
    let callback = monitor_callback(callback, UserData(userdata));
    let description = unsafe { c_string(description) }.unwrap_or_default();
    with_mod("createBitfieldMonitorModule", mod_id, ptr::null_mut(), |rt, owner| {
        handle_into_ptr(rt.monitors().create_in_module(
            owner,
            &module,
            offset,
            size_in_bytes,
            callback,
            description,
        ))
    })
}

unsafe extern "C" fn destroy_bitfield_monitor(monitor: WolfBitfieldMonitorHandle) {
    if let Some(handle) = handle_from_ptr(monitor) {
        with_runtime("destroyBitfieldMonitor", (), |rt| {
            rt.monitors().destroy(handle);
        });
    }
}

unsafe extern "C" fn update_bitfield_monitor(monitor: WolfBitfieldMonitorHandle) -> c_int {
    let Some(handle) = handle_from_ptr(monitor) else {
        return 0;
    };
    with_runtime("updateBitfieldMonitor", 0, |rt| {
        rt.monitors().update(handle) as c_int
    })
}

unsafe extern "C" fn reset_bitfield_monitor(monitor: WolfBitfieldMonitorHandle) -> c_int {
    let Some(handle) = handle_from_ptr(monitor) else {
        return 0;
    };
    with_runtime("resetBitfieldMonitor", 0, |rt| {
        rt.monitors().reset(handle) as c_int
    })
}

unsafe extern "C" fn register_gui_window(
    mod_id: WolfModId,
    window_name: *const c_char,
    callback: WolfGuiWindowCallback,
    userdata: *mut c_void,
    initially_visible: c_int,
) -> c_int {
    let (Some(name), Some(callback)) = (unsafe { c_string(window_name) }, callback) else {
        return 0;
    };
    let userdata = UserData(userdata);
    with_mod("registerGuiWindow", mod_id, 0, |rt, owner| {
        rt.gui().register_window(
            owner,
            name,
            Arc::new(move |width: i32, height: i32, scale: f32| unsafe {
                callback(width, height, scale, userdata.get())
            }),
            initially_visible != 0,
        ) as c_int
    })
}

unsafe extern "C" fn unregister_gui_window(mod_id: WolfModId, window_name: *const c_char) -> c_int {
    let Some(name) = (unsafe { c_string(window_name) }) else {
        return 0;
    };
    with_mod("unregisterGuiWindow", mod_id, 0, |rt, owner| {
        rt.gui().unregister_window(owner, &name) as c_int
    })
}

unsafe extern "C" fn toggle_gui_window(mod_id: WolfModId, window_name: *const c_char) -> c_int {
    let Some(name) = (unsafe { c_string(window_name) }) else {
        return 0;
    };
    with_mod("toggleGuiWindow", mod_id, 0, |rt, owner| {
        rt.gui().toggle_window(owner, &name) as c_int
    })
}

unsafe extern "C" fn set_gui_window_visible(
    mod_id: WolfModId,
    window_name: *const c_char,
    visible: c_int,
) -> c_int {
    let Some(name) = (unsafe { c_string(window_name) }) else {
        return 0;
    };
    with_mod("setGuiWindowVisible", mod_id, 0, |rt, owner| {
        rt.gui().set_window_visible(owner, &name, visible != 0) as c_int
    })
}

unsafe extern "C" fn execute_in_imgui_context(
    mod_id: WolfModId,
    render: Option<unsafe extern "C" fn(userdata: *mut c_void)>,
    userdata: *mut c_void,
) -> c_int {
    let Some(render) = render else {
        return 0;
    };
    with_mod("executeInImGuiContext", mod_id, 0, |rt, owner| {
        rt.gui()
            .execute_in_context(owner, || unsafe { render(userdata) }) as c_int
    })
}

fn gui_host() -> GuiHost {
    RUNTIME.get().map(|rt| rt.gui().host()).unwrap_or_default()
}

unsafe extern "C" fn get_imgui_context() -> *mut c_void {
    gui_host().imgui_context as *mut c_void
}

unsafe extern "C" fn get_imgui_alloc_func() -> *mut c_void {
    gui_host().imgui_alloc_func as *mut c_void
}

unsafe extern "C" fn get_imgui_free_func() -> *mut c_void {
    gui_host().imgui_free_func as *mut c_void
}

unsafe extern "C" fn get_imgui_alloc_user_data() -> *mut c_void {
    gui_host().imgui_alloc_user_data as *mut c_void
}

unsafe extern "C" fn get_imgui_font_atlas() -> *mut c_void {
    gui_host().imgui_font_atlas as *mut c_void
}

unsafe extern "C" fn get_imgui_io() -> *mut c_void {
    gui_host().imgui_io as *mut c_void
}

unsafe extern "C" fn get_d3d11_device() -> *mut c_void {
    gui_host().d3d11_device as *mut c_void
}

unsafe extern "C" fn get_d3d11_device_context() -> *mut c_void {
    gui_host().d3d11_device_context as *mut c_void
}

unsafe extern "C" fn register_mod_draw_data(mod_id: WolfModId, draw_data: *mut c_void) {
    with_mod("registerModDrawData", mod_id, (), |rt, owner| {
        rt.gui().register_draw_data(owner, draw_data as usize)
    });
}

unsafe extern "C" fn register_mod_context(mod_id: WolfModId, context: *mut c_void) {
    if context.is_null() {
        return;
    }
    with_mod("registerModContext", mod_id, (), |rt, owner| {
        rt.gui().register_context(owner, context as usize)
    });
}

unsafe extern "C" fn unregister_mod_context(mod_id: WolfModId, context: *mut c_void) {
    with_mod("unregisterModContext", mod_id, (), |rt, owner| {
        rt.gui().unregister_context(owner, context as usize)
    });
}

unsafe extern "C" fn register_wndproc_hook(
    mod_id: WolfModId,
    callback: WolfWndProcCallback,
    userdata: *mut c_void,
) {
    let Some(callback) = callback else {
        return;
    };
    let userdata = UserData(userdata);
    with_mod("registerWndProcHook", mod_id, (), |rt, owner| {
        rt.gui().register_wndproc_hook(
            owner,
            Arc::new(move |m: WndProcMessage| unsafe {
                callback(m.hwnd as *mut c_void, m.msg, m.wparam, m.lparam, userdata.get()) != 0
            }),
        )
    });
}

unsafe extern "C" fn unregister_wndproc_hook(mod_id: WolfModId) {
    with_mod("unregisterWndProcHook", mod_id, (), |rt, owner| {
        rt.gui().unregister_wndproc_hooks(owner)
    });
}

unsafe extern "C" fn give_inv_item(item_id: c_int, quantity: c_int) {
    with_runtime("giveInvItem", (), |rt| {
        rt.give_item(item_id, quantity);
    });
}

static API: WolfRuntimeApi = WolfRuntimeApi {
    get_runtime_version,
    get_runtime_build_info,
    get_current_mod_id,
    register_mod,
    log: log_message,
    set_log_prefix,
    get_module_base,
    is_valid_address,
    read_memory,
    write_memory,
    find_pattern,
    watch_memory,
    unwatch_memory,
    register_game_tick,
    register_game_start,
    register_game_stop,
    register_play_start,
    register_return_to_menu,
    register_item_pickup,
    register_item_pickup_blocking,
    register_brush_edit,
    hook_function,
    add_command,
    remove_command,
    execute_command,
    console_print,
    is_console_visible,
    intercept_resource,
    remove_resource_interception,
    intercept_resource_pattern,
    create_bitfield_monitor,
    create_bitfield_monitor_module,
    destroy_bitfield_monitor,
    update_bitfield_monitor,
    reset_bitfield_monitor,
    register_gui_window,
    unregister_gui_window,
    toggle_gui_window,
    set_gui_window_visible,
    execute_in_imgui_context,
    get_imgui_context,
    get_imgui_alloc_func,
    get_imgui_free_func,
    get_imgui_alloc_user_data,
    get_imgui_font_atlas,
    get_imgui_io,
    get_d3d11_device,
    get_d3d11_device_context,
    register_mod_draw_data,
    register_mod_context,
    unregister_mod_context,
    register_wndproc_hook,
    unregister_wndproc_hook,
    give_inv_item,
};

#[cfg(test)]
pub(crate) mod tests {
    use std::mem::{offset_of, size_of};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::memory::BufferMemory;

    /// Where the test runtime maps its writable scratch memory.
    pub(crate) const SCRATCH_BASE: usize = 0x1000_0000;

    /// Installs a runtime over simulated memory the first time it's called.
    /// Every test in the crate shares it, so tests use disjoint addresses and
    /// names.
    pub(crate) fn test_api() -> &'static WolfRuntimeApi {
        static INSTALLED: OnceLock<()> = OnceLock::new();
        INSTALLED.get_or_init(|| {
            let memory = BufferMemory::new().with_module("main.dll", SCRATCH_BASE, 0x1000);
            let runtime = Runtime::new(Default::default(), Arc::new(memory));
            runtime.set_give_item(Arc::new(|_, _| true));
            let _ = install(runtime);
        });
        &API
    }

    #[test]
    fn test_slot_layout_is_pointer_packed() {
        let slot = size_of::<usize>();
        // Header order. New slots only ever go at the end.
        let offsets = [
            offset_of!(WolfRuntimeApi, get_runtime_version),
            offset_of!(WolfRuntimeApi, get_runtime_build_info),
            offset_of!(WolfRuntimeApi, get_current_mod_id),
            offset_of!(WolfRuntimeApi, register_mod),
            offset_of!(WolfRuntimeApi, log),
            offset_of!(WolfRuntimeApi, set_log_prefix),
            offset_of!(WolfRuntimeApi, get_module_base),
            offset_of!(WolfRuntimeApi, is_valid_address),
            offset_of!(WolfRuntimeApi, read_memory),
            offset_of!(WolfRuntimeApi, write_memory),
            offset_of!(WolfRuntimeApi, find_pattern),
            offset_of!(WolfRuntimeApi, watch_memory),
            offset_of!(WolfRuntimeApi, unwatch_memory),
            offset_of!(WolfRuntimeApi, register_game_tick),
            offset_of!(WolfRuntimeApi, register_game_start),
            offset_of!(WolfRuntimeApi, register_game_stop),
            offset_of!(WolfRuntimeApi, register_play_start),
            offset_of!(WolfRuntimeApi, register_return_to_menu),
            offset_of!(WolfRuntimeApi, register_item_pickup),
            offset_of!(WolfRuntimeApi, register_item_pickup_blocking),
            offset_of!(WolfRuntimeApi, register_brush_edit),
            offset_of!(WolfRuntimeApi, hook_function),
            offset_of!(WolfRuntimeApi, add_command),
            offset_of!(WolfRuntimeApi, remove_command),
            offset_of!(WolfRuntimeApi, execute_command),
            offset_of!(WolfRuntimeApi, console_print),
            offset_of!(WolfRuntimeApi, is_console_visible),
            offset_of!(WolfRuntimeApi, intercept_resource),
            offset_of!(WolfRuntimeApi, remove_resource_interception),
            offset_of!(WolfRuntimeApi, intercept_resource_pattern),
            offset_of!(WolfRuntimeApi, create_bitfield_monitor),
            offset_of!(WolfRuntimeApi, create_bitfield_monitor_module),
            offset_of!(WolfRuntimeApi, destroy_bitfield_monitor),
            offset_of!(WolfRuntimeApi, update_bitfield_monitor),
            offset_of!(WolfRuntimeApi, reset_bitfield_monitor),
            offset_of!(WolfRuntimeApi, register_gui_window),
            offset_of!(WolfRuntimeApi, unregister_gui_window),
            offset_of!(WolfRuntimeApi, toggle_gui_window),
            offset_of!(WolfRuntimeApi, set_gui_window_visible),
            offset_of!(WolfRuntimeApi, execute_in_imgui_context),
            offset_of!(WolfRuntimeApi, get_imgui_context),
            offset_of!(WolfRuntimeApi, get_imgui_alloc_func),
            offset_of!(WolfRuntimeApi, get_imgui_free_func),
            offset_of!(WolfRuntimeApi, get_imgui_alloc_user_data),
            offset_of!(WolfRuntimeApi, get_imgui_font_atlas),
            offset_of!(WolfRuntimeApi, get_imgui_io),
            offset_of!(WolfRuntimeApi, get_d3d11_device),
            offset_of!(WolfRuntimeApi, get_d3d11_device_context),
            offset_of!(WolfRuntimeApi, register_mod_draw_data),
            offset_of!(WolfRuntimeApi, register_mod_context),
            offset_of!(WolfRuntimeApi, unregister_mod_context),
            offset_of!(WolfRuntimeApi, register_wndproc_hook),
            offset_of!(WolfRuntimeApi, unregister_wndproc_hook),
            offset_of!(WolfRuntimeApi, give_inv_item),
        ];
        for (index, offset) in offsets.into_iter().enumerate() {
            assert_eq!(offset, index * slot, "slot {index}");
        }
        assert_eq!(size_of::<WolfRuntimeApi>(), 54 * slot);
    }

    /// Registers a mod for the table tests to act as, once.
    pub(crate) fn test_mod_id() -> WolfModId {
        static ID: OnceLock<WolfModId> = OnceLock::new();
        *ID.get_or_init(|| {
            let api = test_api();
            unsafe { (api.register_mod)(&test_interface()) }
        })
    }

    #[test]
    fn test_second_install_fails() {
        test_api();
        let runtime = Runtime::new(Default::default(), Arc::new(BufferMemory::new()));
        assert!(matches!(install(runtime), Err(Error::AlreadyInstalled)));
    }

    #[test]
    fn test_version_strings() {
        let api = test_api();
        let version = unsafe { c_string((api.get_runtime_version)()) };
        assert_eq!(version.as_deref(), Some(crate::VERSION));
        let build = unsafe { c_string((api.get_runtime_build_info)()) }.unwrap();
        assert!(build.contains(crate::VERSION));
    }

    unsafe extern "C" fn test_mod_name() -> *const c_char {
        c"Table Test".as_ptr()
    }

    unsafe extern "C" fn test_mod_shutdown() {}

    fn test_interface() -> WolfModInterface {
        WolfModInterface {
            early_game_init: None,
            late_game_init: None,
            shutdown: Some(test_mod_shutdown),
            get_name: Some(test_mod_name),
            get_version: None,
            framework_version_int: crate::VERSION_INT,
            imgui_version_int: 0,
        }
    }

    #[test]
    fn test_register_mod_requires_name_and_shutdown() {
        let api = test_api();
        let mut interface = test_interface();
        let id = unsafe { (api.register_mod)(&interface) };
        assert!(id > 0);
        assert_eq!(
            installed().unwrap().mods().get(ModId(id)).unwrap().name,
            "Table Test"
        );

        interface.shutdown = None;
        assert_eq!(unsafe { (api.register_mod)(&interface) }, 0);
        assert_eq!(unsafe { (api.register_mod)(ptr::null()) }, 0);
    }

    #[test]
    fn test_memory_round_trip_through_table() {
        let api = test_api();
        let value = 0xDEAD_BEEFu32.to_le_bytes();
        let address = SCRATCH_BASE + 0x10;
        assert_eq!(
            unsafe { (api.write_memory)(address, value.as_ptr().cast(), value.len()) },
            1
        );
        let mut read = [0u8; 4];
        assert_eq!(
            unsafe { (api.read_memory)(address, read.as_mut_ptr().cast(), read.len()) },
            1
        );
        assert_eq!(read, value);
        assert_eq!(unsafe { (api.read_memory)(0x10, read.as_mut_ptr().cast(), 4) }, 0);
        assert_eq!(unsafe { (api.is_valid_address)(address) }, 1);
        assert_eq!(unsafe { (api.get_module_base)(c"MAIN.DLL".as_ptr()) }, SCRATCH_BASE);
        assert_eq!(unsafe { (api.get_module_base)(c"missing.dll".as_ptr()) }, 0);
    }

    static BIT_CHANGES: Mutex<Vec<(u32, c_int, c_int)>> = Mutex::new(Vec::new());

    unsafe extern "C" fn record_bit(bit: c_uint, old: c_int, new: c_int, _userdata: *mut c_void) {
        BIT_CHANGES.lock().unwrap().push((bit, old, new));
    }

    #[test]
    fn test_bitfield_monitor_through_table() {
        let api = test_api();
        let offset = 0x100;
        let handle = unsafe {
            (api.create_bitfield_monitor_module)(
                test_mod_id(),
                c"main.dll".as_ptr(),
                offset,
                4,
                Some(record_bit),
                ptr::null_mut(),
                c"test flags".as_ptr(),
            )
        };
        assert!(!handle.is_null());
        assert_eq!(unsafe { (api.update_bitfield_monitor)(handle) }, 0);

        // Bit 0 is the top bit of the first little-endian word.
        let word = 0x8000_0000u32.to_le_bytes();
        unsafe { (api.write_memory)(SCRATCH_BASE + offset, word.as_ptr().cast(), 4) };
        assert_eq!(unsafe { (api.update_bitfield_monitor)(handle) }, 1);
        assert_eq!(*BIT_CHANGES.lock().unwrap(), vec![(0, 0, 1)]);

        unsafe { (api.destroy_bitfield_monitor)(handle) };
        assert_eq!(unsafe { (api.update_bitfield_monitor)(handle) }, 0);
        assert_eq!(unsafe { (api.reset_bitfield_monitor)(ptr::null_mut()) }, 0);
    }

    static COMMAND_ARGS: Mutex<Vec<String>> = Mutex::new(Vec::new());

    unsafe extern "C" fn record_command(argc: c_int, argv: *const *const c_char, _userdata: *mut c_void) {
        let args = unsafe { std::slice::from_raw_parts(argv, argc as usize) };
        let mut recorded = COMMAND_ARGS.lock().unwrap();
        for arg in args {
            recorded.push(unsafe { c_string(*arg) }.unwrap());
        }
    }

    #[test]
    fn test_console_commands_see_their_name_first() {
        let api = test_api();
        unsafe {
            (api.add_command)(
                test_mod_id(),
                c"tabletest".as_ptr(),
                Some(record_command),
                ptr::null_mut(),
                c"Records its arguments".as_ptr(),
            );
            (api.execute_command)(c"tabletest a \"b c\"".as_ptr());
        }
        assert_eq!(*COMMAND_ARGS.lock().unwrap(), vec!["tabletest", "a", "b c"]);
    }

    static MENU_USERDATA: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn record_menu(userdata: *mut c_void) {
        MENU_USERDATA.store(userdata as usize, Ordering::SeqCst);
    }

    #[test]
    fn test_event_callbacks_get_their_userdata() {
        let api = test_api();
        unsafe {
            (api.register_return_to_menu)(test_mod_id(), Some(record_menu), 0x1234 as *mut c_void)
        };
        installed().unwrap().return_to_menu();
        assert_eq!(MENU_USERDATA.load(Ordering::SeqCst), 0x1234);
    }

    static STRAY_HITS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_stray(_userdata: *mut c_void) {
        STRAY_HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_unregistered_mod_ids_are_rejected() {
        let api = test_api();
        let runtime = installed().unwrap();
        let never_issued = 0x7777_0000;
        assert!(!runtime.mods().contains(ModId(never_issued)));

        for mod_id in [ModId::NONE.0, never_issued] {
            unsafe {
                (api.register_play_start)(mod_id, Some(count_stray), ptr::null_mut());
                (api.add_command)(
                    mod_id,
                    c"straycommand".as_ptr(),
                    Some(record_command),
                    ptr::null_mut(),
                    ptr::null(),
                );
            }
            let handle = unsafe {
                (api.create_bitfield_monitor)(
                    mod_id,
                    SCRATCH_BASE + 0x200,
                    4,
                    Some(record_bit),
                    ptr::null_mut(),
                    ptr::null(),
                )
            };
            assert!(handle.is_null());
        }

        runtime.play_start();
        assert_eq!(STRAY_HITS.load(Ordering::SeqCst), 0);
        assert!(
            !runtime
                .console()
                .commands()
                .iter()
                .any(|(name, _)| name == "straycommand")
        );
    }

    #[test]
    fn test_hook_without_backend_fails() {
        let api = test_api();
        let mut original = ptr::null_mut();
        assert_eq!(
            unsafe { (api.hook_function)(0x1000, 0x2000 as *mut c_void, &mut original) },
            0
        );
        assert!(original.is_null());
    }
}
