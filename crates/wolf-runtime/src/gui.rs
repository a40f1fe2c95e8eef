//! Bookkeeping for mod GUI windows and the graphics objects the host shares
//! with mods.
//!
//! The runtime never draws anything itself. Whichever overlay hosts the game's
//! ImGui context calls [GuiRegistry::render_all] once per frame and publishes
//! its context and device pointers through [GuiRegistry::set_host].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::*;

use crate::mods::{ModId, run_as};

/// Called once per frame with `(outer_width, outer_height, ui_scale)` while
/// the window is visible.
pub type GuiWindowCallback = Arc<dyn Fn(i32, i32, f32) + Send + Sync>;

/// Returns `true` if the message was handled and shouldn't reach the game.
pub type WndProcCallback = Arc<dyn Fn(WndProcMessage) -> bool + Send + Sync>;

/// A window message, with handles carried as plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WndProcMessage {
    pub hwnd: usize,
    pub msg: u32,
    pub wparam: usize,
    pub lparam: isize,
}

/// Addresses of the host's ImGui and Direct3D 11 objects. Zero means the host
/// hasn't provided that object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuiHost {
    pub imgui_context: usize,
    pub imgui_alloc_func: usize,
    pub imgui_free_func: usize,
    pub imgui_alloc_user_data: usize,
    pub imgui_font_atlas: usize,
    pub imgui_io: usize,
    pub d3d11_device: usize,
    pub d3d11_device_context: usize,
}

#[derive(Clone)]
struct GuiWindow {
    owner: ModId,
    name: String,
    visible: bool,
    callback: GuiWindowCallback,
}

/// Tracks mod windows, window-procedure hooks and per-mod ImGui state.
#[derive(Default)]
pub struct GuiRegistry {
    windows: RwLock<Vec<GuiWindow>>,
    host: RwLock<GuiHost>,
    draw_data: RwLock<HashMap<ModId, usize>>,
    contexts: RwLock<HashMap<ModId, Vec<usize>>>,
    wndproc_hooks: RwLock<Vec<(ModId, WndProcCallback)>>,
}

impl GuiRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a window. Window names are global, so this fails if any mod
    /// already registered `name`.
    pub fn register_window(
        &self,
        owner: ModId,
        name: impl Into<String>,
        callback: GuiWindowCallback,
        visible: bool,
    ) -> bool {
        let name = name.into();
        let Ok(mut windows) = self.windows.write() else {
            return false;
        };
        if windows.iter().any(|w| w.name == name) {
            warn!("{owner} tried to register duplicate window '{name}'");
            return false;
        }
        windows.push(GuiWindow {
            owner,
            name,
            visible,
            callback,
        });
        true
    }

    /// Runs `f` on `owner`'s window named `name`.
    fn with_window<R>(&self, owner: ModId, name: &str, f: impl FnOnce(&mut GuiWindow) -> R) -> Option<R> {
        let mut windows = self.windows.write().ok()?;
        windows
            .iter_mut()
            .find(|w| w.owner == owner && w.name == name)
            .map(f)
    }

    pub fn unregister_window(&self, owner: ModId, name: &str) -> bool {
        let Ok(mut windows) = self.windows.write() else {
            return false;
        };
        let before = windows.len();
        windows.retain(|w| !(w.owner == owner && w.name == name));
        windows.len() != before
    }

    pub fn toggle_window(&self, owner: ModId, name: &str) -> bool {
        self.with_window(owner, name, |w| w.visible = !w.visible)
            .is_some()
    }

    pub fn set_window_visible(&self, owner: ModId, name: &str, visible: bool) -> bool {
        self.with_window(owner, name, |w| w.visible = visible)
            .is_some()
    }

    /// Returns whether the window named `name` is visible, or `None` if there's
    /// no such window.
    pub fn is_window_visible(&self, name: &str) -> Option<bool> {
        self.windows
            .read()
            .ok()?
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.visible)
    }

    /// Draws every visible window in registration order.
    pub fn render_all(&self, outer_width: i32, outer_height: i32, ui_scale: f32) {
        let windows = self
            .windows
            .read()
            .map(|w| w.iter().filter(|w| w.visible).cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        for window in windows {
            run_as(window.owner, &window.name, || {
                (window.callback)(outer_width, outer_height, ui_scale)
            });
        }
    }

    /// Runs `f` as `owner` if the host has an ImGui context to run it in.
    /// Returns whether `f` ran to completion.
    pub fn execute_in_context(&self, owner: ModId, f: impl FnOnce()) -> bool {
        if self.host().imgui_context == 0 {
            debug!("{owner} asked for the ImGui context before the host provided one");
            return false;
        }
        run_as(owner, "ImGui context", f).is_some()
    }

    /// Publishes the host's graphics objects.
    pub fn set_host(&self, host: GuiHost) {
        if let Ok(mut current) = self.host.write() {
            *current = host;
        }
    }

    pub fn host(&self) -> GuiHost {
        self.host.read().map(|h| *h).unwrap_or_default()
    }

    pub fn register_draw_data(&self, owner: ModId, draw_data: usize) {
        if let Ok(mut map) = self.draw_data.write() {
            map.insert(owner, draw_data);
        }
    }

    /// Returns the draw data each mod most recently submitted, for the host to
    /// render after its own.
    pub fn draw_data(&self) -> Vec<(ModId, usize)> {
        let mut data = self
            .draw_data
            .read()
            .map(|m| m.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>())
            .unwrap_or_default();
        data.sort_unstable();
        data
    }

    /// Records an ImGui context a mod created for itself.
    pub fn register_context(&self, owner: ModId, context: usize) {
        if let Ok(mut map) = self.contexts.write() {
            let list = map.entry(owner).or_default();
            if !list.contains(&context) {
                list.push(context);
            }
        }
    }

    pub fn unregister_context(&self, owner: ModId, context: usize) {
        if let Ok(mut map) = self.contexts.write()
            && let Some(list) = map.get_mut(&owner)
        {
            list.retain(|c| *c != context);
        }
    }

    pub fn contexts(&self, owner: ModId) -> Vec<usize> {
        self.contexts
            .read()
            .ok()
            .and_then(|m| m.get(&owner).cloned())
            .unwrap_or_default()
    }

    pub fn register_wndproc_hook(&self, owner: ModId, callback: WndProcCallback) {
        if let Ok(mut hooks) = self.wndproc_hooks.write() {
            hooks.push((owner, callback));
        }
    }

    /// Removes every window-procedure hook `owner` registered.
    pub fn unregister_wndproc_hooks(&self, owner: ModId) {
        if let Ok(mut hooks) = self.wndproc_hooks.write() {
            hooks.retain(|(o, _)| *o != owner);
        }
    }

    /// Offers `message` to each hook in order, stopping at the first that
    /// handles it. Returns whether it was handled.
    pub fn dispatch_wndproc(&self, message: WndProcMessage) -> bool {
        let hooks = self
            .wndproc_hooks
            .read()
            .map(|h| h.clone())
            .unwrap_or_default();
        hooks.into_iter().any(|(owner, callback)| {
            run_as(owner, "window procedure", || callback(message)).unwrap_or(false)
        })
    }

    /// Drops everything `owner` registered.
    pub fn remove_mod(&self, owner: ModId) {
        if let Ok(mut windows) = self.windows.write() {
            windows.retain(|w| w.owner != owner);
        }
        if let Ok(mut map) = self.draw_data.write() {
            map.remove(&owner);
        }
        if let Ok(mut map) = self.contexts.write() {
            map.remove(&owner);
        }
        self.unregister_wndproc_hooks(owner);
    }
}
