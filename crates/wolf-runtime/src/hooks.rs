//! Function detours requested by mods.
//!
//! The runtime doesn't patch code itself. The host process supplies a
//! [FunctionHooker] that knows how to redirect a function, and the registry
//! makes sure each target is only ever detoured once.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use log::*;

use crate::error::{Error, Result};
use crate::mods::ModId;

/// Something that can redirect native functions.
pub trait FunctionHooker: Send + Sync {
    /// Redirects calls to `target` into `detour`. Returns the address of a
    /// trampoline that runs the original function.
    fn hook(&self, target: usize, detour: usize) -> Result<usize>;
}

/// A detour that has been installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstalledHook {
    pub owner: ModId,
    pub target: usize,
    pub detour: usize,
    pub trampoline: usize,
}

#[derive(Default)]
pub struct HookRegistry {
    hooker: RwLock<Option<Arc<dyn FunctionHooker>>>,
    hooks: Mutex<BTreeMap<usize, InstalledHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the backend used to install hooks from now on.
    pub fn set_hooker(&self, hooker: Arc<dyn FunctionHooker>) {
        if let Ok(mut current) = self.hooker.write() {
            *current = Some(hooker);
        }
    }

    pub fn has_hooker(&self) -> bool {
        self.hooker.read().is_ok_and(|h| h.is_some())
    }

    /// Detours `target` into `detour` for `owner` and returns the trampoline
    /// to the original function.
    pub fn hook(&self, owner: ModId, target: usize, detour: usize) -> Result<usize> {
        if target == 0 || detour == 0 {
            return Err(Error::InvalidArgument(
                "hook target and detour must be non-null".to_string(),
            ));
        }
        let hooker = self
            .hooker
            .read()
            .ok()
            .and_then(|h| h.clone())
            .ok_or_else(|| Error::Hook("no hooking backend is available".to_string()))?;

        let mut hooks = self
            .hooks
            .lock()
            .map_err(|_| Error::Hook("hook registry poisoned".to_string()))?;
        if let Some(existing) = hooks.get(&target) {
            warn!(
                "{owner} tried to hook {target:#x}, already hooked by {}",
                existing.owner
            );
            return Err(Error::AlreadyHooked(target));
        }

        let trampoline = hooker.hook(target, detour)?;
        info!("{owner} hooked {target:#x} -> {detour:#x}");
        hooks.insert(
            target,
            InstalledHook {
                owner,
                target,
                detour,
                trampoline,
            },
        );
        Ok(trampoline)
    }

    pub fn is_hooked(&self, target: usize) -> bool {
        self.hooks.lock().is_ok_and(|h| h.contains_key(&target))
    }

    /// Returns every installed hook, ordered by target address.
    pub fn hooks(&self) -> Vec<InstalledHook> {
        self.hooks
            .lock()
            .map(|h| h.values().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Pretends to hook by handing out fake trampolines.
    #[derive(Default)]
    struct FakeHooker {
        calls: AtomicUsize,
    }

    impl FunctionHooker for FakeHooker {
        fn hook(&self, target: usize, _detour: usize) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(target + 0x1000_0000)
        }
    }

    #[test]
    fn test_hook_without_backend_fails() {
        let hooks = HookRegistry::new();
        assert!(!hooks.has_hooker());
        assert!(matches!(hooks.hook(ModId(1), 0x1000, 0x2000), Err(Error::Hook(_))));
    }

    #[test]
    fn test_hook_returns_trampoline_once_per_target() {
        let hooks = HookRegistry::new();
        let hooker = Arc::new(FakeHooker::default());
        hooks.set_hooker(hooker.clone());

        assert_eq!(hooks.hook(ModId(1), 0x1000, 0x2000).unwrap(), 0x1000_1000);
        assert!(hooks.is_hooked(0x1000));
        assert!(matches!(
            hooks.hook(ModId(2), 0x1000, 0x3000),
            Err(Error::AlreadyHooked(0x1000))
        ));
        assert_eq!(hooker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.hooks()[0].owner, ModId(1));
    }

    #[test]
    fn test_null_addresses_are_rejected() {
        let hooks = HookRegistry::new();
        hooks.set_hooker(Arc::new(FakeHooker::default()));
        assert!(matches!(
            hooks.hook(ModId(1), 0, 0x2000),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            hooks.hook(ModId(1), 0x1000, 0),
            Err(Error::InvalidArgument(_))
        ));
    }
}
