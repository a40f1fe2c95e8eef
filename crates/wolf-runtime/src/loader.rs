//! Loads mod DLLs into the process and connects them to the runtime.

use std::fs;
use std::path::Path;

use anyhow::{Result, bail};
use log::*;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::core::{HSTRING, PCSTR};

use crate::api::{self, MOD_ENTRY_SYMBOL, WolfGetModInterface};

/// The directory next to the runtime that mods are loaded from.
pub const MODS_DIRECTORY: &str = "mods";

/// Loads every `.dll` in `dir` in file name order. Returns how many mods
/// registered themselves. A missing directory just means there are no mods.
pub fn load_mods(dir: impl AsRef<Path>) -> Result<usize> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        info!("No mods directory at {}", dir.display());
        return Ok(0);
    }

    let mut paths = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dll"))
        })
        .collect::<Vec<_>>();
    paths.sort();

    let before = api::installed().map_or(0, |rt| rt.mods().len());
    for path in paths {
        if let Err(e) = load_mod(&path) {
            error!("Failed to load {}: {e:?}", path.display());
        }
    }
    let after = api::installed().map_or(0, |rt| rt.mods().len());
    Ok(after.saturating_sub(before))
}

/// Loads a single mod DLL and calls its entry point.
pub fn load_mod(path: &Path) -> Result<()> {
    info!("Loading {}", path.display());
    let module = unsafe { LoadLibraryW(&HSTRING::from(path))? };
    let Some(entry) = (unsafe { GetProcAddress(module, PCSTR(MOD_ENTRY_SYMBOL.as_ptr().cast())) })
    else {
        bail!("{} doesn't export {MOD_ENTRY_SYMBOL:?}", path.display());
    };

    // Safety: every mod exports its entry point with this signature.
    let entry: WolfGetModInterface = unsafe { std::mem::transmute(entry) };
    let interface = unsafe { api::connect_mod(entry) };
    if interface.shutdown.is_none() || interface.get_name.is_none() {
        bail!("{} returned an incomplete mod interface", path.display());
    }
    Ok(())
}
