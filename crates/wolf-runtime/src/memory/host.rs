use std::ffi::{CString, c_void};
use std::mem;

use log::*;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::GetModuleHandleA;
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE,
    PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS, PAGE_PROTECTION_FLAGS, PAGE_READONLY,
    PAGE_READWRITE, PAGE_WRITECOPY, VirtualProtect, VirtualQuery,
};
use windows::Win32::System::ProcessStatus::{
    EnumProcessModules, GetModuleBaseNameA, GetModuleInformation, MODULEINFO,
};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::core::PCSTR;

use super::{ModuleInfo, ProcessMemory};
use crate::error::{Error, Result};

/// The maximum number of modules we'll enumerate.
const MAX_MODULES: usize = 1024;

/// Direct access to the memory of the process we're loaded into.
#[derive(Debug, Default)]
pub struct HostMemory;

impl HostMemory {
    pub fn new() -> Self {
        Self
    }

    /// Returns the region information for the page holding `address`.
    fn query(address: usize) -> Option<MEMORY_BASIC_INFORMATION> {
        let mut info = MEMORY_BASIC_INFORMATION::default();
        // Safety: VirtualQuery only writes into `info`.
        let written = unsafe {
            VirtualQuery(
                Some(address as *const c_void),
                &mut info,
                mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        (written != 0).then_some(info)
    }

    /// Returns whether every page in `[address, address + len)` is committed
    /// and readable.
    fn is_readable_range(address: usize, len: usize) -> bool {
        let Some(end) = address.checked_add(len) else {
            return false;
        };
        let mut cursor = address;
        while cursor < end.max(address + 1) {
            let Some(info) = Self::query(cursor) else {
                return false;
            };
            if !is_readable(&info) {
                return false;
            }
            let region_end = info.BaseAddress as usize + info.RegionSize;
            if region_end <= cursor {
                return false;
            }
            cursor = region_end;
        }
        true
    }

    /// Converts an [HMODULE] into a [ModuleInfo].
    fn module_info(module: HMODULE, name: String) -> Option<ModuleInfo> {
        let mut info = MODULEINFO::default();
        // Safety: GetModuleInformation only writes into `info`.
        unsafe {
            GetModuleInformation(
                GetCurrentProcess(),
                module,
                &mut info,
                mem::size_of::<MODULEINFO>() as u32,
            )
        }
        .ok()?;
        Some(ModuleInfo {
            name,
            base: info.lpBaseOfDll as usize,
            size: info.SizeOfImage as usize,
        })
    }
}

/// Returns whether `info` describes committed, readable memory.
fn is_readable(info: &MEMORY_BASIC_INFORMATION) -> bool {
    if info.State != MEM_COMMIT {
        return false;
    }
    let protect = info.Protect;
    if protect.0 & (PAGE_GUARD.0 | PAGE_NOACCESS.0) != 0 {
        return false;
    }
    [
        PAGE_READONLY,
        PAGE_READWRITE,
        PAGE_WRITECOPY,
        PAGE_EXECUTE_READ,
        PAGE_EXECUTE_READWRITE,
        PAGE_EXECUTE_WRITECOPY,
    ]
    .iter()
    .any(|flag| protect.0 & flag.0 != 0)
}

impl ProcessMemory for HostMemory {
    fn module(&self, name: &str) -> Option<ModuleInfo> {
        let c_name = CString::new(name).ok()?;
        // Safety: `c_name` outlives the call.
        let module = unsafe { GetModuleHandleA(PCSTR(c_name.as_ptr() as *const u8)) }.ok()?;
        Self::module_info(module, name.to_string())
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        let mut handles = vec![HMODULE::default(); MAX_MODULES];
        let mut needed = 0u32;
        // Safety: the buffer size we pass matches `handles`.
        let listed = unsafe {
            EnumProcessModules(
                GetCurrentProcess(),
                handles.as_mut_ptr(),
                (handles.len() * mem::size_of::<HMODULE>()) as u32,
                &mut needed,
            )
        };
        if let Err(err) = listed {
            warn!("Failed to enumerate modules: {err}");
            return vec![];
        }

        let count = (needed as usize / mem::size_of::<HMODULE>()).min(MAX_MODULES);
        handles[..count]
            .iter()
            .filter_map(|module| {
                let mut name = [0u8; 260];
                // Safety: GetModuleBaseNameA writes at most `name.len()` bytes.
                let len = unsafe {
                    GetModuleBaseNameA(GetCurrentProcess(), Some(*module), &mut name)
                } as usize;
                let name = String::from_utf8_lossy(&name[..len]).into_owned();
                Self::module_info(*module, name)
            })
            .collect()
    }

    fn is_valid_address(&self, address: usize) -> bool {
        Self::query(address).is_some_and(|info| is_readable(&info))
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> Result<()> {
        if !Self::is_readable_range(address, buf.len()) {
            return Err(Error::memory(address, "range is not readable"));
        }
        // Safety: every page in the range was just checked to be readable.
        unsafe {
            std::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write(&self, address: usize, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if !Self::is_valid_address(self, address) {
            return Err(Error::memory(address, "address is not mapped"));
        }

        let mut old = PAGE_PROTECTION_FLAGS::default();
        // Safety: we restore the original protection below.
        unsafe {
            VirtualProtect(
                address as *const c_void,
                data.len(),
                PAGE_EXECUTE_READWRITE,
                &mut old,
            )
        }
        .map_err(|e| Error::memory(address, format!("VirtualProtect failed: {e}")))?;

        // Safety: the range is committed and was just made writable.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), address as *mut u8, data.len());
        }

        let mut ignored = PAGE_PROTECTION_FLAGS::default();
        if let Err(e) =
            unsafe { VirtualProtect(address as *const c_void, data.len(), old, &mut ignored) }
        {
            warn!("Failed to restore protection at {address:#x}: {e}");
        }
        Ok(())
    }
}
