use std::sync::RwLock;

use super::{ModuleInfo, ProcessMemory, Protection};
use crate::error::{Error, Result};

/// A contiguous run of simulated memory.
#[derive(Debug)]
struct Region {
    base: usize,
    data: Vec<u8>,
    protection: Protection,
}

impl Region {
    /// Returns the offset of `[address, address + len)` within this region if
    /// the whole span fits.
    fn offset_of(&self, address: usize, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.base)?;
        let end = offset.checked_add(len)?;
        (end <= self.data.len()).then_some(offset)
    }
}

/// An in-process stand-in for a game's address space, built from regions of
/// plain bytes. Used to drive the runtime without a live game, most notably in
/// tests.
#[derive(Debug, Default)]
pub struct BufferMemory {
    regions: RwLock<Vec<Region>>,
    modules: RwLock<Vec<ModuleInfo>>,
}

impl BufferMemory {
    pub fn new() -> Self {
        Default::default()
    }

    /// Maps `data` at `base` with the given protection.
    pub fn map(&self, base: usize, data: impl Into<Vec<u8>>, protection: Protection) {
        if let Ok(mut regions) = self.regions.write() {
            regions.push(Region {
                base,
                data: data.into(),
                protection,
            });
        }
    }

    /// Maps a zero-filled module image named `name`. The image is readable,
    /// writable and executable, like a module whose data section we poke at.
    pub fn map_module(&self, name: impl Into<String>, base: usize, size: usize) {
        self.map(base, vec![0; size], Protection::all());
        if let Ok(mut modules) = self.modules.write() {
            modules.push(ModuleInfo {
                name: name.into(),
                base,
                size,
            });
        }
    }

    /// Builder-style variant of [map](Self::map).
    pub fn with_region(self, base: usize, data: impl Into<Vec<u8>>, protection: Protection) -> Self {
        self.map(base, data, protection);
        self
    }

    /// Builder-style variant of [map_module](Self::map_module).
    pub fn with_module(self, name: impl Into<String>, base: usize, size: usize) -> Self {
        self.map_module(name, base, size);
        self
    }

    /// Runs `f` against the region holding `[address, address + len)`.
    fn with_region_for<T>(
        &self,
        address: usize,
        len: usize,
        required: Protection,
        f: impl FnOnce(&mut Region, usize) -> T,
    ) -> Result<T> {
        let mut regions = self
            .regions
            .write()
            .map_err(|_| Error::memory(address, "memory map lock poisoned"))?;
        let Some((region, offset)) = regions
            .iter_mut()
            .find_map(|r| r.offset_of(address, len).map(|o| (r, o)))
        else {
            return Err(Error::memory(address, format!("{len} bytes are not mapped")));
        };
        if !region.protection.contains(required) {
            return Err(Error::memory(
                address,
                format!("region is {:?}, needs {:?}", region.protection, required),
            ));
        }
        Ok(f(region, offset))
    }
}

impl ProcessMemory for BufferMemory {
    fn module(&self, name: &str) -> Option<ModuleInfo> {
        self.modules
            .read()
            .ok()?
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        self.modules
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn is_valid_address(&self, address: usize) -> bool {
        self.regions.read().is_ok_and(|regions| {
            regions.iter().any(|r| {
                r.offset_of(address, 1).is_some() && r.protection.contains(Protection::READ)
            })
        })
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        self.with_region_for(address, len, Protection::READ, |region, offset| {
            buf.copy_from_slice(&region.data[offset..offset + len]);
        })
    }

    fn write(&self, address: usize, data: &[u8]) -> Result<()> {
        self.with_region_for(address, data.len(), Protection::WRITE, |region, offset| {
            region.data[offset..offset + data.len()].copy_from_slice(data);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_roundtrip_within_region() {
        let memory =
            BufferMemory::new().with_region(0x1000, vec![0; 16], Protection::READ | Protection::WRITE);
        memory.write(0x1004, &[1, 2, 3]).unwrap();
        assert_eq!(memory.read_bytes(0x1003, 5).unwrap(), vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_read_across_region_end_fails() {
        let memory = BufferMemory::new().with_region(0x1000, vec![0; 16], Protection::READ);
        assert!(memory.read_bytes(0x100C, 8).is_err());
        assert!(memory.read_bytes(0x0FFF, 1).is_err());
    }

    #[test]
    fn test_protection_is_enforced() {
        let memory = BufferMemory::new()
            .with_region(0x1000, vec![7; 4], Protection::READ)
            .with_region(0x2000, vec![7; 4], Protection::WRITE);
        assert!(memory.write(0x1000, &[0]).is_err());
        assert!(memory.read_bytes(0x2000, 1).is_err());
        assert!(memory.is_valid_address(0x1003));
        assert!(!memory.is_valid_address(0x2000));
        assert!(!memory.is_valid_address(0x1004));
    }

    #[test]
    fn test_module_lookup_is_case_insensitive() {
        let memory = BufferMemory::new().with_module("main.dll", 0x4000_0000, 0x100);
        assert_eq!(memory.module_base("MAIN.DLL"), Some(0x4000_0000));
        assert_eq!(memory.module_base("other.dll"), None);
        assert!(memory.modules()[0].contains(0x4000_00FF));
        assert!(!memory.modules()[0].contains(0x4000_0100));
    }
}
