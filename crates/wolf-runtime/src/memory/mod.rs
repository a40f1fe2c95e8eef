//! Access to the host process's memory.
//!
//! Everything that touches game memory goes through [ProcessMemory], so the
//! monitor registry and the function table don't care whether they're running
//! inside the game or against a simulated address space.

mod buffer;
#[cfg(windows)]
mod host;
pub mod pattern;

pub use buffer::BufferMemory;
#[cfg(windows)]
pub use host::HostMemory;

use crate::error::Result;

bitflags::bitflags! {
    /// The access rights of a region of memory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        /// The region may be read.
        const READ = 0b001;

        /// The region may be written.
        const WRITE = 0b010;

        /// The region may be executed.
        const EXECUTE = 0b100;
    }
}

/// A module (executable image) mapped into the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// The module's file name, such as `main.dll`.
    pub name: String,

    /// The address the module is loaded at.
    pub base: usize,

    /// The size in bytes of the module's image.
    pub size: usize,
}

impl ModuleInfo {
    /// Returns whether `address` lies within this module's image.
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address - self.base < self.size
    }
}

/// Read and write access to a process's address space.
pub trait ProcessMemory: Send + Sync {
    /// Returns the module named `name`, compared case-insensitively.
    fn module(&self, name: &str) -> Option<ModuleInfo>;

    /// Returns every module in the process. The main executable comes first.
    fn modules(&self) -> Vec<ModuleInfo>;

    /// Returns the base address of the module named `name`.
    fn module_base(&self, name: &str) -> Option<usize> {
        self.module(name).map(|m| m.base)
    }

    /// Returns whether `address` is committed and readable.
    fn is_valid_address(&self, address: usize) -> bool;

    /// Fills `buf` with the bytes starting at `address`.
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` starting at `address`, temporarily lifting page
    /// protection where the backend supports it.
    fn write(&self, address: usize, data: &[u8]) -> Result<()>;

    /// Reads `len` bytes starting at `address` into a new buffer.
    fn read_bytes(&self, address: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read(address, &mut buf)?;
        Ok(buf)
    }
}
