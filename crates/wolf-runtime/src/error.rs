use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Module not loaded: {0}")]
    ModuleNotFound(String),

    #[error("Failed to access memory at address {address:#x}: {message}")]
    MemoryAccess { address: usize, message: String },

    #[error("Invalid pattern: {0}")]
    Pattern(String),

    #[error("Bit {bit} is outside a {len}-byte bitfield")]
    BitOutOfRange { bit: u32, len: usize },

    #[error("The runtime API has already been installed")]
    AlreadyInstalled,

    #[error("Function at {0:#x} is already hooked")]
    AlreadyHooked(usize),

    #[error("Hooking failed: {0}")]
    Hook(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a [Error::MemoryAccess] for `address`.
    pub fn memory(address: usize, message: impl Into<String>) -> Self {
        Error::MemoryAccess {
            address,
            message: message.into(),
        }
    }

    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(Error::Io(io_err).is_not_found());

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!Error::Io(other).is_not_found());
        assert!(!Error::NotFound("x".into()).is_not_found());
    }

    #[test]
    fn test_memory_error_message() {
        let err = Error::memory(0x1000, "unmapped");
        assert_eq!(
            err.to_string(),
            "Failed to access memory at address 0x1000: unmapped"
        );
    }
}
