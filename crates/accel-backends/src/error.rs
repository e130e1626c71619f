//! Error types for driver operations

use crate::driver::RegisterAddr;

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors reported by an accelerator driver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// Operation requires an attached device
    #[error("device is not attached")]
    NotAttached,

    /// Attach called on a device that is already attached
    #[error("device is already attached (image: {0})")]
    AlreadyAttached(String),

    /// Executable image could not be loaded
    #[error("image load failed for `{cmd}`: {reason}")]
    ImageLoad { cmd: String, reason: String },

    /// Accelerator memory allocation failed
    #[error("accelerator allocation of {size} bytes failed: {reason}")]
    AllocationFailed { size: usize, reason: String },

    /// Unknown or already-freed buffer
    #[error("invalid buffer handle: {0:#x}")]
    InvalidBufferHandle(u64),

    /// Host copy does not fit the accelerator buffer
    #[error("buffer access out of bounds: size {size} > buffer size {buffer_size}")]
    BufferOutOfBounds { size: usize, buffer_size: usize },

    /// Register read or write rejected by the device
    #[error("register access at {addr} failed: {reason}")]
    RegisterAccess { addr: RegisterAddr, reason: String },

    /// Transfer between host and accelerator failed
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Create a register access error
    pub fn register(addr: RegisterAddr, reason: impl Into<String>) -> Self {
        Self::RegisterAccess {
            addr,
            reason: reason.into(),
        }
    }

    /// Create a transfer error
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }
}
