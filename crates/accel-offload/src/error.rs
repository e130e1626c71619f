//! Error types for offload operations

use crate::session::SessionState;
use accel_backends::DriverError;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for offload operations
pub type Result<T> = std::result::Result<T, Error>;

/// Input shape that does not match the negotiated one
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeMismatch {
    /// Different number of dimensions
    #[error("expected {expected} dimensions, got {actual}")]
    Rank { expected: usize, actual: usize },

    /// First differing dimension
    #[error("dimension {axis}: expected {expected}, got {actual}")]
    Dim { axis: usize, expected: usize, actual: usize },

    /// Flat element sequence of the wrong length
    #[error("expected {expected} elements, got {actual}")]
    Elements { expected: usize, actual: usize },
}

/// Broad category of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Setup could not complete; the stage is unusable
    Configuration,
    /// Caller supplied data of the wrong shape
    ShapeMismatch,
    /// Driver failure during an invocation; device state is unreliable
    DeviceIo,
    /// Requested capability deliberately not provided
    NotImplemented,
    /// Completion deadline exceeded
    Timeout,
    /// Operation issued in the wrong session state
    InvalidState,
}

/// Errors that can occur while setting up or running an offload
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Driver failure while bringing the device up
    #[error("Device setup failed at {step}: {source}")]
    DeviceSetup {
        step: &'static str,
        #[source]
        source: DriverError,
    },

    /// Configuration document could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Configuration file could not be read
    #[error("Failed to read configuration {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input does not conform to the negotiated shape
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(#[from] ShapeMismatch),

    /// Driver failure during an invocation or teardown
    #[error("Device I/O error during {op}: {source}")]
    DeviceIo {
        op: &'static str,
        #[source]
        source: DriverError,
    },

    /// Device did not signal completion before the configured deadline
    #[error("Device did not complete after {polls} polls ({elapsed:?})")]
    DeviceTimeout { polls: u64, elapsed: Duration },

    /// Capability not supported
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Session is not in the state the operation needs
    #[error("Invalid session state: expected {expected:?}, got {actual:?}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a not-implemented error
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::DeviceSetup { .. } | Self::ConfigParse(_) | Self::ConfigRead { .. } => {
                ErrorKind::Configuration
            }
            Self::ShapeMismatch(_) => ErrorKind::ShapeMismatch,
            Self::DeviceIo { .. } => ErrorKind::DeviceIo,
            Self::DeviceTimeout { .. } => ErrorKind::Timeout,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }
}
