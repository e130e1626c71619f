//! Offload stage configuration
//!
//! Parameters come from the host pipeline's configuration. They are plain data here:
//! [`OffloadConfig::validate`] turns them into the [`Shape`]s the session negotiates.
//!
//! ```json
//! {
//!   "input_shape": [1, 4],
//!   "output_shape": [1, 2],
//!   "bitfile_load_cmd": "fpga-load /opt/bitfiles/mlp.bit",
//!   "poll": { "interval_us": 1, "timeout_ms": null },
//!   "output_address": "mirror_input"
//! }
//! ```

use crate::error::{Error, Result};
use crate::shape::Shape;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Value programmed into the output-address register at setup
///
/// The firmware contract this stage was written against takes the *input* buffer
/// address in both address slots. [`OutputBuffer`](Self::OutputBuffer) programs the
/// output buffer's own address instead, for firmware that reads its destination from
/// that slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputAddressPolicy {
    /// Input buffer address in both 0x10 and 0x1c
    #[default]
    MirrorInput,
    /// Output buffer address in 0x1c
    OutputBuffer,
}

/// Completion polling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Sleep between status reads, in microseconds. Zero spins without sleeping.
    pub interval_us: u64,
    /// Give up after this many milliseconds. `None` waits forever.
    pub timeout_ms: Option<u64>,
}

impl PollConfig {
    /// Sleep between status reads
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us)
    }

    /// Optional completion deadline
    pub fn deadline(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_us: 1,
            timeout_ms: None,
        }
    }
}

/// Offload stage parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OffloadConfig {
    /// Negotiated input dimensions
    pub input_shape: Vec<usize>,
    /// Negotiated output dimensions
    pub output_shape: Vec<usize>,
    /// Command that loads the device executable image
    pub bitfile_load_cmd: String,
    /// 8-bit input transfers (not supported)
    #[serde(default)]
    pub use_8bit_input: bool,
    /// 8-bit output transfers (not supported)
    #[serde(default)]
    pub use_8bit_output: bool,
    /// Completion polling
    #[serde(default)]
    pub poll: PollConfig,
    /// What goes into the output-address register
    #[serde(default)]
    pub output_address: OutputAddressPolicy,
}

impl OffloadConfig {
    /// Configuration with default polling and output-address policy
    pub fn new(input_shape: Vec<usize>, output_shape: Vec<usize>, bitfile_load_cmd: impl Into<String>) -> Self {
        Self {
            input_shape,
            output_shape,
            bitfile_load_cmd: bitfile_load_cmd.into(),
            use_8bit_input: false,
            use_8bit_output: false,
            poll: PollConfig::default(),
            output_address: OutputAddressPolicy::default(),
        }
    }

    /// Set the polling parameters
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Set the output-address register policy
    pub fn with_output_address(mut self, policy: OutputAddressPolicy) -> Self {
        self.output_address = policy;
        self
    }

    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check the parameters and build the negotiated (input, output) shapes
    ///
    /// # Errors
    ///
    /// - `NotImplemented` if a narrow precision mode is requested
    /// - `Configuration` for an empty load command or an invalid shape
    pub fn validate(&self) -> Result<(Shape, Shape)> {
        if self.use_8bit_input || self.use_8bit_output {
            return Err(Error::not_implemented(
                "8-bit transfers are disabled; only 64-bit wire elements are supported",
            ));
        }
        if self.bitfile_load_cmd.trim().is_empty() {
            return Err(Error::configuration("bitfile_load_cmd must not be empty"));
        }

        let input = Shape::new(self.input_shape.clone())
            .map_err(|e| Error::configuration(format!("input_shape: {e}")))?;
        let output = Shape::new(self.output_shape.clone())
            .map_err(|e| Error::configuration(format!("output_shape: {e}")))?;

        Ok((input, output))
    }
}
