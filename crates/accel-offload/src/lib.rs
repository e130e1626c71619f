//! Synchronous accelerator offload for pipeline stages
//!
//! Hands a fixed-shape numeric computation to a memory-mapped accelerator and returns
//! the result to a host pipeline stage:
//!
//! - **Device Session**: [`DeviceSession`] attaches the device, loads its image,
//!   allocates input/output buffers and programs the configuration registers; released
//!   on teardown or drop
//! - **Offload Executor**: [`OffloadExecutor`] validates input shape, marshals elements
//!   to 64-bit wire words, triggers, polls for completion and marshals results back
//! - **Stage Adapter**: [`OffloadStage`] exposes both through a setup/reshape/forward
//!   lifecycle over [`Blob`]s
//!
//! # Example
//!
//! ```rust
//! use accel_backends::SimulatedDriver;
//! use accel_offload::{Blob, OffloadConfig, OffloadStage};
//!
//! # fn main() -> accel_offload::Result<()> {
//! let config = OffloadConfig::new(vec![1, 4], vec![1, 2], "load mlp.bit");
//! let mut stage = OffloadStage::setup(&config, SimulatedDriver::new())?;
//!
//! let bottom = Blob::new(vec![1, 4], vec![3.0f32, 1.0, 4.0, 1.0])?;
//! let mut top = Blob::zeros(vec![1, 2])?;
//! stage.forward(&bottom, &mut top)?;
//! assert_eq!(top.numel(), 2);
//!
//! stage.teardown()?;
//! # Ok(())
//! # }
//! ```
//!
//! Execution is blocking and single-threaded; the completion poll is the only
//! suspension point. Without a configured `poll.timeout_ms` a device that never
//! signals completion blocks the caller indefinitely.

pub mod config;
pub mod error;
pub mod executor;
pub mod marshal;
pub mod session;
pub mod shape;
pub mod stage;
pub mod wait;

pub use config::{OffloadConfig, OutputAddressPolicy, PollConfig};
pub use error::{Error, ErrorKind, Result, ShapeMismatch};
pub use executor::OffloadExecutor;
pub use marshal::{HostElement, StagingBuffer, U64Wire, WireFormat, WIRE_WIDTH_BYTES};
pub use session::{DeviceSession, SessionState};
pub use shape::Shape;
pub use stage::{Blob, OffloadStage};
pub use wait::{PollStats, SpinPoll, WaitStrategy};
