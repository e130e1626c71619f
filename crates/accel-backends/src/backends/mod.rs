//! Driver implementations
//!
//! - `sim` - Software model of the accelerator register map and memory (testing)
//!
//! Hardware drivers live outside this workspace and plug in through
//! [`AcceleratorDriver`](crate::AcceleratorDriver).

pub mod sim;

pub use sim::{SimFault, SimKernel, SimOp, SimProbe, SimulatedDriver};
