//! Driver boundary for memory-mapped accelerator offload
//!
//! This crate provides:
//! - **Driver Trait**: [`AcceleratorDriver`], the register-poke + buffer-copy interface a
//!   device driver exposes to the offload core
//! - **Register Map**: fixed control/status/address offsets ([`regs`])
//! - **Simulated Device**: [`SimulatedDriver`], a software model of the register map and
//!   accelerator memory for deterministic testing without hardware
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 accel-offload (core)                     │
//! │        DeviceSession · OffloadExecutor · Stage           │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │  AcceleratorDriver
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//!   ┌───────────┐              ┌─────────────┐
//!   │ Simulated │              │ FPGA driver │
//!   │  Device   │              │  (external) │
//!   └───────────┘              └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use accel_backends::{regs, AcceleratorDriver, SimulatedDriver};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut driver = SimulatedDriver::new();
//! driver.attach("load-bitfile passthrough.bit")?;
//!
//! let buffer = driver.alloc_buffer(32)?;
//! driver.write_register_64(regs::INPUT_ADDR, buffer.address())?;
//! driver.copy_host_to_device(bytemuck::cast_slice(&[1u64, 2, 3, 4]), buffer)?;
//!
//! driver.free_buffer(buffer)?;
//! driver.detach()?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod driver;
pub mod error;
pub mod regs;

pub use backends::{SimFault, SimKernel, SimOp, SimProbe, SimulatedDriver};
pub use driver::{AcceleratorDriver, BufferHandle, RegisterAddr};
pub use error::{DriverError, Result};
