//! Simulated accelerator
//!
//! Software model of the offload device: a register file with the layout in
//! [`regs`](crate::regs), page-aligned device memory, and a kernel closure that stands in
//! for the loaded executable image.
//!
//! # Device Model
//!
//! ```text
//! write CONTROL ← START
//!   ├── input  = words of buffer at INPUT_ADDR
//!   ├── kernel(input, output)
//!   ├── output → buffer at OUTPUT_ADDR
//!   └── DONE clears; set again after `completion_latency` status reads
//! ```
//!
//! The kernel writes wherever `OUTPUT_ADDR` points. If the host programs the input
//! address into that slot, results land in the input buffer.
//!
//! # Usage
//!
//! ```rust
//! use accel_backends::{regs, AcceleratorDriver, SimulatedDriver};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut driver = SimulatedDriver::new().with_completion_latency(2);
//! let probe = driver.probe();
//!
//! driver.attach("load passthrough.bit")?;
//! let input = driver.alloc_buffer(32)?;
//! let output = driver.alloc_buffer(16)?;
//! driver.write_register_64(regs::INPUT_ADDR, input.address())?;
//! driver.write_register_64(regs::OUTPUT_ADDR, output.address())?;
//! driver.copy_host_to_device(bytemuck::cast_slice(&[3u64, 1, 4, 1]), input)?;
//!
//! driver.write_register(regs::CONTROL, regs::START)?;
//! while driver.read_register(regs::CONTROL)? & regs::DONE_MASK == 0 {}
//!
//! assert_eq!(probe.status_reads(), 3);
//! assert_eq!(probe.buffer_words(output), Some(vec![7, 2]));
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::{DeviceMemory, DEVICE_MEMORY_BASE, DEVICE_PAGE_SIZE};

use crate::driver::{AcceleratorDriver, BufferHandle, RegisterAddr};
use crate::error::{DriverError, Result};
use crate::regs;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Computation run by the simulated device on each trigger
///
/// Receives the words of the input buffer and the (zeroed) words of the output buffer.
pub type SimKernel = Box<dyn FnMut(&[u64], &mut [u64]) + Send>;

/// Status reads before the completion bit appears, unless configured otherwise
pub const DEFAULT_COMPLETION_LATENCY: u32 = 3;

/// Operation that the simulated device can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Image load fails
    Attach,
    /// The `nth` allocation attempt (1-based) fails
    Alloc { nth: usize },
    /// Writes to this register fail
    WriteRegister(RegisterAddr),
    /// Reads of this register fail
    ReadRegister(RegisterAddr),
    /// Host-to-device copies fail
    CopyToDevice,
    /// Device-to-host copies fail
    CopyFromDevice,
}

/// Driver call observed by the simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOp {
    Attach(String),
    Detach,
    Alloc { address: u64, size: usize },
    Free { address: u64 },
    WriteRegister { addr: RegisterAddr, value: u64 },
    ReadRegister { addr: RegisterAddr, value: u32 },
    CopyToDevice { address: u64, len: usize },
    CopyFromDevice { address: u64, len: usize },
}

/// Internal device state, shared between the driver and its probes
struct SimDevice {
    memory: DeviceMemory,
    registers: HashMap<RegisterAddr, u64>,
    image: Option<String>,
    kernel: SimKernel,
    /// `None` means the device never signals completion
    completion_latency: Option<u32>,
    /// Status reads left before DONE while a run is in flight; stays `None` for a
    /// device that never completes
    pending_reads: Option<u32>,
    done: bool,
    faults: Vec<SimFault>,
    log: Vec<SimOp>,
    alloc_attempts: usize,
    allocs: usize,
    frees: usize,
    executions: usize,
    status_reads: usize,
}

impl SimDevice {
    fn new() -> Self {
        Self {
            memory: DeviceMemory::new(),
            registers: HashMap::new(),
            image: None,
            kernel: Box::new(fold_kernel),
            completion_latency: Some(DEFAULT_COMPLETION_LATENCY),
            pending_reads: None,
            done: false,
            faults: Vec::new(),
            log: Vec::new(),
            alloc_attempts: 0,
            allocs: 0,
            frees: 0,
            executions: 0,
            status_reads: 0,
        }
    }

    fn has_fault(&self, fault: SimFault) -> bool {
        self.faults.contains(&fault)
    }

    fn require_attached(&self) -> Result<()> {
        if self.image.is_some() {
            Ok(())
        } else {
            Err(DriverError::NotAttached)
        }
    }

    fn write_register(&mut self, addr: RegisterAddr, value: u64) -> Result<()> {
        self.require_attached()?;
        if self.has_fault(SimFault::WriteRegister(addr)) {
            return Err(DriverError::register(addr, "injected write fault"));
        }

        self.log.push(SimOp::WriteRegister { addr, value });
        self.registers.insert(addr, value);

        if addr == regs::CONTROL && value & u64::from(regs::START) != 0 {
            self.run()?;
        }
        Ok(())
    }

    fn read_register(&mut self, addr: RegisterAddr) -> Result<u32> {
        self.require_attached()?;
        if self.has_fault(SimFault::ReadRegister(addr)) {
            return Err(DriverError::register(addr, "injected read fault"));
        }

        let value = if addr == regs::CONTROL {
            self.status_reads += 1;
            self.poll_status()
        } else {
            // 32-bit view of the register
            self.registers.get(&addr).copied().unwrap_or(0) as u32
        };

        self.log.push(SimOp::ReadRegister { addr, value });
        Ok(value)
    }

    fn poll_status(&mut self) -> u32 {
        if let Some(left) = self.pending_reads {
            if left == 0 {
                self.pending_reads = None;
                self.done = true;
            } else {
                self.pending_reads = Some(left - 1);
            }
        }

        if self.done {
            regs::DONE_MASK
        } else {
            0
        }
    }

    fn run(&mut self) -> Result<()> {
        let input_addr = self.address_register(regs::INPUT_ADDR)?;
        let output_addr = self.address_register(regs::OUTPUT_ADDR)?;

        let input = self.memory.read_words(input_addr)?;
        let mut output = vec![0u64; self.memory.read_words(output_addr)?.len()];
        (self.kernel)(&input, &mut output);
        self.memory.write_words(output_addr, &output)?;

        self.executions += 1;
        self.done = false;
        self.pending_reads = self.completion_latency;

        tracing::trace!(
            input = %BufferHandle::new(input_addr),
            output = %BufferHandle::new(output_addr),
            input_words = input.len(),
            output_words = output.len(),
            "sim_execution_started"
        );
        Ok(())
    }

    fn address_register(&self, addr: RegisterAddr) -> Result<u64> {
        self.registers
            .get(&addr)
            .copied()
            .ok_or_else(|| DriverError::register(addr, "buffer address not programmed"))
    }
}

/// Default image behaviour: output word `j` is the wrapping sum of every input word
/// `i` with `i % output.len() == j`
fn fold_kernel(input: &[u64], output: &mut [u64]) {
    if output.is_empty() {
        return;
    }
    let len = output.len();
    for (i, word) in input.iter().enumerate() {
        output[i % len] = output[i % len].wrapping_add(*word);
    }
}

/// Software model of the accelerator
///
/// Cloning is not supported; use [`probe`](Self::probe) to observe the device from
/// tests while the driver itself is owned by a session.
pub struct SimulatedDriver {
    device: Arc<Mutex<SimDevice>>,
}

impl SimulatedDriver {
    /// Create a simulated device running the fold kernel with the default latency
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(SimDevice::new())),
        }
    }

    /// Number of status reads that return busy before completion is signalled
    pub fn with_completion_latency(self, reads: u32) -> Self {
        self.device.lock().completion_latency = Some(reads);
        self
    }

    /// Device that starts runs but never raises the completion bit
    pub fn never_completes(self) -> Self {
        self.device.lock().completion_latency = None;
        self
    }

    /// Replace the executable image behaviour
    pub fn with_kernel<K>(self, kernel: K) -> Self
    where
        K: FnMut(&[u64], &mut [u64]) + Send + 'static,
    {
        self.device.lock().kernel = Box::new(kernel);
        self
    }

    /// Make an operation fail
    pub fn with_fault(self, fault: SimFault) -> Self {
        self.device.lock().faults.push(fault);
        self
    }

    /// Observer sharing this device's state
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            device: Arc::clone(&self.device),
        }
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimulatedDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = self.device.lock();
        f.debug_struct("SimulatedDriver")
            .field("image", &device.image)
            .field("live_buffers", &device.memory.live_buffers())
            .field("executions", &device.executions)
            .finish()
    }
}

impl AcceleratorDriver for SimulatedDriver {
    fn attach(&mut self, image_load_cmd: &str) -> Result<()> {
        let mut device = self.device.lock();
        if let Some(image) = &device.image {
            return Err(DriverError::AlreadyAttached(image.clone()));
        }
        if image_load_cmd.trim().is_empty() {
            return Err(DriverError::ImageLoad {
                cmd: image_load_cmd.to_string(),
                reason: "empty load command".to_string(),
            });
        }
        if device.has_fault(SimFault::Attach) {
            return Err(DriverError::ImageLoad {
                cmd: image_load_cmd.to_string(),
                reason: "injected attach fault".to_string(),
            });
        }

        device.image = Some(image_load_cmd.to_string());
        device.log.push(SimOp::Attach(image_load_cmd.to_string()));
        tracing::debug!(image = image_load_cmd, "sim_attached");
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        let mut device = self.device.lock();
        device.require_attached()?;
        device.image = None;
        device.registers.clear();
        device.pending_reads = None;
        device.done = false;
        device.log.push(SimOp::Detach);
        tracing::debug!("sim_detached");
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.device.lock().image.is_some()
    }

    fn alloc_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        let mut device = self.device.lock();
        device.require_attached()?;

        device.alloc_attempts += 1;
        let nth = device.alloc_attempts;
        if device.has_fault(SimFault::Alloc { nth }) {
            return Err(DriverError::AllocationFailed {
                size,
                reason: format!("injected fault on allocation #{nth}"),
            });
        }

        let handle = device.memory.allocate(size)?;
        device.allocs += 1;
        device.log.push(SimOp::Alloc {
            address: handle.address(),
            size,
        });
        Ok(handle)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        let mut device = self.device.lock();
        device.memory.free(handle)?;
        device.frees += 1;
        device.log.push(SimOp::Free {
            address: handle.address(),
        });
        Ok(())
    }

    fn write_register(&mut self, addr: RegisterAddr, value: u32) -> Result<()> {
        self.device.lock().write_register(addr, u64::from(value))
    }

    fn write_register_64(&mut self, addr: RegisterAddr, value: u64) -> Result<()> {
        self.device.lock().write_register(addr, value)
    }

    fn read_register(&mut self, addr: RegisterAddr) -> Result<u32> {
        self.device.lock().read_register(addr)
    }

    fn copy_host_to_device(&mut self, data: &[u8], handle: BufferHandle) -> Result<()> {
        let mut device = self.device.lock();
        device.require_attached()?;
        if device.has_fault(SimFault::CopyToDevice) {
            return Err(DriverError::transfer("injected host-to-device fault"));
        }

        device.memory.write(handle, data)?;
        device.log.push(SimOp::CopyToDevice {
            address: handle.address(),
            len: data.len(),
        });
        Ok(())
    }

    fn copy_device_to_host(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        let mut device = self.device.lock();
        device.require_attached()?;
        if device.has_fault(SimFault::CopyFromDevice) {
            return Err(DriverError::transfer("injected device-to-host fault"));
        }

        device.memory.read(handle, data)?;
        device.log.push(SimOp::CopyFromDevice {
            address: handle.address(),
            len: data.len(),
        });
        Ok(())
    }
}

/// Read-only view of a [`SimulatedDriver`]'s state
#[derive(Clone)]
pub struct SimProbe {
    device: Arc<Mutex<SimDevice>>,
}

impl SimProbe {
    /// Successful allocations so far
    pub fn alloc_count(&self) -> usize {
        self.device.lock().allocs
    }

    /// Successful frees so far
    pub fn free_count(&self) -> usize {
        self.device.lock().frees
    }

    /// Buffers currently allocated
    pub fn live_buffers(&self) -> usize {
        self.device.lock().memory.live_buffers()
    }

    /// Reads of the control/status register
    pub fn status_reads(&self) -> usize {
        self.device.lock().status_reads
    }

    /// Kernel runs started
    pub fn executions(&self) -> usize {
        self.device.lock().executions
    }

    /// Loaded image, if attached
    pub fn attached_image(&self) -> Option<String> {
        self.device.lock().image.clone()
    }

    /// Last value written to a register since attach
    pub fn register(&self, addr: RegisterAddr) -> Option<u64> {
        self.device.lock().registers.get(&addr).copied()
    }

    /// Contents of a live buffer as 64-bit words
    pub fn buffer_words(&self, handle: BufferHandle) -> Option<Vec<u64>> {
        self.device.lock().memory.read_words(handle.address()).ok()
    }

    /// Every driver call observed, in order
    pub fn ops(&self) -> Vec<SimOp> {
        self.device.lock().log.clone()
    }
}

impl fmt::Debug for SimProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimProbe")
            .field("allocs", &self.alloc_count())
            .field("frees", &self.free_count())
            .field("executions", &self.executions())
            .finish()
    }
}
