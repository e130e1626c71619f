//! Driver trait for accelerator access
//!
//! This trait is the whole surface the offload core consumes from a device driver.
//! Implementations wrap a real platform driver (register file mapped into the process,
//! DMA-capable buffer allocator) or a software model such as
//! [`SimulatedDriver`](crate::SimulatedDriver).

use super::types::{BufferHandle, RegisterAddr};
use crate::error::Result;

/// Accelerator driver: attach/detach, buffer lifecycle, register access and
/// host↔device copies
///
/// # Protocol
///
/// ```text
/// attach(image)
///   alloc_buffer × N
///   write_register / write_register_64      (one-time configuration)
///   ┌───────────────────────────────────┐
///   │ copy_host_to_device               │
///   │ write_register(CONTROL, START)    │  per invocation
///   │ read_register(CONTROL) until DONE │
///   │ copy_device_to_host               │
///   └───────────────────────────────────┘
///   free_buffer × N
/// detach()
/// ```
///
/// All methods take `&mut self`: a driver is an exclusively owned resource, and even
/// register reads may have side effects on the device.
pub trait AcceleratorDriver {
    /// Open the device and run the executable image load command
    ///
    /// # Errors
    ///
    /// Returns an error if the device is already attached or the image fails to load.
    fn attach(&mut self, image_load_cmd: &str) -> Result<()>;

    /// Release the device
    fn detach(&mut self) -> Result<()>;

    /// Whether [`attach`](Self::attach) has succeeded and no detach has happened since
    fn is_attached(&self) -> bool;

    /// Allocate an accelerator buffer of `size` bytes
    fn alloc_buffer(&mut self, size: usize) -> Result<BufferHandle>;

    /// Free a buffer returned by [`alloc_buffer`](Self::alloc_buffer)
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown or was already freed.
    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Write a 32-bit register
    fn write_register(&mut self, addr: RegisterAddr, value: u32) -> Result<()>;

    /// Write a 64-bit register
    fn write_register_64(&mut self, addr: RegisterAddr, value: u64) -> Result<()>;

    /// Read a 32-bit register
    fn read_register(&mut self, addr: RegisterAddr) -> Result<u32>;

    /// Copy `data` into the start of an accelerator buffer
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is invalid or `data` exceeds the buffer size.
    fn copy_host_to_device(&mut self, data: &[u8], handle: BufferHandle) -> Result<()>;

    /// Copy the start of an accelerator buffer into `data`
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is invalid or `data` exceeds the buffer size.
    fn copy_device_to_host(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()>;
}

impl<D: AcceleratorDriver + ?Sized> AcceleratorDriver for Box<D> {
    fn attach(&mut self, image_load_cmd: &str) -> Result<()> {
        (**self).attach(image_load_cmd)
    }

    fn detach(&mut self) -> Result<()> {
        (**self).detach()
    }

    fn is_attached(&self) -> bool {
        (**self).is_attached()
    }

    fn alloc_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        (**self).alloc_buffer(size)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        (**self).free_buffer(handle)
    }

    fn write_register(&mut self, addr: RegisterAddr, value: u32) -> Result<()> {
        (**self).write_register(addr, value)
    }

    fn write_register_64(&mut self, addr: RegisterAddr, value: u64) -> Result<()> {
        (**self).write_register_64(addr, value)
    }

    fn read_register(&mut self, addr: RegisterAddr) -> Result<u32> {
        (**self).read_register(addr)
    }

    fn copy_host_to_device(&mut self, data: &[u8], handle: BufferHandle) -> Result<()> {
        (**self).copy_host_to_device(data, handle)
    }

    fn copy_device_to_host(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        (**self).copy_device_to_host(handle, data)
    }
}
