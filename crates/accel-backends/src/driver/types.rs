//! Handle and address types shared by drivers

use std::fmt;

/// Handle to an accelerator-side buffer
///
/// The wrapped value is the device-visible address of the buffer, which is what gets
/// programmed into the address registers. Host code never dereferences it; data moves
/// only through the driver's copy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Create a new buffer handle from a device address
    pub const fn new(address: u64) -> Self {
        BufferHandle(address)
    }

    /// Device-visible address
    pub const fn address(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accel@{:#x}", self.0)
    }
}

/// Byte offset of a memory-mapped control register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterAddr(pub u32);

impl RegisterAddr {
    /// Create a register address
    pub const fn new(offset: u32) -> Self {
        RegisterAddr(offset)
    }

    /// Byte offset within the register file
    pub const fn offset(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RegisterAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}
