//! Accelerator memory model for the simulated device
//!
//! Buffers are heap allocations keyed by a fake device address. Addresses start at
//! [`DEVICE_MEMORY_BASE`] and are page aligned, so no two live buffers overlap and a
//! freed address is never handed out again.

use crate::driver::BufferHandle;
use crate::error::{DriverError, Result};
use std::collections::HashMap;

/// First device address handed out by the allocator
pub const DEVICE_MEMORY_BASE: u64 = 0x1000_0000;

/// Allocation granularity of the simulated device
pub const DEVICE_PAGE_SIZE: u64 = 4096;

/// Simulated accelerator memory
#[derive(Debug)]
pub struct DeviceMemory {
    /// Live buffers (address -> contents)
    buffers: HashMap<u64, Vec<u8>>,

    /// Next free device address
    next_address: u64,
}

impl DeviceMemory {
    /// Create an empty memory model
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_address: DEVICE_MEMORY_BASE,
        }
    }

    /// Allocate a zero-filled buffer
    pub fn allocate(&mut self, size: usize) -> Result<BufferHandle> {
        let pages = (size as u64).div_ceil(DEVICE_PAGE_SIZE).max(1);
        let span = pages
            .checked_mul(DEVICE_PAGE_SIZE)
            .and_then(|span| self.next_address.checked_add(span))
            .ok_or_else(|| DriverError::AllocationFailed {
                size,
                reason: "device address space exhausted".to_string(),
            })?;

        let handle = BufferHandle::new(self.next_address);
        self.next_address = span;
        self.buffers.insert(handle.address(), vec![0u8; size]);

        Ok(handle)
    }

    /// Free a buffer
    pub fn free(&mut self, handle: BufferHandle) -> Result<()> {
        self.buffers
            .remove(&handle.address())
            .map(|_| ())
            .ok_or(DriverError::InvalidBufferHandle(handle.address()))
    }

    /// Buffer size in bytes
    pub fn size(&self, handle: BufferHandle) -> Result<usize> {
        self.buffer(handle.address()).map(Vec::len)
    }

    /// Number of live buffers
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Copy host bytes into the start of a buffer
    pub fn write(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&handle.address())
            .ok_or(DriverError::InvalidBufferHandle(handle.address()))?;

        if data.len() > buffer.len() {
            return Err(DriverError::BufferOutOfBounds {
                size: data.len(),
                buffer_size: buffer.len(),
            });
        }

        buffer[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy the start of a buffer into host bytes
    pub fn read(&self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        let buffer = self.buffer(handle.address())?;

        if data.len() > buffer.len() {
            return Err(DriverError::BufferOutOfBounds {
                size: data.len(),
                buffer_size: buffer.len(),
            });
        }

        data.copy_from_slice(&buffer[..data.len()]);
        Ok(())
    }

    /// Read a whole buffer as native-endian 64-bit words
    ///
    /// Trailing bytes that do not fill a word are ignored.
    pub fn read_words(&self, address: u64) -> Result<Vec<u64>> {
        let buffer = self.buffer(address)?;
        Ok(bytemuck::pod_collect_to_vec(&buffer[..whole_words(buffer.len())]))
    }

    /// Overwrite a buffer with native-endian 64-bit words
    ///
    /// Words past the end of the buffer are dropped; a trailing partial word is left as is.
    pub fn write_words(&mut self, address: u64, words: &[u64]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&address)
            .ok_or(DriverError::InvalidBufferHandle(address))?;

        let bytes: &[u8] = bytemuck::cast_slice(words);
        let len = bytes.len().min(whole_words(buffer.len()));
        buffer[..len].copy_from_slice(&bytes[..len]);
        Ok(())
    }

    fn buffer(&self, address: u64) -> Result<&Vec<u8>> {
        self.buffers
            .get(&address)
            .ok_or(DriverError::InvalidBufferHandle(address))
    }
}

/// Byte length of the whole 64-bit words in `len` bytes
fn whole_words(len: usize) -> usize {
    len - len % std::mem::size_of::<u64>()
}

impl Default for DeviceMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_page_aligned_and_disjoint() {
        let mut memory = DeviceMemory::new();

        let a = memory.allocate(10).unwrap();
        let b = memory.allocate(DEVICE_PAGE_SIZE as usize + 1).unwrap();
        let c = memory.allocate(0).unwrap();

        assert_eq!(a.address(), DEVICE_MEMORY_BASE);
        assert_eq!(b.address(), DEVICE_MEMORY_BASE + DEVICE_PAGE_SIZE);
        assert_eq!(c.address(), DEVICE_MEMORY_BASE + 3 * DEVICE_PAGE_SIZE);
        assert_eq!(memory.size(b).unwrap(), DEVICE_PAGE_SIZE as usize + 1);
        assert_eq!(memory.live_buffers(), 3);
    }

    #[test]
    fn test_free_twice_is_rejected() {
        let mut memory = DeviceMemory::new();
        let handle = memory.allocate(64).unwrap();

        memory.free(handle).unwrap();
        assert_eq!(
            memory.free(handle),
            Err(DriverError::InvalidBufferHandle(handle.address()))
        );
        assert_eq!(memory.live_buffers(), 0);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut memory = DeviceMemory::new();
        let handle = memory.allocate(64).unwrap();

        let data = b"accelerator scratch";
        memory.write(handle, data).unwrap();

        let mut result = vec![0u8; data.len()];
        memory.read(handle, &mut result).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_oversized_copies_are_rejected() {
        let mut memory = DeviceMemory::new();
        let handle = memory.allocate(16).unwrap();

        assert!(matches!(
            memory.write(handle, &[0u8; 32]),
            Err(DriverError::BufferOutOfBounds { size: 32, buffer_size: 16 })
        ));

        let mut too_big = [0u8; 17];
        assert!(memory.read(handle, &mut too_big).is_err());
    }

    #[test]
    fn test_word_access() {
        let mut memory = DeviceMemory::new();
        let handle = memory.allocate(24).unwrap();

        memory.write_words(handle.address(), &[7, 8, 9]).unwrap();
        assert_eq!(memory.read_words(handle.address()).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_word_access_ignores_partial_tail() {
        let mut memory = DeviceMemory::new();
        let handle = memory.allocate(20).unwrap();
        memory.write(handle, &[0xffu8; 20]).unwrap();

        memory.write_words(handle.address(), &[1, 2, 3]).unwrap();
        assert_eq!(memory.read_words(handle.address()).unwrap(), vec![1, 2]);

        let mut tail = [0u8; 20];
        memory.read(handle, &mut tail).unwrap();
        assert_eq!(&tail[16..], &[0xff; 4]);
    }
}
