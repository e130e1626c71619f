//! Host ↔ wire element conversion
//!
//! Every element crosses the host/device boundary as a 64-bit unsigned word, whatever
//! the host's numeric type. [`WireFormat`] is the seam for narrower encodings; the only
//! implementation today is [`U64Wire`].
//!
//! Conversions use Rust `as` semantics: floats truncate toward zero and saturate at the
//! `u64` range (negative values and NaN become 0), signed integers keep their two's
//! complement bits.

use std::marker::PhantomData;

/// Bytes per element on the wire
pub const WIRE_WIDTH_BYTES: usize = std::mem::size_of::<u64>();

/// Host numeric type that can be marshalled to and from a wire word
pub trait HostElement: Copy + Default + Send + Sync + 'static {
    /// Convert to the wire representation
    fn to_wire(self) -> u64;

    /// Convert from the wire representation
    fn from_wire(word: u64) -> Self;
}

macro_rules! impl_host_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HostElement for $ty {
                #[inline]
                fn to_wire(self) -> u64 {
                    self as u64
                }

                #[inline]
                fn from_wire(word: u64) -> Self {
                    word as $ty
                }
            }
        )*
    };
}

impl_host_element!(f32, f64, u8, u16, u32, u64, i32, i64);

/// Element encoding used for device transfers
pub trait WireFormat<T: HostElement> {
    /// Bytes per element on the wire
    const WIDTH_BYTES: usize;

    /// Encode `host` into `wire`; both slices have the same length
    fn encode(&self, host: &[T], wire: &mut [u64]);

    /// Decode `wire` into `host`; both slices have the same length
    fn decode(&self, wire: &[u64], host: &mut [T]);
}

/// One 64-bit unsigned word per element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct U64Wire;

impl<T: HostElement> WireFormat<T> for U64Wire {
    const WIDTH_BYTES: usize = WIRE_WIDTH_BYTES;

    fn encode(&self, host: &[T], wire: &mut [u64]) {
        debug_assert_eq!(host.len(), wire.len());
        for (dst, src) in wire.iter_mut().zip(host) {
            *dst = src.to_wire();
        }
    }

    fn decode(&self, wire: &[u64], host: &mut [T]) {
        debug_assert_eq!(host.len(), wire.len());
        for (dst, src) in host.iter_mut().zip(wire) {
            *dst = T::from_wire(*src);
        }
    }
}

/// Host-side scratch buffer holding wire words for one transfer direction
///
/// Allocated once per stage and reused for every invocation.
#[derive(Debug, Clone)]
pub struct StagingBuffer<T> {
    words: Vec<u64>,
    _marker: PhantomData<T>,
}

impl<T: HostElement> StagingBuffer<T> {
    /// Zeroed buffer of `len` words
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len],
            _marker: PhantomData,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the buffer holds no elements
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Wire words
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Wire words as transfer bytes
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// Wire words as transfer bytes, for device-to-host copies
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    /// Drop the words and their allocation
    pub fn release(&mut self) {
        self.words = Vec::new();
    }

    /// Encode host elements into the buffer
    pub fn load<F: WireFormat<T>>(&mut self, format: &F, host: &[T]) {
        format.encode(host, &mut self.words);
    }

    /// Decode the buffer into host elements
    pub fn store<F: WireFormat<T>>(&self, format: &F, host: &mut [T]) {
        format.decode(&self.words, host);
    }
}
