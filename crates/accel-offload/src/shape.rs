//! Shape descriptors
//!
//! A [`Shape`] is fixed when a stage is set up: every dimension positive, the element
//! count known and small enough to size accelerator buffers in bytes.

use crate::error::{Error, Result, ShapeMismatch};
use std::fmt;

/// Product of `dims`, or `None` if it overflows `usize`
pub fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Ordered, positive tensor dimensions with a cached element count
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
    numel: usize,
}

impl Shape {
    /// Create a shape, rejecting empty shapes, zero dimensions and overflowing products
    pub fn new(dims: Vec<usize>) -> Result<Self> {
        if dims.is_empty() {
            return Err(Error::configuration("shape must have at least one dimension"));
        }
        if let Some(axis) = dims.iter().position(|&d| d == 0) {
            return Err(Error::configuration(format!(
                "dimension {axis} of shape {dims:?} is zero"
            )));
        }

        let numel = element_count(&dims)
            .ok_or_else(|| Error::configuration(format!("element count of shape {dims:?} overflows")))?;

        Ok(Self { dims, numel })
    }

    /// Dimensions
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Product of the dimensions
    pub fn numel(&self) -> usize {
        self.numel
    }

    /// Bytes needed for this shape at `width` bytes per element
    pub fn byte_len(&self, width: usize) -> Result<usize> {
        self.numel
            .checked_mul(width)
            .ok_or_else(|| Error::configuration(format!("byte size of shape {self} overflows")))
    }

    /// Check `actual` against this shape
    ///
    /// Reports the rank difference, or the first differing dimension.
    pub fn check(&self, actual: &[usize]) -> std::result::Result<(), ShapeMismatch> {
        if actual.len() != self.dims.len() {
            return Err(ShapeMismatch::Rank {
                expected: self.dims.len(),
                actual: actual.len(),
            });
        }

        match self.dims.iter().zip(actual).position(|(e, a)| e != a) {
            Some(axis) => Err(ShapeMismatch::Dim {
                axis,
                expected: self.dims[axis],
                actual: actual[axis],
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = Error;

    fn try_from(dims: &[usize]) -> Result<Self> {
        Self::new(dims.to_vec())
    }
}
