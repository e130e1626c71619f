//! Accelerator register map
//!
//! Offsets are part of the device firmware contract and must be reproduced bit-exactly.
//!
//! | Offset | Meaning |
//! |--------|---------|
//! | `0x00` | write [`START`] to run; bit [`DONE_MASK`] reads back as the completion flag |
//! | `0x10` | input buffer address (64-bit) |
//! | `0x1c` | output buffer address slot (64-bit) |
//! | `0x54` | images processed per trigger |

use crate::driver::RegisterAddr;

/// Control/status register
pub const CONTROL: RegisterAddr = RegisterAddr::new(0x00);

/// Value written to [`CONTROL`] to start execution
pub const START: u32 = 1;

/// Completion bit of [`CONTROL`] on read
pub const DONE_MASK: u32 = 0x2;

/// Input buffer address register
pub const INPUT_ADDR: RegisterAddr = RegisterAddr::new(0x10);

/// Output buffer address register
pub const OUTPUT_ADDR: RegisterAddr = RegisterAddr::new(0x1c);

/// Number of images processed per trigger
pub const IMAGE_COUNT: RegisterAddr = RegisterAddr::new(0x54);
