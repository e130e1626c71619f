//! Driver trait and types for accelerator access

mod traits;
mod types;

pub use traits::AcceleratorDriver;
pub use types::{BufferHandle, RegisterAddr};
