//! Host-memory backend that runs PTX through an external interpreter.
//!
//! Used when no GPU is present (`CUDACPU=1`). Kernels are still compiled to
//! real PTX, pinned to `sm_35`, and the interpreter executes them on the CPU
//! against plain heap buffers. Launches are synchronous and untimed.

mod backend;
mod dylib;

pub use backend::{EmulatedBackend, EmulatedProgram, HostBuffer};
pub use dylib::{DylibInterpreter, DylibKernel};

use crate::backend::Result;
use crate::launch::LaunchDims;

/// An opaque PTX interpreter.
pub trait PtxInterpreter: Send + Sync {
    /// Interpreter-side handle for one loaded kernel.
    type Kernel: Send + Sync;

    /// Load `ptx` and bind its `entry` function.
    fn create_kernel(&self, ptx: &str, entry: &str) -> Result<Self::Kernel>;

    /// Run `kernel` to completion over `dims`, with one byte slice per
    /// kernel argument in launch order.
    fn call(&self, kernel: &Self::Kernel, args: &mut [&mut [u8]], dims: LaunchDims) -> Result<()>;
}
