//! CUDA backend implementation using cudarc.

mod backend;
mod buffers;
mod context;
mod program;

pub use backend::CudaBackend;
pub use buffers::CudaBuffer;
pub use context::DeviceContext;
pub use program::CudaProgram;
