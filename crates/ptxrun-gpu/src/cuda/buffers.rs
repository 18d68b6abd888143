//! CUDA device buffer type.

use cudarc::driver::safe::CudaSlice;

use crate::backend::Buffer;
use crate::dtype::DType;

/// A typed allocation in device memory, stored as raw bytes.
///
/// Freed when dropped.
pub struct CudaBuffer {
    pub(crate) data: CudaSlice<u8>,
    pub(crate) len: usize,
    pub(crate) dtype: DType,
}

impl Buffer for CudaBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}
