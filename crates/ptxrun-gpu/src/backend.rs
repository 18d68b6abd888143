//! Backend trait and core types for compiling and launching device kernels.

use serde::Serialize;

use crate::dialect::KernelDialect;
use crate::dtype::{DType, HostElement};

/// Errors that can occur during backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to compile '{name}': {log}")]
    CompilationFailure { name: String, log: String },

    #[error("device allocation of {requested} bytes failed: {reason}")]
    AllocationFailure { requested: usize, reason: String },

    #[error("local:{local:?} must divide global:{global:?}")]
    DimensionMismatch { global: [usize; 3], local: [usize; 3] },

    #[error("entry point not found: {0}")]
    EntryPointNotFound(String),

    #[error("invalid launch: {0}")]
    InvalidLaunch(String),

    #[error("kernel error: {0}")]
    KernelError(String),

    #[error("transfer error: {0}")]
    TransferError(String),

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Device capability information, queried at backend construction time.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCaps {
    pub name: String,
    /// CUDA compute capability major version (0 when emulated).
    pub compute_major: u32,
    /// CUDA compute capability minor version.
    pub compute_minor: u32,
    /// Total device memory in bytes.
    pub total_memory: usize,
    /// Free device memory in bytes (snapshot at query time).
    pub free_memory: usize,
    /// Kernels run through a PTX interpreter on the host.
    pub emulated: bool,
    /// `launch(.., wait = true)` reports elapsed time.
    pub timing: bool,
    /// `synchronize()` is a real device-wide barrier rather than a no-op.
    pub global_sync: bool,
}

/// A typed memory region owned by a backend.
///
/// The length is in elements of [`Buffer::dtype`], not bytes.
pub trait Buffer: Send + Sized {
    /// Number of elements in this buffer.
    fn len(&self) -> usize;

    /// Element type the buffer was allocated with.
    fn dtype(&self) -> DType;

    /// Size in bytes.
    fn size_bytes(&self) -> usize {
        self.len() * self.dtype().itemsize()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A kernel compiled from source and ready to launch.
pub trait Program: Send + Sync {
    /// Name the host gave the program at compile time.
    fn name(&self) -> &str;

    /// Entry-point symbol resolved from the PTX.
    fn entry(&self) -> &str;

    /// The PTX the kernel was loaded from.
    fn ptx(&self) -> &str;
}

/// A device backend as seen by the host framework.
///
/// Bundles the four pieces the host needs: an allocatable buffer type, the
/// kernel dialect its code generator targets, a compiled-program type, and a
/// global synchronization barrier. Associated types keep launches
/// monomorphized; the concrete backend is chosen once at startup.
///
/// # Execution model
///
/// Allocation, `copy_in` with a stream, and `launch` without `wait` are
/// submissions: they return before the device finishes. `copy_out`,
/// `launch` with `wait`, and `synchronize` block the calling thread.
pub trait DeviceBackend: Send + Sync + Sized {
    /// Buffer type for this backend.
    type Buf: Buffer;

    /// Compiled kernel type for this backend.
    type Prg: Program;

    /// Queue handle accepted by `copy_in`.
    type Stream;

    /// Query device capabilities.
    fn caps(&self) -> &DeviceCaps;

    /// Dialect the host code generator must emit for this backend.
    fn dialect(&self) -> &KernelDialect;

    /// Allocate a buffer of `len` elements of `dtype`.
    fn alloc(&self, len: usize, dtype: DType) -> Result<Self::Buf>;

    /// Copy a host array into a buffer.
    ///
    /// With `stream` the copy is enqueued on it; without, it completes before
    /// returning. `src` must match the buffer's length and dtype.
    fn copy_in<T: HostElement>(
        &self,
        src: &[T],
        dst: &mut Self::Buf,
        stream: Option<&Self::Stream>,
    ) -> Result<()>;

    /// Copy a buffer back to a host array, blocking until the data arrives.
    fn copy_out<T: HostElement>(&self, src: &Self::Buf, dst: &mut [T]) -> Result<()>;

    /// Compile `source` into a launchable kernel.
    ///
    /// With `is_binary` the source is taken to already be PTX (device backend
    /// only; the emulated backend always compiles).
    fn compile(&self, name: &str, source: &str, is_binary: bool) -> Result<Self::Prg>;

    /// Launch `program` over `global` threads in blocks of `local`.
    ///
    /// Returns the elapsed seconds when `wait` is set and the backend can
    /// time launches, `None` otherwise.
    fn launch(
        &self,
        program: &Self::Prg,
        global: &[usize],
        local: Option<&[usize]>,
        args: &mut [&mut Self::Buf],
        wait: bool,
    ) -> Result<Option<f64>>;

    /// Block until all previously dispatched work has completed.
    ///
    /// No-op for synchronous backends (emulated).
    fn synchronize(&self) -> Result<()>;
}

/// Reject a host slice whose length or dtype differs from the buffer.
pub(crate) fn check_transfer<T: HostElement>(
    op: &str,
    host_len: usize,
    buf_len: usize,
    buf_dtype: DType,
) -> Result<()> {
    if T::DTYPE != buf_dtype {
        return Err(BackendError::TransferError(format!(
            "{op} dtype mismatch: host={}, buffer={}",
            T::DTYPE,
            buf_dtype
        )));
    }
    if host_len != buf_len {
        return Err(BackendError::TransferError(format!(
            "{op} size mismatch: host={host_len}, buffer={buf_len}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_names_both_vectors() {
        let err = BackendError::DimensionMismatch {
            global: [10, 1, 1],
            local: [4, 1, 1],
        };
        assert_eq!(err.to_string(), "local:[4, 1, 1] must divide global:[10, 1, 1]");
    }

    #[test]
    fn compilation_failure_keeps_compiler_log() {
        let err = BackendError::CompilationFailure {
            name: "E_4".into(),
            log: "error: expected a \";\"".into(),
        };
        assert!(err.to_string().contains("expected a \";\""));
    }

    #[test]
    fn transfer_checks() {
        assert!(check_transfer::<f32>("copy_in", 4, 4, DType::F32).is_ok());
        let err = check_transfer::<f32>("copy_in", 3, 4, DType::F32).unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
        let err = check_transfer::<i32>("copy_out", 4, 4, DType::F32).unwrap_err();
        assert!(err.to_string().contains("dtype mismatch"));
    }
}
