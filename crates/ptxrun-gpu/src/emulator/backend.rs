//! Emulated backend: host buffers plus a [`PtxInterpreter`].

use tracing::debug;

use super::PtxInterpreter;
use crate::backend::{
    check_transfer, BackendError, Buffer, DeviceBackend, DeviceCaps, Program, Result,
};
use crate::compiler::KernelCompiler;
use crate::config::RuntimeConfig;
use crate::dialect::KernelDialect;
use crate::dtype::{DType, HostElement};
use crate::launch::LaunchDims;
use crate::program::{build_ptx, KernelSource, Target};

// ── Buffer ──────────────────────────────────────────────────────────

/// Heap buffer handed to the interpreter as raw bytes.
///
/// Backed by `u64` words so every element type is naturally aligned.
pub struct HostBuffer {
    words: Vec<u64>,
    len: usize,
    dtype: DType,
}

impl HostBuffer {
    fn new(len: usize, dtype: DType) -> Result<Self> {
        let nbytes = len
            .checked_mul(dtype.itemsize())
            .ok_or_else(|| BackendError::AllocationFailure {
                requested: usize::MAX,
                reason: format!("{len} × {dtype} overflows usize"),
            })?;
        let nwords = nbytes.div_ceil(8);
        let mut words = Vec::new();
        words
            .try_reserve_exact(nwords)
            .map_err(|e| BackendError::AllocationFailure {
                requested: nbytes,
                reason: e.to_string(),
            })?;
        words.resize(nwords, 0);
        Ok(Self { words, len, dtype })
    }

    /// The buffer contents as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        let nbytes = self.size_bytes();
        &bytemuck::cast_slice(&self.words)[..nbytes]
    }

    /// The buffer contents as mutable bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let nbytes = self.size_bytes();
        &mut bytemuck::cast_slice_mut(&mut self.words)[..nbytes]
    }
}

impl Buffer for HostBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}

// ── Program ─────────────────────────────────────────────────────────

/// PTX loaded into the interpreter.
pub struct EmulatedProgram<K> {
    source: KernelSource,
    kernel: K,
}

impl<K> EmulatedProgram<K> {
    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<K: Send + Sync> Program for EmulatedProgram<K> {
    fn name(&self) -> &str {
        &self.source.name
    }

    fn entry(&self) -> &str {
        &self.source.entry
    }

    fn ptx(&self) -> &str {
        &self.source.ptx
    }
}

// ── Backend ─────────────────────────────────────────────────────────

/// Backend that executes every launch synchronously through `I`.
pub struct EmulatedBackend<I: PtxInterpreter> {
    interpreter: I,
    compiler: Box<dyn KernelCompiler>,
    config: RuntimeConfig,
    caps: DeviceCaps,
    dialect: KernelDialect,
}

impl<I: PtxInterpreter> EmulatedBackend<I> {
    pub fn new(interpreter: I, compiler: Box<dyn KernelCompiler>, config: RuntimeConfig) -> Self {
        debug!(compiler = compiler.name(), "emulated backend ready");
        Self {
            interpreter,
            compiler,
            config,
            caps: DeviceCaps {
                name: "PTX interpreter".to_string(),
                compute_major: 0,
                compute_minor: 0,
                total_memory: usize::MAX,
                free_memory: usize::MAX,
                emulated: true,
                timing: false,
                global_sync: false,
            },
            dialect: KernelDialect::cuda(),
        }
    }

    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl<I: PtxInterpreter> DeviceBackend for EmulatedBackend<I> {
    type Buf = HostBuffer;
    type Prg = EmulatedProgram<I::Kernel>;
    type Stream = ();

    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn dialect(&self) -> &KernelDialect {
        &self.dialect
    }

    fn alloc(&self, len: usize, dtype: DType) -> Result<HostBuffer> {
        HostBuffer::new(len, dtype)
    }

    fn copy_in<T: HostElement>(
        &self,
        src: &[T],
        dst: &mut HostBuffer,
        _stream: Option<&()>,
    ) -> Result<()> {
        check_transfer::<T>("copy_in", src.len(), dst.len, dst.dtype)?;
        dst.as_bytes_mut().copy_from_slice(bytemuck::cast_slice(src));
        Ok(())
    }

    fn copy_out<T: HostElement>(&self, src: &HostBuffer, dst: &mut [T]) -> Result<()> {
        check_transfer::<T>("copy_out", dst.len(), src.len, src.dtype)?;
        bytemuck::cast_slice_mut::<T, u8>(dst).copy_from_slice(src.as_bytes());
        Ok(())
    }

    fn compile(&self, name: &str, source: &str, is_binary: bool) -> Result<Self::Prg> {
        let source = build_ptx(
            self.compiler.as_ref(),
            &self.config,
            name,
            source,
            is_binary,
            Target::Emulated,
        )?;
        let kernel = self.interpreter.create_kernel(&source.ptx, &source.entry)?;
        debug!(program = name, entry = %source.entry, "kernel loaded into interpreter");
        Ok(EmulatedProgram { source, kernel })
    }

    fn launch(
        &self,
        program: &Self::Prg,
        global: &[usize],
        local: Option<&[usize]>,
        args: &mut [&mut HostBuffer],
        wait: bool,
    ) -> Result<Option<f64>> {
        let dims = LaunchDims::new(global, local)?;
        let mut views: Vec<&mut [u8]> = args.iter_mut().map(|b| b.as_bytes_mut()).collect();
        debug!(
            program = program.name(),
            block = ?dims.block,
            grid = ?dims.grid,
            args = views.len(),
            "emulated launch"
        );
        self.interpreter.call(&program.kernel, &mut views, dims)?;
        if wait {
            debug!(program = program.name(), "launch timing is unavailable when emulated");
        }
        Ok(None)
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_buffer_is_sized_in_elements() {
        let buf = HostBuffer::new(3, DType::F16).unwrap();
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.size_bytes(), 6);
        assert_eq!(buf.as_bytes().len(), 6);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn host_buffer_alignment() {
        let mut buf = HostBuffer::new(5, DType::F64).unwrap();
        assert_eq!(buf.as_bytes_mut().as_ptr() as usize % 8, 0);
    }

    #[test]
    fn oversized_allocation_fails() {
        let err = HostBuffer::new(usize::MAX, DType::F32).err().unwrap();
        assert!(matches!(err, BackendError::AllocationFailure { .. }));
    }
}
