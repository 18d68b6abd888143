//! CUDA backend implementation using cudarc.
//!
//! Kernels are compiled to PTX by the configured compiler, loaded as a module
//! into the backend's `DeviceContext`, and launched on its default stream.

use std::sync::Arc;

use cudarc::driver::safe::CudaStream;
use cudarc::driver::sys::CUevent_flags;
use cudarc::driver::PushKernelArg;
use cudarc::nvrtc::Ptx;
use tracing::debug;

use super::buffers::CudaBuffer;
use super::context::DeviceContext;
use super::program::CudaProgram;
use crate::backend::{
    check_transfer, BackendError, DeviceBackend, DeviceCaps, Program, Result,
};
use crate::compiler::{self, KernelCompiler};
use crate::config::RuntimeConfig;
use crate::dialect::KernelDialect;
use crate::dtype::{DType, HostElement};
use crate::launch::LaunchDims;
use crate::program::{build_ptx, Target};

/// CUDA backend for compiling and launching generated kernels.
pub struct CudaBackend {
    context: DeviceContext,
    compiler: Box<dyn KernelCompiler>,
    config: RuntimeConfig,
    caps: DeviceCaps,
    dialect: KernelDialect,
}

// SAFETY: CudaBackend fields are all internally thread-safe.
// cudarc's CudaContext and CudaStream are Arc-wrapped and Send+Sync.
// KernelCompiler is required to be Send+Sync.
unsafe impl Send for CudaBackend {}
unsafe impl Sync for CudaBackend {}

impl CudaBackend {
    /// Create a backend for the given device ordinal (0-indexed) with the
    /// default configuration.
    pub fn new(device_ordinal: usize) -> Result<Self> {
        Self::from_config(RuntimeConfig::default().with_device_ordinal(device_ordinal))
    }

    /// Create a backend using the device and compiler named in `config`.
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        let compiler = compiler::from_config(&config)?;
        Self::with_compiler(config, compiler)
    }

    pub fn with_compiler(config: RuntimeConfig, compiler: Box<dyn KernelCompiler>) -> Result<Self> {
        let context = DeviceContext::new(config.device_ordinal)?;
        let caps = context.caps()?;
        debug!(
            device = %caps.name,
            compute = %format!("{}.{}", caps.compute_major, caps.compute_minor),
            compiler = compiler.name(),
            "CUDA backend ready"
        );
        Ok(Self {
            context,
            compiler,
            config,
            caps,
            dialect: KernelDialect::cuda(),
        })
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn record_event(&self, stream: &Arc<CudaStream>) -> Result<cudarc::driver::safe::CudaEvent> {
        stream
            .record_event(Some(CUevent_flags::CU_EVENT_DEFAULT))
            .map_err(|e| BackendError::DeviceError(format!("record_event: {e}")))
    }
}

impl DeviceBackend for CudaBackend {
    type Buf = CudaBuffer;
    type Prg = CudaProgram;
    type Stream = Arc<CudaStream>;

    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn dialect(&self) -> &KernelDialect {
        &self.dialect
    }

    fn alloc(&self, len: usize, dtype: DType) -> Result<CudaBuffer> {
        let nbytes = len
            .checked_mul(dtype.itemsize())
            .ok_or_else(|| BackendError::AllocationFailure {
                requested: usize::MAX,
                reason: format!("{len} × {dtype} overflows usize"),
            })?;
        let data = self
            .context
            .stream()
            .alloc_zeros::<u8>(nbytes)
            .map_err(|e| BackendError::AllocationFailure {
                requested: nbytes,
                reason: e.to_string(),
            })?;
        Ok(CudaBuffer { data, len, dtype })
    }

    fn copy_in<T: HostElement>(
        &self,
        src: &[T],
        dst: &mut CudaBuffer,
        stream: Option<&Arc<CudaStream>>,
    ) -> Result<()> {
        check_transfer::<T>("copy_in", src.len(), dst.len, dst.dtype)?;
        let bytes: &[u8] = bytemuck::cast_slice(src);
        let target = stream.unwrap_or(self.context.stream());
        target
            .memcpy_htod(bytes, &mut dst.data)
            .map_err(|e| BackendError::TransferError(format!("copy_in: {e}")))?;
        if stream.is_none() {
            target
                .synchronize()
                .map_err(|e| BackendError::TransferError(format!("copy_in sync: {e}")))?;
        }
        Ok(())
    }

    fn copy_out<T: HostElement>(&self, src: &CudaBuffer, dst: &mut [T]) -> Result<()> {
        check_transfer::<T>("copy_out", dst.len(), src.len, src.dtype)?;
        let stream = self.context.stream();
        stream
            .memcpy_dtoh(&src.data, bytemuck::cast_slice_mut::<T, u8>(dst))
            .map_err(|e| BackendError::TransferError(format!("copy_out: {e}")))?;
        stream
            .synchronize()
            .map_err(|e| BackendError::TransferError(format!("copy_out sync: {e}")))?;
        Ok(())
    }

    fn compile(&self, name: &str, source: &str, is_binary: bool) -> Result<CudaProgram> {
        let source = build_ptx(
            self.compiler.as_ref(),
            &self.config,
            name,
            source,
            is_binary,
            Target::Device,
        )?;
        let module = self
            .context
            .context()
            .load_module(Ptx::from_src(source.ptx.clone()))
            .map_err(|e| BackendError::DeviceError(format!("load_module({name}): {e}")))?;
        let function = module.load_function(&source.entry).map_err(|e| {
            BackendError::EntryPointNotFound(format!("load_function({}): {e}", source.entry))
        })?;
        debug!(program = name, entry = %source.entry, "module loaded");
        Ok(CudaProgram { source, function })
    }

    fn launch(
        &self,
        program: &CudaProgram,
        global: &[usize],
        local: Option<&[usize]>,
        args: &mut [&mut CudaBuffer],
        wait: bool,
    ) -> Result<Option<f64>> {
        let dims = LaunchDims::new(global, local)?;
        let stream = self.context.stream();
        debug!(
            program = program.name(),
            block = ?dims.block,
            grid = ?dims.grid,
            args = args.len(),
            wait,
            "launch"
        );

        let start = if wait {
            Some(self.record_event(stream)?)
        } else {
            None
        };

        let mut builder = stream.launch_builder(&program.function);
        for buf in args.iter_mut() {
            builder.arg(&mut buf.data);
        }
        unsafe {
            builder
                .launch(dims.into())
                .map_err(|e| BackendError::KernelError(format!("{}: {e}", program.name())))?;
        }

        let Some(start) = start else {
            return Ok(None);
        };
        let end = self.record_event(stream)?;
        end.synchronize()
            .map_err(|e| BackendError::DeviceError(format!("event synchronize: {e}")))?;
        let ms = start
            .elapsed_ms(&end)
            .map_err(|e| BackendError::DeviceError(format!("elapsed_ms: {e}")))?;
        Ok(Some(f64::from(ms) * 1e-3))
    }

    fn synchronize(&self) -> Result<()> {
        self.context.synchronize()
    }
}
