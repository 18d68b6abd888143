//! Explicitly owned CUDA device context.

use std::sync::Arc;

use cudarc::driver::result;
use cudarc::driver::safe::{CudaContext, CudaStream};
use tracing::info;

use crate::backend::{BackendError, DeviceCaps, Result};

/// A driver context and its default stream for one device.
///
/// Created once at startup and dropped at shutdown; nothing here lives in
/// process-global state.
pub struct DeviceContext {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    ordinal: usize,
}

impl DeviceContext {
    /// Open the device with the given ordinal (0-indexed).
    pub fn new(ordinal: usize) -> Result<Self> {
        let ctx = CudaContext::new(ordinal)
            .map_err(|e| BackendError::DeviceError(format!("CudaContext::new({ordinal}): {e}")))?;
        let stream = ctx.default_stream();
        info!(ordinal, "CUDA context created");
        Ok(Self {
            ctx,
            stream,
            ordinal,
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn context(&self) -> &Arc<CudaContext> {
        &self.ctx
    }

    /// The default stream every unqualified command is issued on.
    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }

    /// Create an additional stream for stream-ordered copies.
    pub fn new_stream(&self) -> Result<Arc<CudaStream>> {
        self.ctx
            .new_stream()
            .map_err(|e| BackendError::DeviceError(format!("new_stream: {e}")))
    }

    /// Block until every command issued in this context has completed.
    pub fn synchronize(&self) -> Result<()> {
        self.ctx
            .synchronize()
            .map_err(|e| BackendError::DeviceError(format!("synchronize: {e}")))
    }

    /// Query device properties.
    pub fn caps(&self) -> Result<DeviceCaps> {
        let name = self
            .ctx
            .name()
            .map_err(|e| BackendError::DeviceError(format!("device name: {e}")))?;

        let (compute_major, compute_minor) = self
            .ctx
            .compute_capability()
            .map_err(|e| BackendError::DeviceError(format!("compute_capability: {e}")))?;

        let (free_memory, total_memory) = result::mem_get_info()
            .map_err(|e| BackendError::DeviceError(format!("cuMemGetInfo: {e}")))?;

        Ok(DeviceCaps {
            name,
            compute_major: compute_major as u32,
            compute_minor: compute_minor as u32,
            total_memory,
            free_memory,
            emulated: false,
            timing: true,
            global_sync: true,
        })
    }
}
