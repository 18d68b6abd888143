//! PTX interpreter loaded from a shared library at runtime.
//!
//! The library must export (C ABI):
//!
//! ```c
//! void *ptx_kernel_create(const char *ptx, size_t ptx_len, const char *entry);
//! void  ptx_kernel_destroy(void *kernel);
//! int   ptx_call(void *kernel, void **args, size_t nargs,
//!                const uint32_t block[3], const uint32_t grid[3]);
//! ```
//!
//! `ptx_kernel_create` returns null on failure; `ptx_call` returns 0 on
//! success. Each `args[i]` points at the host memory of one buffer.

use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;
use tracing::info;

use super::{EmulatedBackend, PtxInterpreter};
use crate::backend::{BackendError, Result};
use crate::compiler;
use crate::config::RuntimeConfig;
use crate::launch::LaunchDims;

type FnKernelCreate = unsafe extern "C" fn(*const c_char, usize, *const c_char) -> *mut c_void;
type FnKernelDestroy = unsafe extern "C" fn(*mut c_void);
type FnCall =
    unsafe extern "C" fn(*mut c_void, *mut *mut c_void, usize, *const u32, *const u32) -> c_int;

struct InterpreterApi {
    kernel_create: FnKernelCreate,
    kernel_destroy: FnKernelDestroy,
    call: FnCall,
    // The interpreter is not assumed to be reentrant.
    lock: Mutex<()>,
    // Keeps the symbols above valid.
    _lib: Library,
}

impl InterpreterApi {
    fn load(path: &Path) -> Result<Self> {
        let dl = |e: libloading::Error| {
            BackendError::DeviceError(format!("loading {}: {e}", path.display()))
        };
        // SAFETY: the library is trusted to export the documented ABI.
        unsafe {
            let lib = Library::new(path).map_err(dl)?;
            Ok(Self {
                kernel_create: *lib.get::<FnKernelCreate>(b"ptx_kernel_create\0").map_err(dl)?,
                kernel_destroy: *lib.get::<FnKernelDestroy>(b"ptx_kernel_destroy\0").map_err(dl)?,
                call: *lib.get::<FnCall>(b"ptx_call\0").map_err(dl)?,
                lock: Mutex::new(()),
                _lib: lib,
            })
        }
    }
}

/// A kernel handle owned by the interpreter library.
pub struct DylibKernel {
    handle: NonNull<c_void>,
    api: Arc<InterpreterApi>,
}

// SAFETY: the handle is only dereferenced by the library, and every call into
// it is serialized by `InterpreterApi::lock`.
unsafe impl Send for DylibKernel {}
unsafe impl Sync for DylibKernel {}

impl Drop for DylibKernel {
    fn drop(&mut self) {
        let _guard = self.api.lock.lock();
        // SAFETY: `handle` came from `ptx_kernel_create` and is destroyed once.
        unsafe { (self.api.kernel_destroy)(self.handle.as_ptr()) }
    }
}

/// [`PtxInterpreter`] backed by a dynamically loaded library.
pub struct DylibInterpreter {
    api: Arc<InterpreterApi>,
}

impl DylibInterpreter {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let api = InterpreterApi::load(path)?;
        info!(library = %path.display(), "PTX interpreter loaded");
        Ok(Self { api: Arc::new(api) })
    }
}

impl PtxInterpreter for DylibInterpreter {
    type Kernel = DylibKernel;

    fn create_kernel(&self, ptx: &str, entry: &str) -> Result<DylibKernel> {
        let entry_c = CString::new(entry)
            .map_err(|_| BackendError::EntryPointNotFound(format!("entry {entry:?} contains NUL")))?;
        let _guard = self.api.lock.lock();
        // SAFETY: pointers are valid for the duration of the call.
        let raw = unsafe {
            (self.api.kernel_create)(ptx.as_ptr().cast(), ptx.len(), entry_c.as_ptr())
        };
        let handle = NonNull::new(raw).ok_or_else(|| {
            BackendError::KernelError(format!("interpreter rejected PTX for '{entry}'"))
        })?;
        Ok(DylibKernel {
            handle,
            api: Arc::clone(&self.api),
        })
    }

    fn call(&self, kernel: &DylibKernel, args: &mut [&mut [u8]], dims: LaunchDims) -> Result<()> {
        let mut ptrs: Vec<*mut c_void> = args.iter_mut().map(|a| a.as_mut_ptr().cast()).collect();
        let _guard = self.api.lock.lock();
        // SAFETY: `ptrs` borrows live buffers that outlive the call.
        let code = unsafe {
            (self.api.call)(
                kernel.handle.as_ptr(),
                ptrs.as_mut_ptr(),
                ptrs.len(),
                dims.block.as_ptr(),
                dims.grid.as_ptr(),
            )
        };
        if code != 0 {
            return Err(BackendError::KernelError(format!(
                "ptx_call failed with status {code}"
            )));
        }
        Ok(())
    }
}

impl EmulatedBackend<DylibInterpreter> {
    /// Build the emulated backend described by `config`.
    ///
    /// Requires `config.emulator_lib`.
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        let path = config.emulator_lib.clone().ok_or_else(|| {
            BackendError::Config("emulation requires PTXRUN_EMULATOR_LIB".to_string())
        })?;
        let interpreter = DylibInterpreter::load(path)?;
        let compiler = compiler::from_config(&config)?;
        Ok(Self::new(interpreter, compiler, config))
    }
}
