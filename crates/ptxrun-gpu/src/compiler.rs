//! Kernel source compilers.
//!
//! Compilation is delegated to the CUDA toolchain: either NVRTC in-process
//! (feature `cuda`) or `nvcc` as a subprocess. Both report failures as
//! [`BackendError::CompilationFailure`] carrying the compiler's own log.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::backend::{BackendError, Result};
use crate::config::{CompilerKind, RuntimeConfig};

/// Architecture targeted when PTX is produced for the emulator.
pub const EMULATED_ARCH: &str = "sm_35";

/// Per-compile options.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Program name used in diagnostics.
    pub name: String,
    /// Virtual/real architecture such as `sm_35`; `None` lets the compiler pick.
    pub arch: Option<String>,
    /// Extra flags passed through verbatim.
    pub flags: Vec<String>,
}

impl CompileOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }
}

/// Turns CUDA C source into PTX or a cubin.
pub trait KernelCompiler: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// Compile to PTX text.
    fn compile_ptx(&self, source: &str, opts: &CompileOptions) -> Result<String>;

    /// Compile to a device binary (used for disassembly dumps).
    fn compile_cubin(&self, source: &str, opts: &CompileOptions) -> Result<Vec<u8>>;
}

/// Construct the compiler selected by `config`.
pub fn from_config(config: &RuntimeConfig) -> Result<Box<dyn KernelCompiler>> {
    match config.compiler {
        CompilerKind::Nvcc => Ok(Box::new(NvccCompiler::new(&config.nvcc))),
        #[cfg(feature = "cuda")]
        CompilerKind::Nvrtc => Ok(Box::new(NvrtcCompiler)),
        #[cfg(not(feature = "cuda"))]
        CompilerKind::Nvrtc => Err(BackendError::Config(
            "NVRTC support not compiled; rebuild with --features cuda or set PTXRUN_COMPILER=nvcc"
                .to_string(),
        )),
    }
}

// ── nvcc ────────────────────────────────────────────────────────────

/// Runs `nvcc` in a scratch directory.
#[derive(Debug, Clone)]
pub struct NvccCompiler {
    nvcc: PathBuf,
}

impl NvccCompiler {
    pub fn new(nvcc: impl AsRef<Path>) -> Self {
        Self {
            nvcc: nvcc.as_ref().to_path_buf(),
        }
    }

    fn run(&self, source: &str, opts: &CompileOptions, mode: &str, ext: &str) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("kernel.cu");
        let output = dir.path().join(format!("kernel.{ext}"));
        std::fs::write(&input, source)?;

        let mut cmd = Command::new(&self.nvcc);
        cmd.arg(mode).arg("-Wno-deprecated-gpu-targets");
        if let Some(arch) = &opts.arch {
            cmd.arg(format!("-arch={arch}"));
        }
        cmd.args(&opts.flags).arg("-o").arg(&output).arg(&input);
        debug!(compiler = "nvcc", name = %opts.name, ?cmd, "compiling");

        let out = cmd.output().map_err(|e| BackendError::CompilationFailure {
            name: opts.name.clone(),
            log: format!("failed to run {}: {e}", self.nvcc.display()),
        })?;
        if !out.status.success() {
            return Err(BackendError::CompilationFailure {
                name: opts.name.clone(),
                log: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(std::fs::read(&output)?)
    }
}

impl KernelCompiler for NvccCompiler {
    fn name(&self) -> &'static str {
        "nvcc"
    }

    fn compile_ptx(&self, source: &str, opts: &CompileOptions) -> Result<String> {
        let bytes = self.run(source, opts, "--ptx", "ptx")?;
        String::from_utf8(bytes).map_err(|e| BackendError::CompilationFailure {
            name: opts.name.clone(),
            log: format!("nvcc produced non-UTF-8 PTX: {e}"),
        })
    }

    fn compile_cubin(&self, source: &str, opts: &CompileOptions) -> Result<Vec<u8>> {
        self.run(source, opts, "--cubin", "cubin")
    }
}

// ── NVRTC ───────────────────────────────────────────────────────────

/// In-process NVRTC via `cudarc`.
#[cfg(feature = "cuda")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NvrtcCompiler;

#[cfg(feature = "cuda")]
impl KernelCompiler for NvrtcCompiler {
    fn name(&self) -> &'static str {
        "nvrtc"
    }

    fn compile_ptx(&self, source: &str, opts: &CompileOptions) -> Result<String> {
        let mut options = opts.flags.clone();
        if let Some(arch) = &opts.arch {
            options.push(format!("--gpu-architecture={arch}"));
        }
        let nvrtc_opts = cudarc::nvrtc::CompileOptions {
            options,
            ..Default::default()
        };
        let ptx = cudarc::nvrtc::compile_ptx_with_opts(source, nvrtc_opts).map_err(|e| {
            BackendError::CompilationFailure {
                name: opts.name.clone(),
                log: e.to_string(),
            }
        })?;
        Ok(ptx.to_src())
    }

    fn compile_cubin(&self, _source: &str, opts: &CompileOptions) -> Result<Vec<u8>> {
        Err(BackendError::Unsupported(format!(
            "cubin output for '{}' requires PTXRUN_COMPILER=nvcc",
            opts.name
        )))
    }
}
