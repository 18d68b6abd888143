//! Source → PTX pipeline shared by every backend.

use std::process::Command;

use tracing::{error, info, warn};

use crate::backend::{BackendError, Result};
use crate::compiler::{CompileOptions, KernelCompiler, NvccCompiler, EMULATED_ARCH};
use crate::config::RuntimeConfig;
use crate::ptx;

/// Where the resulting PTX will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Loaded by the driver, which resolves the architecture at load time.
    Device,
    /// Handed to the PTX interpreter; pinned to [`EMULATED_ARCH`].
    Emulated,
}

/// PTX ready to be loaded, with its resolved entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    pub name: String,
    pub entry: String,
    pub ptx: String,
}

/// Produce loadable PTX for `source`.
///
/// `is_binary` sources are already PTX and pass through untouched on the
/// device target; the emulated target always compiles. Compiler errors are
/// returned unchanged.
pub fn build_ptx(
    compiler: &dyn KernelCompiler,
    config: &RuntimeConfig,
    name: &str,
    source: &str,
    is_binary: bool,
    target: Target,
) -> Result<KernelSource> {
    let ptx = match compile_stage(compiler, config, name, source, is_binary, target) {
        Ok(ptx) => ptx,
        Err(e) => {
            if config.debug.dump_failed_source() {
                error!(program = name, "FAILED TO BUILD\n{source}");
            }
            return Err(e);
        }
    };
    if config.debug.dump_ptx() {
        info!(program = name, "{ptx}");
    }
    let entry = ptx::entry_point(&ptx)?.to_string();
    Ok(KernelSource {
        name: name.to_string(),
        entry,
        ptx,
    })
}

fn compile_stage(
    compiler: &dyn KernelCompiler,
    config: &RuntimeConfig,
    name: &str,
    source: &str,
    is_binary: bool,
    target: Target,
) -> Result<String> {
    if config.debug.dump_disassembly() {
        match disassemble(compiler, config, name, source) {
            Ok(sass) => info!(program = name, "{sass}"),
            Err(e) => warn!(program = name, "disassembly skipped: {e}"),
        }
    }
    if is_binary && target == Target::Device {
        return Ok(source.to_string());
    }
    let mut opts = CompileOptions::new(name);
    if target == Target::Emulated {
        opts = opts.with_arch(EMULATED_ARCH);
    }
    compiler.compile_ptx(source, &opts)
}

/// Compile `source` to a cubin at `config.cubin_path` and return the
/// disassembler's output.
///
/// Compilers without cubin output (NVRTC) hand the job to `config.nvcc`.
pub fn disassemble(
    compiler: &dyn KernelCompiler,
    config: &RuntimeConfig,
    name: &str,
    source: &str,
) -> Result<String> {
    let opts = CompileOptions::new(name);
    let cubin = match compiler.compile_cubin(source, &opts) {
        Err(BackendError::Unsupported(_)) => {
            NvccCompiler::new(&config.nvcc).compile_cubin(source, &opts)?
        }
        other => other?,
    };
    std::fs::write(&config.cubin_path, &cubin)?;

    let out = Command::new(&config.disassembler)
        .arg(&config.cubin_path)
        .output()
        .map_err(|e| {
            BackendError::CompilationFailure {
                name: name.to_string(),
                log: format!("failed to run {}: {e}", config.disassembler.display()),
            }
        })?;
    if !out.status.success() {
        return Err(BackendError::CompilationFailure {
            name: name.to_string(),
            log: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}
