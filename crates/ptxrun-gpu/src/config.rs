//! Runtime configuration read from the environment.
//!
//! | variable              | meaning                                         |
//! |-----------------------|-------------------------------------------------|
//! | `DEBUG`               | diagnostic verbosity (3, 5 and 6 add dumps)     |
//! | `CUDACPU`             | non-zero selects the emulated backend           |
//! | `CUDA_DEVICE`         | device ordinal                                  |
//! | `PTXRUN_COMPILER`     | `nvrtc` or `nvcc`                               |
//! | `PTXRUN_NVCC`         | path to `nvcc`                                  |
//! | `PTXRUN_NVDISASM`     | path to `nvdisasm`                              |
//! | `PTXRUN_CUBIN_PATH`   | where the disassembly cubin is written          |
//! | `PTXRUN_EMULATOR_LIB` | PTX interpreter shared library                  |

use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::backend::{BackendError, Result};

/// Diagnostic verbosity. Higher levels include everything below them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DebugLevel(pub u8);

impl DebugLevel {
    /// Log the source of a kernel that failed to compile.
    pub fn dump_failed_source(self) -> bool {
        self.0 >= 3
    }

    /// Log the PTX of every compiled kernel.
    pub fn dump_ptx(self) -> bool {
        self.0 >= 5
    }

    /// Compile to cubin and log its disassembly.
    pub fn dump_disassembly(self) -> bool {
        self.0 >= 6
    }
}

/// Which `DeviceBackend` implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cuda,
    Emulated,
}

/// Which `KernelCompiler` implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerKind {
    Nvrtc,
    Nvcc,
}

impl FromStr for CompilerKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nvrtc" => Ok(CompilerKind::Nvrtc),
            "nvcc" => Ok(CompilerKind::Nvcc),
            other => Err(BackendError::Config(format!(
                "unknown compiler '{other}', expected 'nvrtc' or 'nvcc'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    pub debug: DebugLevel,
    pub backend: BackendKind,
    pub device_ordinal: usize,
    pub compiler: CompilerKind,
    pub nvcc: PathBuf,
    pub disassembler: PathBuf,
    pub cubin_path: PathBuf,
    pub emulator_lib: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debug: DebugLevel::default(),
            backend: BackendKind::Cuda,
            device_ordinal: 0,
            compiler: if cfg!(feature = "cuda") {
                CompilerKind::Nvrtc
            } else {
                CompilerKind::Nvcc
            },
            nvcc: PathBuf::from("nvcc"),
            disassembler: PathBuf::from("nvdisasm"),
            cubin_path: std::env::temp_dir().join("cubin"),
            emulator_lib: None,
        }
    }
}

impl RuntimeConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("DEBUG") {
            cfg.debug = DebugLevel(parse_num("DEBUG", &v)?);
        }
        if let Some(v) = lookup("CUDACPU") {
            if parse_num::<i64>("CUDACPU", &v)? != 0 {
                cfg.backend = BackendKind::Emulated;
            }
        }
        if let Some(v) = lookup("CUDA_DEVICE") {
            cfg.device_ordinal = parse_num("CUDA_DEVICE", &v)?;
        }
        if let Some(v) = lookup("PTXRUN_COMPILER") {
            cfg.compiler = v.parse()?;
        }
        if let Some(v) = lookup("PTXRUN_NVCC") {
            cfg.nvcc = PathBuf::from(v);
        }
        if let Some(v) = lookup("PTXRUN_NVDISASM") {
            cfg.disassembler = PathBuf::from(v);
        }
        if let Some(v) = lookup("PTXRUN_CUBIN_PATH") {
            cfg.cubin_path = PathBuf::from(v);
        }
        cfg.emulator_lib = lookup("PTXRUN_EMULATOR_LIB").map(PathBuf::from);
        Ok(cfg)
    }

    pub fn with_debug(mut self, level: u8) -> Self {
        self.debug = DebugLevel(level);
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerKind) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_device_ordinal(mut self, ordinal: usize) -> Self {
        self.device_ordinal = ordinal;
        self
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BackendError::Config(format!("{key} is set but empty")));
    }
    trimmed
        .parse()
        .map_err(|_| BackendError::Config(format!("{key}={value:?} is not a valid number")))
}
