//! Device backend adapter for compiling and launching generated kernels.
//!
//! A host framework hands this crate CUDA C source produced by its code
//! generator. The crate compiles it to PTX, resolves the kernel's entry point,
//! loads it, and launches it over a grid derived from global/local sizes,
//! either on a GPU through `cudarc` or on the CPU through a PTX interpreter.
//!
//! Pick the backend once at startup from [`config::RuntimeConfig`] and drive
//! everything through the [`backend::DeviceBackend`] trait.

/// Backend trait, capability info, and error definitions.
pub mod backend;

/// Kernel source compilers (NVRTC, nvcc).
pub mod compiler;

/// Runtime configuration read from the environment.
pub mod config;

/// Code-generator dialect description.
pub mod dialect;

/// Buffer element types and their host counterparts.
pub mod dtype;

/// Emulated backend running PTX through an external interpreter.
pub mod emulator;

/// Block and grid dimensions derived from global/local sizes.
pub mod launch;

/// Source → PTX pipeline shared by all backends.
pub mod program;

/// PTX text scanning (entry-point resolution).
pub mod ptx;

/// CUDA backend implementation.
#[cfg(feature = "cuda")]
pub mod cuda;

pub use backend::{BackendError, Buffer, DeviceBackend, DeviceCaps, Program, Result};
pub use config::{BackendKind, RuntimeConfig};
pub use dtype::{DType, HostElement};
pub use launch::LaunchDims;
