//! A PTX module loaded into a CUDA context.

use cudarc::driver::safe::CudaFunction;

use crate::backend::Program;
use crate::program::KernelSource;

/// The function resolved from a loaded module's entry point.
///
/// `CudaFunction` holds its module, which stays loaded until the program is
/// dropped.
pub struct CudaProgram {
    pub(crate) source: KernelSource,
    pub(crate) function: CudaFunction,
}

impl Program for CudaProgram {
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
