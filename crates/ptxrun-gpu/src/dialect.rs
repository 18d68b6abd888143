//! Kernel dialect description consumed by the host's C-style code generator.

use serde::Serialize;

const AXES: [char; 3] = ['x', 'y', 'z'];

/// Tokens and expressions a C-style code generator needs to emit kernels for
/// a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelDialect {
    pub kernel_prefix: String,
    pub smem_prefix: String,
    pub barrier: String,
    pub float4: String,
    /// Prelude emitted before any kernel that uses half precision.
    pub half_prekernel: String,
    /// Global thread index expression per axis.
    pub gid: [String; 3],
    /// Thread index within the block per axis.
    pub lid: [String; 3],
    pub supports_float4_alu: bool,
}

impl KernelDialect {
    /// The CUDA C dialect.
    pub fn cuda() -> Self {
        Self {
            kernel_prefix: "__global__".to_string(),
            smem_prefix: "__shared__ ".to_string(),
            barrier: "__syncthreads();".to_string(),
            float4: "make_float4".to_string(),
            half_prekernel: "#include <cuda_fp16.h>".to_string(),
            gid: AXES.map(|a| format!("blockDim.{a}*blockIdx.{a}+threadIdx.{a}")),
            lid: AXES.map(|a| format!("threadIdx.{a}")),
            supports_float4_alu: false,
        }
    }
}

impl Default for KernelDialect {
    fn default() -> Self {
        Self::cuda()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuda_index_expressions() {
        let d = KernelDialect::cuda();
        assert_eq!(d.gid[0], "blockDim.x*blockIdx.x+threadIdx.x");
        assert_eq!(d.gid[2], "blockDim.z*blockIdx.z+threadIdx.z");
        assert_eq!(d.lid[1], "threadIdx.y");
        assert!(!d.supports_float4_alu);
    }
}
