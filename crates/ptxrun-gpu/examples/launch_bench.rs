//! Benchmark: launch overhead and kernel time on the CUDA backend.
//!
//! Run with: cargo run -p ptxrun-gpu --features cuda --example launch_bench --release
//!
//! Times an elementwise kernel at several sizes, both with device events
//! (`wait = true`) and with host wall-clock around untimed launches.

use std::time::Instant;

use ptxrun_gpu::backend::DeviceBackend;
use ptxrun_gpu::cuda::CudaBackend;
use ptxrun_gpu::dtype::DType;

const WARMUP: usize = 10;
const ITERS: usize = 100;

const AXPY: &str = r#"
extern "C" __global__ void axpy(float* out, const float* x, const float* y) {
  int gid = blockDim.x*blockIdx.x+threadIdx.x;
  out[gid] = 2.0f * x[gid] + y[gid];
}
"#;

fn main() {
    println!("=== ptxrun-gpu launch benchmark ===\n");

    let backend = match CudaBackend::new(0) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("CUDA backend unavailable: {e}");
            return;
        }
    };
    let caps = backend.caps();
    println!(
        "Device: {} (sm_{}{}), {:.1} GiB\n",
        caps.name,
        caps.compute_major,
        caps.compute_minor,
        caps.total_memory as f64 / (1u64 << 30) as f64
    );

    let prg = backend.compile("axpy", AXPY, false).unwrap();
    let sizes = [1 << 10, 1 << 16, 1 << 20, 1 << 24];

    for &n in &sizes {
        let host: Vec<f32> = (0..n).map(|i| (i % 1000) as f32 * 0.001).collect();
        let mut out = backend.alloc(n, DType::F32).unwrap();
        let mut x = backend.alloc(n, DType::F32).unwrap();
        let mut y = backend.alloc(n, DType::F32).unwrap();
        backend.copy_in(&host, &mut x, None).unwrap();
        backend.copy_in(&host, &mut y, None).unwrap();

        for _ in 0..WARMUP {
            backend
                .launch(&prg, &[n], Some(&[256]), &mut [&mut out, &mut x, &mut y], false)
                .unwrap();
        }
        backend.synchronize().unwrap();

        let mut device_secs = 0.0;
        for _ in 0..ITERS {
            device_secs += backend
                .launch(&prg, &[n], Some(&[256]), &mut [&mut out, &mut x, &mut y], true)
                .unwrap()
                .unwrap_or(0.0);
        }

        let start = Instant::now();
        for _ in 0..ITERS {
            backend
                .launch(&prg, &[n], Some(&[256]), &mut [&mut out, &mut x, &mut y], false)
                .unwrap();
        }
        backend.synchronize().unwrap();
        let wall = start.elapsed();

        let per_iter = device_secs / ITERS as f64;
        let gbps = (3 * n * 4) as f64 / per_iter / 1e9;
        println!(
            "  n={n:>9}: event {:.1}us/iter ({gbps:.1} GB/s), wall {:.1}us/iter",
            per_iter * 1e6,
            wall.as_secs_f64() * 1e6 / ITERS as f64,
        );
    }
}
