use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use half::f16;
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ptxrun_gpu::backend::{Buffer, DeviceBackend};
use ptxrun_gpu::compiler;
use ptxrun_gpu::config::{BackendKind, RuntimeConfig};
use ptxrun_gpu::dtype::DType;
use ptxrun_gpu::emulator::{DylibInterpreter, EmulatedBackend};
use ptxrun_gpu::program::{build_ptx, Target};
use ptxrun_gpu::ptx;

#[derive(Parser)]
#[command(
    name = "ptxrun",
    about = "Compile and launch CUDA kernels",
    long_about = "Compile CUDA C to PTX, resolve its entry point, and launch it on a GPU\nor on the PTX interpreter (CUDACPU=1).\n\nBackend, compiler and debug dumps are configured through the environment:\nDEBUG, CUDACPU, CUDA_DEVICE, PTXRUN_COMPILER, PTXRUN_NVCC, PTXRUN_NVDISASM,\nPTXRUN_CUBIN_PATH, PTXRUN_EMULATOR_LIB.",
    version
)]
struct Cli {
    /// Override the DEBUG level
    #[arg(long, global = true)]
    debug: Option<u8>,

    /// Override the CUDA device ordinal
    #[arg(long, global = true)]
    device: Option<usize>,

    /// Force the emulated backend
    #[arg(long, global = true)]
    emulated: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the runtime configuration and device capabilities
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the entry point of a PTX file
    Entry {
        /// PTX file
        ptx: PathBuf,
    },
    /// Compile CUDA C to PTX without touching a device
    Compile {
        /// CUDA C source file
        source: PathBuf,
        /// Program name (default: file stem)
        #[arg(long)]
        name: Option<String>,
        /// Write PTX here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Compile a kernel, launch it over iota-filled buffers, print the results
    Launch {
        /// CUDA C source (or PTX with --binary)
        source: PathBuf,
        /// Program name (default: file stem)
        #[arg(long)]
        name: Option<String>,
        /// Source is already PTX
        #[arg(long)]
        binary: bool,
        /// Global size, up to 3 comma-separated axes
        #[arg(long, value_delimiter = ',', required = true)]
        global: Vec<usize>,
        /// Local (block) size, up to 3 comma-separated axes
        #[arg(long, value_delimiter = ',')]
        local: Option<Vec<usize>>,
        /// Kernel argument buffer as dtype:len, in argument order
        #[arg(long = "buf", value_parser = parse_buf_spec, required = true)]
        bufs: Vec<BufSpec>,
        /// Time the launch with device events
        #[arg(long)]
        wait: bool,
        /// Elements to print per buffer
        #[arg(long, default_value = "16")]
        show: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy)]
struct BufSpec {
    dtype: DType,
    len: usize,
}

fn parse_buf_spec(s: &str) -> std::result::Result<BufSpec, String> {
    let (dtype, len) = s
        .split_once(':')
        .ok_or_else(|| format!("expected dtype:len, got '{s}'"))?;
    let dtype = DType::parse(dtype).ok_or_else(|| format!("unknown dtype '{dtype}'"))?;
    let len = len
        .parse::<usize>()
        .map_err(|e| format!("bad length '{len}': {e}"))?;
    if len == 0 {
        return Err("buffer length must be non-zero".to_string());
    }
    Ok(BufSpec { dtype, len })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = RuntimeConfig::from_env()?;
    if let Some(level) = cli.debug {
        config = config.with_debug(level);
    }
    if let Some(ordinal) = cli.device {
        config = config.with_device_ordinal(ordinal);
    }
    if cli.emulated {
        config = config.with_backend(BackendKind::Emulated);
    }
    debug!(?config, "runtime config");

    match cli.command {
        Commands::Entry { ptx } => cmd_entry(&ptx),
        Commands::Compile {
            source,
            name,
            output,
        } => cmd_compile(&config, &source, name, output.as_deref()),
        Commands::Info { json } => cmd_info(config, json),
        Commands::Launch {
            source,
            name,
            binary,
            global,
            local,
            bufs,
            wait,
            show,
            json,
        } => {
            let job = LaunchJob {
                name: name.unwrap_or_else(|| file_stem(&source)),
                source: read_source(&source)?,
                binary,
                global,
                local,
                bufs,
                wait,
                show,
                json,
            };
            with_backend(config, &job)
        }
    }
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "kernel".to_string())
}

fn cmd_entry(path: &Path) -> Result<()> {
    let src = read_source(path)?;
    println!("{}", ptx::entry_point(&src)?);
    Ok(())
}

fn cmd_compile(
    config: &RuntimeConfig,
    path: &Path,
    name: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let source = read_source(path)?;
    let name = name.unwrap_or_else(|| file_stem(path));
    let target = match config.backend {
        BackendKind::Cuda => Target::Device,
        BackendKind::Emulated => Target::Emulated,
    };
    let compiler = compiler::from_config(config)?;
    let kernel = build_ptx(compiler.as_ref(), config, &name, &source, false, target)?;
    eprintln!("{}: entry {} ({} bytes of PTX)", kernel.name, kernel.entry, kernel.ptx.len());
    match output {
        Some(out) => std::fs::write(out, &kernel.ptx)
            .with_context(|| format!("writing {}", out.display()))?,
        None => print!("{}", kernel.ptx),
    }
    Ok(())
}

fn cmd_info(config: RuntimeConfig, json: bool) -> Result<()> {
    let caps = open_caps(config.clone()).map_err(|e| format!("{e:#}"));
    if json {
        let report = match &caps {
            Ok(caps) => json!({ "config": config, "caps": caps }),
            Err(e) => json!({ "config": config, "caps": null, "error": e }),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("ptxrun v{}\n", env!("CARGO_PKG_VERSION"));
    println!("Config");
    println!("  backend:    {:?}", config.backend);
    println!("  device:     {}", config.device_ordinal);
    println!("  compiler:   {:?}", config.compiler);
    println!("  debug:      {}", config.debug.0);
    println!("  nvcc:       {}", config.nvcc.display());
    println!("  nvdisasm:   {}", config.disassembler.display());
    println!("  cubin dump: {}", config.cubin_path.display());
    if let Some(lib) = &config.emulator_lib {
        println!("  emulator:   {}", lib.display());
    }
    println!(
        "  cuda:       {}",
        if cfg!(feature = "cuda") { "[x]" } else { "[ ]" }
    );

    println!("\nDevice");
    match caps {
        Ok(caps) => {
            println!("  name:       {}", caps.name);
            if !caps.emulated {
                println!("  compute:    sm_{}{}", caps.compute_major, caps.compute_minor);
                println!(
                    "  memory:     {:.1} / {:.1} GiB free",
                    gib(caps.free_memory),
                    gib(caps.total_memory)
                );
            }
            println!("  emulated:   {}", caps.emulated);
            println!("  timing:     {}", caps.timing);
            println!("  global sync: {}", caps.global_sync);
        }
        Err(e) => println!("  unavailable: {e}"),
    }
    Ok(())
}

fn gib(bytes: usize) -> f64 {
    bytes as f64 / (1u64 << 30) as f64
}

fn open_caps(config: RuntimeConfig) -> Result<ptxrun_gpu::DeviceCaps> {
    match config.backend {
        BackendKind::Emulated => {
            Ok(EmulatedBackend::<DylibInterpreter>::from_config(config)?.caps().clone())
        }
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => Ok(ptxrun_gpu::cuda::CudaBackend::from_config(config)?
            .caps()
            .clone()),
        #[cfg(not(feature = "cuda"))]
        BackendKind::Cuda => {
            anyhow::bail!("CUDA support not compiled. Rebuild with --features cuda or set CUDACPU=1")
        }
    }
}

// ── Launch ──────────────────────────────────────────────────────────

struct LaunchJob {
    name: String,
    source: String,
    binary: bool,
    global: Vec<usize>,
    local: Option<Vec<usize>>,
    bufs: Vec<BufSpec>,
    wait: bool,
    show: usize,
    json: bool,
}

/// Construct the configured backend once and run `job` on it.
fn with_backend(config: RuntimeConfig, job: &LaunchJob) -> Result<()> {
    match config.backend {
        BackendKind::Emulated => {
            run_launch(&EmulatedBackend::<DylibInterpreter>::from_config(config)?, job)
        }
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => run_launch(&ptxrun_gpu::cuda::CudaBackend::from_config(config)?, job),
        #[cfg(not(feature = "cuda"))]
        BackendKind::Cuda => {
            anyhow::bail!("CUDA support not compiled. Rebuild with --features cuda or set CUDACPU=1")
        }
    }
}

fn run_launch<B: DeviceBackend>(backend: &B, job: &LaunchJob) -> Result<()> {
    let program = backend.compile(&job.name, &job.source, job.binary)?;

    let mut host: Vec<HostArray> = job.bufs.iter().map(|s| HostArray::iota(*s)).collect();
    let mut bufs = Vec::with_capacity(host.len());
    for arr in &host {
        let mut buf = backend.alloc(arr.len(), arr.dtype())?;
        arr.upload(backend, &mut buf)?;
        bufs.push(buf);
    }

    let elapsed = {
        let mut args: Vec<&mut B::Buf> = bufs.iter_mut().collect();
        backend.launch(
            &program,
            &job.global,
            job.local.as_deref(),
            &mut args,
            job.wait,
        )?
    };
    backend.synchronize()?;

    for (arr, buf) in host.iter_mut().zip(&bufs) {
        arr.download(backend, buf)?;
    }

    if job.json {
        let report = json!({
            "program": job.name,
            "elapsed_s": elapsed,
            "buffers": host.iter().map(|a| a.to_json(job.show)).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match elapsed {
        Some(secs) => println!("{}: {:.3} ms", job.name, secs * 1e3),
        None => println!("{}: done", job.name),
    }
    for (i, (arr, buf)) in host.iter().zip(&bufs).enumerate() {
        let values = arr.to_json(job.show);
        let shown = values.as_array().map_or(0, Vec::len);
        let more = if buf.len() > shown { ", ..." } else { "" };
        let items = values
            .as_array()
            .map(|v| v.iter().map(Value::to_string).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        println!("  buf{i} {}[{}]: [{items}{more}]", buf.dtype(), buf.len());
    }
    Ok(())
}

/// Typed host copy of one kernel argument.
enum HostArray {
    U8(Vec<u8>),
    I8(Vec<i8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! each_array {
    ($arr:expr, $v:ident => $body:expr) => {
        match $arr {
            HostArray::U8($v) => $body,
            HostArray::I8($v) => $body,
            HostArray::I32($v) => $body,
            HostArray::I64($v) => $body,
            HostArray::F16($v) => $body,
            HostArray::F32($v) => $body,
            HostArray::F64($v) => $body,
        }
    };
}

impl HostArray {
    /// `0, 1, 2, ...` in the buffer's dtype (integers wrap).
    fn iota(spec: BufSpec) -> Self {
        let n = spec.len;
        match spec.dtype {
            DType::U8 => HostArray::U8((0..n).map(|i| i as u8).collect()),
            DType::I8 => HostArray::I8((0..n).map(|i| i as i8).collect()),
            DType::I32 => HostArray::I32((0..n).map(|i| i as i32).collect()),
            DType::I64 => HostArray::I64((0..n).map(|i| i as i64).collect()),
            DType::F16 => HostArray::F16((0..n).map(|i| f16::from_f32(i as f32)).collect()),
            DType::F32 => HostArray::F32((0..n).map(|i| i as f32).collect()),
            DType::F64 => HostArray::F64((0..n).map(|i| i as f64).collect()),
        }
    }

    fn dtype(&self) -> DType {
        match self {
            HostArray::U8(_) => DType::U8,
            HostArray::I8(_) => DType::I8,
            HostArray::I32(_) => DType::I32,
            HostArray::I64(_) => DType::I64,
            HostArray::F16(_) => DType::F16,
            HostArray::F32(_) => DType::F32,
            HostArray::F64(_) => DType::F64,
        }
    }

    fn len(&self) -> usize {
        each_array!(self, v => v.len())
    }

    fn upload<B: DeviceBackend>(&self, backend: &B, buf: &mut B::Buf) -> Result<()> {
        each_array!(self, v => backend.copy_in(v.as_slice(), buf, None)?);
        Ok(())
    }

    fn download<B: DeviceBackend>(&mut self, backend: &B, buf: &B::Buf) -> Result<()> {
        each_array!(self, v => backend.copy_out(buf, v.as_mut_slice())?);
        Ok(())
    }

    fn to_json(&self, limit: usize) -> Value {
        fn preview<T: serde::Serialize>(v: &[T], limit: usize) -> Value {
            json!(&v[..v.len().min(limit)])
        }
        match self {
            HostArray::U8(v) => preview(v, limit),
            HostArray::I8(v) => preview(v, limit),
            HostArray::I32(v) => preview(v, limit),
            HostArray::I64(v) => preview(v, limit),
            HostArray::F16(v) => {
                let widened: Vec<f32> = v.iter().take(limit).map(|x| x.to_f32()).collect();
                json!(widened)
            }
            HostArray::F32(v) => preview(v, limit),
            HostArray::F64(v) => preview(v, limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buf_spec_parses_dtype_and_len() {
        let spec = parse_buf_spec("f32:256").unwrap();
        assert_eq!(spec.dtype, DType::F32);
        assert_eq!(spec.len, 256);
        assert!(parse_buf_spec("half:4").is_ok());
    }

    #[test]
    fn buf_spec_rejects_garbage() {
        assert!(parse_buf_spec("f32").is_err());
        assert!(parse_buf_spec("f128:4").is_err());
        assert!(parse_buf_spec("i32:-1").is_err());
        assert!(parse_buf_spec("i32:0").is_err());
    }

    #[test]
    fn iota_wraps_small_integers() {
        let arr = HostArray::iota(BufSpec {
            dtype: DType::U8,
            len: 258,
        });
        match arr {
            HostArray::U8(v) => assert_eq!(&v[254..], &[254, 255, 0, 1]),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn json_preview_is_truncated() {
        let arr = HostArray::iota(BufSpec {
            dtype: DType::F16,
            len: 10,
        });
        assert_eq!(arr.to_json(3), json!([0.0, 1.0, 2.0]));
        assert_eq!(arr.len(), 10);
        assert_eq!(arr.dtype(), DType::F16);
    }

    #[test]
    fn cli_parses_launch() {
        let cli = Cli::try_parse_from([
            "ptxrun", "launch", "k.cu", "--global", "256,2", "--local", "64", "--buf", "f32:512",
            "--buf", "i32:512", "--wait",
        ])
        .unwrap();
        match cli.command {
            Commands::Launch {
                global, local, bufs, wait, ..
            } => {
                assert_eq!(global, vec![256, 2]);
                assert_eq!(local, Some(vec![64]));
                assert_eq!(bufs.len(), 2);
                assert_eq!(bufs[1].dtype, DType::I32);
                assert!(wait);
            }
            _ => panic!("expected launch"),
        }
    }
}
