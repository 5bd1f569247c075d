// bin/rays.rs — headless front end for the trace pipeline.
//
//   rays render [--config scene.toml] [--width W] [--height H] [--aa N]
//               [--backend cpu|gpu] [--profile native|constrained]
//               [--frames N] [--output frame.png]
//   rays info   [--backend cpu|gpu] [--profile native|constrained]
//
// Log verbosity follows RUST_LOG (default `info`). Any error is printed
// and the process exits with status 1.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rays::{create_device, BackendKind, ComputeDevice, DeviceProfile, RaysResult, RenderConfig, TraceProcessor};

#[derive(Parser, Debug)]
#[command(name = "rays", version, about = "Supersampled compute ray tracer")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one or more frames, optionally writing the last as PNG.
    Render(RenderArgs),
    /// Open a device and print what was selected.
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// TOML file with `[render]` and `[scene]` tables.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Supersampling factor per axis.
    #[arg(long)]
    aa: Option<u32>,

    #[arg(long)]
    backend: Option<BackendKind>,

    #[arg(long)]
    profile: Option<DeviceProfile>,

    /// Number of frames to render.
    #[arg(long)]
    frames: Option<u32>,

    /// PNG path for the last frame.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    #[arg(long, default_value_t = BackendKind::Gpu)]
    backend: BackendKind,

    #[arg(long, default_value_t = DeviceProfile::Native)]
    profile: DeviceProfile,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Info(args) => cmd_info(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &RenderArgs) -> RaysResult<RenderConfig> {
    let mut config = match &args.config {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };
    let r = &mut config.render;
    if let Some(w) = args.width {
        r.width = w;
    }
    if let Some(h) = args.height {
        r.height = h;
    }
    if let Some(aa) = args.aa {
        r.aa = aa;
    }
    if let Some(b) = args.backend {
        r.backend = b;
    }
    if let Some(p) = args.profile {
        r.profile = p;
    }
    if let Some(f) = args.frames {
        r.frames = f;
    }
    if let Some(o) = &args.output {
        r.output = Some(o.clone());
    }
    let config = config.normalized();
    config.validate()?;
    Ok(config)
}

fn cmd_render(args: RenderArgs) -> RaysResult<()> {
    let config = load_config(&args)?;
    let r = &config.render;
    let device = create_device(r.backend, r.profile)?;
    let mut processor = TraceProcessor::new(device, &config.scene, config.settings())?;

    for _ in 0..r.frames {
        processor.render()?;
        if let Some(stats) = processor.last_stats() {
            tracing::info!("{stats}");
        }
    }

    if let Some(path) = &r.output {
        processor.frame()?.save_png(path)?;
    }
    let stats = processor.device().stats();
    tracing::info!(%stats, frames = processor.frames(), "done");
    Ok(())
}

fn cmd_info(args: InfoArgs) -> RaysResult<()> {
    let device = create_device(args.backend, args.profile)?;
    println!("{}", device.describe());
    Ok(())
}
