//! Renders a transition between two images to a PNG sequence.
//!
//! Paint ticks are simulated at a fixed rate, so the output is reproducible
//! for a given seed whatever the machine's speed.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use photo_frame_compositor::config::CompositorConfig;
use photo_frame_compositor::{
    DisplayId, Frame, GpuContextManager, TickReport, TransitionManager,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "transition-preview", about = "Render a compositor transition to PNG frames")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Image shown before the transition
    #[arg(long, value_name = "IMAGE")]
    from: PathBuf,

    /// Image shown after the transition
    #[arg(long, value_name = "IMAGE")]
    to: PathBuf,

    /// Directory receiving frame-NNNN.png files
    #[arg(long, value_name = "DIR")]
    out: PathBuf,

    /// Simulated paint rate
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Skip gpu probing and render in software
    #[arg(long)]
    software: bool,

    /// Seed for random preset selection
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("photo_frame_compositor={level}").parse()?)
        .add_directive(format!("transition_preview={level}").parse()?)
        .add_directive("wgpu=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgba8();
    Ok(Frame::from_rgba_image(image, 1.0))
}

fn write_frame(frame: &Frame, path: &Path) -> Result<()> {
    let image = frame
        .to_rgba_image()
        .context("output surface does not match its declared size")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = match &cli.config {
        Some(path) => CompositorConfig::from_yaml_file(path)?
            .validated()
            .context("validating configuration")?,
        None => CompositorConfig::default(),
    };
    if cli.fps == 0 {
        bail!("--fps must be greater than zero");
    }

    let old = load_frame(&cli.from)?;
    let new = load_frame(&cli.to)?;
    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("failed to create {}", cli.out.display()))?;

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let descriptor = config.transition.choose(&mut rng)?;
    let gpu = if cli.software || !config.gpu.enabled {
        GpuContextManager::software_only()
    } else {
        GpuContextManager::with_wgpu(&config.gpu)
    };
    let mut manager = TransitionManager::new(&config, gpu);

    let display = DisplayId(0);
    let start = Instant::now();
    if !manager.request_transition(display, old, new, descriptor, start) {
        bail!("display is busy");
    }
    let tier = manager.current_tier(display);
    info!(%tier, "preview_start");

    let step = Duration::from_secs(1) / cli.fps;
    let mut now = start;
    let mut index = 0u32;
    loop {
        let report = manager.paint_tick(display, now);
        if let Some(frame) = manager.current_output_surface(display) {
            write_frame(frame, &cli.out.join(format!("frame-{index:04}.png")))?;
        }
        index += 1;
        match report {
            TickReport::Rendered { .. } => now += step,
            TickReport::Finished { .. } | TickReport::Idle | TickReport::UnknownDisplay => break,
        }
    }

    info!(frames = index, summary = %manager.telemetry().summary(), "preview_done");
    Ok(())
}
