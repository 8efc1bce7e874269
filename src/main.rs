// =============================================================================
// VK-SAMPLES - Headless Vulkan feature samples
// =============================================================================
//
// Each sample renders a fixed number of frames into an offscreen image on
// its own. Nothing is presented; the last frame can be saved as PNG.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  main: CLI + config.toml, logging, sample selection             │
// │    └── VulkanDevice (instance, queue, allocator)                │
// │          └── SampleRunner (command buffers, fences, timing)     │
// │                └── Sample (render passes, pipelines, meshes)    │
// │                      └── capture (readback to PNG)              │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence
// 2. Sample::update (camera, animation)
// 3. Sample::record into the slot's command buffer
// 4. Submit, signalling the slot's fence
//
// =============================================================================

mod backend;
mod capture;
mod cli;
mod config;
mod graph;
mod samples;
mod scene;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use backend::VulkanDevice;
use cli::Args;
use config::Config;
use samples::{SampleContext, SampleError, SampleRunner, SAMPLES};

const DEFAULT_CONFIG: &str = "config.toml";

fn main() -> Result<()> {
    let args = Args::parse();

    if args.list {
        for entry in SAMPLES {
            println!("{:<16} {}", entry.name, entry.description);
        }
        return Ok(());
    }

    let loaded = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(DEFAULT_CONFIG),
    };
    let mut config = loaded.config.clone();
    args.apply(&mut config);

    init_logging(&config)?;
    log::info!("Starting vk-samples");
    loaded.log();
    if config.log_level_filter().is_none() {
        log::warn!("Unknown log level '{}', defaulting to info", config.debug.log_level);
    }
    config.validate().context("Invalid configuration")?;
    log::info!(
        "Output: {}x{}, {} frames per sample",
        config.output.width,
        config.output.height,
        config.run.frames
    );

    let selected = samples::select(&config.run.samples)?;
    let features = samples::wanted_features(&selected);
    let device = VulkanDevice::new("vk-samples", config.debug.validation_layers, &features)?;
    let ctx = SampleContext::new(device.clone(), &config)?;

    let mut failed = Vec::new();
    for entry in selected {
        if let Err(e) = entry.check(&device) {
            log::warn!("Skipping: {}", e);
            continue;
        }

        log::info!("Running {}: {}", entry.name, entry.description);
        if let Err(e) = run_sample(entry, &ctx, &config) {
            match e.downcast_ref::<SampleError>() {
                Some(SampleError::MissingShaders { .. }) => log::warn!("Skipping: {}", e),
                _ => {
                    log::error!("{} failed: {:#}", entry.name, e);
                    failed.push(entry.name);
                }
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("Samples failed: {}", failed.join(", "));
    }
    log::info!("All samples finished");
    Ok(())
}

fn run_sample(entry: &samples::SampleEntry, ctx: &SampleContext, config: &Config) -> Result<()> {
    let mut sample = (entry.create)(ctx)?;
    let mut runner = SampleRunner::new(
        &ctx.device,
        config.graphics.frames_in_flight,
        config.run.fixed_timestep,
    )?;

    let stats = runner.run(entry.name, sample.as_mut(), config.run.frames)?;
    log::info!(
        "{}: {} frames in {:.2?} ({:.2} ms/frame, {:.0} FPS)",
        entry.name,
        stats.frames,
        stats.elapsed,
        stats.average_frame_ms(),
        stats.fps()
    );

    if config.output.capture {
        capture::save_png(&ctx.device, sample.output(), &config.output.capture_dir, entry.name)?;
    }
    Ok(())
}

/// Writes every log line to stderr and the log file
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initialize logging at the configured level; RUST_LOG takes precedence
fn init_logging(config: &Config) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.log_level_filter().unwrap_or(log::LevelFilter::Info));
    builder.parse_default_env();

    if config.debug.log_to_file {
        let path = &config.debug.log_file;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        writeln!(file, "=== vk-samples log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }

    builder.init();
    Ok(())
}
