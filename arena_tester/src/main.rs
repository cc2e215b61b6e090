use anyhow::{Context, Result, bail};
use arena_tracker::io::{BackgroundStore, DebugSink, DirectoryDebugSink, PngBackgroundStore, image_helper};
use arena_tracker::{Frame, FrameOutcome, OperatingMode, TrackerConfig, TrackingSession, spawn_stream};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm"];

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Track,
    Estimate,
}

/// Runs the arena tracker over a directory of recorded frames.
#[derive(Debug, Parser)]
#[command(name = "arena_tester", version)]
struct Args {
    /// Directory of frame images, processed in file-name order.
    input: PathBuf,
    /// JSON-lines file for per-frame reports (stdout when omitted).
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Configuration file (toml, json or yaml).
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Overrides the configured operating mode.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Background image to load or save.
    #[arg(long)]
    background: Option<PathBuf>,
    /// Frame rate used to stamp frames.
    #[arg(long, default_value_t = 25.0)]
    fps: f64,
    /// Writes intermediate images to this directory.
    #[arg(long)]
    debug_dir: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("ARENA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading frame directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn build_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = TrackerConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(mode) = args.mode {
        config.mode = match mode {
            ModeArg::Track => OperatingMode::Track,
            ModeArg::Estimate => OperatingMode::EstimateBackground,
        };
    }
    if let Some(path) = &args.background {
        config.background.image_path = Some(path.clone());
    }
    if let Some(dir) = &args.debug_dir {
        config.debug.enabled = true;
        config.debug.output_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    if !(args.fps > 0.0) {
        bail!("--fps must be positive");
    }

    // --- 1. Configuration & Session ---
    let config = build_config(&args)?;
    let mut session = TrackingSession::new(config.clone())?;
    if let Some(path) = &config.background.image_path {
        let store: Arc<dyn BackgroundStore> = Arc::new(PngBackgroundStore::new(path));
        session = session.with_background_store(store);
    }
    if config.debug.enabled {
        let sink: Arc<dyn DebugSink> = Arc::new(DirectoryDebugSink::new(&config.debug.output_dir));
        session = session.with_debug_sink(sink);
    }
    let session = Arc::new(session);

    // --- 2. Trigger listener ---
    let mut triggers = session.subscribe();
    let trigger_task = tokio::spawn(async move {
        let mut fired = 0usize;
        loop {
            match triggers.recv().await {
                Ok(event) => {
                    fired += 1;
                    info!(frame = event.frame, count = event.count, "trigger");
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "trigger listener lagged"),
                Err(RecvError::Closed) => break fired,
            }
        }
    });

    // --- 3. Output ---
    let mut out: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };

    // --- 4. Main Processing Loop ---
    // Recorded frames are fed one at a time so none is superseded.
    let frames = list_frames(&args.input)?;
    info!(frames = frames.len(), mode = ?config.mode, "starting");
    let (sender, mut handle) = spawn_stream(Arc::clone(&session));
    let mut tracked = 0usize;
    for (index, path) in frames.iter().enumerate() {
        let image = match image_helper::load_gray(path) {
            Ok(image) => image,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable frame skipped");
                continue;
            }
        };
        let index = index as u64;
        sender.send(Frame::new(image, index, index as f64 / args.fps))?;
        match handle.next_outcome().await {
            Some(Ok(FrameOutcome::Tracked(report))) => {
                tracked += 1;
                serde_json::to_writer(&mut out, &report)?;
                writeln!(out)?;
            }
            Some(Ok(FrameOutcome::BackgroundFinalized { samples })) => {
                info!(samples, "background ready");
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => warn!(path = %path.display(), error = %err, "frame failed"),
            None => bail!("frame stream closed unexpectedly"),
        }
    }

    // --- 5. Shutdown ---
    drop(sender);
    let summary = handle.finish().await?;
    out.flush()?;
    drop(session);
    let fired = trigger_task.await.unwrap_or(0);
    info!(
        tracked,
        flushed = summary.tracks.len(),
        background_finalized = summary.background_finalized,
        triggers = fired,
        "done"
    );
    Ok(())
}
