//! hushline - Offline noise suppression host
//!
//! Runs a WAV file through the real-time pipeline block by block, as an audio
//! device would, and writes the processed signal.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use hushline_common::{ModelSource, PipelineEvent, Topology};
use hushline_rt::engine::builtin::{ModelDescriptor, DEFAULT_FRAME_LENGTH};
use hushline_rt::offline::{read_wav_mono, render, write_wav_mono, MonoClip};
use hushline_rt::{PipelineBuilder, PipelineHandle, TomlConfig};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for the engine to load
const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Command-line arguments for hushline
#[derive(Parser, Debug)]
#[command(name = "hushline")]
#[command(about = "Real-time noise suppression pipeline (offline WAV host)")]
#[command(version)]
struct Args {
    /// Input WAV file (any channel count; mixed to mono)
    input: PathBuf,

    /// Output WAV file (mono, 32-bit float)
    output: PathBuf,

    /// Model file (defaults to a passthrough engine)
    #[arg(short, long, env = "HUSHLINE_MODEL")]
    model: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host block size in samples
    #[arg(short, long, default_value = "128", env = "HUSHLINE_BLOCK_SIZE")]
    block_size: usize,

    /// Maximum noise attenuation in dB
    #[arg(long, default_value = "100.0", env = "HUSHLINE_ATTENUATION_LIMIT_DB")]
    attenuation_limit_db: f32,

    /// Post-filter beta sent after the engine is ready
    #[arg(long)]
    post_filter_beta: Option<f32>,

    /// Where the engine runs (in_thread | worker), overrides the config file
    #[arg(long)]
    topology: Option<Topology>,

    /// Pace blocks at their real-time duration
    #[arg(long)]
    realtime: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing (RUST_LOG wins over the config file)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hushline: {} -> {}", args.input.display(), args.output.display());

    if args.block_size == 0 {
        bail!("--block-size must be > 0");
    }
    if let Some(topology) = args.topology {
        config.pipeline.topology = topology;
    }
    config.pipeline.max_block_size = config.pipeline.max_block_size.max(args.block_size);
    config.pipeline.validate().context("Invalid pipeline configuration")?;

    if config.pipeline.topology == Topology::Worker && !args.realtime {
        warn!("Worker topology without --realtime: blocks arrive faster than real time, expect underruns");
    }

    let clip = read_wav_mono(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let model_bytes = match &args.model {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read model {}", path.display()))?,
        None => {
            info!("No model given, using passthrough engine");
            ModelDescriptor::passthrough_bytes(DEFAULT_FRAME_LENGTH)
        }
    };

    let (handle, mut processor, controller_task) = PipelineBuilder::new(config.pipeline.clone())
        .spawn()
        .context("Failed to build pipeline")?;

    let mut events = handle.subscribe();
    handle
        .init(ModelSource::bytes(model_bytes), args.attenuation_limit_db)
        .await
        .context("Failed to send Init")?;
    wait_for_engine(&mut events).await?;

    if let Some(beta) = args.post_filter_beta {
        handle.update_params(None, Some(beta)).await?;
    }

    // Drive the processor from a dedicated thread, like an audio callback
    let block_size = args.block_size;
    let realtime = args.realtime;
    let sample_rate = clip.sample_rate;
    let samples = clip.samples;
    let audio_thread = std::thread::Builder::new()
        .name("hushline-audio".to_string())
        .spawn(move || render(&mut processor, &samples, block_size, sample_rate, realtime))
        .context("Failed to start audio thread")?;

    let rendered = tokio::task::spawn_blocking(move || audio_thread.join())
        .await
        .context("Audio thread join failed")?
        .map_err(|_| anyhow::anyhow!("Audio thread panicked"))??;

    log_stats(&handle);

    write_wav_mono(
        &args.output,
        &MonoClip {
            samples: rendered,
            sample_rate,
        },
    )
    .with_context(|| format!("Failed to write {}", args.output.display()))?;

    handle.dispose().await?;
    drop(handle);
    controller_task.await.context("Controller task failed")?;

    info!("Done");
    Ok(())
}

/// Wait for Ready; an Error means the pipeline will pass audio through
async fn wait_for_engine(events: &mut broadcast::Receiver<PipelineEvent>) -> Result<()> {
    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!("Missed {} pipeline events", skipped);
                continue;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => bail!("Pipeline stopped before becoming ready"),
            Err(_) => bail!("Engine did not load within {:?}", READY_TIMEOUT),
        };

        match event {
            PipelineEvent::Ready {
                frame_length,
                topology,
                ..
            } => {
                info!("Engine ready (frame_length={}, topology={})", frame_length, topology);
                return Ok(());
            }
            PipelineEvent::Error { message, .. } => {
                warn!("Engine unavailable, output will be unprocessed: {}", message);
                return Ok(());
            }
            _ => {}
        }
    }
}

fn log_stats(handle: &PipelineHandle) {
    let stats = handle.stats();
    info!(
        "Frames: submitted={} processed={} failed={}",
        stats.frames_submitted, stats.frames_processed, stats.processing_failures
    );
    info!(
        "Drain: underruns={} overruns={} dropped_samples={} declicks={}",
        stats.underruns, stats.overruns, stats.dropped_samples, stats.declick_events
    );
    match serde_json::to_string(&stats) {
        Ok(json) => debug!("Final stats: {}", json),
        Err(e) => warn!("Could not serialize stats: {}", e),
    }
}
