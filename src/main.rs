//! Take Recorder command-line interface
//!
//! Drives the synthetic camera backend end to end: list devices, record a
//! take, or run the compositor path with a local recording.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use take_recorder::capture::profile::DEFAULT_PRESET;
use take_recorder::capture::{CameraPosition, ColorSpace, ProfilePresets, SyntheticBackend};
use take_recorder::compositor::{NullPublisher, RunnerStats};
use take_recorder::recorder::RecordingOutput;
use take_recorder::writer::FfmpegWriterFactory;
use take_recorder::{logging, CaptureService, PipelineConfig, StreamSession};

/// Take Recorder - camera takes and live compositing
#[derive(Parser, Debug)]
#[command(name = "take-recorder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $TAKE_RECORDER_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for takes (overrides the config)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the synthetic camera catalog
    Devices,
    /// Record one take
    Record {
        /// Seconds of footage after the aligned start
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Capture preset (e.g. 1080p30, 4k25-log)
        #[arg(long, default_value = DEFAULT_PRESET)]
        preset: String,

        /// Request the extended (log) color space
        #[arg(long)]
        extended: bool,

        /// Use the front camera
        #[arg(long)]
        front: bool,

        /// Record without audio
        #[arg(long)]
        no_audio: bool,
    },
    /// Composite rear and front cameras, record the result
    Stream {
        /// Seconds of footage after the aligned start
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Write the last composite frame to this PNG
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamReport {
    compositor: RunnerStats,
    recording: Option<RecordingOutput>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.output_dir {
        config.output.takes_dir = dir;
    }
    logging::init(&config.logging.filter);
    tracing::info!("Starting Take Recorder v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Devices => {
            let backend = SyntheticBackend::default();
            println!("{}", serde_json::to_string_pretty(backend.devices())?);
        }
        Commands::Record {
            seconds,
            preset,
            extended,
            front,
            no_audio,
        } => {
            let output = record(&config, seconds, &preset, extended, front, !no_audio).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Stream { seconds, snapshot } => {
            let report = stream(&config, seconds, snapshot).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn writer_factory(config: &PipelineConfig) -> Arc<FfmpegWriterFactory> {
    let factory = FfmpegWriterFactory::new(config.ffmpeg_options());
    if !factory.is_available() {
        tracing::warn!(
            "ffmpeg not found at {:?}; takes will fail to encode",
            config.writer.ffmpeg_binary
        );
    }
    Arc::new(factory)
}

async fn record(
    config: &PipelineConfig,
    seconds: u64,
    preset: &str,
    extended: bool,
    front: bool,
    audio: bool,
) -> Result<RecordingOutput> {
    let mut profile = ProfilePresets::builtin().resolve(preset).with_audio(audio);
    if extended {
        profile = profile.with_color_space(ColorSpace::ExtendedLog);
    }
    if front {
        profile = profile.with_position(CameraPosition::Front);
    }

    let service = CaptureService::new(
        config,
        Arc::new(SyntheticBackend::default()),
        writer_factory(config),
    )?;
    let negotiated = service.start_capture(profile).await?;
    tracing::info!("Recording from {} ({:?})", negotiated.device.name, negotiated.tier);

    let path = service.begin_recording()?;
    tracing::info!("Take: {:?}", path);
    let lead = config.recorder_config().lead_time;
    tokio::time::sleep(lead + Duration::from_secs(seconds)).await;
    service.end_recording()?;

    let finished = service.wait_until_idle(Duration::from_secs(seconds + 60)).await;
    service.shutdown();
    if !finished {
        anyhow::bail!("Take did not finish writing in time");
    }
    service.last_output().context("No take was written")
}

async fn stream(config: &PipelineConfig, seconds: u64, snapshot: Option<PathBuf>) -> Result<StreamReport> {
    let session = StreamSession::start(
        config,
        Arc::new(SyntheticBackend::default()),
        writer_factory(config),
        Arc::new(NullPublisher::new()),
    )
    .await?;

    let path = session.begin_recording()?;
    tracing::info!("Streaming take: {:?}", path);
    let lead = config.streaming_recorder_config().lead_time;
    tokio::time::sleep(lead + Duration::from_secs(seconds)).await;

    if let Some(snapshot) = snapshot {
        session
            .compositor()
            .snapshot_png(&snapshot)
            .with_context(|| format!("Failed to write snapshot {:?}", snapshot))?;
    }

    let (compositor, recording) = session.stop(Duration::from_secs(seconds + 60)).await?;
    Ok(StreamReport {
        compositor,
        recording,
    })
}
