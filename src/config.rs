//! Pipeline configuration
//!
//! Loaded from TOML at an explicit path, at `$TAKE_RECORDER_CONFIG`, or at
//! the platform config directory. Missing files fall back to defaults.

use crate::capture::FrameRate;
use crate::compositor::{CompositorConfig, Rect, Size};
use crate::recorder::RecorderConfig;
use crate::writer::{FfmpegOptions, DEFAULT_AUDIO_BITRATE_KBPS};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "TAKE_RECORDER_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub recorder: RecorderSection,

    #[serde(default)]
    pub compositor: CompositorSection,

    #[serde(default)]
    pub writer: WriterSection,

    #[serde(default)]
    pub output: OutputSection,

    #[serde(default)]
    pub logging: LoggingSection,

    /// Where this config was loaded from (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderSection {
    /// Lead added to the first video timestamp (ms)
    #[serde(default = "default_device_lead_ms")]
    pub lead_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositorSection {
    /// Recorder lead on the streaming path (ms)
    #[serde(default = "default_streaming_lead_ms")]
    pub lead_time_ms: u64,

    #[serde(default = "default_canvas_width")]
    pub canvas_width: u32,

    #[serde(default = "default_canvas_height")]
    pub canvas_height: u32,

    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// RGBA fill behind every layer
    #[serde(default = "default_background")]
    pub background_rgba: [u8; 4],

    #[serde(default = "default_min_bitrate")]
    pub min_bitrate_kbps: u32,

    #[serde(default = "default_max_bitrate")]
    pub max_bitrate_kbps: u32,

    /// Front camera rectangle; bottom-right inset when unset
    #[serde(default)]
    pub front_rect: Option<Rect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterSection {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_binary: PathBuf,

    /// Frames queued ahead of the encoder before back-pressure
    #[serde(default = "default_queue_depth")]
    pub video_queue_depth: usize,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,

    /// Width of the JPEG thumbnail written next to each take, 0 to disable
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_takes_dir")]
    pub takes_dir: PathBuf,

    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_device_lead_ms() -> u64 {
    1_000
}

fn default_streaming_lead_ms() -> u64 {
    5_000
}

fn default_canvas_width() -> u32 {
    1920
}

fn default_canvas_height() -> u32 {
    1080
}

fn default_frame_rate() -> u32 {
    30
}

fn default_background() -> [u8; 4] {
    [0, 0, 0, 255]
}

fn default_min_bitrate() -> u32 {
    1_500
}

fn default_max_bitrate() -> u32 {
    6_000
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_queue_depth() -> usize {
    8
}

fn default_audio_bitrate() -> u32 {
    DEFAULT_AUDIO_BITRATE_KBPS
}

fn default_thumbnail_width() -> u32 {
    320
}

fn default_takes_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "take-recorder", "take-recorder")
        .map(|dirs| dirs.data_dir().join("takes"))
        .unwrap_or_else(|| std::env::temp_dir().join("take-recorder-takes"))
}

fn default_prefix() -> String {
    "take".to_string()
}

fn default_filter() -> String {
    "take_recorder=debug".to_string()
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            lead_time_ms: default_device_lead_ms(),
        }
    }
}

impl Default for CompositorSection {
    fn default() -> Self {
        Self {
            lead_time_ms: default_streaming_lead_ms(),
            canvas_width: default_canvas_width(),
            canvas_height: default_canvas_height(),
            frame_rate: default_frame_rate(),
            background_rgba: default_background(),
            min_bitrate_kbps: default_min_bitrate(),
            max_bitrate_kbps: default_max_bitrate(),
            front_rect: None,
        }
    }
}

impl Default for WriterSection {
    fn default() -> Self {
        Self {
            ffmpeg_binary: default_ffmpeg(),
            video_queue_depth: default_queue_depth(),
            audio_bitrate_kbps: default_audio_bitrate(),
            thumbnail_width: default_thumbnail_width(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            takes_dir: default_takes_dir(),
            prefix: default_prefix(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, else `$TAKE_RECORDER_CONFIG`, else the default
    /// location. Only an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::load_from(Path::new(&env_path));
        }
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load and validate a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: PipelineConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// File this config came from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Platform config file location
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "take-recorder", "take-recorder")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.recorder.lead_time_ms == 0 {
            bail!("recorder.lead_time_ms must be greater than zero");
        }
        let compositor = &self.compositor;
        if compositor.lead_time_ms == 0 {
            bail!("compositor.lead_time_ms must be greater than zero");
        }
        if compositor.canvas_width == 0 || compositor.canvas_height == 0 {
            bail!(
                "compositor canvas must be non-empty (got {}x{})",
                compositor.canvas_width,
                compositor.canvas_height
            );
        }
        if let Err(e) = FrameRate::try_from(compositor.frame_rate) {
            bail!("compositor.frame_rate: {}", e);
        }
        if compositor.front_rect.is_some_and(|rect| rect.is_empty()) {
            bail!("compositor.front_rect must be non-empty");
        }
        if compositor.min_bitrate_kbps > compositor.max_bitrate_kbps {
            bail!("compositor.min_bitrate_kbps exceeds max_bitrate_kbps");
        }
        if self.writer.video_queue_depth == 0 {
            bail!("writer.video_queue_depth must be greater than zero");
        }
        if self.output.prefix.trim().is_empty() {
            bail!("output.prefix must not be empty");
        }
        Ok(())
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig::with_lead_time(Duration::from_millis(self.recorder.lead_time_ms))
    }

    /// Recorder tuning for the compositor path
    pub fn streaming_recorder_config(&self) -> RecorderConfig {
        RecorderConfig::with_lead_time(Duration::from_millis(self.compositor.lead_time_ms))
    }

    pub fn compositor_config(&self) -> Result<CompositorConfig> {
        let section = &self.compositor;
        let canvas = Size::new(section.canvas_width, section.canvas_height);
        let frame_rate = FrameRate::try_from(section.frame_rate)
            .map_err(|e| anyhow::anyhow!("compositor.frame_rate: {}", e))?;
        let [r, g, b, a] = section.background_rgba;
        Ok(CompositorConfig {
            canvas,
            frame_rate,
            front_rect: section
                .front_rect
                .unwrap_or_else(|| CompositorConfig::default_front_rect(canvas)),
            background: [b, g, r, a],
            min_bitrate_kbps: section.min_bitrate_kbps,
            max_bitrate_kbps: section.max_bitrate_kbps,
        })
    }

    pub fn ffmpeg_options(&self) -> FfmpegOptions {
        FfmpegOptions {
            binary: self.writer.ffmpeg_binary.clone(),
            video_queue_depth: self.writer.video_queue_depth,
            audio_bitrate_kbps: Some(self.writer.audio_bitrate_kbps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.recorder_config(), RecorderConfig::device());
        assert_eq!(config.streaming_recorder_config(), RecorderConfig::streaming());

        let compositor = config.compositor_config().unwrap();
        assert_eq!(compositor.canvas, Size::new(1920, 1080));
        assert_eq!(compositor.frame_rate, FrameRate::Fps30);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[compositor]
frame_rate = 25
background_rgba = [10, 20, 30, 255]

[output]
prefix = "scene"
"#,
        )
        .unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.config_path(), Some(path.as_path()));
        assert_eq!(config.recorder.lead_time_ms, 1_000);
        assert_eq!(config.output.prefix, "scene");

        let compositor = config.compositor_config().unwrap();
        assert_eq!(compositor.frame_rate, FrameRate::Fps25);
        assert_eq!(compositor.background, [30, 20, 10, 255]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PipelineConfig::default();
        config.compositor.frame_rate = 60;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.recorder.lead_time_ms = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.compositor.front_rect = Some(Rect::new(0, 0, 0, 10));
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.compositor.canvas_height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PipelineConfig::load(Some(&dir.path().join("none.toml"))).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = PipelineConfig::default();
        config.writer.video_queue_depth = 3;
        config.compositor.front_rect = Some(Rect::new(10, 10, 320, 180));
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.writer.video_queue_depth, 3);
        assert_eq!(loaded.compositor.front_rect, Some(Rect::new(10, 10, 320, 180)));
    }
}
