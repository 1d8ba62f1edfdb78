//! Post-processing hand-off for finished takes

use super::state::RecordingOutput;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Receives every finalized take. Called off the recorder queue.
pub trait PostProcessor: Send + Sync {
    fn recording_finished(&self, output: &RecordingOutput);
}

/// Extracts a scaled JPEG thumbnail next to each take
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    binary: PathBuf,
    width: u32,
}

impl FfmpegThumbnailer {
    pub fn new(binary: impl Into<PathBuf>, width: u32) -> Self {
        Self {
            binary: binary.into(),
            width,
        }
    }

    /// Where the thumbnail for `take` is written
    pub fn thumbnail_path(take: &Path) -> PathBuf {
        take.with_extension("jpg")
    }

    pub fn generate(&self, take: &Path) -> Result<PathBuf, String> {
        let thumbnail = Self::thumbnail_path(take);
        let output = Command::new(&self.binary)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(take)
            .args(["-frames:v", "1", "-vf"])
            .arg(format!("scale={}:-2", self.width))
            .args(["-q:v", "2"])
            .arg(&thumbnail)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| format!("Failed to execute ffmpeg: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("FFmpeg thumbnail generation failed: {}", stderr.trim()));
        }
        if !thumbnail.exists() {
            return Err("Thumbnail file was not created".to_string());
        }
        Ok(thumbnail)
    }
}

impl PostProcessor for FfmpegThumbnailer {
    fn recording_finished(&self, output: &RecordingOutput) {
        if output.finalize_error.is_some() || !output.path.exists() {
            tracing::debug!("Skipping thumbnail for incomplete take {:?}", output.path);
            return;
        }
        match self.generate(&output.path) {
            Ok(path) => tracing::info!("Thumbnail written to {:?}", path),
            Err(e) => tracing::warn!("Thumbnail for {:?} failed: {}", output.path, e),
        }
    }
}
