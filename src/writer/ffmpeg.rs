//! FFmpeg-backed container writer
//!
//! Video frames are streamed as raw frames to an `ffmpeg` child through a
//! bounded queue; the queue's spare capacity is the input's readiness
//! signal. The encoder runs at a constant frame rate, so presentation-time
//! gaps are filled by repeating the previous frame. Audio is spooled to a
//! PCM sidecar trimmed to the session start. Finalizing muxes both into a
//! QuickTime file carrying the rotation and location metadata, then
//! removes the intermediates.

use super::settings::{AudioTrackSettings, ChannelLayout, VideoTrackSettings};
use super::{
    ContainerWriter, FinishCallback, FinishOutcome, MetadataItem, OutputSettings, WriterError,
    WriterFactory, WriterResult, WriterStatus,
};
use crate::media::{AudioFormat, MediaKind, MediaSample, MediaTime, PooledBuffer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Process-level options for the ffmpeg writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegOptions {
    /// ffmpeg executable
    pub binary: PathBuf,

    /// Frames that may be queued ahead of the encoder
    pub video_queue_depth: usize,

    /// Overrides the AAC bitrate chosen by the output settings
    pub audio_bitrate_kbps: Option<u32>,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            video_queue_depth: 8,
            audio_bitrate_kbps: None,
        }
    }
}

/// Creates `FfmpegWriter`s
#[derive(Debug, Clone, Default)]
pub struct FfmpegWriterFactory {
    options: FfmpegOptions,
}

impl FfmpegWriterFactory {
    pub fn new(options: FfmpegOptions) -> Self {
        Self { options }
    }

    /// Whether the configured ffmpeg binary can be executed
    pub fn is_available(&self) -> bool {
        Command::new(&self.options.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn create(
        &self,
        path: &Path,
        settings: &OutputSettings,
    ) -> WriterResult<Box<dyn ContainerWriter>> {
        if path.exists() {
            return Err(WriterError::CannotCreate(format!(
                "{} already exists",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WriterError::CannotCreate(format!("{}: {e}", parent.display())))?;
        }

        let mut writer = FfmpegWriter::new(self.options.clone(), path.to_path_buf());
        let settings = match self.options.audio_bitrate_kbps {
            Some(kbps) => settings.with_audio_bitrate(kbps),
            None => *settings,
        };
        writer.audio_bitrate_hint = settings.audio.map(|a| a.bitrate_kbps);
        Ok(Box::new(writer))
    }
}

struct Shared {
    status: Mutex<WriterStatus>,
    error: Mutex<Option<String>>,
}

impl Shared {
    fn status(&self) -> WriterStatus {
        *self.status.lock()
    }

    /// Move from `from` to `to`; returns false if the status had moved on
    fn advance(&self, from: WriterStatus, to: WriterStatus) -> bool {
        let mut status = self.status.lock();
        if *status == from {
            *status = to;
            true
        } else {
            false
        }
    }

    fn set(&self, to: WriterStatus) {
        *self.status.lock() = to;
    }

    fn fail(&self, message: String) {
        tracing::error!("Writer failed: {}", message);
        self.error.lock().get_or_insert(message);
        let mut status = self.status.lock();
        if *status != WriterStatus::Cancelled {
            *status = WriterStatus::Failed;
        }
    }
}

type BackgroundWork = Box<dyn FnOnce() + Send + 'static>;

/// Runs finalize and cleanup work off the caller's thread
type Spawner = fn(&str, BackgroundWork) -> std::io::Result<()>;

fn spawn_named(name: &str, work: BackgroundWork) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(work)
        .map(|_| ())
}

struct VideoJob {
    frame: PooledBuffer,
    index: u64,
}

struct AudioSpool {
    file: BufWriter<File>,
    format: Option<AudioFormat>,
    frames_written: u64,
    finished: bool,
}

/// Container writer driving an ffmpeg child process
pub struct FfmpegWriter {
    options: FfmpegOptions,
    path: PathBuf,
    video_path: PathBuf,
    audio_path: PathBuf,
    video: Option<VideoTrackSettings>,
    audio: Option<AudioTrackSettings>,
    audio_bitrate_hint: Option<u32>,
    shared: Arc<Shared>,
    frames_tx: Option<mpsc::Sender<VideoJob>>,
    encoder: Option<JoinHandle<WriterResult<u64>>>,
    spool: Option<AudioSpool>,
    session_start: Option<MediaTime>,
    metadata: Vec<MetadataItem>,
    spawner: Spawner,
}

impl FfmpegWriter {
    pub fn new(options: FfmpegOptions, path: PathBuf) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "take".to_string());
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Self {
            options,
            video_path: dir.join(format!("{stem}.video.mov")),
            audio_path: dir.join(format!("{stem}.audio.pcm")),
            path,
            video: None,
            audio: None,
            audio_bitrate_hint: None,
            shared: Arc::new(Shared {
                status: Mutex::new(WriterStatus::Unknown),
                error: Mutex::new(None),
            }),
            frames_tx: None,
            encoder: None,
            spool: None,
            session_start: None,
            metadata: Vec::new(),
            spawner: spawn_named,
        }
    }

    fn require_status(&self, expected: WriterStatus, operation: &'static str) -> WriterResult<()> {
        let status = self.shared.status();
        if status == expected {
            Ok(())
        } else {
            Err(WriterError::InvalidState { status, operation })
        }
    }

    fn remove_intermediates(video_path: &Path, audio_path: &Path) {
        for path in [video_path, audio_path] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!("Failed to remove {:?}: {}", path, e);
                }
            }
        }
    }

    fn write_audio(&mut self, sample: &MediaSample, start: MediaTime) -> WriterResult<()> {
        let Some(format) = sample.audio_format() else {
            return Ok(());
        };
        let Some(spool) = self.spool.as_mut() else {
            return Err(WriterError::InvalidState {
                status: self.shared.status(),
                operation: "append audio without an audio input",
            });
        };

        match spool.format {
            None => spool.format = Some(format),
            Some(expected) if expected != format => {
                return Err(WriterError::FrameMismatch {
                    expected: format!("{}Hz/{}ch", expected.sample_rate, expected.channels),
                    actual: format!("{}Hz/{}ch", format.sample_rate, format.channels),
                });
            }
            Some(_) => {}
        }

        let bytes_per_frame = format.bytes_per_frame();
        let frames = sample.audio_frame_count() as i64;
        let rate = format.sample_rate as f64;
        let position = (sample.pts.seconds_since(start) * rate).round() as i64;

        // Trim anything before the session start
        let skip = (-position).clamp(0, frames);
        if skip == frames {
            return Ok(());
        }
        let position = position.max(0) as u64;

        // Pad with silence when the block starts noticeably after the spool end
        let tolerance = (format.sample_rate / 50) as u64;
        if position > spool.frames_written + tolerance {
            let gap = (position - spool.frames_written) as usize;
            spool.file.write_all(&vec![0u8; gap * bytes_per_frame])?;
            spool.frames_written += gap as u64;
        }

        let data = &sample.payload[skip as usize * bytes_per_frame..frames as usize * bytes_per_frame];
        spool.file.write_all(data)?;
        spool.frames_written += (frames - skip) as u64;
        Ok(())
    }
}

/// Arguments for the constant-rate encoder reading raw frames on stdin
fn encode_args(video: &VideoTrackSettings, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-y",
        "-loglevel",
        "error",
        "-nostats",
        "-f",
        "rawvideo",
        "-pixel_format",
        video.input.pixel_format.ffmpeg_name(),
        "-video_size",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(format!("{}x{}", video.input.width, video.input.height));
    args.extend([
        "-framerate".to_string(),
        video.frame_rate.to_string(),
        "-i".to_string(),
        "-".to_string(),
    ]);
    if video.transform.mirrored {
        args.extend(["-vf".to_string(), "hflip".to_string()]);
    }
    args.extend(video.codec.ffmpeg_args(video.frame_rate, video.bitrate_kbps));
    args.push("-an".to_string());
    args.push(output.to_string_lossy().to_string());
    args
}

/// Arguments for the final QuickTime mux
fn mux_args(
    video_path: &Path,
    audio: Option<(&Path, AudioFormat, &AudioTrackSettings)>,
    rotation_degrees: u16,
    metadata: &[MetadataItem],
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        "-nostats".into(),
        "-i".into(),
        video_path.to_string_lossy().to_string(),
    ];

    if let Some((audio_path, format, _)) = audio {
        args.extend([
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            format.sample_rate.to_string(),
            "-ac".to_string(),
            format.channels.to_string(),
            "-i".to_string(),
            audio_path.to_string_lossy().to_string(),
        ]);
    }

    args.extend(["-map".to_string(), "0:v".to_string(), "-c:v".to_string(), "copy".to_string()]);

    if let Some((_, _, track)) = audio {
        args.extend([
            "-map".to_string(),
            "1:a".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", track.bitrate_kbps),
            "-ar".to_string(),
            track.sample_rate.to_string(),
        ]);
        if track.layout == ChannelLayout::Stereo {
            args.extend(["-ac".to_string(), "2".to_string()]);
        }
    }

    args.extend([
        "-metadata:s:v:0".to_string(),
        format!("rotate={rotation_degrees}"),
    ]);
    for item in metadata {
        match item {
            MetadataItem::Location(iso6709) => {
                args.extend([
                    "-metadata".to_string(),
                    format!("location={iso6709}"),
                    "-metadata".to_string(),
                    format!("com.apple.quicktime.location.ISO6709={iso6709}"),
                ]);
            }
            MetadataItem::CreationDate(date) => {
                args.extend(["-metadata".to_string(), format!("creation_time={date}")]);
            }
        }
    }

    args.extend([
        "-movflags".to_string(),
        "+faststart+use_metadata_tags".to_string(),
        "-f".to_string(),
        "mov".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

fn run_ffmpeg(binary: &Path, args: &[String]) -> WriterResult<()> {
    tracing::debug!("Running FFmpeg: {:?}", args);
    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| WriterError::Ffmpeg(format!("Failed to run FFmpeg: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WriterError::Ffmpeg(format!(
            "FFmpeg exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Encoder thread body: spawn ffmpeg, then feed it frames until the queue closes
fn run_encoder(
    binary: PathBuf,
    args: Vec<String>,
    mut frames_rx: mpsc::Receiver<VideoJob>,
    shared: Arc<Shared>,
) -> WriterResult<u64> {
    let mut process = Command::new(&binary)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            let message = format!("Failed to start FFmpeg encoder: {e}");
            shared.fail(message.clone());
            WriterError::Ffmpeg(message)
        })?;

    let Some(mut stdin) = process.stdin.take() else {
        let _ = process.kill();
        let message = "Failed to capture FFmpeg stdin".to_string();
        shared.fail(message.clone());
        return Err(WriterError::Ffmpeg(message));
    };

    if !shared.advance(WriterStatus::Starting, WriterStatus::Writing) {
        let _ = process.kill();
        let _ = process.wait();
        return Ok(0);
    }
    tracing::info!("FFmpeg encoder started: {:?}", args);

    let mut next_index: u64 = 0;
    let mut written: u64 = 0;
    let mut repeated: u64 = 0;
    let mut collided: u64 = 0;
    let mut last: Option<PooledBuffer> = None;
    let mut write_error: Option<std::io::Error> = None;

    'frames: while let Some(job) = frames_rx.blocking_recv() {
        if shared.status() == WriterStatus::Cancelled {
            break;
        }
        if job.index < next_index {
            tracing::debug!("Skipping frame for already written slot {}", job.index);
            collided += 1;
            continue;
        }

        while next_index < job.index {
            let filler = last.as_deref().unwrap_or(&job.frame);
            if let Err(e) = stdin.write_all(filler) {
                write_error = Some(e);
                break 'frames;
            }
            next_index += 1;
            written += 1;
            repeated += 1;
        }

        if let Err(e) = stdin.write_all(&job.frame) {
            write_error = Some(e);
            break;
        }
        next_index += 1;
        written += 1;
        last = Some(job.frame);
    }
    drop(last);

    if shared.status() == WriterStatus::Cancelled {
        let _ = process.kill();
        let _ = process.wait();
        return Ok(written);
    }

    // Close stdin to signal EOF
    drop(stdin);
    let output = process
        .wait_with_output()
        .map_err(|e| WriterError::Ffmpeg(format!("Failed to wait for FFmpeg: {e}")))?;

    if !output.status.success() || write_error.is_some() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match write_error {
            Some(e) => format!("Failed to write frame: {e}; {}", stderr.trim()),
            None => format!("FFmpeg exited with {}: {}", output.status, stderr.trim()),
        };
        shared.fail(message.clone());
        return Err(WriterError::Ffmpeg(message));
    }

    if collided > 0 {
        tracing::warn!("{} frames shared a slot with an earlier frame and were skipped", collided);
    }
    tracing::info!(
        "FFmpeg encoder finished: {} frames written ({} repeated to fill gaps)",
        written,
        repeated
    );
    Ok(written)
}

impl ContainerWriter for FfmpegWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_video_input(&mut self, settings: &VideoTrackSettings) -> WriterResult<()> {
        self.require_status(WriterStatus::Unknown, "add video input")?;
        if self.video.is_some() {
            return Err(WriterError::CannotAddInput {
                kind: MediaKind::Video,
                reason: "video input already added".to_string(),
            });
        }
        if settings.input.width == 0 || settings.input.height == 0 || settings.frame_rate == 0 {
            return Err(WriterError::CannotAddInput {
                kind: MediaKind::Video,
                reason: format!(
                    "invalid geometry {}x{} @ {}fps",
                    settings.input.width, settings.input.height, settings.frame_rate
                ),
            });
        }
        self.video = Some(*settings);
        Ok(())
    }

    fn add_audio_input(&mut self, settings: &AudioTrackSettings) -> WriterResult<()> {
        self.require_status(WriterStatus::Unknown, "add audio input")?;
        if self.audio.is_some() {
            return Err(WriterError::CannotAddInput {
                kind: MediaKind::Audio,
                reason: "audio input already added".to_string(),
            });
        }
        let mut settings = *settings;
        if let Some(kbps) = self.audio_bitrate_hint {
            settings.bitrate_kbps = kbps;
        }
        self.audio = Some(settings);
        Ok(())
    }

    fn start_writing(&mut self) -> WriterResult<()> {
        self.require_status(WriterStatus::Unknown, "start writing")?;
        let Some(video) = self.video else {
            return Err(WriterError::CannotAddInput {
                kind: MediaKind::Video,
                reason: "no video input".to_string(),
            });
        };

        if self.audio.is_some() {
            let file = File::create(&self.audio_path)?;
            self.spool = Some(AudioSpool {
                file: BufWriter::new(file),
                format: None,
                frames_written: 0,
                finished: false,
            });
        }

        let (frames_tx, frames_rx) = mpsc::channel(self.options.video_queue_depth.max(1));
        let args = encode_args(&video, &self.video_path);
        let binary = self.options.binary.clone();
        let shared = self.shared.clone();

        self.shared.set(WriterStatus::Starting);
        let handle = std::thread::Builder::new()
            .name("ffmpeg-encoder".to_string())
            .spawn(move || run_encoder(binary, args, frames_rx, shared))
            .map_err(|e| {
                self.shared.set(WriterStatus::Failed);
                WriterError::CannotCreate(format!("Failed to spawn encoder thread: {e}"))
            })?;

        self.frames_tx = Some(frames_tx);
        self.encoder = Some(handle);
        Ok(())
    }

    fn status(&self) -> WriterStatus {
        self.shared.status()
    }

    fn start_session(&mut self, at: MediaTime) -> WriterResult<()> {
        self.require_status(WriterStatus::Writing, "start session")?;
        if self.session_start.is_some() {
            return Err(WriterError::InvalidState {
                status: WriterStatus::Writing,
                operation: "start a second session",
            });
        }
        tracing::info!("Writer session started at {}", at);
        self.session_start = Some(at);
        Ok(())
    }

    fn add_metadata(&mut self, item: MetadataItem) {
        self.metadata.push(item);
    }

    fn is_ready_for_more(&self, kind: MediaKind) -> bool {
        if self.shared.status() != WriterStatus::Writing {
            return false;
        }
        match kind {
            MediaKind::Video => self
                .frames_tx
                .as_ref()
                .map(|tx| tx.capacity() > 0)
                .unwrap_or(false),
            MediaKind::Audio => self.spool.as_ref().map(|s| !s.finished).unwrap_or(false),
        }
    }

    fn append_video(&mut self, frame: PooledBuffer, pts: MediaTime) -> WriterResult<()> {
        self.require_status(WriterStatus::Writing, "append video")?;
        let (Some(start), Some(video)) = (self.session_start, self.video) else {
            return Err(WriterError::InvalidState {
                status: WriterStatus::Writing,
                operation: "append video before the session starts",
            });
        };
        if pts < start {
            tracing::debug!("Ignoring frame at {} before session start {}", pts, start);
            return Ok(());
        }

        let index = (pts.seconds_since(start) * video.frame_rate as f64).round() as u64;
        let Some(tx) = self.frames_tx.as_ref() else {
            return Err(WriterError::InvalidState {
                status: WriterStatus::Writing,
                operation: "append video after the input finished",
            });
        };
        tx.try_send(VideoJob { frame, index }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WriterError::NotReady(MediaKind::Video),
            mpsc::error::TrySendError::Closed(_) => {
                WriterError::Ffmpeg("encoder is no longer accepting frames".to_string())
            }
        })
    }

    fn append_audio(&mut self, sample: MediaSample) -> WriterResult<()> {
        self.require_status(WriterStatus::Writing, "append audio")?;
        let Some(start) = self.session_start else {
            return Err(WriterError::InvalidState {
                status: WriterStatus::Writing,
                operation: "append audio before the session starts",
            });
        };
        if self.spool.as_ref().map(|s| s.finished).unwrap_or(true) {
            return Err(WriterError::NotReady(MediaKind::Audio));
        }
        self.write_audio(&sample, start)
    }

    fn mark_finished(&mut self, kind: MediaKind) {
        match kind {
            MediaKind::Video => {
                self.frames_tx = None;
            }
            MediaKind::Audio => {
                if let Some(spool) = self.spool.as_mut() {
                    spool.finished = true;
                    if let Err(e) = spool.file.flush() {
                        tracing::warn!("Failed to flush audio spool: {}", e);
                    }
                }
            }
        }
    }

    fn finish_writing(&mut self, on_complete: FinishCallback) {
        self.mark_finished(MediaKind::Video);
        self.mark_finished(MediaKind::Audio);

        let encoder = self.encoder.take();
        let spool = self.spool.take();
        let shared = self.shared.clone();
        let binary = self.options.binary.clone();
        let path = self.path.clone();
        let video_path = self.video_path.clone();
        let audio_path = self.audio_path.clone();
        let metadata = std::mem::take(&mut self.metadata);
        let audio_track = self.audio;
        let session_started = self.session_start.is_some();
        let rotation = self
            .video
            .map(|v| v.transform.rotation.degrees())
            .unwrap_or(0);

        let callback = Arc::new(Mutex::new(Some(on_complete)));
        let pending = callback.clone();
        let finalize = move || {
            let audio_frames = spool.as_ref().map(|s| s.frames_written).unwrap_or(0);
            let audio_format = spool.as_ref().and_then(|s| s.format);
            drop(spool);

            let result = (|| -> WriterResult<u64> {
                let encoder = encoder.ok_or_else(|| {
                    WriterError::InvalidState {
                        status: shared.status(),
                        operation: "finish a writer that never started",
                    }
                })?;
                let frames = encoder
                    .join()
                    .map_err(|_| WriterError::Ffmpeg("encoder thread panicked".to_string()))??;
                if !session_started || frames == 0 {
                    return Err(WriterError::Ffmpeg("no video frames were written".to_string()));
                }

                let audio = match (audio_format, audio_track.as_ref()) {
                    (Some(format), Some(track)) if audio_frames > 0 => {
                        Some((audio_path.as_path(), format, track))
                    }
                    _ => None,
                };
                let args = mux_args(&video_path, audio, rotation, &metadata, &path);
                run_ffmpeg(&binary, &args)?;
                Ok(frames)
            })();

            FfmpegWriter::remove_intermediates(&video_path, &audio_path);

            let outcome = match result {
                Ok(video_frames) => {
                    shared.set(WriterStatus::Completed);
                    tracing::info!(
                        "Finalized {:?}: {} video frames, {} audio frames",
                        path,
                        video_frames,
                        audio_frames
                    );
                    FinishOutcome {
                        path,
                        video_frames,
                        audio_frames,
                        error: None,
                    }
                }
                Err(e) => {
                    let message = shared.error.lock().clone().unwrap_or_else(|| e.to_string());
                    shared.fail(message.clone());
                    FinishOutcome {
                        path,
                        video_frames: 0,
                        audio_frames,
                        error: Some(message),
                    }
                }
            };
            if let Some(on_complete) = pending.lock().take() {
                on_complete(outcome);
            }
        };

        if let Err(e) = (self.spawner)("ffmpeg-finalize", Box::new(finalize)) {
            let message = format!("Failed to spawn finalize thread: {e}");
            self.shared.fail(message.clone());
            FfmpegWriter::remove_intermediates(&self.video_path, &self.audio_path);
            // The callback must still run or the recorder never leaves Ending
            if let Some(on_complete) = callback.lock().take() {
                on_complete(FinishOutcome {
                    path: self.path.clone(),
                    video_frames: 0,
                    audio_frames: 0,
                    error: Some(message),
                });
            }
        }
    }

    fn cancel_writing(&mut self) {
        self.shared.set(WriterStatus::Cancelled);
        self.frames_tx = None;
        self.spool = None;

        let encoder = self.encoder.take();
        let video_path = self.video_path.clone();
        let audio_path = self.audio_path.clone();
        let path = self.path.clone();
        let cleanup = move || {
            if let Some(encoder) = encoder {
                let _ = encoder.join();
            }
            FfmpegWriter::remove_intermediates(&video_path, &audio_path);
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        };
        if (self.spawner)("ffmpeg-cancel", Box::new(cleanup)).is_err() {
            tracing::warn!("Failed to spawn cleanup thread for {:?}", self.path);
        }
        tracing::info!("Writer cancelled: {:?}", self.path);
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            self.cancel_writing();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Rotation, Transform};
    use crate::media::{PixelFormat, VideoFormat};
    use crate::writer::VideoCodec;

    fn video_settings(mirrored: bool) -> VideoTrackSettings {
        VideoTrackSettings {
            codec: VideoCodec::H264,
            input: VideoFormat::new(640, 360, PixelFormat::Bgra8),
            frame_rate: 30,
            transform: Transform {
                rotation: Rotation::Deg90,
                mirrored,
            },
            bitrate_kbps: None,
        }
    }

    #[test]
    fn test_encode_args_describe_raw_input() {
        let args = encode_args(&video_settings(false), Path::new("/tmp/t.video.mov"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pixel_format bgra -video_size 640x360 -framerate 30 -i -"));
        assert!(joined.contains("-loglevel error"));
        assert!(!joined.contains("hflip"));
        assert_eq!(args.last().unwrap(), "/tmp/t.video.mov");

        let mirrored = encode_args(&video_settings(true), Path::new("/tmp/t.video.mov"));
        assert!(mirrored.windows(2).any(|w| w[0] == "-vf" && w[1] == "hflip"));
    }

    #[test]
    fn test_mux_args_carry_rotation_and_location() {
        let track = AudioTrackSettings {
            sample_rate: 48_000,
            layout: ChannelLayout::Stereo,
            bitrate_kbps: 192,
        };
        let args = mux_args(
            Path::new("v.mov"),
            Some((Path::new("a.pcm"), AudioFormat::new(44_100, 2), &track)),
            90,
            &[MetadataItem::Location("+37.3349-122.0090/".to_string())],
            Path::new("out.mov"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-f s16le -ar 44100 -ac 2 -i a.pcm"));
        assert!(joined.contains("-metadata:s:v:0 rotate=90"));
        assert!(joined.contains("location=+37.3349-122.0090/"));
        assert!(joined.contains("-c:a aac -b:a 192k -ar 48000"));
        assert_eq!(args.last().unwrap(), "out.mov");
    }

    #[test]
    fn test_mux_without_audio_maps_video_only() {
        let args = mux_args(Path::new("v.mov"), None, 0, &[], Path::new("out.mov"));
        assert!(!args.contains(&"1:a".to_string()));
        assert!(args.contains(&"rotate=0".to_string()));
    }

    #[test]
    fn test_intermediate_paths_sit_next_to_output() {
        let writer = FfmpegWriter::new(FfmpegOptions::default(), PathBuf::from("/takes/a-1.mov"));
        assert_eq!(writer.video_path, PathBuf::from("/takes/a-1.video.mov"));
        assert_eq!(writer.audio_path, PathBuf::from("/takes/a-1.audio.pcm"));
    }

    #[test]
    fn test_inputs_rejected_after_start_state() {
        let mut writer = FfmpegWriter::new(FfmpegOptions::default(), PathBuf::from("/tmp/x.mov"));
        writer.shared.set(WriterStatus::Writing);
        let err = writer.add_video_input(&video_settings(false)).unwrap_err();
        assert!(matches!(err, WriterError::InvalidState { .. }));
        writer.shared.set(WriterStatus::Unknown);
    }

    fn refuse_spawn(_name: &str, _work: BackgroundWork) -> std::io::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, "no threads left"))
    }

    #[test]
    fn test_finish_reports_when_finalize_thread_cannot_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FfmpegWriter::new(FfmpegOptions::default(), dir.path().join("take.mov"));
        writer.spawner = refuse_spawn;

        let (tx, rx) = std::sync::mpsc::channel();
        writer.finish_writing(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.path, dir.path().join("take.mov"));
        assert_eq!(outcome.video_frames, 0);
        assert!(outcome.error.unwrap().contains("no threads left"));
        assert_eq!(writer.status(), WriterStatus::Failed);
    }

    #[test]
    fn test_missing_binary_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let options = FfmpegOptions {
            binary: dir.path().join("no-such-ffmpeg"),
            video_queue_depth: 2,
            ..FfmpegOptions::default()
        };
        let mut writer = FfmpegWriter::new(options, dir.path().join("take.mov"));
        writer.add_video_input(&video_settings(false)).unwrap();
        writer.start_writing().unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while writer.status() == WriterStatus::Starting && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(writer.status(), WriterStatus::Failed);
        assert!(!writer.is_ready_for_more(MediaKind::Video));

        let (tx, rx) = std::sync::mpsc::channel();
        writer.finish_writing(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        let outcome = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(outcome.error.is_some());
    }
}
