//! Synthetic camera backend
//!
//! A software camera with a configurable device catalog. It implements
//! discovery, device control and sample delivery, so the whole pipeline
//! runs without hardware. The source thread produces a moving test pattern
//! and, when audio is requested, a 440 Hz stereo tone, timestamped on the
//! shared host media clock.

use super::error::{CaptureError, CaptureResult};
use super::negotiator::NegotiatedDevice;
use super::profile::CaptureProfile;
use super::source::{DropReason, DroppedFrame, SampleSink, SampleSource, SourceProvider};
use super::traits::{
    CameraPosition, ColorSpace, DeviceCandidate, DeviceConfiguration, DeviceControl,
    DeviceDiscovery, DeviceFormat, Resolution, EXTENDED_COLOR_MARKER,
};
use crate::media::{
    AudioFormat, BufferPool, MediaKind, MediaSample, MediaTime, PixelFormat, PooledBuffer,
    VideoFormat, NANOS_TIMESCALE,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Audio sample rate of the synthetic microphone
pub const SYNTHETIC_SAMPLE_RATE: u32 = 48_000;

/// Host media clock shared by every synthetic source
pub fn host_time(at: Instant) -> MediaTime {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    MediaTime::from_duration(at.saturating_duration_since(epoch), NANOS_TIMESCALE)
}

/// Configuration step that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStep {
    Lock,
    Format,
    ColorSpace,
    Restore,
}

#[derive(Debug, Clone)]
struct DeviceState {
    configuration: DeviceConfiguration,
    locked: bool,
}

/// Software camera catalog with device control
pub struct SyntheticBackend {
    catalog: Vec<DeviceCandidate>,
    state: Mutex<HashMap<String, DeviceState>>,
    fail_on: Mutex<Option<ConfigStep>>,
}

impl SyntheticBackend {
    /// Backend exposing `catalog`
    pub fn with_catalog(catalog: Vec<DeviceCandidate>) -> Self {
        let state = catalog
            .iter()
            .map(|device| {
                (
                    device.id.clone(),
                    DeviceState {
                        configuration: DeviceConfiguration {
                            format: None,
                            frame_rate: None,
                            color_space: ColorSpace::Standard,
                        },
                        locked: false,
                    },
                )
            })
            .collect();
        Self {
            catalog,
            state: Mutex::new(state),
            fail_on: Mutex::new(None),
        }
    }

    /// A camera offering only standard color space formats
    pub fn standard_camera(
        id: &str,
        position: CameraPosition,
        resolutions: &[Resolution],
    ) -> DeviceCandidate {
        DeviceCandidate {
            id: id.to_string(),
            name: format!("Synthetic {position} camera ({id})"),
            position,
            formats: resolutions
                .iter()
                .map(|&resolution| DeviceFormat {
                    resolution,
                    max_frame_rate: 60,
                    color_spaces: vec![ColorSpace::Standard],
                    codec_marker: "BGRA".to_string(),
                    pixel_format: PixelFormat::Bgra8,
                })
                .collect(),
            max_zoom: 1.0,
            has_torch: false,
            supports_stable_color: false,
        }
    }

    /// A camera offering standard and log formats at each resolution
    pub fn log_camera(id: &str, position: CameraPosition, resolutions: &[Resolution]) -> DeviceCandidate {
        let mut device = Self::standard_camera(id, position, resolutions);
        for &resolution in resolutions {
            device.formats.push(DeviceFormat {
                resolution,
                max_frame_rate: 30,
                color_spaces: vec![ColorSpace::Standard, ColorSpace::ExtendedLog],
                codec_marker: EXTENDED_COLOR_MARKER.to_string(),
                pixel_format: PixelFormat::P010,
            });
        }
        device.max_zoom = 6.0;
        device.has_torch = true;
        device.supports_stable_color = true;
        device
    }

    /// Make the given configuration step fail from now on
    pub fn fail_on(&self, step: ConfigStep) {
        *self.fail_on.lock() = Some(step);
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        *self.fail_on.lock() = None;
    }

    /// Whether the device is currently locked for configuration
    pub fn is_locked(&self, device_id: &str) -> bool {
        self.state
            .lock()
            .get(device_id)
            .map(|s| s.locked)
            .unwrap_or(false)
    }

    /// Every device in the catalog
    pub fn devices(&self) -> &[DeviceCandidate] {
        &self.catalog
    }

    fn should_fail(&self, step: ConfigStep) -> bool {
        *self.fail_on.lock() == Some(step)
    }

    fn with_locked<T>(
        &self,
        device_id: &str,
        apply: impl FnOnce(&mut DeviceState) -> CaptureResult<T>,
    ) -> CaptureResult<T> {
        let mut state = self.state.lock();
        let device = state
            .get_mut(device_id)
            .ok_or_else(|| CaptureError::DeviceNotFound(device_id.to_string()))?;
        if !device.locked {
            return Err(CaptureError::LockFailed {
                device: device_id.to_string(),
                reason: "configuration requires the device lock".to_string(),
            });
        }
        apply(device)
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::with_catalog(vec![
            Self::log_camera(
                "synthetic-back-wide",
                CameraPosition::Back,
                &[Resolution::HD_1080, Resolution::UHD_4K],
            ),
            Self::standard_camera(
                "synthetic-front",
                CameraPosition::Front,
                &[Resolution::HD_1080, Resolution::new(1280, 720)],
            ),
        ])
    }
}

impl DeviceDiscovery for SyntheticBackend {
    fn enumerate(&self, position: CameraPosition) -> Vec<DeviceCandidate> {
        self.catalog
            .iter()
            .filter(|device| device.position == position)
            .cloned()
            .collect()
    }
}

impl DeviceControl for SyntheticBackend {
    fn lock_for_configuration(&self, device_id: &str) -> CaptureResult<()> {
        if self.should_fail(ConfigStep::Lock) {
            return Err(CaptureError::LockFailed {
                device: device_id.to_string(),
                reason: "device busy".to_string(),
            });
        }
        let mut state = self.state.lock();
        let device = state
            .get_mut(device_id)
            .ok_or_else(|| CaptureError::DeviceNotFound(device_id.to_string()))?;
        if device.locked {
            return Err(CaptureError::LockFailed {
                device: device_id.to_string(),
                reason: "already locked".to_string(),
            });
        }
        device.locked = true;
        Ok(())
    }

    fn active_configuration(&self, device_id: &str) -> CaptureResult<DeviceConfiguration> {
        self.state
            .lock()
            .get(device_id)
            .map(|s| s.configuration.clone())
            .ok_or_else(|| CaptureError::DeviceNotFound(device_id.to_string()))
    }

    fn set_active_format(
        &self,
        device_id: &str,
        format: &DeviceFormat,
        frame_rate: u32,
    ) -> CaptureResult<()> {
        if self.should_fail(ConfigStep::Format) {
            return Err(CaptureError::FormatRejected {
                device: device_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let known = self
            .catalog
            .iter()
            .any(|d| d.id == device_id && d.formats.contains(format));
        if !known {
            return Err(CaptureError::FormatRejected {
                device: device_id.to_string(),
                reason: format!("{} is not offered by this device", format.resolution),
            });
        }
        self.with_locked(device_id, |device| {
            device.configuration.format = Some(format.clone());
            device.configuration.frame_rate = Some(frame_rate.min(format.max_frame_rate));
            Ok(())
        })
    }

    fn set_color_space(&self, device_id: &str, color_space: ColorSpace) -> CaptureResult<()> {
        if self.should_fail(ConfigStep::ColorSpace) {
            return Err(CaptureError::ColorSpaceRejected {
                device: device_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.with_locked(device_id, |device| {
            let supported = device
                .configuration
                .format
                .as_ref()
                .map(|f| f.supports_color_space(color_space))
                .unwrap_or(color_space == ColorSpace::Standard);
            if !supported {
                return Err(CaptureError::ColorSpaceRejected {
                    device: device_id.to_string(),
                    reason: format!("active format does not support {color_space}"),
                });
            }
            device.configuration.color_space = color_space;
            Ok(())
        })
    }

    fn restore_configuration(
        &self,
        device_id: &str,
        configuration: &DeviceConfiguration,
    ) -> CaptureResult<()> {
        if self.should_fail(ConfigStep::Restore) {
            return Err(CaptureError::FormatRejected {
                device: device_id.to_string(),
                reason: "injected restore failure".to_string(),
            });
        }
        self.with_locked(device_id, |device| {
            device.configuration = configuration.clone();
            Ok(())
        })
    }

    fn unlock_for_configuration(&self, device_id: &str) {
        if let Some(device) = self.state.lock().get_mut(device_id) {
            device.locked = false;
        }
    }
}

impl SourceProvider for SyntheticBackend {
    fn open_source(
        &self,
        negotiated: &NegotiatedDevice,
        profile: &CaptureProfile,
    ) -> CaptureResult<Box<dyn SampleSource>> {
        let configuration = self.active_configuration(&negotiated.device.id)?;
        let (resolution, pixel_format) = match &configuration.format {
            Some(format) => (format.resolution, format.pixel_format),
            None => (profile.resolution, PixelFormat::Bgra8),
        };
        let frame_rate = configuration.frame_rate.unwrap_or(profile.frame_rate.fps());
        let audio = profile
            .record_audio
            .then(|| AudioFormat::new(SYNTHETIC_SAMPLE_RATE, 2));

        Ok(Box::new(SyntheticSource::new(
            negotiated.device.id.clone(),
            VideoFormat::new(resolution.width, resolution.height, pixel_format),
            frame_rate,
            audio,
        )))
    }
}

/// Test pattern generator delivering on its own callback thread
pub struct SyntheticSource {
    device_id: String,
    video: VideoFormat,
    frame_rate: u32,
    audio: Option<AudioFormat>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SyntheticSource {
    pub fn new(
        device_id: String,
        video: VideoFormat,
        frame_rate: u32,
        audio: Option<AudioFormat>,
    ) -> Self {
        Self {
            device_id,
            video,
            frame_rate: frame_rate.max(1),
            audio,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn video_format(&self) -> VideoFormat {
        self.video
    }
}

impl SampleSource for SyntheticSource {
    fn start(&mut self, sink: Arc<dyn SampleSink>) -> CaptureResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        let generator = PatternGenerator::new(self.video, self.frame_rate, self.audio);
        let running = self.running.clone();
        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", self.device_id))
            .spawn(move || generator.run(running, sink))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::Source(format!("Failed to spawn capture thread: {e}"))
            })?;
        self.thread = Some(handle);

        tracing::info!(
            "Synthetic capture started on {}: {}x{} {:?} @ {}fps, audio={}",
            self.device_id,
            self.video.width,
            self.video.height,
            self.video.pixel_format,
            self.frame_rate,
            self.audio.is_some()
        );
        Ok(())
    }

    fn stop(&mut self) -> CaptureResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::NotRunning);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::info!("Synthetic capture stopped on {}", self.device_id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

struct PatternGenerator {
    video: VideoFormat,
    frame_rate: u32,
    audio: Option<AudioFormat>,
    pool: BufferPool,
    base: Vec<u8>,
}

impl PatternGenerator {
    fn new(video: VideoFormat, frame_rate: u32, audio: Option<AudioFormat>) -> Self {
        Self {
            video,
            frame_rate,
            audio,
            pool: BufferPool::new(video.frame_len(), 8),
            base: base_pattern(video),
        }
    }

    fn run(self, running: Arc<AtomicBool>, sink: Arc<dyn SampleSink>) {
        let period = Duration::from_secs_f64(1.0 / self.frame_rate as f64);
        let start = Instant::now();
        let mut frame_index: u64 = 0;
        let mut audio_frames: u64 = 0;
        let mut phase = 0.0f32;
        let mut dropped: u64 = 0;

        while running.load(Ordering::SeqCst) {
            let deadline = start + period.mul_f64(frame_index as f64);
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            let pts = host_time(deadline);

            if Instant::now().saturating_duration_since(deadline) > period {
                dropped += 1;
                sink.on_dropped_frame(DroppedFrame {
                    kind: MediaKind::Video,
                    pts,
                    reason: DropReason::LateDelivery,
                });
            } else {
                let mut buffer = self.pool.acquire();
                self.render(&mut buffer, frame_index);
                sink.on_sample(MediaSample::video(pts, buffer, self.video));
            }

            if let Some(format) = self.audio {
                let target = (frame_index + 1) * format.sample_rate as u64 / self.frame_rate as u64;
                let count = (target - audio_frames) as usize;
                let audio_pts = host_time(start)
                    + Duration::from_secs_f64(audio_frames as f64 / format.sample_rate as f64);
                let payload = tone_block(format, count, &mut phase);
                sink.on_sample(MediaSample::audio(audio_pts, payload, format));
                audio_frames = target;
            }

            frame_index += 1;
        }

        tracing::debug!(
            "Synthetic generator exiting after {} frames ({} late)",
            frame_index,
            dropped
        );
    }

    fn render(&self, buffer: &mut PooledBuffer, frame_index: u64) {
        buffer.copy_from_slice(&self.base);

        // Moving white bar so consecutive frames differ
        let width = self.video.width as usize;
        let bar_width = (width / 32).max(1);
        let bar_x = (frame_index as usize * 8) % width.max(1);
        match self.video.pixel_format {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => {
                for row in buffer.chunks_exact_mut(width * 4) {
                    let end = (bar_x + bar_width).min(width);
                    row[bar_x * 4..end * 4].fill(0xFF);
                }
            }
            PixelFormat::Nv12 => {
                let luma = width * self.video.height as usize;
                for row in buffer[..luma].chunks_exact_mut(width) {
                    let end = (bar_x + bar_width).min(width);
                    row[bar_x..end].fill(235);
                }
            }
            PixelFormat::P010 => {
                let luma = width * self.video.height as usize * 2;
                let white = (940u16 << 6).to_le_bytes();
                for row in buffer[..luma].chunks_exact_mut(width * 2) {
                    let end = (bar_x + bar_width).min(width);
                    for px in row[bar_x * 2..end * 2].chunks_exact_mut(2) {
                        px.copy_from_slice(&white);
                    }
                }
            }
        }
    }
}

/// Static background: horizontal gradient, neutral chroma for YUV layouts
fn base_pattern(video: VideoFormat) -> Vec<u8> {
    let width = video.width as usize;
    let height = video.height as usize;
    let mut data = vec![0u8; video.frame_len()];
    match video.pixel_format {
        PixelFormat::Bgra8 | PixelFormat::Rgba8 => {
            for (i, px) in data.chunks_exact_mut(4).enumerate() {
                let x = i % width.max(1);
                let y = i / width.max(1);
                let shade = (x * 255 / width.max(1)) as u8;
                let tint = (y * 255 / height.max(1)) as u8;
                px.copy_from_slice(&[shade, tint, 255 - shade, 255]);
            }
            if video.pixel_format == PixelFormat::Rgba8 {
                for px in data.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
            }
        }
        PixelFormat::Nv12 => {
            let luma = width * height;
            for (i, y) in data[..luma].iter_mut().enumerate() {
                *y = 16 + ((i % width.max(1)) * 219 / width.max(1)) as u8;
            }
            data[luma..].fill(128);
        }
        PixelFormat::P010 => {
            let luma = width * height;
            for (i, px) in data[..luma * 2].chunks_exact_mut(2).enumerate() {
                let y = 64 + ((i % width.max(1)) * 876 / width.max(1)) as u16;
                px.copy_from_slice(&(y << 6).to_le_bytes());
            }
            let neutral = (512u16 << 6).to_le_bytes();
            for px in data[luma * 2..].chunks_exact_mut(2) {
                px.copy_from_slice(&neutral);
            }
        }
    }
    data
}

/// Interleaved 440 Hz tone at a quarter of full scale
fn tone_block(format: AudioFormat, frames: usize, phase: &mut f32) -> PooledBuffer {
    let step = 2.0 * std::f32::consts::PI * 440.0 / format.sample_rate as f32;
    let mut data = Vec::with_capacity(frames * format.bytes_per_frame());
    for _ in 0..frames {
        let value = (phase.sin() * i16::MAX as f32 * 0.25) as i16;
        for _ in 0..format.channels {
            data.extend_from_slice(&value.to_le_bytes());
        }
        *phase = (*phase + step) % (2.0 * std::f32::consts::PI);
    }
    PooledBuffer::detached(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::negotiator::DeviceNegotiator;
    use crate::capture::profile::FrameRate;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSink {
        video: AtomicUsize,
        audio: AtomicUsize,
        last_video_pts: Mutex<Option<MediaTime>>,
        out_of_order: AtomicBool,
    }

    impl SampleSink for CountingSink {
        fn on_sample(&self, sample: MediaSample) {
            match sample.kind {
                MediaKind::Video => {
                    let mut last = self.last_video_pts.lock();
                    if let Some(prev) = *last {
                        if sample.pts < prev {
                            self.out_of_order.store(true, Ordering::SeqCst);
                        }
                    }
                    *last = Some(sample.pts);
                    self.video.fetch_add(1, Ordering::SeqCst);
                }
                MediaKind::Audio => {
                    self.audio.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        fn on_dropped_frame(&self, _dropped: DroppedFrame) {}
    }

    #[test]
    fn test_enumerate_filters_by_position() {
        let backend = SyntheticBackend::default();
        let front = backend.enumerate(CameraPosition::Front);
        assert_eq!(front.len(), 1);
        assert_eq!(front[0].id, "synthetic-front");
        assert!(backend.enumerate(CameraPosition::External).is_empty());
    }

    #[test]
    fn test_configuration_requires_lock() {
        let backend = SyntheticBackend::default();
        let device = &backend.devices()[0];
        let err = backend
            .set_active_format(&device.id, &device.formats[0], 30)
            .unwrap_err();
        assert!(matches!(err, CaptureError::LockFailed { .. }));
    }

    #[test]
    fn test_source_delivers_ordered_video_and_audio() {
        let backend = Arc::new(SyntheticBackend::with_catalog(vec![
            SyntheticBackend::standard_camera("tiny", CameraPosition::Back, &[Resolution::new(64, 36)]),
        ]));
        let profile = CaptureProfile::new("tiny", Resolution::new(64, 36), FrameRate::Fps30);
        let negotiated = DeviceNegotiator::new(backend.clone(), backend.clone())
            .negotiate(&profile)
            .unwrap();

        let mut source = backend.open_source(&negotiated, &profile).unwrap();
        let sink = Arc::new(CountingSink::default());
        source.start(sink.clone()).unwrap();
        assert!(matches!(source.start(sink.clone()), Err(CaptureError::AlreadyRunning)));
        std::thread::sleep(Duration::from_millis(200));
        source.stop().unwrap();

        assert!(sink.video.load(Ordering::SeqCst) > 0);
        assert!(sink.audio.load(Ordering::SeqCst) > 0);
        assert!(!sink.out_of_order.load(Ordering::SeqCst));
        assert!(matches!(source.stop(), Err(CaptureError::NotRunning)));
    }

    #[test]
    fn test_tone_block_is_interleaved() {
        let mut phase = 0.0;
        let block = tone_block(AudioFormat::new(48_000, 2), 100, &mut phase);
        assert_eq!(block.len(), 100 * 4);
        for frame in block.chunks_exact(4) {
            assert_eq!(frame[0..2], frame[2..4]);
        }
    }
}
