//! Composition root
//!
//! `CaptureService` wires device negotiation, the sample source, audio
//! metering and the recorder together for on-device takes.
//! `StreamSession` runs the compositor path: camera feeds go into the
//! compositor, whose frames feed the publisher and a streaming recorder.

use crate::capture::synthetic::host_time;
use crate::capture::{
    AudioLevelMeter, CameraPosition, CaptureProfile, DeviceControl, DeviceDiscovery,
    DeviceNegotiator, LevelReading, MeteredSink, NegotiatedDevice, OrientationContext,
    OrientationTracker, Resolution, SampleSink, SampleSource, SourceProvider,
};
use crate::compositor::{
    Compositor, CompositorRunner, FeedSink, FeedSlot, RunnerHandle, RunnerStats, StreamPublisher,
};
use crate::config::PipelineConfig;
use crate::recorder::{
    BeginRequest, FfmpegThumbnailer, RecorderConfig, RecorderDeps, RecorderState,
    RecordingCoordinator, RecordingEvent, RecordingOutput,
};
use crate::utils::{AppError, AppResult};
use crate::writer::WriterFactory;
use chrono::Local;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Assigns output paths to takes
pub trait TakeNamer: Send + Sync {
    fn next_take(&self) -> PathBuf;
}

/// `<prefix>-<YYYYMMDD-HHMMSS>-<n>.mov` inside one directory
pub struct DirectoryTakeNamer {
    dir: PathBuf,
    prefix: String,
    counter: AtomicU64,
}

impl DirectoryTakeNamer {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TakeNamer for DirectoryTakeNamer {
    fn next_take(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        loop {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let path = self.dir.join(format!("{}-{}-{}.mov", self.prefix, stamp, n));
            if !path.exists() {
                return path;
            }
        }
    }
}

/// Negotiates, runs and records one camera
pub struct CaptureService {
    negotiator: Arc<DeviceNegotiator>,
    provider: Arc<dyn SourceProvider>,
    coordinator: RecordingCoordinator,
    orientation: OrientationTracker,
    namer: Arc<dyn TakeNamer>,
    meter: Arc<AudioLevelMeter>,
    active: Mutex<Option<ActiveCapture>>,
}

struct ActiveCapture {
    source: Box<dyn SampleSource>,
    negotiated: NegotiatedDevice,
    profile: CaptureProfile,
}

impl CaptureService {
    /// Build a service on `backend`, recording through `writer_factory`
    pub fn new<B>(
        config: &PipelineConfig,
        backend: Arc<B>,
        writer_factory: Arc<dyn WriterFactory>,
    ) -> AppResult<Self>
    where
        B: DeviceDiscovery + DeviceControl + SourceProvider + 'static,
    {
        Self::with_recorder_config(config.recorder_config(), config, backend, writer_factory)
    }

    pub fn with_recorder_config<B>(
        recorder_config: RecorderConfig,
        config: &PipelineConfig,
        backend: Arc<B>,
        writer_factory: Arc<dyn WriterFactory>,
    ) -> AppResult<Self>
    where
        B: DeviceDiscovery + DeviceControl + SourceProvider + 'static,
    {
        let orientation = OrientationTracker::new(OrientationContext::new(CameraPosition::Back));
        let deps = recorder_deps(config, writer_factory).with_orientation(orientation.clone());
        let coordinator = RecordingCoordinator::spawn(recorder_config, deps)?;

        Ok(Self {
            negotiator: Arc::new(DeviceNegotiator::new(backend.clone(), backend.clone())),
            provider: backend,
            coordinator,
            orientation,
            namer: Arc::new(DirectoryTakeNamer::new(
                &config.output.takes_dir,
                &config.output.prefix,
            )),
            meter: Arc::new(AudioLevelMeter::new()),
            active: Mutex::new(None),
        })
    }

    /// Replace the take namer
    pub fn with_namer(mut self, namer: Arc<dyn TakeNamer>) -> Self {
        self.namer = namer;
        self
    }

    /// Negotiate a device for `profile` and start delivering samples
    ///
    /// Device configuration runs on the blocking pool, never on the caller's
    /// task. A capture already running is stopped first.
    pub async fn start_capture(&self, profile: CaptureProfile) -> AppResult<NegotiatedDevice> {
        if self.active.lock().is_some() {
            tracing::warn!("Capture already running, restarting");
            self.stop_capture()?;
        }

        let negotiator = self.negotiator.clone();
        let provider = self.provider.clone();
        let requested = profile.clone();
        let (negotiated, mut source) = tokio::task::spawn_blocking(move || {
            let negotiated = negotiator.negotiate(&requested)?;
            let source = provider.open_source(&negotiated, &requested)?;
            Ok::<_, AppError>((negotiated, source))
        })
        .await
        .map_err(|e| AppError::Task(e.to_string()))??;

        self.orientation.set_position(profile.position);
        let sink: Arc<dyn SampleSink> = Arc::new(MeteredSink::new(
            self.coordinator.sink(),
            self.meter.clone(),
        ));
        source.start(sink)?;

        let effective = negotiated.effective_profile(&profile);
        tracing::info!(
            "Capture started on {} ({:?}, {})",
            negotiated.device.name,
            negotiated.tier,
            effective.resolution
        );
        *self.active.lock() = Some(ActiveCapture {
            source,
            negotiated: negotiated.clone(),
            profile: effective,
        });
        Ok(negotiated)
    }

    /// Stop the running source
    pub fn stop_capture(&self) -> AppResult<()> {
        let Some(mut active) = self.active.lock().take() else {
            return Err(AppError::NotCapturing);
        };
        active.source.stop()?;
        tracing::info!("Capture stopped on {}", active.negotiated.device.name);
        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Name a new take and post Begin. Returns the take's path.
    pub fn begin_recording(&self) -> AppResult<PathBuf> {
        let profile = self
            .active
            .lock()
            .as_ref()
            .map(|a| a.profile.clone())
            .ok_or(AppError::NotCapturing)?;

        let output_path = self.namer.next_take();
        self.coordinator.begin_recording(BeginRequest {
            output_path: output_path.clone(),
            profile,
        })?;
        Ok(output_path)
    }

    /// Post End
    pub fn end_recording(&self) -> AppResult<()> {
        Ok(self.coordinator.end_recording()?)
    }

    pub fn state(&self) -> RecorderState {
        self.coordinator.state()
    }

    pub fn is_recording(&self) -> bool {
        self.coordinator.is_recording()
    }

    pub fn last_output(&self) -> Option<RecordingOutput> {
        self.coordinator.last_output()
    }

    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.coordinator.wait_until_idle(timeout).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.coordinator.subscribe()
    }

    pub fn levels(&self) -> broadcast::Receiver<LevelReading> {
        self.meter.subscribe()
    }

    /// UI rotation events go here
    pub fn orientation(&self) -> &OrientationTracker {
        &self.orientation
    }

    /// Stop capture and finish any take in progress
    pub fn shutdown(&self) {
        if self.is_capturing() {
            if let Err(e) = self.stop_capture() {
                tracing::error!("Failed to stop capture: {}", e);
            }
        }
        self.coordinator.shutdown();
    }
}

fn recorder_deps(config: &PipelineConfig, writer_factory: Arc<dyn WriterFactory>) -> RecorderDeps {
    let deps = RecorderDeps::new(writer_factory);
    if config.writer.thumbnail_width == 0 {
        return deps;
    }
    deps.with_post_processor(Arc::new(FfmpegThumbnailer::new(
        config.writer.ffmpeg_binary.clone(),
        config.writer.thumbnail_width,
    )))
}

/// The compositor path: two cameras composed, published and recorded
pub struct StreamSession {
    compositor: Arc<Compositor>,
    coordinator: RecordingCoordinator,
    namer: Arc<dyn TakeNamer>,
    profile: CaptureProfile,
    sources: Vec<Box<dyn SampleSource>>,
    runner: Option<RunnerHandle>,
}

impl StreamSession {
    /// Negotiate a rear and a front camera, then start compositing
    pub async fn start<B>(
        config: &PipelineConfig,
        backend: Arc<B>,
        writer_factory: Arc<dyn WriterFactory>,
        publisher: Arc<dyn StreamPublisher>,
    ) -> AppResult<Self>
    where
        B: DeviceDiscovery + DeviceControl + SourceProvider + 'static,
    {
        let compositor_config = config
            .compositor_config()
            .map_err(|e| AppError::Task(e.to_string()))?;
        let compositor = Arc::new(Compositor::new(compositor_config));
        let canvas = compositor_config.canvas;

        let coordinator = RecordingCoordinator::spawn(
            config.streaming_recorder_config(),
            recorder_deps(config, writer_factory),
        )?;

        let runner = CompositorRunner::new(compositor.clone(), publisher)
            .with_recorder(coordinator.sink())
            .with_clock_origin(host_time(Instant::now()));
        let audio = runner.audio_sink();

        let rear_profile = CaptureProfile::new(
            "stream-rear",
            Resolution::new(canvas.width, canvas.height),
            compositor_config.frame_rate,
        );
        let front_profile = CaptureProfile::new(
            "stream-front",
            Resolution::new(canvas.width, canvas.height),
            compositor_config.frame_rate,
        )
        .with_position(CameraPosition::Front)
        .with_audio(false);

        let rear_orientation =
            OrientationTracker::new(OrientationContext::new(CameraPosition::Back));
        let rear_sink: Arc<dyn SampleSink> = Arc::new(
            FeedSink::new(compositor.clone(), FeedSlot::Rear)
                .with_orientation(rear_orientation)
                .with_audio(audio),
        );
        let front_sink: Arc<dyn SampleSink> =
            Arc::new(FeedSink::new(compositor.clone(), FeedSlot::Front));

        let mut sources = Vec::new();
        for (profile, sink) in [(rear_profile, rear_sink), (front_profile, front_sink)] {
            let negotiator = DeviceNegotiator::new(backend.clone(), backend.clone());
            let provider = backend.clone();
            let (negotiated, mut source) = tokio::task::spawn_blocking(move || {
                let negotiated = negotiator.negotiate(&profile)?;
                let source = provider.open_source(&negotiated, &profile)?;
                Ok::<_, AppError>((negotiated, source))
            })
            .await
            .map_err(|e| AppError::Task(e.to_string()))??;
            source.start(sink)?;
            tracing::info!("Stream feed {} started", negotiated.device.name);
            sources.push(source);
        }

        let profile = CaptureProfile::new(
            "stream",
            Resolution::new(canvas.width, canvas.height),
            compositor_config.frame_rate,
        );
        Ok(Self {
            compositor,
            coordinator,
            namer: Arc::new(DirectoryTakeNamer::new(
                &config.output.takes_dir,
                format!("{}-stream", config.output.prefix),
            )),
            profile,
            sources,
            runner: Some(runner.spawn()),
        })
    }

    pub fn with_namer(mut self, namer: Arc<dyn TakeNamer>) -> Self {
        self.namer = namer;
        self
    }

    pub fn compositor(&self) -> &Arc<Compositor> {
        &self.compositor
    }

    pub fn coordinator(&self) -> &RecordingCoordinator {
        &self.coordinator
    }

    /// Start recording the composite. Returns the take's path.
    pub fn begin_recording(&self) -> AppResult<PathBuf> {
        let output_path = self.namer.next_take();
        self.coordinator.begin_recording(BeginRequest {
            output_path: output_path.clone(),
            profile: self.profile.clone(),
        })?;
        Ok(output_path)
    }

    pub fn end_recording(&self) -> AppResult<()> {
        Ok(self.coordinator.end_recording()?)
    }

    /// Stop feeds and the compositor, finishing any take in progress
    pub async fn stop(mut self, timeout: Duration) -> AppResult<(RunnerStats, Option<RecordingOutput>)> {
        for source in &mut self.sources {
            if let Err(e) = source.stop() {
                tracing::warn!("Failed to stop feed: {}", e);
            }
        }
        let stats = match self.runner.take() {
            Some(runner) => runner.stop().await,
            None => RunnerStats::default(),
        };

        if self.coordinator.is_recording() {
            self.coordinator.end_recording()?;
        }
        if !self.coordinator.wait_until_idle(timeout).await {
            tracing::warn!("Recorder did not finish within {:?}", timeout);
        }
        let output = self.coordinator.last_output();
        self.coordinator.shutdown();
        Ok((stats, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ColorSpace, FallbackTier, FrameRate, SyntheticBackend};
    use crate::compositor::NullPublisher;
    use crate::recorder::machine::tests::{Script, ScriptedFactory};
    use crate::writer::VideoCodec;

    fn small_backend() -> Arc<SyntheticBackend> {
        Arc::new(SyntheticBackend::with_catalog(vec![
            SyntheticBackend::standard_camera("rear", CameraPosition::Back, &[Resolution::new(64, 36)]),
            SyntheticBackend::standard_camera("front", CameraPosition::Front, &[Resolution::new(64, 36)]),
        ]))
    }

    fn test_config(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.output.takes_dir = dir.to_path_buf();
        config.writer.thumbnail_width = 0;
        config.compositor.canvas_width = 64;
        config.compositor.canvas_height = 36;
        config.compositor.lead_time_ms = 100;
        config
    }

    fn scripted() -> (Arc<ScriptedFactory>, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(Script::default()));
        (
            Arc::new(ScriptedFactory {
                script: script.clone(),
            }),
            script,
        )
    }

    #[test]
    fn test_take_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let namer = DirectoryTakeNamer::new(dir.path(), "scene");
        let first = namer.next_take();
        std::fs::write(&first, b"x").unwrap();
        let second = namer.next_take();

        assert_ne!(first, second);
        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("scene-"));
        assert!(name.ends_with("-1.mov"));
        // prefix, date, time, counter
        assert_eq!(name.trim_end_matches(".mov").split('-').count(), 4);
    }

    #[tokio::test]
    async fn test_capture_service_records_a_take() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (factory, script) = scripted();
        let service = CaptureService::with_recorder_config(
            RecorderConfig::with_lead_time(Duration::from_millis(100)),
            &config,
            small_backend(),
            factory,
        )
        .unwrap();

        assert!(matches!(service.begin_recording(), Err(AppError::NotCapturing)));

        let profile = CaptureProfile::new("small", Resolution::new(64, 36), FrameRate::Fps30)
            .with_audio(false);
        let negotiated = service.start_capture(profile).await.unwrap();
        assert_eq!(negotiated.device.id, "rear");

        let path = service.begin_recording().unwrap();
        assert!(path.starts_with(dir.path()));
        tokio::time::sleep(Duration::from_millis(500)).await;
        service.end_recording().unwrap();

        assert!(service.wait_until_idle(Duration::from_secs(5)).await);
        let output = service.last_output().unwrap();
        assert_eq!(output.path, path);
        assert!(output.video_frames > 0);
        assert_eq!(script.lock().video_pts.len() as u64, output.video_frames);

        service.stop_capture().unwrap();
        assert!(matches!(service.stop_capture(), Err(AppError::NotCapturing)));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_extended_request_falls_back_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (factory, script) = scripted();
        let service = CaptureService::with_recorder_config(
            RecorderConfig::with_lead_time(Duration::from_millis(100)),
            &config,
            small_backend(),
            factory,
        )
        .unwrap();
        let mut events = service.subscribe();

        let profile = CaptureProfile::new("small-log", Resolution::new(64, 36), FrameRate::Fps30)
            .with_color_space(ColorSpace::ExtendedLog)
            .with_audio(false);
        let negotiated = service.start_capture(profile).await.unwrap();
        assert_eq!(negotiated.tier, FallbackTier::StandardColorSpace);
        assert_eq!(negotiated.color_space, ColorSpace::Standard);

        service.begin_recording().unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        service.end_recording().unwrap();

        let mut states = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            match event {
                RecordingEvent::StateChanged { to, .. } => states.push(to),
                RecordingEvent::Ended { .. } => break,
                _ => {}
            }
        }
        assert_eq!(
            states,
            vec![
                RecorderState::Starting,
                RecorderState::WaitingForAlignedStart,
                RecorderState::Capturing,
                RecorderState::Ending,
                RecorderState::Idle,
            ]
        );

        let output = service.last_output().unwrap();
        assert!(output.finalize_error.is_none());
        assert!(output.video_frames > 0);
        let settings = script.lock().settings.unwrap();
        assert_ne!(settings.video.codec, VideoCodec::ProRes422Hq);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_stream_session_records_composite() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (factory, script) = scripted();
        let publisher = Arc::new(NullPublisher::new());

        let session = StreamSession::start(&config, small_backend(), factory, publisher.clone())
            .await
            .unwrap();
        session.begin_recording().unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let (stats, output) = session.stop(Duration::from_secs(5)).await.unwrap();
        assert!(stats.frames > 0);
        assert_eq!(publisher.video_frames(), stats.frames);

        let output = output.unwrap();
        assert!(output.video_frames > 0);
        let script = script.lock();
        let settings = script.settings.unwrap();
        assert_eq!(settings.video.input.width, 64);
        assert_eq!(settings.video.input.height, 36);
    }
}
