//! Compositor tick loop
//!
//! `CompositorRunner` composes one frame per period of the configured frame
//! rate. Each frame is published to the preview channel, sent to the
//! publisher, then handed to the recorder sink as a BGRA video sample.
//! Audio posted to the runner's audio sink goes to the same two consumers.

use super::canvas::Image;
use super::clock::FrameClock;
use super::engine::{CompositeFrame, Compositor};
use super::publisher::{BitrateController, StreamPublisher};
use crate::capture::{DroppedFrame, OrientationTracker, Rotation, SampleSink};
use crate::media::{BufferPool, MediaSample, MediaTime, PixelFormat, VideoFormat};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Counts reported when the runner stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerStats {
    pub frames: u64,
    pub placeholders: u64,
    pub audio_blocks: u64,
    pub publish_errors: u64,
    pub bitrate_changes: u64,
}

pub struct CompositorRunner {
    compositor: Arc<Compositor>,
    publisher: Arc<dyn StreamPublisher>,
    recorder: Option<Arc<dyn SampleSink>>,
    clock: FrameClock,
    preview_tx: watch::Sender<Option<CompositeFrame>>,
    audio_tx: mpsc::UnboundedSender<MediaSample>,
    audio_rx: Option<mpsc::UnboundedReceiver<MediaSample>>,
}

impl CompositorRunner {
    pub fn new(compositor: Arc<Compositor>, publisher: Arc<dyn StreamPublisher>) -> Self {
        let (preview_tx, _) = watch::channel(None);
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let clock = FrameClock::new(compositor.config().frame_rate);
        Self {
            compositor,
            publisher,
            recorder: None,
            clock,
            preview_tx,
            audio_tx,
            audio_rx: Some(audio_rx),
        }
    }

    /// Also feed every frame and audio block to `sink`
    pub fn with_recorder(mut self, sink: Arc<dyn SampleSink>) -> Self {
        self.recorder = Some(sink);
        self
    }

    /// Stamp the first frame at `origin` instead of zero
    pub fn with_clock_origin(mut self, origin: MediaTime) -> Self {
        self.clock = FrameClock::starting_at(self.compositor.config().frame_rate, origin);
        self
    }

    /// Latest composed frame, for local display
    pub fn preview(&self) -> watch::Receiver<Option<CompositeFrame>> {
        self.preview_tx.subscribe()
    }

    /// Sink for audio that should accompany the composite
    pub fn audio_sink(&self) -> Arc<dyn SampleSink> {
        Arc::new(AudioRoute {
            tx: self.audio_tx.clone(),
        })
    }

    /// Start ticking on the current runtime
    pub fn spawn(self) -> RunnerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let preview = self.preview();
        let task = tokio::spawn(self.run(stop_rx));
        RunnerHandle {
            stop: stop_tx,
            preview,
            task,
        }
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) -> RunnerStats {
        let config = *self.compositor.config();
        let fps = config.frame_rate.fps();
        let format = VideoFormat::new(config.canvas.width, config.canvas.height, PixelFormat::Bgra8);
        let pool = BufferPool::new(format.frame_len(), 4);
        let mut stats = RunnerStats::default();
        let Some(mut audio_rx) = self.audio_rx.take() else {
            return stats;
        };

        let mut controller = BitrateController::new(config.min_bitrate_kbps, config.max_bitrate_kbps);
        self.publisher.set_video_bitrate(controller.current());
        let bandwidth = self.publisher.bandwidth();

        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
        tracing::info!("Compositor started: {} at {} fps", config.canvas, fps);

        loop {
            tokio::select! {
                _ = stop.changed() => break,

                Some(sample) = audio_rx.recv() => {
                    stats.audio_blocks += 1;
                    self.route_audio(sample, &mut stats).await;
                }

                _ = ticker.tick() => {
                    let pts = self.clock.next();
                    let compositor = self.compositor.clone();
                    let frame = match tokio::task::spawn_blocking(move || compositor.compose(pts)).await {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!("Compose task failed: {}", e);
                            continue;
                        }
                    };
                    self.route_frame(frame, &pool, format, &mut stats).await;

                    if stats.frames % fps as u64 == 0 {
                        let state = *bandwidth.borrow();
                        if let Some(kbps) = controller.update(state) {
                            tracing::info!("Video bitrate -> {} kbps ({:?})", kbps, state);
                            self.publisher.set_video_bitrate(kbps);
                            stats.bitrate_changes += 1;
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Compositor stopped: {} frames, {} placeholders, {} publish errors",
            stats.frames,
            stats.placeholders,
            stats.publish_errors
        );
        stats
    }

    async fn route_frame(
        &self,
        frame: CompositeFrame,
        pool: &BufferPool,
        format: VideoFormat,
        stats: &mut RunnerStats,
    ) {
        stats.frames += 1;
        if frame.placeholder.is_some() {
            stats.placeholders += 1;
        }

        let mut buffer = pool.acquire();
        buffer.copy_from_slice(frame.image.data());
        let sample = MediaSample::video(frame.pts, buffer, format);
        self.preview_tx.send_replace(Some(frame));

        if let Err(e) = self.publisher.publish_video(&sample).await {
            stats.publish_errors += 1;
            tracing::warn!("Failed to publish frame at {}: {}", sample.pts, e);
        }
        if let Some(recorder) = &self.recorder {
            recorder.on_sample(sample);
        }
    }

    async fn route_audio(&self, sample: MediaSample, stats: &mut RunnerStats) {
        if let Err(e) = self.publisher.publish_audio(&sample).await {
            stats.publish_errors += 1;
            tracing::warn!("Failed to publish audio at {}: {}", sample.pts, e);
        }
        if let Some(recorder) = &self.recorder {
            recorder.on_sample(sample);
        }
    }
}

/// Control over a spawned runner
pub struct RunnerHandle {
    stop: watch::Sender<bool>,
    preview: watch::Receiver<Option<CompositeFrame>>,
    task: JoinHandle<RunnerStats>,
}

impl RunnerHandle {
    pub fn preview(&self) -> watch::Receiver<Option<CompositeFrame>> {
        self.preview.clone()
    }

    /// Stop ticking and wait for the loop to exit
    pub async fn stop(self) -> RunnerStats {
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("Compositor task failed: {}", e);
                RunnerStats::default()
            }
        }
    }
}

struct AudioRoute {
    tx: mpsc::UnboundedSender<MediaSample>,
}

impl SampleSink for AudioRoute {
    fn on_sample(&self, sample: MediaSample) {
        if sample.is_video() {
            return;
        }
        let _ = self.tx.send(sample);
    }

    fn on_dropped_frame(&self, dropped: DroppedFrame) {
        tracing::debug!("Audio dropped before compositing: {:?}", dropped.reason);
    }
}

/// Which compositor source a camera feeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSlot {
    Background,
    Media,
    Remote(String),
    Rear,
    Front,
}

/// Turns camera samples into compositor source images
pub struct FeedSink {
    compositor: Arc<Compositor>,
    slot: FeedSlot,
    orientation: Option<OrientationTracker>,
    audio: Option<Arc<dyn SampleSink>>,
}

impl FeedSink {
    pub fn new(compositor: Arc<Compositor>, slot: FeedSlot) -> Self {
        Self {
            compositor,
            slot,
            orientation: None,
            audio: None,
        }
    }

    /// Rotate rear frames by the tracker's current preview transform
    pub fn with_orientation(mut self, tracker: OrientationTracker) -> Self {
        self.orientation = Some(tracker);
        self
    }

    /// Forward audio samples to `sink`
    pub fn with_audio(mut self, sink: Arc<dyn SampleSink>) -> Self {
        self.audio = Some(sink);
        self
    }

    fn rotation(&self) -> Rotation {
        self.orientation
            .as_ref()
            .map(|t| t.snapshot().preview_transform().rotation)
            .unwrap_or(Rotation::Deg0)
    }
}

impl SampleSink for FeedSink {
    fn on_sample(&self, sample: MediaSample) {
        if !sample.is_video() {
            if let Some(audio) = &self.audio {
                audio.on_sample(sample);
            }
            return;
        }

        let Some(image) = Image::from_sample(&sample) else {
            tracing::debug!("Unsupported feed format {:?}", sample.format);
            return;
        };
        match &self.slot {
            FeedSlot::Background => self.compositor.set_background(image),
            FeedSlot::Media => self.compositor.set_media(image),
            FeedSlot::Remote(id) => self.compositor.set_remote_image(id, image),
            FeedSlot::Rear => self.compositor.set_rear(image, self.rotation()),
            FeedSlot::Front => self.compositor.set_front(image),
        }
    }

    fn on_dropped_frame(&self, dropped: DroppedFrame) {
        tracing::debug!("{:?} feed dropped a frame: {:?}", self.slot, dropped.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::canvas::{Rect, Size};
    use crate::compositor::engine::CompositorConfig;
    use crate::compositor::publisher::{BandwidthState, NullPublisher};
    use crate::media::{AudioFormat, MediaKind, PooledBuffer};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect {
        samples: Mutex<Vec<(MediaKind, MediaTime, usize)>>,
    }

    impl SampleSink for Collect {
        fn on_sample(&self, sample: MediaSample) {
            self.samples
                .lock()
                .push((sample.kind, sample.pts, sample.payload.len()));
        }

        fn on_dropped_frame(&self, _dropped: DroppedFrame) {}
    }

    fn compositor() -> Arc<Compositor> {
        Arc::new(Compositor::new(CompositorConfig {
            canvas: Size::new(32, 18),
            front_rect: Rect::new(20, 10, 8, 4),
            ..CompositorConfig::default()
        }))
    }

    #[tokio::test]
    async fn test_frames_reach_recorder_and_publisher() {
        let publisher = Arc::new(NullPublisher::new());
        let recorder = Arc::new(Collect::default());
        let runner = CompositorRunner::new(compositor(), publisher.clone())
            .with_recorder(recorder.clone())
            .with_clock_origin(MediaTime::new(5, 1));
        let audio = runner.audio_sink();
        let handle = runner.spawn();

        audio.on_sample(MediaSample::audio(
            MediaTime::new(150, 30),
            PooledBuffer::detached(vec![0; 64]),
            AudioFormat::new(48_000, 2),
        ));
        tokio::time::sleep(Duration::from_millis(250)).await;
        let stats = handle.stop().await;

        assert!(stats.frames >= 3);
        assert_eq!(stats.audio_blocks, 1);
        assert_eq!(publisher.video_frames(), stats.frames);
        assert_eq!(publisher.audio_blocks(), 1);

        let samples = recorder.samples.lock();
        let video: Vec<_> = samples
            .iter()
            .filter(|(kind, _, _)| *kind == MediaKind::Video)
            .collect();
        assert_eq!(video.len() as u64, stats.frames);
        assert_eq!(video[0].1, MediaTime::new(150, 30));
        assert_eq!(video[1].1, MediaTime::new(151, 30));
        assert_eq!(video[0].2, 32 * 18 * 4);
    }

    #[tokio::test]
    async fn test_preview_receives_frames() {
        let runner = CompositorRunner::new(compositor(), Arc::new(NullPublisher::new()));
        let handle = runner.spawn();
        let mut preview = handle.preview();

        tokio::time::timeout(Duration::from_secs(2), preview.changed())
            .await
            .unwrap()
            .unwrap();
        let frame = preview.borrow().clone().unwrap();
        assert_eq!(frame.image.size(), Size::new(32, 18));
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_publish_errors_do_not_stop_ticking() {
        let publisher = Arc::new(NullPublisher::new());
        publisher.set_failing(true);
        publisher.set_bandwidth(BandwidthState::Insufficient);
        let runner = CompositorRunner::new(compositor(), publisher.clone());
        let handle = runner.spawn();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = handle.stop().await;
        assert!(stats.frames >= 2);
        assert_eq!(stats.publish_errors, stats.frames);
        assert_eq!(publisher.video_bitrate(), CompositorConfig::default().max_bitrate_kbps);
    }

    #[test]
    fn test_feed_sink_updates_slot() {
        let compositor = compositor();
        let sink = FeedSink::new(compositor.clone(), FeedSlot::Front);
        let format = VideoFormat::new(2, 2, PixelFormat::Rgba8);
        sink.on_sample(MediaSample::video(
            MediaTime::ZERO,
            PooledBuffer::detached([0, 0, 255, 255].repeat(4)),
            format,
        ));

        let frame = compositor.compose(MediaTime::ZERO);
        assert_eq!(frame.image.pixel(22, 11), Some([255, 0, 0, 255]));
    }
}
