//! Recorder state machine
//!
//! `Idle -> Starting -> WaitingForAlignedStart -> Capturing -> Ending -> Idle`
//!
//! The machine is single-threaded: every command is handled on the
//! coordinator's serial queue, and it never blocks there. Writer startup
//! and finalize are asynchronous; finalize completion comes back as a
//! `RecorderCommand::WriterFinished` posted onto the same queue.
//!
//! The session start is the first video timestamp after Begin plus a fixed
//! lead. Samples that arrive before that instant, or before the writer is
//! ready, are discarded rather than buffered.

use super::events::{EventBus, RecordingEvent};
use super::location::LocationProvider;
use super::postprocess::PostProcessor;
use super::state::{RecorderConfig, RecorderState, RecordingOutput, RecordingSession};
use super::{BeginRequest, RecorderCommand};
use crate::capture::{DroppedFrame, OrientationTracker, Transform};
use crate::media::{MediaKind, MediaSample, MediaTime};
use crate::writer::{
    conform_audio, FinishOutcome, MetadataItem, OutputSettings, PixelBufferAdaptor, WriterError,
    WriterFactory, WriterResult, WriterStatus,
};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Collaborators the machine calls into
#[derive(Clone)]
pub struct RecorderDeps {
    pub writer_factory: Arc<dyn WriterFactory>,
    /// Source of the recording transform; identity when absent
    pub orientation: Option<OrientationTracker>,
    pub location: Option<Arc<dyn LocationProvider>>,
    pub post_processor: Option<Arc<dyn PostProcessor>>,
}

impl RecorderDeps {
    pub fn new(writer_factory: Arc<dyn WriterFactory>) -> Self {
        Self {
            writer_factory,
            orientation: None,
            location: None,
            post_processor: None,
        }
    }

    pub fn with_orientation(mut self, orientation: OrientationTracker) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn with_location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_post_processor(mut self, post_processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processor = Some(post_processor);
        self
    }
}

/// Recorder state readable from other threads
#[derive(Clone, Default)]
pub struct SharedStatus {
    state: Arc<RwLock<RecorderState>>,
    recording: Arc<AtomicBool>,
    last_output: Arc<RwLock<Option<RecordingOutput>>>,
}

impl SharedStatus {
    pub fn state(&self) -> RecorderState {
        *self.state.read()
    }

    /// True from an accepted Begin until the take is finalized or abandoned
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Summary of the most recently finalized take
    pub fn last_output(&self) -> Option<RecordingOutput> {
        self.last_output.read().clone()
    }
}

enum AlignedStart {
    /// Not yet; the sample is discarded
    Discard,
    /// Session started at the aligned instant
    Started(Uuid),
    Failed(String),
}

/// The recording state machine
pub struct RecorderStateMachine {
    config: RecorderConfig,
    deps: RecorderDeps,
    events: EventBus,
    status: SharedStatus,
    commands: mpsc::UnboundedSender<RecorderCommand>,
    state: RecorderState,
    session: Option<RecordingSession>,
}

impl RecorderStateMachine {
    /// `commands` is the machine's own queue, used to post finalize results
    pub fn new(
        config: RecorderConfig,
        deps: RecorderDeps,
        events: EventBus,
        status: SharedStatus,
        commands: mpsc::UnboundedSender<RecorderCommand>,
    ) -> Self {
        Self {
            config,
            deps,
            events,
            status,
            commands,
            state: RecorderState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Handle one command from the serial queue
    pub fn handle(&mut self, command: RecorderCommand) {
        match command {
            RecorderCommand::Begin(request) => self.begin(request),
            RecorderCommand::End => self.end(),
            RecorderCommand::Sample(sample) => self.on_sample(sample),
            RecorderCommand::DroppedFrame(dropped) => self.on_source_drop(dropped),
            RecorderCommand::WriterFinished {
                session_id,
                outcome,
            } => self.on_writer_finished(session_id, outcome),
            RecorderCommand::Shutdown => {
                if self.state.is_active() {
                    self.end();
                }
            }
        }
    }

    fn transition(&mut self, to: RecorderState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        *self.status.state.write() = to;
        tracing::info!("Recorder {} -> {}", from, to);
        self.events.emit(RecordingEvent::StateChanged { from, to });
    }

    fn begin(&mut self, request: BeginRequest) {
        if self.state.is_active() {
            tracing::warn!("Ignoring begin recording while {}", self.state);
            return;
        }

        let session = RecordingSession::new(request.output_path, request.profile);
        tracing::info!(
            "Recording session {} requested: {:?} ({})",
            session.id,
            session.output_path,
            session.profile.name
        );
        self.session = Some(session);
        self.status.recording.store(true, Ordering::SeqCst);
        self.transition(RecorderState::Starting);
    }

    fn on_sample(&mut self, sample: MediaSample) {
        match self.state {
            RecorderState::Idle | RecorderState::Ending => {}
            RecorderState::Starting if sample.is_video() => self.start_writer(sample),
            RecorderState::Starting => {
                if let Some(session) = self.session.as_mut() {
                    session.counters.discarded_before_start += 1;
                }
            }
            RecorderState::WaitingForAlignedStart => self.await_aligned_start(sample),
            RecorderState::Capturing => self.append(sample),
        }
    }

    fn start_writer(&mut self, sample: MediaSample) {
        let Some(video_format) = sample.video_format() else {
            return;
        };
        let transform = self
            .deps
            .orientation
            .as_ref()
            .map(|tracker| tracker.snapshot().recording_transform())
            .unwrap_or(Transform::IDENTITY);
        let lead = self.config.lead_time;
        let factory = self.deps.writer_factory.clone();

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let first = sample.pts;
        let aligned = first + lead;
        session.first_sample_pts = Some(first);
        session.aligned_start = Some(aligned);
        session.transform = Some(transform);
        session.video_format = Some(video_format);

        let settings = OutputSettings::recommended(&session.profile, video_format, transform);
        tracing::info!(
            "First video sample at {}, aligned start {}, {:?} {}x{}, rotation {}",
            first,
            aligned,
            settings.video.codec,
            video_format.width,
            video_format.height,
            transform.rotation.degrees()
        );

        match open_writer(factory.as_ref(), session, &settings) {
            Ok(()) => {
                self.transition(RecorderState::WaitingForAlignedStart);
                self.await_aligned_start(sample);
            }
            Err(e) => self.fail_session(format!("Cannot start writer: {e}")),
        }
    }

    fn await_aligned_start(&mut self, sample: MediaSample) {
        let location = self.deps.location.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let result = match (session.writer.as_mut(), session.aligned_start) {
            (Some(writer), Some(aligned)) => {
                let status = writer.status();
                if matches!(status, WriterStatus::Failed | WriterStatus::Cancelled) {
                    AlignedStart::Failed(format!("Writer {status:?} during startup"))
                } else if !sample.is_video() || sample.pts < aligned || status != WriterStatus::Writing {
                    AlignedStart::Discard
                } else {
                    match writer.start_session(aligned) {
                        Ok(()) => {
                            if let Some(location) =
                                location.as_ref().and_then(|p| p.current_location())
                            {
                                writer.add_metadata(MetadataItem::Location(location.iso6709()));
                            }
                            writer.add_metadata(MetadataItem::CreationDate(
                                session.started_at.to_rfc3339(),
                            ));
                            AlignedStart::Started(session.id)
                        }
                        Err(e) => AlignedStart::Failed(format!("Cannot start writer session: {e}")),
                    }
                }
            }
            _ => AlignedStart::Failed("No writer for session".to_string()),
        };

        match result {
            AlignedStart::Discard => {
                session.counters.discarded_before_start += 1;
                tracing::debug!("Discarding {} sample at {} before aligned start", sample.kind, sample.pts);
            }
            AlignedStart::Started(session_id) => {
                self.transition(RecorderState::Capturing);
                self.events.emit(RecordingEvent::Started { session_id });
                self.append(sample);
            }
            AlignedStart::Failed(reason) => self.fail_session(reason),
        }
    }

    fn append(&mut self, sample: MediaSample) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(writer) = session.writer.as_mut() else {
            return;
        };

        match sample.kind {
            MediaKind::Video => {
                let pts = sample.pts;
                let result = match session.adaptor.as_ref() {
                    Some(adaptor) if writer.is_ready_for_more(MediaKind::Video) => {
                        adaptor.append(&mut **writer, sample)
                    }
                    _ => Err(WriterError::NotReady(MediaKind::Video)),
                };
                match result {
                    Ok(()) => {
                        session.counters.video_frames += 1;
                        session.last_video_pts = Some(pts);
                    }
                    Err(e) => {
                        session.counters.dropped_video += 1;
                        match e {
                            WriterError::NotReady(_) => {
                                tracing::debug!("Video input not ready, dropped frame at {}", pts)
                            }
                            e => tracing::warn!("Dropped video frame at {}: {}", pts, e),
                        }
                        self.events.emit(RecordingEvent::DroppedFrame {
                            kind: MediaKind::Video,
                        });
                    }
                }
            }
            MediaKind::Audio => {
                let Some(layout) = session.audio_layout else {
                    return;
                };
                if !writer.is_ready_for_more(MediaKind::Audio) {
                    session.counters.dropped_audio += 1;
                    tracing::debug!("Audio input not ready, dropped block at {}", sample.pts);
                    return;
                }
                let sample = conform_audio(sample, layout);
                let frames = sample.audio_frame_count() as u64;
                match writer.append_audio(sample) {
                    Ok(()) => session.counters.audio_frames += frames,
                    Err(e) => {
                        session.counters.dropped_audio += 1;
                        tracing::warn!("Dropped audio block: {}", e);
                    }
                }
            }
        }
    }

    fn on_source_drop(&mut self, dropped: DroppedFrame) {
        if let Some(session) = self.session.as_mut() {
            session.counters.source_drops += 1;
        }
        tracing::debug!(
            "Source dropped {} frame at {} ({:?})",
            dropped.kind,
            dropped.pts,
            dropped.reason
        );
        self.events.emit(RecordingEvent::DroppedFrame { kind: dropped.kind });
    }

    fn end(&mut self) {
        match self.state {
            RecorderState::Idle => tracing::debug!("End recording ignored while idle"),
            RecorderState::Ending => tracing::debug!("End recording already in progress"),
            RecorderState::Starting | RecorderState::WaitingForAlignedStart => {
                self.transition(RecorderState::Ending);
                self.end_without_writer();
            }
            RecorderState::Capturing => self.finish(),
        }
    }

    /// Ending before any sample was written: nothing to finalize
    fn end_without_writer(&mut self) {
        let Some(mut session) = self.session.take() else {
            self.status.recording.store(false, Ordering::SeqCst);
            self.transition(RecorderState::Idle);
            return;
        };

        tracing::error!(
            "Recording {} ended before capture started; no active writer session, no file written",
            session.id
        );
        if let Some(mut writer) = session.writer.take() {
            writer.cancel_writing();
        }
        remove_partial(&session.output_path);

        self.status.recording.store(false, Ordering::SeqCst);
        self.transition(RecorderState::Idle);
        self.events.emit(RecordingEvent::Ended {
            session_id: session.id,
        });
    }

    fn finish(&mut self) {
        self.transition(RecorderState::Ending);

        let commands = self.commands.clone();
        let has_writer = self
            .session
            .as_ref()
            .map(|s| s.writer.is_some())
            .unwrap_or(false);
        if !has_writer {
            self.end_without_writer();
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let session_id = session.id;
        let Some(writer) = session.writer.as_mut() else {
            return;
        };

        tracing::info!(
            "Finishing recording {}: {} video frames, {} audio frames, {} dropped",
            session_id,
            session.counters.video_frames,
            session.counters.audio_frames,
            session.counters.dropped_video
        );
        writer.mark_finished(MediaKind::Video);
        writer.mark_finished(MediaKind::Audio);
        writer.finish_writing(Box::new(move |outcome| {
            if commands
                .send(RecorderCommand::WriterFinished {
                    session_id,
                    outcome,
                })
                .is_err()
            {
                tracing::warn!("Recorder queue closed before session {} finalized", session_id);
            }
        }));
    }

    fn on_writer_finished(&mut self, session_id: Uuid, outcome: FinishOutcome) {
        let current = self.session.as_ref().map(|s| s.id);
        if self.state != RecorderState::Ending || current != Some(session_id) {
            tracing::warn!("Ignoring finalize result for stale session {}", session_id);
            return;
        }
        let Some(session) = self.session.take() else {
            return;
        };

        if let Some(error) = &outcome.error {
            tracing::error!("Finalize of {} reported an error: {}", session_id, error);
        }

        let output = RecordingOutput {
            session_id,
            path: outcome.path,
            aligned_start_seconds: session
                .aligned_start
                .map(|t: MediaTime| t.seconds())
                .unwrap_or(0.0),
            duration_seconds: session.written_duration(),
            video_frames: match outcome.error {
                None => outcome.video_frames,
                Some(_) => session.counters.video_frames,
            },
            audio_samples_written: session.counters.audio_frames,
            dropped_frames: session.counters.dropped_video + session.counters.source_drops,
            started_at: session.started_at,
            finalize_error: outcome.error,
        };
        drop(session);

        *self.status.last_output.write() = Some(output.clone());
        self.status.recording.store(false, Ordering::SeqCst);
        self.transition(RecorderState::Idle);

        if let Some(post_processor) = self.deps.post_processor.clone() {
            let finished = output.clone();
            let spawned = std::thread::Builder::new()
                .name("post-process".to_string())
                .spawn(move || post_processor.recording_finished(&finished));
            if let Err(e) = spawned {
                tracing::warn!("Failed to start post-processing: {}", e);
            }
        }

        tracing::info!(
            "Recording {} finished: {:?}, {:.2}s",
            session_id,
            output.path,
            output.duration_seconds
        );
        self.events.emit(RecordingEvent::Ended { session_id });
    }

    fn fail_session(&mut self, reason: String) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        tracing::error!("Recording session {} failed: {}", session.id, reason);
        if let Some(mut writer) = session.writer.take() {
            writer.cancel_writing();
        }
        remove_partial(&session.output_path);

        self.status.recording.store(false, Ordering::SeqCst);
        self.transition(RecorderState::Idle);
        self.events.emit(RecordingEvent::SessionFailed {
            session_id: session.id,
            reason,
        });
    }
}

/// Create the writer and its inputs, then begin asynchronous startup
fn open_writer(
    factory: &dyn WriterFactory,
    session: &mut RecordingSession,
    settings: &OutputSettings,
) -> WriterResult<()> {
    let mut writer = factory.create(&session.output_path, settings)?;

    let setup = (|| -> WriterResult<()> {
        writer.add_video_input(&settings.video)?;
        if let Some(audio) = &settings.audio {
            writer.add_audio_input(audio)?;
        }
        writer.start_writing()
    })();
    if let Err(e) = setup {
        writer.cancel_writing();
        return Err(e);
    }

    session.adaptor = Some(PixelBufferAdaptor::new(settings.video.input));
    session.audio_layout = settings.audio.map(|a| a.layout);
    session.writer = Some(writer);
    Ok(())
}

fn remove_partial(path: &Path) {
    if path.exists() {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::info!("Removed partial file {:?}", path),
            Err(e) => tracing::warn!("Failed to remove partial file {:?}: {}", path, e),
        }
    }
}
