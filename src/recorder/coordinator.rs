//! Recording coordinator
//!
//! Owns the recorder's serial queue: a dedicated thread that feeds every
//! command to the state machine in order. Begin and end requests, samples
//! and writer completions are all posted onto it; nothing is handled on the
//! caller's thread.

use super::events::{EventBus, RecordingEvent};
use super::machine::{RecorderDeps, RecorderStateMachine, SharedStatus};
use super::state::{RecorderConfig, RecorderState, RecordingOutput};
use super::{BeginRequest, RecorderCommand, RecordingError, RecordingResult};
use crate::capture::{DroppedFrame, SampleSink};
use crate::media::MediaSample;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Runs a `RecorderStateMachine` on its own serial queue
pub struct RecordingCoordinator {
    status: SharedStatus,
    events: EventBus,
    commands: mpsc::UnboundedSender<RecorderCommand>,
    queue: Mutex<Option<JoinHandle<()>>>,
}

impl RecordingCoordinator {
    /// Start the recorder queue
    pub fn spawn(config: RecorderConfig, deps: RecorderDeps) -> RecordingResult<Self> {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let events = EventBus::new();
        let status = SharedStatus::default();

        let mut machine = RecorderStateMachine::new(
            config,
            deps,
            events.clone(),
            status.clone(),
            commands.clone(),
        );

        let queue = std::thread::Builder::new()
            .name("recorder-queue".to_string())
            .spawn(move || {
                let mut shutting_down = false;
                while let Some(command) = rx.blocking_recv() {
                    if matches!(command, RecorderCommand::Shutdown) {
                        shutting_down = true;
                    }
                    machine.handle(command);
                    if shutting_down && machine.state() == RecorderState::Idle {
                        break;
                    }
                }
                tracing::debug!("Recorder queue stopped");
            })?;

        tracing::info!(
            "Recorder queue started (lead time {}ms)",
            config.lead_time.as_millis()
        );
        Ok(Self {
            status,
            events,
            commands,
            queue: Mutex::new(Some(queue)),
        })
    }

    /// Get the current recorder state
    pub fn state(&self) -> RecorderState {
        self.status.state()
    }

    pub fn is_recording(&self) -> bool {
        self.status.is_recording()
    }

    pub fn last_output(&self) -> Option<RecordingOutput> {
        self.status.last_output()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }

    /// Sink that feeds samples onto the recorder queue
    pub fn sink(&self) -> Arc<RecorderSink> {
        Arc::new(RecorderSink {
            commands: self.commands.clone(),
        })
    }

    /// Post a begin request
    ///
    /// Rejected up front when a take is already in progress; a request that
    /// races with another begin is ignored by the machine.
    pub fn begin_recording(&self, request: BeginRequest) -> RecordingResult<()> {
        if self.status.is_recording() {
            return Err(RecordingError::AlreadyRecording);
        }
        tracing::info!("Posting begin recording: {:?}", request.output_path);
        self.post(RecorderCommand::Begin(request))
    }

    /// Post an end request. Harmless in any state.
    pub fn end_recording(&self) -> RecordingResult<()> {
        self.post(RecorderCommand::End)
    }

    fn post(&self, command: RecorderCommand) -> RecordingResult<()> {
        self.commands
            .send(command)
            .map_err(|_| RecordingError::QueueClosed)
    }

    /// Wait until no take is in progress. Returns false on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let mut events = self.subscribe();
        let idle = |status: &SharedStatus| {
            !status.is_recording() && status.state() == RecorderState::Idle
        };
        if idle(&self.status) {
            return true;
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(RecordingEvent::Ended { .. }) | Ok(RecordingEvent::SessionFailed { .. }) => {
                        if idle(&self.status) {
                            return true;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if idle(&self.status) {
                            return true;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return idle(&self.status),
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Finish any take in progress and stop the queue
    pub fn shutdown(&self) {
        let _ = self.commands.send(RecorderCommand::Shutdown);
        if let Some(queue) = self.queue.lock().take() {
            if queue.join().is_err() {
                tracing::error!("Recorder queue panicked");
            }
        }
    }
}

impl Drop for RecordingCoordinator {
    fn drop(&mut self) {
        let _ = self.commands.send(RecorderCommand::Shutdown);
    }
}

/// Posts samples and drop reports onto the recorder queue
pub struct RecorderSink {
    commands: mpsc::UnboundedSender<RecorderCommand>,
}

impl SampleSink for RecorderSink {
    fn on_sample(&self, sample: MediaSample) {
        let _ = self.commands.send(RecorderCommand::Sample(sample));
    }

    fn on_dropped_frame(&self, dropped: DroppedFrame) {
        let _ = self.commands.send(RecorderCommand::DroppedFrame(dropped));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureProfile, FrameRate, Resolution};
    use crate::media::{MediaTime, PixelFormat, PooledBuffer, VideoFormat};
    use crate::recorder::machine::tests::{Script, ScriptedFactory};

    fn coordinator() -> (RecordingCoordinator, Arc<parking_lot::Mutex<Script>>) {
        let script = Arc::new(parking_lot::Mutex::new(Script::default()));
        let factory = Arc::new(ScriptedFactory {
            script: script.clone(),
        });
        let coordinator =
            RecordingCoordinator::spawn(RecorderConfig::device(), RecorderDeps::new(factory))
                .unwrap();
        (coordinator, script)
    }

    fn frame(n: i64) -> MediaSample {
        let format = VideoFormat::new(2, 2, PixelFormat::Bgra8);
        MediaSample::video(
            MediaTime::new(n, 30),
            PooledBuffer::detached(vec![1; format.frame_len()]),
            format,
        )
    }

    #[tokio::test]
    async fn test_queue_records_a_take() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, script) = coordinator();
        let mut events = coordinator.subscribe();
        let sink = coordinator.sink();

        coordinator
            .begin_recording(BeginRequest {
                output_path: dir.path().join("take.mov"),
                profile: CaptureProfile::new("t", Resolution::new(2, 2), FrameRate::Fps30),
            })
            .unwrap();
        for n in 0..45 {
            sink.on_sample(frame(n));
        }
        coordinator.end_recording().unwrap();

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
        assert!(coordinator.wait_until_idle(Duration::from_secs(1)).await);
        assert_eq!(script.lock().video_pts.len(), 15);
        assert_eq!(coordinator.last_output().unwrap().video_frames, 15);
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn test_begin_rejected_while_recording() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _script) = coordinator();
        let request = BeginRequest {
            output_path: dir.path().join("take.mov"),
            profile: CaptureProfile::new("t", Resolution::new(2, 2), FrameRate::Fps30),
        };
        coordinator.begin_recording(request.clone()).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !coordinator.is_recording() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(matches!(
            coordinator.begin_recording(request),
            Err(RecordingError::AlreadyRecording)
        ));

        coordinator.end_recording().unwrap();
        assert!(coordinator.wait_until_idle(Duration::from_secs(5)).await);
        coordinator.shutdown();
    }

    #[test]
    fn test_shutdown_stops_queue() {
        let (coordinator, _script) = coordinator();
        coordinator.shutdown();
        assert!(matches!(
            coordinator.end_recording(),
            Err(RecordingError::QueueClosed)
        ));
    }
}
