//! The pulse scheduler.
//!
//! Drives `Idle → WaitingFirst → Recording → WaitingRecurring → Recording →
//! … → Stopped`. The first pulse starts `first_offset` after [`PulseScheduler::run`]
//! is entered; every later pulse lands on the grid `first_start + k·gap`, so a
//! slow pulse or a stalled extraction never shifts the cadence.
//!
//! Pulses run strictly one after another on the calling thread. A stop request
//! is honoured between pulses, while waiting and once per captured frame; the
//! in-flight pulse is always finalised before [`PulseScheduler::run`] returns.

use crate::camera::{Camera, CameraHandle, CaptureSpec};
use crate::config::{Config, ScheduleConfig};
use crate::core::timing::{next_start_after, wait_until, StopSignal, WaitOutcome};
use crate::pulse::{
    FeatureExtractor, Pipeline, PulseStage, PulseSummary, Recording, RecorderError, SinkFactory,
};
use crate::session_log::SessionLog;
use crate::transparency::{create_shared_log, SharedTransparencyLog};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of the inter-pulse wait.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Back-off when the camera has no frame ready.
const FRAME_IDLE: Duration = Duration::from_millis(10);

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    WaitingFirst,
    Recording,
    WaitingRecurring,
    Stopped,
}

/// What happened to one pulse.
#[derive(Debug, Clone)]
pub enum PulseOutcome {
    /// A row was appended to the session log
    Logged(PulseSummary),
    /// The camera could not be opened; nothing was recorded
    Skipped { reason: String },
    /// The pulse failed at `stage`
    Failed {
        stage: PulseStage,
        message: String,
        /// The extractor ran but produced no rows
        empty: bool,
    },
}

impl PulseOutcome {
    pub fn is_logged(&self) -> bool {
        matches!(self, PulseOutcome::Logged(_))
    }
}

/// Progress notifications for a front end.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Time left until the next pulse, sent on every poll of the wait
    Waiting { remaining: Duration },
    PulseStarted { index: u32 },
    PulseFinished { index: u32, outcome: PulseOutcome },
    Stopped,
}

/// Totals for one call to [`PulseScheduler::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pulses: u32,
    pub logged: u32,
    pub skipped: u32,
    pub failed: u32,
    /// Whether the run ended on a stop request rather than `max_pulses`
    pub stopped_by_request: bool,
}

/// Sequential pulse scheduler over a camera, a video sink and an extractor.
pub struct PulseScheduler<C: Camera, K: SinkFactory, E: FeatureExtractor> {
    camera: C,
    sinks: K,
    pipeline: Pipeline<E>,
    spec: CaptureSpec,
    warmup_frames: u32,
    schedule: ScheduleConfig,
    stop: StopSignal,
    transparency: SharedTransparencyLog,
    session_id: String,
    state: SchedulerState,
}

impl<C: Camera, K: SinkFactory, E: FeatureExtractor> PulseScheduler<C, K, E> {
    pub fn new(config: &Config, camera: C, sinks: K, extractor: E) -> Self {
        Self {
            camera,
            sinks,
            pipeline: Pipeline {
                extractor,
                raw_dir: config.raw_table_dir(),
                log: SessionLog::new(config.session_log_path()),
            },
            spec: config.camera.capture_spec(),
            warmup_frames: config.camera.warmup_frames,
            schedule: config.schedule.clone(),
            stop: StopSignal::new(),
            transparency: create_shared_log(),
            session_id: new_session_id(),
            state: SchedulerState::Idle,
        }
    }

    /// Share a stop signal with signal handlers or a key watcher.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_transparency(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = log;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn session_log(&self) -> &SessionLog {
        &self.pipeline.log
    }

    /// Run the schedule until a stop is requested or `max_pulses` is reached.
    pub fn run<F>(&mut self, mut observer: F) -> RunSummary
    where
        F: FnMut(&SchedulerEvent),
    {
        let t0 = Instant::now();
        let mut summary = RunSummary::default();
        let first_offset = self.schedule.first_offset;
        let gap = self.schedule.recurring_gap;
        let anchor = first_offset + gap;

        tracing::info!(
            session_id = %self.session_id,
            first_offset_s = first_offset.as_secs_f64(),
            gap_s = gap.as_secs_f64(),
            "pulse schedule started"
        );

        self.state = SchedulerState::WaitingFirst;
        let mut next_start = first_offset;

        while !self.quota_reached(&summary) {
            let outcome = wait_until(t0 + next_start, WAIT_POLL, &self.stop, |remaining| {
                observer(&SchedulerEvent::Waiting { remaining })
            });
            if outcome == WaitOutcome::Stopped {
                break;
            }

            self.state = SchedulerState::Recording;
            let outcome = self.run_pulse(summary.pulses + 1, &mut observer);
            summary.pulses += 1;
            match outcome {
                PulseOutcome::Logged(_) => summary.logged += 1,
                PulseOutcome::Skipped { .. } => summary.skipped += 1,
                PulseOutcome::Failed { .. } => summary.failed += 1,
            }

            if self.stop.is_stop_requested() {
                break;
            }

            self.state = SchedulerState::WaitingRecurring;
            next_start = next_start_after(anchor, gap, t0.elapsed(), self.schedule.min_lead);
        }

        summary.stopped_by_request = self.stop.is_stop_requested();
        self.state = SchedulerState::Stopped;
        if let Err(e) = self.transparency.save() {
            tracing::warn!("could not save camera statistics: {e}");
        }
        tracing::info!(
            pulses = summary.pulses,
            logged = summary.logged,
            skipped = summary.skipped,
            failed = summary.failed,
            "pulse schedule stopped"
        );
        observer(&SchedulerEvent::Stopped);
        summary
    }

    fn quota_reached(&self, summary: &RunSummary) -> bool {
        self.schedule
            .max_pulses
            .is_some_and(|max| summary.pulses >= max)
    }

    /// One pulse: open, capture for `pulse_duration` from entry, release,
    /// finalise, then the reopen cooldown.
    fn run_pulse<F>(&mut self, index: u32, observer: &mut F) -> PulseOutcome
    where
        F: FnMut(&SchedulerEvent),
    {
        let deadline = Instant::now() + self.schedule.pulse_duration;
        self.transparency.record_pulse_started();
        observer(&SchedulerEvent::PulseStarted { index });

        let outcome = match CameraHandle::open(&self.camera, &self.spec, self.warmup_frames) {
            Ok(mut camera) => self.record(&mut camera, deadline),
            Err(e) => {
                tracing::warn!(pulse = index, "camera could not be opened, skipping pulse: {e}");
                // Keep the cadence: wait out the nominal duration.
                let _ = wait_until(deadline, WAIT_POLL, &self.stop, |_| {});
                PulseOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        };

        match &outcome {
            PulseOutcome::Logged(summary) => {
                self.transparency.record_pulse_logged();
                tracing::info!(
                    pulse = index,
                    expr = %summary.classification.label,
                    score = summary.classification.score,
                    frames = summary.features.frames,
                    "pulse logged"
                );
            }
            PulseOutcome::Skipped { .. } => self.transparency.record_pulse_skipped(),
            PulseOutcome::Failed {
                stage,
                message,
                empty,
            } => {
                self.transparency.record_pulse_failed();
                if *empty {
                    tracing::warn!(pulse = index, %stage, "{message}");
                } else {
                    tracing::error!(pulse = index, %stage, "{message}");
                }
            }
        }

        observer(&SchedulerEvent::PulseFinished {
            index,
            outcome: outcome.clone(),
        });

        if !self.schedule.reopen_cooldown.is_zero() {
            thread::sleep(self.schedule.reopen_cooldown);
        }
        outcome
    }

    fn record(&self, camera: &mut CameraHandle<C::Source>, deadline: Instant) -> PulseOutcome {
        let mut recording = match Recording::start(&self.spec, &self.session_id, &self.sinks) {
            Ok(recording) => recording,
            Err(e) => {
                camera.close();
                return PulseOutcome::Failed {
                    stage: PulseStage::Recording,
                    message: e.to_string(),
                    empty: false,
                };
            }
        };

        let mut write_error = None;
        while Instant::now() < deadline && !self.stop.is_stop_requested() {
            match camera.read() {
                Some(frame) => match recording.write(&frame) {
                    Ok(()) => {}
                    Err(e @ RecorderError::FrameSize { .. }) => {
                        tracing::debug!("frame not recorded: {e}");
                    }
                    // The artifact is no longer trustworthy once the sink fails.
                    Err(e) => {
                        write_error = Some(e);
                        break;
                    }
                },
                None => thread::sleep(FRAME_IDLE),
            }
        }
        camera.close();
        self.transparency.record_frames(recording.frames_written());

        if let Some(e) = write_error {
            drop(recording);
            return PulseOutcome::Failed {
                stage: PulseStage::Recording,
                message: e.to_string(),
                empty: false,
            };
        }

        match recording.finish(&self.pipeline) {
            Ok(summary) => PulseOutcome::Logged(summary),
            Err(e) => PulseOutcome::Failed {
                stage: e.stage(),
                message: e.to_string(),
                empty: e.is_empty_table(),
            },
        }
    }
}

/// Short random identifier shared by every row of one run.
pub fn new_session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, Frame, FrameSource, NoopCamera};
    use crate::pulse::{ExtractError, Y4mSinkFactory};
    use std::path::{Path, PathBuf};

    struct NeverCalled;

    impl FeatureExtractor for NeverCalled {
        fn extract(&self, _video: &Path, _out_dir: &Path) -> Result<PathBuf, ExtractError> {
            panic!("extraction must not run for a skipped pulse");
        }
    }

    fn fast_config(dir: &Path) -> Config {
        let mut config = Config {
            output_dir: dir.join("out"),
            data_path: dir.join("data"),
            ..Config::default()
        };
        config.camera.width = 4;
        config.camera.height = 4;
        config.camera.warmup_frames = 0;
        config.schedule = ScheduleConfig {
            first_offset: Duration::from_millis(10),
            pulse_duration: Duration::from_millis(40),
            recurring_gap: Duration::from_millis(120),
            reopen_cooldown: Duration::ZERO,
            min_lead: Duration::from_millis(5),
            max_pulses: Some(2),
        };
        config
    }

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn test_unavailable_camera_skips_every_pulse() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path());
        let mut scheduler = PulseScheduler::new(&config, NoopCamera, Y4mSinkFactory, NeverCalled);

        let mut events = Vec::new();
        let summary = scheduler.run(|e| events.push(e.clone()));

        assert_eq!(summary.pulses, 2);
        assert_eq!(summary.skipped, 2);
        assert!(!summary.stopped_by_request);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!scheduler.session_log().path().exists());
        assert!(matches!(events.last(), Some(SchedulerEvent::Stopped)));
    }

    #[test]
    fn test_stop_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path());
        let stop = StopSignal::new();
        stop.request_stop();
        let mut scheduler = PulseScheduler::new(&config, NoopCamera, Y4mSinkFactory, NeverCalled)
            .with_stop_signal(stop);

        let summary = scheduler.run(|_| {});
        assert_eq!(summary.pulses, 0);
        assert!(summary.stopped_by_request);
    }

    struct BrokenWriter;

    impl SinkFactory for BrokenWriter {
        fn extension(&self) -> &'static str {
            "y4m"
        }

        fn create(
            &self,
            _path: &Path,
            _spec: &CaptureSpec,
        ) -> Result<Box<dyn crate::pulse::VideoSink>, crate::pulse::RecorderError> {
            Err(crate::pulse::RecorderError::WriterOpen("denied".into()))
        }
    }

    struct OneFrameCamera;

    struct OneFrameSource(bool);

    impl FrameSource for OneFrameSource {
        fn read(&mut self) -> Option<Frame> {
            self.0.then(|| Frame::solid(4, 4, [1, 2, 3]))
        }

        fn close(&mut self) {
            self.0 = false;
        }
    }

    impl Camera for OneFrameCamera {
        type Source = OneFrameSource;

        fn open(&self, _spec: &CaptureSpec) -> Result<Self::Source, CameraError> {
            Ok(OneFrameSource(true))
        }
    }

    #[test]
    fn test_writer_failure_is_reported_and_schedule_continues() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path());
        let transparency = create_shared_log();
        let mut scheduler = PulseScheduler::new(&config, OneFrameCamera, BrokenWriter, NeverCalled)
            .with_transparency(transparency.clone());

        let mut failures = Vec::new();
        let summary = scheduler.run(|e| {
            if let SchedulerEvent::PulseFinished {
                outcome: PulseOutcome::Failed { stage, .. },
                ..
            } = e
            {
                failures.push(*stage);
            }
        });

        assert_eq!(summary.failed, 2);
        assert_eq!(failures, vec![PulseStage::Recording, PulseStage::Recording]);

        // A writer that cannot open is a failure, not a skip.
        let stats = transparency.stats();
        assert_eq!(stats.pulses_failed, 2);
        assert_eq!(stats.pulses_skipped, 0);
    }
    /// Opens fine, then fails every write like a full disk.
    struct FullDisk;

    struct FullDiskSink;

    impl crate::pulse::VideoSink for FullDiskSink {
        fn write(&mut self, _frame: &Frame) -> Result<(), RecorderError> {
            Err(RecorderError::Io("No space left on device".into()))
        }

        fn finalize(&mut self) -> Result<(), RecorderError> {
            Ok(())
        }
    }

    impl SinkFactory for FullDisk {
        fn extension(&self) -> &'static str {
            "y4m"
        }

        fn create(
            &self,
            _path: &Path,
            _spec: &CaptureSpec,
        ) -> Result<Box<dyn crate::pulse::VideoSink>, RecorderError> {
            Ok(Box::new(FullDiskSink))
        }
    }

    #[test]
    fn test_sink_io_error_fails_pulse_at_recording() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path());
        let mut scheduler = PulseScheduler::new(&config, OneFrameCamera, FullDisk, NeverCalled);

        let mut outcomes = Vec::new();
        let summary = scheduler.run(|e| {
            if let SchedulerEvent::PulseFinished { outcome, .. } = e {
                outcomes.push(outcome.clone());
            }
        });

        assert_eq!(summary.failed, 2);
        for outcome in &outcomes {
            match outcome {
                PulseOutcome::Failed {
                    stage,
                    message,
                    empty,
                } => {
                    assert_eq!(*stage, PulseStage::Recording);
                    assert!(message.contains("No space left on device"));
                    assert!(!empty);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert!(!scheduler.session_log().path().exists());
    }
}
