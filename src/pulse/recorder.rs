//! Recording of one pulse and its hand-off to extraction and logging.
//!
//! [`Recording`] only exists between a successful start and `finish`, so a
//! write before start or after finish cannot be expressed. The artifact lives
//! in a temporary directory that is removed whenever the recording is
//! dropped, whichever way `finish` exits.

use crate::camera::{CaptureSpec, Frame};
use crate::core::classifier::{classify, Classification};
use crate::core::summary::{reduce_file, FeatureVector, Reduction};
use crate::pulse::extractor::FeatureExtractor;
use crate::pulse::writer::{SinkFactory, VideoSink};
use crate::pulse::{PulseError, PulseStage, RecorderError};
use crate::session_log::{SessionLog, SessionLogRow, TS_FORMAT};
use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;

/// Everything a pulse needs after capture.
pub struct Pipeline<E: FeatureExtractor> {
    pub extractor: E,
    /// Directory the extractor writes per-pulse tables into
    pub raw_dir: PathBuf,
    pub log: SessionLog,
}

/// Result of a logged pulse.
#[derive(Debug, Clone)]
pub struct PulseSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub features: FeatureVector,
    pub classification: Classification,
    pub raw_table: PathBuf,
    /// Frames handed to the video sink (may differ from `features.frames`)
    pub frames_written: u64,
}

/// An in-progress pulse recording.
pub struct Recording {
    session_id: String,
    workdir: TempDir,
    video_path: PathBuf,
    sink: Box<dyn VideoSink>,
    frames_written: u64,
    frames_rejected: u64,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Recording {
    /// Open the write target for a new pulse.
    pub fn start(
        spec: &CaptureSpec,
        session_id: &str,
        sinks: &dyn SinkFactory,
    ) -> Result<Self, RecorderError> {
        let workdir = tempfile::Builder::new()
            .prefix("moodpulse-")
            .tempdir()
            .map_err(|e| RecorderError::WriterOpen(format!("temporary directory: {e}")))?;

        let started_at = Utc::now();
        let video_path = workdir.path().join(format!(
            "pulse_{}_{}.{}",
            started_at.format("%Y%m%dT%H%M%S"),
            session_id,
            sinks.extension()
        ));
        let sink = sinks.create(&video_path, spec)?;

        tracing::debug!(path = %video_path.display(), "recording started");
        Ok(Self {
            session_id: session_id.to_string(),
            workdir,
            video_path,
            sink,
            frames_written: 0,
            frames_rejected: 0,
            started_at,
            started: Instant::now(),
        })
    }

    /// Append a frame. Frames of the wrong size are counted and rejected.
    pub fn write(&mut self, frame: &Frame) -> Result<(), RecorderError> {
        match self.sink.write(frame) {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e @ RecorderError::FrameSize { .. }) => {
                self.frames_rejected += 1;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    /// Close the artifact, then extract, reduce, classify and log it.
    ///
    /// Runs extraction even when no frames were written. No row is logged
    /// unless a summary was produced.
    pub fn finish<E: FeatureExtractor>(
        self,
        pipeline: &Pipeline<E>,
    ) -> Result<PulseSummary, PulseError> {
        let Recording {
            session_id,
            workdir,
            video_path,
            mut sink,
            frames_written,
            frames_rejected,
            started_at,
            started,
        } = self;

        sink.finalize()?;
        let elapsed = started.elapsed();
        if frames_rejected > 0 {
            tracing::warn!(frames_rejected, "frames with unexpected size were dropped");
        }

        tracing::debug!(stage = %PulseStage::Extracting, frames_written);
        let raw_table = pipeline.extractor.extract(&video_path, &pipeline.raw_dir)?;

        tracing::debug!(stage = %PulseStage::Summarizing, table = %raw_table.display());
        let features = match reduce_file(&raw_table, elapsed)? {
            Reduction::Summary(features) => features,
            Reduction::Empty => return Err(PulseError::EmptyTable(raw_table)),
        };

        tracing::debug!(stage = %PulseStage::Classifying);
        let classification = classify(&features);

        let row = SessionLogRow {
            ts: Local::now().format(TS_FORMAT).to_string(),
            session_id: session_id.clone(),
            features: features.clone(),
            classification,
            src_csv: raw_table.clone(),
        };
        pipeline.log.append(&row)?;
        tracing::debug!(stage = %PulseStage::Logged, log = %pipeline.log.path().display());

        if let Err(e) = workdir.close() {
            tracing::warn!("could not remove pulse artifact: {e}");
        }

        Ok(PulseSummary {
            session_id,
            started_at,
            features,
            classification,
            raw_table,
            frames_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::Expression;
    use crate::pulse::extractor::ExtractError;
    use crate::pulse::writer::Y4mSinkFactory;
    use std::cell::RefCell;

    /// Writes a fixed table and remembers which video it was given.
    struct TableExtractor {
        table: Option<&'static str>,
        seen: RefCell<Vec<PathBuf>>,
    }

    impl TableExtractor {
        fn new(table: Option<&'static str>) -> Self {
            Self {
                table,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl FeatureExtractor for TableExtractor {
        fn extract(&self, video: &Path, out_dir: &Path) -> Result<PathBuf, ExtractError> {
            assert!(video.exists(), "artifact must be finalised before extraction");
            self.seen.borrow_mut().push(video.to_path_buf());
            match self.table {
                Some(table) => {
                    std::fs::create_dir_all(out_dir).unwrap();
                    let path = out_dir.join("pulse.csv");
                    std::fs::write(&path, table).unwrap();
                    Ok(path)
                }
                None => Err(ExtractError::Failed {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: "boom".into(),
                }),
            }
        }
    }

    fn spec() -> CaptureSpec {
        CaptureSpec {
            device_index: 0,
            width: 2,
            height: 2,
            fps: 15,
            fourcc: "mp4v".into(),
        }
    }

    fn pipeline(dir: &Path, table: Option<&'static str>) -> Pipeline<TableExtractor> {
        Pipeline {
            extractor: TableExtractor::new(table),
            raw_dir: dir.join("pulses"),
            log: SessionLog::new(dir.join("session_summary.csv")),
        }
    }

    #[test]
    fn test_pulse_is_logged_and_artifact_removed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            Some("frame, AU12_r, AU04_r, AU06_r\n1, 0.9, 0.1, 0.8\n2, 0.9, 0.1, 0.8\n"),
        );

        let mut recording = Recording::start(&spec(), "abcd1234", &Y4mSinkFactory).unwrap();
        recording.write(&Frame::solid(2, 2, [10, 20, 30])).unwrap();
        recording.write(&Frame::solid(2, 2, [10, 20, 30])).unwrap();
        let video = recording.video_path().to_path_buf();
        assert!(video.to_string_lossy().ends_with("_abcd1234.y4m"));

        let summary = recording.finish(&pipeline).unwrap();
        assert_eq!(summary.frames_written, 2);
        assert_eq!(summary.features.frames, 2);
        assert_eq!(summary.classification.label, Expression::Happy);
        assert!(!video.exists());
        assert!(!video.parent().unwrap().exists());

        let rows = pipeline.log.read_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].session_id, "abcd1234");
    }

    #[test]
    fn test_zero_frames_still_extracts_and_reports_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Some("frame, AU12_r\n"));

        let recording = Recording::start(&spec(), "abcd1234", &Y4mSinkFactory).unwrap();
        let video = recording.video_path().to_path_buf();
        let err = recording.finish(&pipeline).unwrap_err();

        assert!(err.is_empty_table());
        assert_eq!(pipeline.extractor.seen.borrow().len(), 1);
        assert!(!pipeline.log.path().exists());
        assert!(!video.exists());
    }

    #[test]
    fn test_extraction_failure_logs_nothing_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), None);

        let mut recording = Recording::start(&spec(), "abcd1234", &Y4mSinkFactory).unwrap();
        recording.write(&Frame::solid(2, 2, [0, 0, 0])).unwrap();
        let video = recording.video_path().to_path_buf();
        let err = recording.finish(&pipeline).unwrap_err();

        assert_eq!(err.stage(), PulseStage::Extracting);
        assert!(err.to_string().contains("boom"));
        assert!(!pipeline.log.path().exists());
        assert!(!video.exists());
    }

    #[test]
    fn test_wrong_size_frames_are_counted() {
        let mut recording = Recording::start(&spec(), "abcd1234", &Y4mSinkFactory).unwrap();
        assert!(recording.write(&Frame::solid(3, 3, [0, 0, 0])).is_err());
        assert_eq!(recording.frames_rejected(), 1);
        assert_eq!(recording.frames_written(), 0);
    }
}
