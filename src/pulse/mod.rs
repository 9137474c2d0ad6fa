//! Pulse recording and summarisation.
//!
//! A pulse records frames into a temporary artifact, hands it to the
//! extractor, reduces the resulting table, classifies it and appends one row
//! to the session log.

pub mod extractor;
pub mod recorder;
pub mod writer;

use crate::core::summary::ReduceError;
use crate::session_log::SessionLogError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// Re-export commonly used types
pub use extractor::{ExtractError, FeatureExtractor, OpenFaceExtractor};
pub use recorder::{Pipeline, PulseSummary, Recording};
pub use writer::{SinkFactory, VideoSink, Y4mSinkFactory};

#[cfg(feature = "opencv")]
pub use writer::OpenCvSinkFactory;

/// Lifecycle stage of a pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseStage {
    Recording,
    Extracting,
    Summarizing,
    Classifying,
    Logged,
}

impl std::fmt::Display for PulseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PulseStage::Recording => "recording",
            PulseStage::Extracting => "extracting",
            PulseStage::Summarizing => "summarizing",
            PulseStage::Classifying => "classifying",
            PulseStage::Logged => "logging",
        };
        f.write_str(name)
    }
}

/// Errors raised while writing the recording artifact.
#[derive(Debug)]
pub enum RecorderError {
    /// The write target could not be opened
    WriterOpen(String),
    /// A frame did not match the configured size
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// The sink was already finalised
    Closed,
    Io(String),
}

impl std::fmt::Display for RecorderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderError::WriterOpen(e) => write!(f, "Video writer failed to open: {e}"),
            RecorderError::FrameSize { expected, actual } => write!(
                f,
                "Frame size {}x{} does not match {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            RecorderError::Closed => write!(f, "Video writer already finalised"),
            RecorderError::Io(e) => write!(f, "Video write failed: {e}"),
        }
    }
}

impl std::error::Error for RecorderError {}

/// A fatal per-pulse failure, tagged with the stage that failed.
#[derive(Debug)]
pub enum PulseError {
    Record(RecorderError),
    Extract(ExtractError),
    Summarize(ReduceError),
    /// The extractor produced a table with no rows
    EmptyTable(PathBuf),
    Log(SessionLogError),
}

impl PulseError {
    /// Stage at which the pulse stopped.
    pub fn stage(&self) -> PulseStage {
        match self {
            PulseError::Record(_) => PulseStage::Recording,
            PulseError::Extract(_) => PulseStage::Extracting,
            PulseError::Summarize(_) | PulseError::EmptyTable(_) => PulseStage::Summarizing,
            PulseError::Log(_) => PulseStage::Logged,
        }
    }

    /// Whether this is the explicit "nothing to summarise" condition.
    pub fn is_empty_table(&self) -> bool {
        matches!(self, PulseError::EmptyTable(_))
    }
}

impl std::fmt::Display for PulseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pulse failed while {}: ", self.stage())?;
        match self {
            PulseError::Record(e) => write!(f, "{e}"),
            PulseError::Extract(e) => write!(f, "{e}"),
            PulseError::Summarize(e) => write!(f, "{e}"),
            PulseError::EmptyTable(table) => {
                write!(f, "{} has no rows, nothing to summarise", table.display())
            }
            PulseError::Log(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PulseError {}

impl From<RecorderError> for PulseError {
    fn from(e: RecorderError) -> Self {
        PulseError::Record(e)
    }
}

impl From<ExtractError> for PulseError {
    fn from(e: ExtractError) -> Self {
        PulseError::Extract(e)
    }
}

impl From<ReduceError> for PulseError {
    fn from(e: ReduceError) -> Self {
        PulseError::Summarize(e)
    }
}

impl From<SessionLogError> for PulseError {
    fn from(e: SessionLogError) -> Self {
        PulseError::Log(e)
    }
}
