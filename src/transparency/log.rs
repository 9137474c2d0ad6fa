//! Persisted pulse counters.
//!
//! Tracks how often the camera was switched on and what became of each
//! pulse, without holding any frame data or feature values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Camera usage statistics, cumulative across runs when persisted.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Pulses the scheduler began
    pulses_started: AtomicU64,
    /// Pulses skipped because the camera could not be opened
    pulses_skipped: AtomicU64,
    /// Pulses that produced a session log row
    pulses_logged: AtomicU64,
    /// Pulses that failed after recording began
    pulses_failed: AtomicU64,
    /// Frames handed to the video writer
    frames_captured: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            pulses_started: AtomicU64::new(0),
            pulses_skipped: AtomicU64::new(0),
            pulses_logged: AtomicU64::new(0),
            pulses_failed: AtomicU64::new(0),
            frames_captured: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that continues from, and saves back to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("could not load previous camera statistics: {e}");
        }

        log
    }

    pub fn record_pulse_started(&self) {
        self.pulses_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pulse_skipped(&self) {
        self.pulses_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pulse_logged(&self) {
        self.pulses_logged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pulse_failed(&self) {
        self.pulses_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frames(&self, count: u64) {
        self.frames_captured.fetch_add(count, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            pulses_started: self.pulses_started.load(Ordering::Relaxed),
            pulses_skipped: self.pulses_skipped.load(Ordering::Relaxed),
            pulses_logged: self.pulses_logged.load(Ordering::Relaxed),
            pulses_failed: self.pulses_failed.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary for the end of a run.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Camera Statistics:\n\
             - Pulses started: {}\n\
             - Pulses skipped (camera unavailable): {}\n\
             - Pulses logged: {}\n\
             - Pulses failed: {}\n\
             - Frames captured: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - Video is deleted after each pulse\n\
             - Only per-pulse averages are kept",
            stats.pulses_started,
            stats.pulses_skipped,
            stats.pulses_logged,
            stats.pulses_failed,
            stats.frames_captured,
            stats.session_duration_secs
        )
    }

    /// Save counters to disk, if persistence is configured.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                pulses_started: stats.pulses_started,
                pulses_skipped: stats.pulses_skipped,
                pulses_logged: stats.pulses_logged,
                pulses_failed: stats.pulses_failed,
                frames_captured: stats.frames_captured,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let persisted = Self::read_persisted(path)?;
                self.pulses_started
                    .store(persisted.pulses_started, Ordering::Relaxed);
                self.pulses_skipped
                    .store(persisted.pulses_skipped, Ordering::Relaxed);
                self.pulses_logged
                    .store(persisted.pulses_logged, Ordering::Relaxed);
                self.pulses_failed
                    .store(persisted.pulses_failed, Ordering::Relaxed);
                self.frames_captured
                    .store(persisted.frames_captured, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn read_persisted(path: &std::path::Path) -> Result<PersistedStats, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }

    /// Read saved counters without starting a session; `None` if never saved.
    pub fn read_saved(path: &std::path::Path) -> Result<Option<SavedStats>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let persisted = Self::read_persisted(path)?;
        Ok(Some(SavedStats {
            pulses_started: persisted.pulses_started,
            pulses_skipped: persisted.pulses_skipped,
            pulses_logged: persisted.pulses_logged,
            pulses_failed: persisted.pulses_failed,
            frames_captured: persisted.frames_captured,
            last_updated: persisted.last_updated,
        }))
    }

    pub fn reset(&self) {
        self.pulses_started.store(0, Ordering::Relaxed);
        self.pulses_skipped.store(0, Ordering::Relaxed);
        self.pulses_logged.store(0, Ordering::Relaxed);
        self.pulses_failed.store(0, Ordering::Relaxed);
        self.frames_captured.store(0, Ordering::Relaxed);
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the counters for the current process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub pulses_started: u64,
    pub pulses_skipped: u64,
    pub pulses_logged: u64,
    pub pulses_failed: u64,
    pub frames_captured: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Counters as last written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedStats {
    pub pulses_started: u64,
    pub pulses_skipped: u64,
    pub pulses_logged: u64,
    pub pulses_failed: u64,
    pub frames_captured: u64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    #[serde(default)]
    pulses_started: u64,
    #[serde(default)]
    pulses_skipped: u64,
    #[serde(default)]
    pulses_logged: u64,
    #[serde(default)]
    pulses_failed: u64,
    #[serde(default)]
    frames_captured: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
