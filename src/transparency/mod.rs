//! Transparency about camera use.
//!
//! Counts pulses and frames so a user can check when, and how often, the
//! webcam was switched on.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SavedStats, SharedTransparencyLog,
    TransparencyLog, TransparencyStats,
};
