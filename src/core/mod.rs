//! Core computations of the MoodPulse agent.
//!
//! This module contains:
//! - The fixed set of facial measurement channels
//! - Reduction of a per-frame table into one feature summary
//! - The rule-based expression classifier
//! - Schedule arithmetic and cancellable waiting

pub mod channels;
pub mod classifier;
pub mod summary;
pub mod timing;

// Re-export commonly used types
pub use channels::{Channel, CHANNEL_COUNT};
pub use classifier::{candidate_scores, classify, Classification, Expression};
pub use summary::{reduce_file, reduce_reader, FeatureVector, ReduceError, Reduction};
pub use timing::{next_start_after, wait_until, StopSignal, WaitOutcome};
