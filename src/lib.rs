//! MoodPulse - scheduled webcam pulses summarised as facial Action Units.
//!
//! The agent switches the camera on for a few seconds at a fixed cadence,
//! records the pulse, runs OpenFace's `FeatureExtraction` over it, reduces the
//! per-frame table to one feature vector, labels the expression and appends a
//! row to `session_summary.csv`. The video is deleted after every pulse.
//!
//! # Privacy Guarantees
//!
//! - **Short pulses only**: the camera is held for the pulse duration and released
//! - **No video retention**: the recording lives in a temporary directory removed after extraction
//! - **Aggregates only**: one row of per-pulse means is kept, never individual frames
//! - **Transparency**: every camera activation is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        MoodPulse Scheduler                        │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐              │
//! │  │   Camera    │──▶│  Recording  │──▶│  Extractor  │              │
//! │  │ (6s pulse)  │   │ (temp dir)  │   │  (OpenFace) │              │
//! │  └─────────────┘   └─────────────┘   └─────────────┘              │
//! │         │                                   │                     │
//! │         ▼                                   ▼                     │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐              │
//! │  │Transparency │   │ Session Log │◀──│ Summary +   │              │
//! │  │    Log      │   │   (CSV)     │   │ Classifier  │              │
//! │  └─────────────┘   └─────────────┘   └─────────────┘              │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use moodpulse::{config::Config, camera::PatternCamera, pulse::{OpenFaceExtractor, Y4mSinkFactory}};
//! use moodpulse::scheduler::PulseScheduler;
//!
//! let config = Config::load_with_env().expect("config");
//! let extractor = OpenFaceExtractor::new(config.extractor_bin().expect("OPENFACE_BIN"));
//! let mut scheduler = PulseScheduler::new(&config, PatternCamera, Y4mSinkFactory, extractor);
//! let summary = scheduler.run(|_event| {});
//! println!("{} pulses logged", summary.logged);
//! ```

pub mod camera;
pub mod coach;
pub mod config;
pub mod core;
pub mod logging;
pub mod payload;
pub mod pulse;
pub mod report;
pub mod scheduler;
pub mod session_log;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use camera::{Camera, CameraError, CameraHandle, CaptureSpec, Frame, FrameSource};
pub use config::{Config, ConfigError};
pub use core::{classify, Classification, Expression, FeatureVector, StopSignal};
pub use pulse::{FeatureExtractor, OpenFaceExtractor, PulseError, PulseStage};
pub use scheduler::{PulseOutcome, PulseScheduler, RunSummary, SchedulerEvent, SchedulerState};
pub use session_log::{LoggedPulse, SessionLog};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

#[cfg(feature = "coach")]
pub use coach::{BlockingCoachClient, CoachClient};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║                MOODPULSE - PRIVACY DECLARATION                   ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent samples facial expression data in short pulses.      ║
║                                                                  ║
║  ✓ WHAT WE KEEP:                                                 ║
║    • Per-pulse averages of facial Action Unit intensities        ║
║    • Average head rotation during the pulse                      ║
║    • A coarse expression label and its score                     ║
║                                                                  ║
║  ✗ WHAT WE NEVER KEEP:                                           ║
║    • Video or still images of your face                          ║
║    • Facial landmarks or identity features                       ║
║    • Anything recorded between pulses (the camera is off)        ║
║                                                                  ║
║  Each recording is deleted as soon as it has been analysed.      ║
║  Nothing leaves this machine unless you run `moodpulse ask`.     ║
║                                                                  ║
║  You can view camera usage statistics anytime with:              ║
║    moodpulse status                                              ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_declaration_contents() {
        assert!(PRIVACY_DECLARATION.contains("PRIVACY"));
        assert!(PRIVACY_DECLARATION.contains("NEVER KEEP"));
        assert!(PRIVACY_DECLARATION.contains("Video or still images"));
    }
}
