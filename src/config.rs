//! Configuration for the MoodPulse agent.
//!
//! One immutable [`Config`] value is built at startup (defaults, then the JSON
//! file, then `.env`/environment overrides) and handed to the scheduler and
//! recorder. Nothing in the crate reads process-wide globals after that.

use crate::camera::CaptureSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the session log inside the output directory.
pub const SESSION_LOG_FILE: &str = "session_summary.csv";

/// Sub-directory of the output directory that receives per-pulse raw tables.
pub const RAW_TABLE_DIR: &str = "pulses";

/// Default model used by the interpretation layer.
pub const DEFAULT_COACH_MODEL: &str = "gemini-2.5-flash-lite";

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Camera device settings
    pub camera: CameraConfig,

    /// Pulse cadence
    pub schedule: ScheduleConfig,

    /// Path to the OpenFace `FeatureExtraction` binary
    pub extractor_bin: Option<PathBuf>,

    /// Upper bound on a single extraction run (unbounded when absent)
    #[serde(default, with = "opt_duration_serde")]
    pub extract_timeout: Option<Duration>,

    /// Directory holding the session log and raw tables
    pub output_dir: PathBuf,

    /// Path for storing transparency stats and log files
    pub data_path: PathBuf,

    /// Interpretation layer settings
    pub coach: CoachConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("moodpulse");

        Self {
            camera: CameraConfig::default(),
            schedule: ScheduleConfig::default(),
            extractor_bin: None,
            extract_timeout: None,
            output_dir: data_dir.join("processed"),
            data_path: data_dir,
            coach: CoachConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit file, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from the default location, then apply `.env` and environment overrides.
    pub fn load_with_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();

        let mut config = Self::load()?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment-like lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bin) = non_empty("OPENFACE_BIN") {
            self.extractor_bin = Some(PathBuf::from(bin));
        }
        if let Some(dir) = non_empty("OF_OUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(key) = non_empty("GEMINI_API_KEY") {
            self.coach.api_key = Some(key);
        }
        if let Some(model) = non_empty("AICOACH_MODEL") {
            self.coach.model = model;
        }
        if let Some(temp) = non_empty("AICOACH_TEMPERATURE") {
            self.coach.temperature = temp.trim().parse().map_err(|_| {
                ConfigError::ParseError(format!("AICOACH_TEMPERATURE is not a number: {temp}"))
            })?;
        }
        Ok(())
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("moodpulse")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [&self.output_dir, &self.raw_table_dir(), &self.data_path] {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        Ok(())
    }

    /// Location of the append-only session log.
    pub fn session_log_path(&self) -> PathBuf {
        self.output_dir.join(SESSION_LOG_FILE)
    }

    /// Directory the extractor writes per-pulse tables into.
    pub fn raw_table_dir(&self) -> PathBuf {
        self.output_dir.join(RAW_TABLE_DIR)
    }

    /// Location of the persisted transparency counters.
    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    /// The extractor binary; its absence is a fatal startup error.
    pub fn extractor_bin(&self) -> Result<&Path, ConfigError> {
        self.extractor_bin
            .as_deref()
            .ok_or(ConfigError::MissingExtractor)
    }

    /// Check the schedule and camera values for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule.validate()?;
        self.camera.validate()
    }
}

/// Camera device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device index
    pub index: i32,
    /// Requested frame width in pixels
    pub width: u32,
    /// Requested frame height in pixels
    pub height: u32,
    /// Requested frame rate
    pub fps: u32,
    /// Reads discarded after open while exposure settles
    pub warmup_frames: u32,
    /// Four-character code for the recording artifact (OpenCV writer only)
    pub fourcc: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 15,
            warmup_frames: 8,
            fourcc: "mp4v".to_string(),
        }
    }
}

impl CameraConfig {
    /// The capture spec handed to the camera and the recorder.
    pub fn capture_spec(&self) -> CaptureSpec {
        CaptureSpec {
            device_index: self.index,
            width: self.width,
            height: self.height,
            fps: self.fps,
            fourcc: self.fourcc.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid("frame size must be non-zero".into()));
        }
        if self.fps == 0 {
            return Err(ConfigError::Invalid("frame rate must be non-zero".into()));
        }
        if self.fourcc.chars().count() != 4 {
            return Err(ConfigError::Invalid(format!(
                "fourcc must be four characters, got {:?}",
                self.fourcc
            )));
        }
        Ok(())
    }
}

/// Pulse cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Delay before the first pulse
    #[serde(with = "duration_serde")]
    pub first_offset: Duration,
    /// How long the camera stays on per pulse
    #[serde(with = "duration_serde")]
    pub pulse_duration: Duration,
    /// Spacing of the recurring pulse grid
    #[serde(with = "duration_serde")]
    pub recurring_gap: Duration,
    /// Pause after releasing the camera
    #[serde(with = "duration_serde")]
    pub reopen_cooldown: Duration,
    /// Minimum distance between "now" and the next scheduled start
    #[serde(with = "duration_serde")]
    pub min_lead: Duration,
    /// Stop after this many pulses (runs until cancelled when absent)
    #[serde(default)]
    pub max_pulses: Option<u32>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            first_offset: Duration::from_secs(2),
            pulse_duration: Duration::from_secs(6),
            recurring_gap: Duration::from_secs(100),
            reopen_cooldown: Duration::from_millis(300),
            min_lead: Duration::from_millis(200),
            max_pulses: None,
        }
    }
}

impl ScheduleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.pulse_duration.is_zero() {
            return Err(ConfigError::Invalid("pulse duration must be non-zero".into()));
        }
        if self.recurring_gap.is_zero() {
            return Err(ConfigError::Invalid("recurring gap must be non-zero".into()));
        }
        if self.min_lead >= self.recurring_gap {
            return Err(ConfigError::Invalid(
                "minimum lead must be shorter than the recurring gap".into(),
            ));
        }
        Ok(())
    }
}

/// Interpretation layer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachConfig {
    /// Remote model name
    pub model: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Service credential, only ever taken from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_COACH_MODEL.to_string(),
            temperature: 0.2,
            api_key: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
    MissingExtractor,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
            ConfigError::MissingExtractor => write!(
                f,
                "OPENFACE_BIN not set. Put the full path to FeatureExtraction in your .env"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
