//! Configuration for the segmentation pipeline.

use crate::core::matching::MatchPolicy;
use crate::core::time::Zone;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Zone every instant is normalized into
    pub reference_zone: Zone,

    /// Zone the activity log's local times are written in
    pub activity_log_zone: Zone,

    /// Chunk merging thresholds
    pub merge: MergeConfig,

    /// Windows used when exporting merged streams as window files
    pub stream_windows: WindowConfig,

    /// Windows used for feature extraction
    pub feature_windows: FeatureWindowConfig,

    /// Activity alignment
    pub matching: MatchingConfig,

    /// Train/test partition
    pub split: SplitConfig,

    /// Optional low-pass filtering before feature extraction
    pub denoise: DenoiseConfig,

    /// JSON file mapping activity names to integer labels
    pub label_map_path: Option<PathBuf>,

    /// Directory for feature tables and the run summary
    pub output_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_zone: Zone::fixed_hours(1),
            activity_log_zone: Zone::fixed_hours(9),
            merge: MergeConfig::default(),
            stream_windows: WindowConfig::default(),
            feature_windows: FeatureWindowConfig::default(),
            matching: MatchingConfig::default(),
            split: SplitConfig::default(),
            denoise: DenoiseConfig::default(),
            label_map_path: None,
            output_path: PathBuf::from("output"),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
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
            .join("har-pipeline")
            .join("config.json")
    }

    /// Ensure the output directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.output_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Reject parameter combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.merge.min_gap > self.merge.time_threshold {
            return Err(ConfigError::Invalid(
                "merge.min_gap must not exceed merge.time_threshold".to_string(),
            ));
        }
        if self.stream_windows.length.is_zero() || self.stream_windows.step.is_zero() {
            return Err(ConfigError::Invalid(
                "stream window length and step must be positive".to_string(),
            ));
        }
        if self.feature_windows.length.is_zero() {
            return Err(ConfigError::Invalid(
                "feature window length must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.feature_windows.overlap) {
            return Err(ConfigError::Invalid(
                "feature window overlap must be in [0, 1)".to_string(),
            ));
        }
        if !(self.split.test_fraction > 0.0 && self.split.test_fraction < 1.0) {
            return Err(ConfigError::Invalid(
                "split.test_fraction must be in (0, 1)".to_string(),
            ));
        }
        if self.denoise.enabled && (self.denoise.cutoff_hz <= 0.0 || self.denoise.order == 0) {
            return Err(ConfigError::Invalid(
                "denoise cutoff and order must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thresholds for fusing raw chunks into streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Largest gap that still continues a stream
    #[serde(with = "duration_serde")]
    pub time_threshold: Duration,
    /// Gaps below this mark a redundant, overlapping fragment
    #[serde(with = "duration_serde")]
    pub min_gap: Duration,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            time_threshold: Duration::from_secs(60),
            min_gap: Duration::ZERO,
        }
    }
}

/// Fixed length and step of a sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    #[serde(with = "duration_serde")]
    pub length: Duration,
    #[serde(with = "duration_serde")]
    pub step: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length: Duration::from_secs(120),
            step: Duration::from_secs(60),
        }
    }
}

/// Feature windows are described by length and overlap ratio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWindowConfig {
    #[serde(with = "duration_serde")]
    pub length: Duration,
    /// Fraction of a window shared with the next one
    pub overlap: f64,
}

impl Default for FeatureWindowConfig {
    fn default() -> Self {
        Self {
            length: Duration::from_secs(2),
            overlap: 0.5,
        }
    }
}

/// How slices of a source receive their activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub policy: MatchPolicy,
    /// Added to the end of each activity group (the log has minute resolution)
    #[serde(with = "duration_serde")]
    pub group_padding: Duration,
    /// Keep windows whose activity is unknown, labeled with `unknown_label`
    pub keep_unknown: bool,
    pub unknown_label: i32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            policy: MatchPolicy::default(),
            group_padding: Duration::from_secs(60),
            keep_unknown: false,
            unknown_label: -1,
        }
    }
}

/// Stratified train/test split parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.3,
            seed: 42,
        }
    }
}

/// Butterworth low-pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    pub enabled: bool,
    pub cutoff_hz: f64,
    pub order: usize,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cutoff_hz: 5.0,
            order: 4,
        }
    }
}

/// Load the activity-name to integer-label dictionary.
pub fn load_label_map(path: &Path) -> Result<BTreeMap<String, i32>, ConfigError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
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
