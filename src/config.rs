//! Session configuration, loadable from JSON.
//!
//! Every field has a default so partial files are accepted:
//! ```json
//! { "intrinsics": { "fx": 500.0, "fy": 500.0, "cx": 320.0, "cy": 240.0 },
//!   "tracker": { "consensus": { "method": "arrsac" } } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::algorithms::camera::{CameraIntrinsics, IntrinsicsError};
use crate::sensors::{directory::DirectoryConfig, synthetic::SceneConfig};
use crate::slam::landmarks::PositionUpdate;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    #[default]
    Ransac,
    Arrsac,
}

/// Robust essential matrix fitting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub method: ConsensusMethod,
    /// Probability of drawing at least one outlier-free sample (RANSAC only).
    pub probability: f64,
    /// Inlier threshold on the Sampson distance, in normalized image units.
    pub threshold: f64,
    /// Hard cap on RANSAC trials.
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            method: ConsensusMethod::Ransac,
            probability: 0.999,
            threshold: 1e-3,
            max_iterations: 1000,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Cosine similarity below which descriptors never match.
    pub match_threshold: f32,
    /// Mutual matches required before attempting pose estimation.
    pub min_matches: usize,
    pub consensus: ConsensusConfig,
    pub position_update: PositionUpdate,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.9,
            min_matches: 8,
            consensus: ConsensusConfig::default(),
            position_update: PositionUpdate::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid(reason));
        if !self.match_threshold.is_finite() {
            return invalid(format!("match_threshold must be finite, got {}", self.match_threshold));
        }
        if self.min_matches < 8 {
            return invalid(format!(
                "min_matches must be at least 8 for the 8-point algorithm, got {}",
                self.min_matches
            ));
        }
        let consensus = &self.consensus;
        if !(consensus.probability > 0.0 && consensus.probability < 1.0) {
            return invalid(format!(
                "consensus.probability must be in (0, 1), got {}",
                consensus.probability
            ));
        }
        if !(consensus.threshold > 0.0 && consensus.threshold.is_finite()) {
            return invalid(format!(
                "consensus.threshold must be positive, got {}",
                consensus.threshold
            ));
        }
        if consensus.max_iterations == 0 {
            return invalid("consensus.max_iterations must be positive".to_string());
        }
        Ok(())
    }
}

/// Everything a tracking session needs besides its frame source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub intrinsics: CameraIntrinsics,
    pub tracker: TrackerConfig,
    pub directory: DirectoryConfig,
    pub scene: SceneConfig,
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(contents)?;
        config.intrinsics.validated()?;
        config.tracker.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Intrinsics(IntrinsicsError),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config i/o error: {err}"),
            ConfigError::Json(err) => write!(f, "config parse error: {err}"),
            ConfigError::Intrinsics(err) => write!(f, "invalid intrinsics: {err}"),
            ConfigError::Invalid(reason) => write!(f, "invalid config: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

impl From<IntrinsicsError> for ConfigError {
    fn from(err: IntrinsicsError) -> Self {
        ConfigError::Intrinsics(err)
    }
}
