//! Engine configuration: TOML-loadable, validated before use.
//!
//! ```toml
//! [tuning]
//! validation_threshold = 0.7
//! min_error_threshold = 3
//! ratio_tolerance = 0.001
//! drift_window = 10
//! max_active_cycles = 2
//! cycle_timeout_ms = 30000
//!
//! [weights]
//! error_reduction = 0.4
//! regression = 0.4
//! feedback = 0.2
//! ```

use serde::{Deserialize, Serialize};

use crate::improve::cycle::CycleConfig;
use crate::improve::detector::DetectorConfig;
use crate::improve::feedback::FeedbackConfig;
use crate::improve::learning::LearningConfig;
use crate::improve::snapshot::EngineTuning;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// ScoreWeights
// ---------------------------------------------------------------------------

/// Validation-score weights. Must be non-negative and sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub error_reduction: f64,
    pub regression: f64,
    pub feedback: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self { error_reduction: 0.4, regression: 0.4, feedback: 0.2 }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.error_reduction + self.regression + self.feedback
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Everything the engine needs at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Completed cycles retained in history.
    pub cycle_history_cap: usize,
    /// Minimum ms between learning proposals for the same strategy.
    pub learning_cooldown_ms: u64,
    /// Detected-error history capacity.
    pub detector_history_cap: usize,
    /// Feedback store capacity.
    pub feedback_max_entries: usize,
    /// Drift z-score threshold.
    pub drift_threshold: f64,
    /// Initial tunable state (the part improvement cycles adjust).
    pub tuning: EngineTuning,
    pub weights: ScoreWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_history_cap: 200,
            learning_cooldown_ms: 60_000,
            detector_history_cap: 500,
            feedback_max_entries: 1_000,
            drift_threshold: 2.0,
            tuning: EngineTuning::default(),
            weights: ScoreWeights::default(),
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML string and validate.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file and validate.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject configurations that would make the engine misbehave quietly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.tuning.validation_threshold) {
            return Err(ConfigError::Invalid {
                field: "tuning.validation_threshold",
                reason: format!("{} outside [0, 1]", self.tuning.validation_threshold),
            });
        }
        if self.tuning.min_error_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "tuning.min_error_threshold",
                reason: "must be at least 1".into(),
            });
        }
        if self.tuning.max_active_cycles == 0 {
            return Err(ConfigError::Invalid {
                field: "tuning.max_active_cycles",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.tuning.ratio_tolerance > 0.0) {
            return Err(ConfigError::Invalid {
                field: "tuning.ratio_tolerance",
                reason: format!("{} must be positive", self.tuning.ratio_tolerance),
            });
        }
        for (field, value) in [
            ("weights.error_reduction", self.weights.error_reduction),
            ("weights.regression", self.weights.regression),
            ("weights.feedback", self.weights.feedback),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} must be a non-negative number"),
                });
            }
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid {
                field: "weights",
                reason: format!("weights sum to {sum}, expected 1.0"),
            });
        }
        if self.cycle_history_cap == 0 {
            return Err(ConfigError::Invalid {
                field: "cycle_history_cap",
                reason: "must be at least 1".into(),
            });
        }
        if self.drift_threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "drift_threshold",
                reason: format!("{} must be positive", self.drift_threshold),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Projections into per-component configs
    // -----------------------------------------------------------------------

    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            history_cap: self.cycle_history_cap,
            weight_error_reduction: self.weights.error_reduction,
            weight_regression: self.weights.regression,
            weight_feedback: self.weights.feedback,
            learning: LearningConfig {
                cooldown_ms: self.learning_cooldown_ms,
                ..LearningConfig::default()
            },
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            history_cap: self.detector_history_cap,
            drift_window: self.tuning.drift_window as usize,
            drift_threshold: self.drift_threshold,
        }
    }

    pub fn feedback_config(&self) -> FeedbackConfig {
        FeedbackConfig { max_entries: self.feedback_max_entries }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
