//! Run configuration via TOML files.
//!
//! Both sections are optional and every key falls back to the defaults of the
//! reference experiment (224 bands, 5 endmembers, 200 epochs of 8000-row
//! minibatches).
//!
//! ```toml
//! [model]
//! in_channels = 224
//! n_endmembers = 5
//!
//! [training]
//! base_learning_rate = 0.1
//! num_epochs = 200
//! validation_mode = "batch_statistics"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Network shape and normalization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Number of spectral bands per sample
    pub in_channels: usize,
    /// Number of endmembers (width of the abundance vector)
    pub n_endmembers: usize,
    /// Decay applied to the running mean/variance on every commit
    pub norm_momentum: f32,
    /// Variance floor added before the square root in batch normalization
    pub norm_epsilon: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            in_channels: 224,
            n_endmembers: 5,
            norm_momentum: 0.9,
            norm_epsilon: 1e-3,
        }
    }
}

/// Which normalization statistics the per-epoch evaluation pass uses.
///
/// `BatchStatistics` normalizes the evaluation set with its own moments and no
/// dropout, which is how the reference experiment evaluated. `RunningStatistics`
/// is conventional inference with the frozen running estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    BatchStatistics,
    RunningStatistics,
}

/// Optimizer, schedule and loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Learning rate at global step 0
    pub base_learning_rate: f32,
    /// Multiplicative decay per `decay_steps` global steps
    pub learning_rate_decay: f32,
    /// Global steps per decay period; derived as `max(1, n_pure / effective_batch_size)` when unset
    pub decay_steps: Option<f32>,
    /// Coefficient on the L2 weight penalty
    pub weight_penalty_coefficient: f32,
    /// Number of epochs (no early stopping)
    pub num_epochs: usize,
    /// Requested rows per minibatch
    pub minibatch_size: usize,
    /// Seed for parameter initialization, dropout and shuffling
    pub random_seed: u64,
    /// Dropout keep probability for the first encoder layer during training
    pub dropout_keep_prob: f32,
    /// Statistics used by the per-epoch evaluation pass
    pub validation_mode: ValidationMode,
    /// Emit per-epoch progress lines
    pub verbose_logging: bool,
    /// Progress line period in epochs
    pub log_every: usize,
    /// Optional JSON-lines file receiving one record per epoch
    pub metrics_log: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            base_learning_rate: 0.1,
            learning_rate_decay: 0.99,
            decay_steps: None,
            weight_penalty_coefficient: 0.005,
            num_epochs: 200,
            minibatch_size: 8000,
            random_seed: 1,
            dropout_keep_prob: 0.9,
            validation_mode: ValidationMode::BatchStatistics,
            verbose_logging: true,
            log_every: 5,
            metrics_log: None,
        }
    }
}

/// Complete configuration of one training run.
///
/// # Examples
///
/// ```
/// use unmixing_core::UnmixingConfig;
///
/// let config: UnmixingConfig = "[training]\nnum_epochs = 10".parse().unwrap();
/// assert_eq!(config.training.num_epochs, 10);
/// assert_eq!(config.model.in_channels, 224);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct UnmixingConfig {
    pub model: ModelConfig,
    pub training: TrainingConfig,
}

impl UnmixingConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        contents.parse()
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let model = &self.model;
        let training = &self.training;

        if model.in_channels == 0 {
            return Err(invalid("model.in_channels", model.in_channels, "must be ≥ 1"));
        }
        if model.n_endmembers < 2 {
            return Err(invalid("model.n_endmembers", model.n_endmembers, "must be ≥ 2"));
        }
        if !(0.0..1.0).contains(&model.norm_momentum) {
            return Err(invalid("model.norm_momentum", model.norm_momentum, "must lie in [0, 1)"));
        }
        if !model.norm_epsilon.is_finite() || model.norm_epsilon <= 0.0 {
            return Err(invalid("model.norm_epsilon", model.norm_epsilon, "must be positive"));
        }

        if !training.base_learning_rate.is_finite() || training.base_learning_rate <= 0.0 {
            return Err(invalid(
                "training.base_learning_rate",
                training.base_learning_rate,
                "must be positive",
            ));
        }
        if !(training.learning_rate_decay > 0.0 && training.learning_rate_decay <= 1.0) {
            return Err(invalid(
                "training.learning_rate_decay",
                training.learning_rate_decay,
                "must lie in (0, 1]",
            ));
        }
        if let Some(steps) = training.decay_steps {
            if !steps.is_finite() || steps <= 0.0 {
                return Err(invalid("training.decay_steps", steps, "must be positive"));
            }
        }
        if !training.weight_penalty_coefficient.is_finite()
            || training.weight_penalty_coefficient < 0.0
        {
            return Err(invalid(
                "training.weight_penalty_coefficient",
                training.weight_penalty_coefficient,
                "must be ≥ 0",
            ));
        }
        if training.minibatch_size == 0 {
            return Err(invalid("training.minibatch_size", 0, "must be ≥ 1"));
        }
        if !(training.dropout_keep_prob > 0.0 && training.dropout_keep_prob <= 1.0) {
            return Err(invalid(
                "training.dropout_keep_prob",
                training.dropout_keep_prob,
                "must lie in (0, 1]",
            ));
        }
        if training.log_every == 0 {
            return Err(invalid("training.log_every", 0, "must be ≥ 1"));
        }

        Ok(())
    }
}

fn invalid(
    parameter: &'static str,
    value: impl std::fmt::Display,
    reason: &'static str,
) -> ConfigError {
    ConfigError::Invalid {
        parameter,
        value: value.to_string(),
        reason,
    }
}

impl FromStr for UnmixingConfig {
    type Err = ConfigError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: UnmixingConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    /// A value parsed but lies outside its accepted range
    Invalid {
        parameter: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
            ConfigError::Invalid {
                parameter,
                value,
                reason,
            } => write!(f, "{} {} (got {})", parameter, reason, value),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_reference_defaults() {
        let config: UnmixingConfig = "".parse().unwrap();
        assert_eq!(config, UnmixingConfig::default());
        assert_eq!(config.model.in_channels, 224);
        assert_eq!(config.model.n_endmembers, 5);
        assert_eq!(config.training.base_learning_rate, 0.1);
        assert_eq!(config.training.weight_penalty_coefficient, 0.005);
        assert_eq!(config.training.num_epochs, 200);
        assert_eq!(config.training.minibatch_size, 8000);
        assert_eq!(config.training.random_seed, 1);
        assert!(config.training.verbose_logging);
        assert_eq!(
            config.training.validation_mode,
            ValidationMode::BatchStatistics
        );
    }

    #[test]
    fn parses_custom_values() {
        let toml = r#"
            [model]
            in_channels = 16
            n_endmembers = 3

            [training]
            num_epochs = 7
            minibatch_size = 32
            decay_steps = 4.0
            validation_mode = "running_statistics"
            metrics_log = "logs/epochs.jsonl"
        "#;
        let config: UnmixingConfig = toml.parse().unwrap();
        assert_eq!(config.model.in_channels, 16);
        assert_eq!(config.model.n_endmembers, 3);
        assert_eq!(config.model.norm_momentum, 0.9);
        assert_eq!(config.training.num_epochs, 7);
        assert_eq!(config.training.decay_steps, Some(4.0));
        assert_eq!(
            config.training.validation_mode,
            ValidationMode::RunningStatistics
        );
        assert_eq!(
            config.training.metrics_log.as_deref(),
            Some(Path::new("logs/epochs.jsonl"))
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = "[training]\nlearning_rate = 0.1"
            .parse::<UnmixingConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_out_of_range_values() {
        for toml in [
            "[training]\ndropout_keep_prob = 0.0",
            "[training]\nminibatch_size = 0",
            "[training]\nbase_learning_rate = -1.0",
            "[training]\nlearning_rate_decay = 1.5",
            "[model]\nn_endmembers = 1",
            "[model]\nnorm_momentum = 1.0",
        ] {
            let err = toml.parse::<UnmixingConfig>().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "accepted {toml}");
        }
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = UnmixingConfig::load_from_file("/nonexistent/unmixing.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
