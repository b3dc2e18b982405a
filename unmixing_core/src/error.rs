//! Error types for unmixing runs
//!
//! Every failure aborts the run and surfaces to the caller; nothing here is
//! retried.

use std::fmt;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;

/// Result type alias for unmixing operations
pub type UnmixResult<T> = Result<T, UnmixError>;

/// Error type for training and inference entry points
#[derive(Debug)]
pub enum UnmixError {
    /// Data shape disagrees with the configured widths or with a sibling matrix
    DimensionMismatch {
        context: String,
        expected: usize,
        got: usize,
    },

    /// A required matrix has no rows
    EmptyDataset { dataset: String },

    /// Invalid configuration parameter
    InvalidConfiguration {
        parameter: String,
        value: String,
        reason: String,
    },

    /// Cost became NaN or infinite
    NonFiniteCost { epoch: usize, step: usize, cost: f32 },

    /// Configuration file could not be read or parsed
    Config(ConfigError),

    /// Model checkpoint could not be saved or restored
    Checkpoint(CheckpointError),
}

impl UnmixError {
    pub(crate) fn dimension(context: impl Into<String>, expected: usize, got: usize) -> Self {
        UnmixError::DimensionMismatch {
            context: context.into(),
            expected,
            got,
        }
    }
}

impl fmt::Display for UnmixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmixError::DimensionMismatch {
                context,
                expected,
                got,
            } => write!(
                f,
                "Dimension mismatch in {}: expected {}, got {}",
                context, expected, got
            ),
            UnmixError::EmptyDataset { dataset } => {
                write!(f, "Dataset '{}' has no rows", dataset)
            }
            UnmixError::InvalidConfiguration {
                parameter,
                value,
                reason,
            } => write!(
                f,
                "Invalid configuration: {} = {} ({})",
                parameter, value, reason
            ),
            UnmixError::NonFiniteCost { epoch, step, cost } => write!(
                f,
                "Non-finite cost {} at epoch {}, step {}",
                cost, epoch, step
            ),
            UnmixError::Config(err) => write!(f, "Configuration error: {}", err),
            UnmixError::Checkpoint(err) => write!(f, "Checkpoint error: {}", err),
        }
    }
}

impl std::error::Error for UnmixError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UnmixError::Config(err) => Some(err),
            UnmixError::Checkpoint(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for UnmixError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid {
                parameter,
                value,
                reason,
            } => UnmixError::InvalidConfiguration {
                parameter: parameter.to_string(),
                value,
                reason: reason.to_string(),
            },
            other => UnmixError::Config(other),
        }
    }
}

impl From<CheckpointError> for UnmixError {
    fn from(err: CheckpointError) -> Self {
        UnmixError::Checkpoint(err)
    }
}
