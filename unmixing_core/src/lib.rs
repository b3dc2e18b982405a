//! # Unmixing Core
//!
//! Hyperspectral unmixing with a dual-branch autoencoder. A shared encoder
//! maps spectra to endmember abundances; it is trained jointly on labelled
//! pure spectra (cross-entropy) and on unlabelled mixed spectra, whose
//! abundances are decoded back into the input spectrum (reconstruction MSE).
//!
//! ## Quick Start
//!
//! ```rust
//! use unmixing_core::data::{endmember_library, linear_mixtures, pure_samples};
//! use unmixing_core::{train, UnmixingConfig};
//!
//! let mut config = UnmixingConfig::default();
//! config.model.in_channels = 16;
//! config.model.n_endmembers = 3;
//! config.training.num_epochs = 2;
//! config.training.verbose_logging = false;
//!
//! let library = endmember_library(3, 16, 7);
//! let pure = pure_samples(&library, 30, 0.01, 1);
//! let mixed = linear_mixtures(&library, 40, 2);
//!
//! let result = train(&pure.spectra, &mixed.spectra, &pure.labels, &mixed.labels, &config)
//!     .expect("training succeeds");
//! assert_eq!(result.abundances.dim(), (40, 3));
//! assert_eq!(result.parameters.len(), 16);
//! ```
//!
//! ## Core Modules
//!
//! - [`config`] - Run configuration via TOML
//! - [`neural`] - Parameters, normalization, loss, optimizer and the network
//! - [`training`] - Epoch loop and metrics
//! - [`data`] - Minibatch partitioning and synthetic spectra
//! - [`checkpoint`] - Versioned binary snapshots
//! - [`logging`] - JSON line-delimited epoch log

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod logging;
pub mod neural;
pub mod training;

pub use checkpoint::{CheckpointError, Checkpointable};
pub use config::{ConfigError, ModelConfig, TrainingConfig, UnmixingConfig, ValidationMode};
pub use context::ExecutionContext;
pub use error::{UnmixError, UnmixResult};
pub use neural::{Mode, ParameterSet, ParameterSnapshot, UnmixingNetwork};
pub use training::{train, EpochMetrics, TrainingResult};
