//! Minibatch partitioning and synthetic spectra.

pub mod minibatch;
pub mod synthetic;

pub use minibatch::{effective_batch_size, partition, BatchIndices, Minibatch};
pub use synthetic::{
    endmember_library, linear_mixtures, one_hot_pure_spectra, pure_samples, LabeledSpectra,
};
