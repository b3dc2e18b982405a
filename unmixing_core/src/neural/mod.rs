//! Neural building blocks of the unmixing autoencoder.
//!
//! Dense parameters, batch normalization, activations, the joint loss and the
//! optimizer are kept in separate modules; [`network`] wires them into the
//! dual-branch model.

pub mod layer;
pub mod loss;
pub mod network;
pub mod norm;
pub mod optimizer;
pub mod params;

pub use layer::{softmax_rows, Activation};
pub use loss::{abundance_error, compute_loss, LossBreakdown};
pub use network::{
    DenseGrad, ForwardOutput, ForwardTrace, Gradients, Mode, NetworkSnapshot, UnmixingNetwork,
};
pub use norm::{BatchNorm, Statistics};
pub use optimizer::{AdamOptimizer, ExponentialDecay};
pub use params::{DenseParams, ParameterSet, ParameterSnapshot, Side};
