//! Dual-branch unmixing autoencoder.
//!
//! The encoder maps a spectrum to endmember abundances and is applied to two
//! streams with the same weights: labelled pure spectra (supervised through
//! the classification loss) and unlabelled mixed spectra (supervised through
//! the decoder's reconstruction). Only the mixed branch is decoded.
//!
//! A forward pass never mutates the network. Batch moments observed along the
//! way travel in the [`ForwardTrace`] and are folded into the running
//! statistics by [`UnmixingNetwork::apply_step`], pure branch first, then the
//! mixed branch, then the decoder.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::layer::{dropout_mask, softmax_backward, softmax_rows, Activation};
use super::norm::{BatchMoments, BatchNorm, NormCache, NormGrad, Statistics};
use super::optimizer::AdamOptimizer;
use super::params::{
    bias_name, weight_name, DenseParams, ParameterSet, ParameterSnapshot, Side, DEPTH,
    HIDDEN_WIDTHS,
};
use crate::checkpoint::{CheckpointError, Checkpointable};
use crate::config::ModelConfig;
use crate::context::ExecutionContext;

/// Normalized hidden layers of the encoder; the softmax head has no norm.
pub const ENCODER_NORMS: usize = DEPTH - 1;

const ENCODER_ACTIVATIONS: [Activation; ENCODER_NORMS] =
    [Activation::Tanh, Activation::Tanh, Activation::Relu];

/// How a forward pass treats normalization and dropout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Batch statistics, inverted dropout on the first encoder layer
    Training { keep_prob: f32 },
    /// Batch statistics without dropout
    BatchEvaluation,
    /// Frozen running statistics without dropout; deterministic
    Inference,
}

impl Mode {
    pub fn statistics(self) -> Statistics {
        match self {
            Mode::Training { .. } | Mode::BatchEvaluation => Statistics::Batch,
            Mode::Inference => Statistics::Running,
        }
    }

    pub fn keep_prob(self) -> f32 {
        match self {
            Mode::Training { keep_prob } => keep_prob,
            Mode::BatchEvaluation | Mode::Inference => 1.0,
        }
    }
}

/// `{side}.norm{n}.{field}`, 1-based like the dense names.
fn norm_name(side: Side, index: usize, field: &str) -> String {
    format!("{}.norm{}.{}", side.prefix(), index + 1, field)
}

/// affine → norm → (dropout) → activation, with what backward needs.
#[derive(Debug, Clone)]
struct HiddenTrace {
    input: Array2<f32>,
    norm: NormCache,
    mask: Option<Array2<f32>>,
    activation: Activation,
    output: Array2<f32>,
}

fn hidden_forward(
    dense: &DenseParams,
    norm: &BatchNorm,
    activation: Activation,
    input: Array2<f32>,
    statistics: Statistics,
    mask: Option<Array2<f32>>,
) -> (HiddenTrace, Option<BatchMoments>) {
    let z = dense.apply(&input);
    let normed = norm.forward(&z, statistics);
    let mut pre_activation = normed.output;
    if let Some(mask) = &mask {
        pre_activation *= mask;
    }
    let output = activation.apply(&pre_activation);

    let trace = HiddenTrace {
        input,
        norm: normed.cache,
        mask,
        activation,
        output,
    };
    (trace, normed.moments)
}

fn hidden_backward(
    dense: &DenseParams,
    norm: &BatchNorm,
    trace: &HiddenTrace,
    grad_output: &Array2<f32>,
) -> (DenseGrad, NormGrad, Array2<f32>) {
    let mut grad = trace.activation.backward(&trace.output, grad_output);
    if let Some(mask) = &trace.mask {
        grad *= mask;
    }
    let (grad_z, norm_grad) = norm.backward(&trace.norm, &grad);
    let dense_grad = DenseGrad {
        weight: trace.input.t().dot(&grad_z),
        bias: grad_z.sum_axis(Axis(0)),
    };
    let grad_input = grad_z.dot(&dense.weight.t());
    (dense_grad, norm_grad, grad_input)
}

#[derive(Debug, Clone)]
struct EncoderTrace {
    hidden: Vec<HiddenTrace>,
    logits: Array2<f32>,
    abundances: Array2<f32>,
    moments: Vec<BatchMoments>,
}

/// Everything one dual-branch forward pass produced.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    pub pure_logits: Array2<f32>,
    pub pure_abundances: Array2<f32>,
    pub mixed_abundances: Array2<f32>,
    pub reconstruction: Array2<f32>,
    pub weight_penalty: f32,
}

/// Intermediate values of a forward pass, consumed by backward and the step commit.
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    pure: EncoderTrace,
    mixed: EncoderTrace,
    decoder: Vec<HiddenTrace>,
    decoder_moments: Vec<BatchMoments>,
    weight_penalty: f32,
}

impl ForwardTrace {
    pub fn pure_logits(&self) -> &Array2<f32> {
        &self.pure.logits
    }

    pub fn pure_abundances(&self) -> &Array2<f32> {
        &self.pure.abundances
    }

    pub fn mixed_abundances(&self) -> &Array2<f32> {
        &self.mixed.abundances
    }

    pub fn reconstruction(&self) -> &Array2<f32> {
        &self.decoder[DEPTH - 1].output
    }

    pub fn weight_penalty(&self) -> f32 {
        self.weight_penalty
    }

    pub fn into_output(mut self) -> ForwardOutput {
        let reconstruction = self.decoder.swap_remove(DEPTH - 1).output;
        ForwardOutput {
            pure_logits: self.pure.logits,
            pure_abundances: self.pure.abundances,
            mixed_abundances: self.mixed.abundances,
            reconstruction,
            weight_penalty: self.weight_penalty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DenseGrad {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

/// Gradients of the joint cost for every trainable array.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub encoder: Vec<DenseGrad>,
    pub decoder: Vec<DenseGrad>,
    pub encoder_norms: Vec<NormGrad>,
    pub decoder_norms: Vec<NormGrad>,
}

impl Gradients {
    fn dense(&self, side: Side) -> &[DenseGrad] {
        match side {
            Side::Encoder => &self.encoder,
            Side::Decoder => &self.decoder,
        }
    }

    /// Euclidean norm over all gradient entries.
    pub fn l2_norm(&self) -> f32 {
        let dense = self
            .encoder
            .iter()
            .chain(&self.decoder)
            .map(|g| g.weight.iter().chain(g.bias.iter()).map(|v| v * v).sum::<f32>());
        let norms = self
            .encoder_norms
            .iter()
            .chain(&self.decoder_norms)
            .map(|g| g.gamma.iter().chain(g.beta.iter()).map(|v| v * v).sum::<f32>());
        dense.chain(norms).sum::<f32>().sqrt()
    }
}

/// Parameters plus normalization state of the autoencoder.
#[derive(Debug, Clone, PartialEq)]
pub struct UnmixingNetwork {
    params: ParameterSet,
    encoder_norms: [BatchNorm; ENCODER_NORMS],
    decoder_norms: [BatchNorm; DEPTH],
}

impl UnmixingNetwork {
    pub fn new(config: &ModelConfig, seed: u64) -> Self {
        let params = ParameterSet::initialize(config.in_channels, config.n_endmembers, seed);
        let norm = |width: usize| BatchNorm::new(width, config.norm_momentum, config.norm_epsilon);
        let encoder_norms = std::array::from_fn(|i| norm(HIDDEN_WIDTHS[i]));
        let decoder_norms = std::array::from_fn(|i| norm(params.decoder[i].fan_out()));

        Self {
            params,
            encoder_norms,
            decoder_norms,
        }
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn encoder_norms(&self) -> &[BatchNorm] {
        &self.encoder_norms
    }

    pub fn decoder_norms(&self) -> &[BatchNorm] {
        &self.decoder_norms
    }

    pub fn in_channels(&self) -> usize {
        self.params.in_channels()
    }

    pub fn n_endmembers(&self) -> usize {
        self.params.n_endmembers()
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        self.params.snapshot()
    }

    fn encode(
        &self,
        input: &Array2<f32>,
        statistics: Statistics,
        mut mask: Option<Array2<f32>>,
    ) -> EncoderTrace {
        let mut hidden: Vec<HiddenTrace> = Vec::with_capacity(ENCODER_NORMS);
        let mut moments = Vec::with_capacity(ENCODER_NORMS);

        for (i, &activation) in ENCODER_ACTIVATIONS.iter().enumerate() {
            let layer_input = match hidden.last() {
                Some(previous) => previous.output.clone(),
                None => input.to_owned(),
            };
            let (trace, batch_moments) = hidden_forward(
                &self.params.encoder[i],
                &self.encoder_norms[i],
                activation,
                layer_input,
                statistics,
                mask.take(),
            );
            hidden.push(trace);
            moments.extend(batch_moments);
        }

        let head_input = &hidden[ENCODER_NORMS - 1].output;
        let logits = self.params.encoder[DEPTH - 1].apply(head_input);
        let abundances = softmax_rows(&logits);

        EncoderTrace {
            hidden,
            logits,
            abundances,
            moments,
        }
    }

    fn decode(
        &self,
        abundances: &Array2<f32>,
        statistics: Statistics,
    ) -> (Vec<HiddenTrace>, Vec<BatchMoments>) {
        let mut layers: Vec<HiddenTrace> = Vec::with_capacity(DEPTH);
        let mut moments = Vec::with_capacity(DEPTH);

        for (dense, norm) in self.params.decoder.iter().zip(&self.decoder_norms) {
            let layer_input = match layers.last() {
                Some(previous) => previous.output.clone(),
                None => abundances.clone(),
            };
            let (trace, batch_moments) = hidden_forward(
                dense,
                norm,
                Activation::Sigmoid,
                layer_input,
                statistics,
                None,
            );
            layers.push(trace);
            moments.extend(batch_moments);
        }

        (layers, moments)
    }

    /// Runs both branches and the decoder, keeping intermediates for backward.
    ///
    /// # Panics
    ///
    /// Panics if the two batches differ in row count or either width differs
    /// from `in_channels`.
    pub fn forward_traced(
        &self,
        pure: &Array2<f32>,
        mixed: &Array2<f32>,
        mode: Mode,
        ctx: &mut ExecutionContext,
    ) -> ForwardTrace {
        let in_channels = self.in_channels();
        assert_eq!(pure.ncols(), in_channels, "pure batch width");
        assert_eq!(mixed.ncols(), in_channels, "mixed batch width");
        assert_eq!(pure.nrows(), mixed.nrows(), "branch batches must have equal rows");

        let statistics = mode.statistics();
        let keep_prob = mode.keep_prob();
        let mut draw_mask = |rows: usize| {
            (keep_prob < 1.0).then(|| dropout_mask((rows, HIDDEN_WIDTHS[0]), keep_prob, ctx.rng()))
        };
        let pure_mask = draw_mask(pure.nrows());
        let mixed_mask = draw_mask(mixed.nrows());

        let pure_trace = self.encode(pure, statistics, pure_mask);
        let mixed_trace = self.encode(mixed, statistics, mixed_mask);
        let (decoder, decoder_moments) = self.decode(&mixed_trace.abundances, statistics);

        ForwardTrace {
            pure: pure_trace,
            mixed: mixed_trace,
            decoder,
            decoder_moments,
            weight_penalty: self.params.weight_penalty(),
        }
    }

    pub fn forward(
        &self,
        pure: &Array2<f32>,
        mixed: &Array2<f32>,
        mode: Mode,
        ctx: &mut ExecutionContext,
    ) -> ForwardOutput {
        self.forward_traced(pure, mixed, mode, ctx).into_output()
    }

    fn encoder_backward(
        &self,
        trace: &EncoderTrace,
        grad_logits: &Array2<f32>,
    ) -> (Vec<DenseGrad>, Vec<NormGrad>) {
        let head = &self.params.encoder[DEPTH - 1];
        let head_input = &trace.hidden[ENCODER_NORMS - 1].output;

        let mut dense = Vec::with_capacity(DEPTH);
        let mut norms = Vec::with_capacity(ENCODER_NORMS);
        dense.push(DenseGrad {
            weight: head_input.t().dot(grad_logits),
            bias: grad_logits.sum_axis(Axis(0)),
        });

        let mut grad = grad_logits.dot(&head.weight.t());
        for i in (0..ENCODER_NORMS).rev() {
            let (dense_grad, norm_grad, grad_input) = hidden_backward(
                &self.params.encoder[i],
                &self.encoder_norms[i],
                &trace.hidden[i],
                &grad,
            );
            dense.push(dense_grad);
            norms.push(norm_grad);
            grad = grad_input;
        }

        dense.reverse();
        norms.reverse();
        (dense, norms)
    }

    /// Backpropagates the joint cost.
    ///
    /// `grad_logits` is the classification gradient w.r.t. the pure-branch
    /// logits and `grad_reconstruction` the reconstruction gradient. Shared
    /// encoder arrays receive the sum of both branches; every weight matrix
    /// also receives `reg_coefficient * W` from the penalty.
    pub fn backward(
        &self,
        trace: &ForwardTrace,
        grad_logits: &Array2<f32>,
        grad_reconstruction: &Array2<f32>,
        reg_coefficient: f32,
    ) -> Gradients {
        let mut decoder = Vec::with_capacity(DEPTH);
        let mut decoder_norms = Vec::with_capacity(DEPTH);
        let mut grad = grad_reconstruction.clone();
        for i in (0..DEPTH).rev() {
            let (dense_grad, norm_grad, grad_input) = hidden_backward(
                &self.params.decoder[i],
                &self.decoder_norms[i],
                &trace.decoder[i],
                &grad,
            );
            decoder.push(dense_grad);
            decoder_norms.push(norm_grad);
            grad = grad_input;
        }
        decoder.reverse();
        decoder_norms.reverse();

        let mixed_grad_logits = softmax_backward(&trace.mixed.abundances, &grad);
        let (mut encoder, mut encoder_norms) = self.encoder_backward(&trace.pure, grad_logits);
        let (mixed_dense, mixed_norms) = self.encoder_backward(&trace.mixed, &mixed_grad_logits);

        for (total, branch) in encoder.iter_mut().zip(&mixed_dense) {
            total.weight += &branch.weight;
            total.bias += &branch.bias;
        }
        for (total, branch) in encoder_norms.iter_mut().zip(&mixed_norms) {
            total.accumulate(branch);
        }

        if reg_coefficient != 0.0 {
            for (grad, layer) in encoder.iter_mut().zip(&self.params.encoder) {
                grad.weight.scaled_add(reg_coefficient, &layer.weight);
            }
            for (grad, layer) in decoder.iter_mut().zip(&self.params.decoder) {
                grad.weight.scaled_add(reg_coefficient, &layer.weight);
            }
        }

        Gradients {
            encoder,
            decoder,
            encoder_norms,
            decoder_norms,
        }
    }

    /// Commits the trace's batch moments, then applies one Adam update.
    pub fn apply_step(
        &mut self,
        trace: &ForwardTrace,
        gradients: &Gradients,
        optimizer: &mut AdamOptimizer,
        learning_rate: f32,
    ) {
        for branch in [&trace.pure.moments, &trace.mixed.moments] {
            for (norm, moments) in self.encoder_norms.iter_mut().zip(branch) {
                norm.commit(moments);
            }
        }
        for (norm, moments) in self.decoder_norms.iter_mut().zip(&trace.decoder_moments) {
            norm.commit(moments);
        }

        optimizer.begin_step();
        for side in [Side::Encoder, Side::Decoder] {
            let grads = gradients.dense(side);
            let layers = self.params.layers_mut(side);
            for (i, (layer, grad)) in layers.iter_mut().zip(grads).enumerate() {
                let (weight, bias) = (weight_name(side, i), bias_name(side, i));
                optimizer.update(&weight, &mut layer.weight, &grad.weight, learning_rate);
                optimizer.update(&bias, &mut layer.bias, &grad.bias, learning_rate);
            }
        }

        let norm_groups = [
            (Side::Encoder, &mut self.encoder_norms[..], &gradients.encoder_norms),
            (Side::Decoder, &mut self.decoder_norms[..], &gradients.decoder_norms),
        ];
        for (side, norms, grads) in norm_groups {
            for (i, (norm, grad)) in norms.iter_mut().zip(grads).enumerate() {
                let (gamma, beta) = (norm_name(side, i, "gamma"), norm_name(side, i, "beta"));
                optimizer.update(&gamma, &mut norm.gamma, &grad.gamma, learning_rate);
                optimizer.update(&beta, &mut norm.beta, &grad.beta, learning_rate);
            }
        }
    }

    /// Abundances of `spectra` from the encoder alone, using running statistics.
    pub fn predict_abundances(&self, spectra: &Array2<f32>) -> Array2<f32> {
        assert_eq!(spectra.ncols(), self.in_channels(), "spectra width");
        self.encode(spectra, Statistics::Running, None).abundances
    }
}

/// Serialized form of [`UnmixingNetwork`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub params: ParameterSet,
    pub encoder_norms: Vec<BatchNorm>,
    pub decoder_norms: Vec<BatchNorm>,
}

fn check_norm(norm: &BatchNorm, name: String, width: usize) -> Result<(), CheckpointError> {
    let lengths = [
        norm.gamma.len(),
        norm.beta.len(),
        norm.running_mean.len(),
        norm.running_var.len(),
    ];
    if lengths.iter().any(|&len| len != width) {
        return Err(CheckpointError::InvalidFormat(format!(
            "{name} has widths {lengths:?}, expected {width}"
        )));
    }
    Ok(())
}

impl Checkpointable for UnmixingNetwork {
    const VERSION: u32 = 1;
    type Snapshot = NetworkSnapshot;

    fn to_snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            params: self.params.clone(),
            encoder_norms: self.encoder_norms.to_vec(),
            decoder_norms: self.decoder_norms.to_vec(),
        }
    }

    fn from_snapshot(snapshot: NetworkSnapshot) -> Result<Self, CheckpointError> {
        let NetworkSnapshot {
            params,
            encoder_norms,
            decoder_norms,
        } = snapshot;
        params
            .validate_shapes()
            .map_err(CheckpointError::InvalidFormat)?;

        let encoder_norms: [BatchNorm; ENCODER_NORMS] =
            encoder_norms.try_into().map_err(|norms: Vec<BatchNorm>| {
                CheckpointError::InvalidFormat(format!(
                    "expected {ENCODER_NORMS} encoder norms, found {}",
                    norms.len()
                ))
            })?;
        let decoder_norms: [BatchNorm; DEPTH] =
            decoder_norms.try_into().map_err(|norms: Vec<BatchNorm>| {
                CheckpointError::InvalidFormat(format!(
                    "expected {DEPTH} decoder norms, found {}",
                    norms.len()
                ))
            })?;

        for (i, norm) in encoder_norms.iter().enumerate() {
            check_norm(norm, norm_name(Side::Encoder, i, "*"), params.encoder[i].fan_out())?;
        }
        for (i, norm) in decoder_norms.iter().enumerate() {
            check_norm(norm, norm_name(Side::Decoder, i, "*"), params.decoder[i].fan_out())?;
        }

        Ok(Self {
            params,
            encoder_norms,
            decoder_norms,
        })
    }
}
