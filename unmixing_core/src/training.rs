//! Epoch loop for the unmixing autoencoder
//!
//! [`train`] owns one run from start to finish. It validates the inputs,
//! builds a private `TrainingSession` (network, optimizer, execution
//! context), alternates minibatch steps with one evaluation pass per epoch, and
//! returns detached results. Any error drops the session, so no partially
//! trained state escapes an aborted run.

use std::time::{Duration, Instant};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{UnmixingConfig, ValidationMode};
use crate::context::ExecutionContext;
use crate::data::{effective_batch_size, partition, Minibatch};
use crate::error::{UnmixError, UnmixResult};
use crate::logging::log_epoch;
use crate::neural::loss::{
    abundance_error, compute_loss, cross_entropy_gradient, reconstruction_gradient,
};
use crate::neural::{AdamOptimizer, ExponentialDecay, Mode, ParameterSnapshot, UnmixingNetwork};

/// Metrics recorded at the end of every epoch.
///
/// The accuracy fields hold the mean absolute difference between labels and
/// pure-branch abundances, so lower is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub steps: usize,
    pub train_cost: f32,
    pub train_accuracy: f32,
    pub val_cost: f32,
    pub val_accuracy: f32,
    pub learning_rate: f32,
    pub elapsed_ms: u128,
}

/// Complete training result
#[derive(Debug, Clone)]
pub struct TrainingResult {
    /// The 16 dense arrays after the last step
    pub parameters: ParameterSnapshot,
    /// `val_accuracy` of every epoch, in order
    pub validation_accuracy: Vec<f32>,
    /// Pure-branch abundances of the final evaluation pass (`n_mixed × n_endmembers`)
    pub abundances: Array2<f32>,
    pub epoch_metrics: Vec<EpochMetrics>,
    pub global_steps: u64,
    /// Trained network including normalization state, for inference and checkpoints
    pub network: UnmixingNetwork,
    pub total_elapsed_ms: u128,
}

impl TrainingResult {
    pub fn final_validation_accuracy(&self) -> Option<f32> {
        self.validation_accuracy.last().copied()
    }
}

fn validate_inputs(
    pure: &Array2<f32>,
    mixed: &Array2<f32>,
    train_labels: &Array2<f32>,
    eval_labels: &Array2<f32>,
    config: &UnmixingConfig,
) -> UnmixResult<()> {
    let model = &config.model;

    for (dataset, spectra) in [("pure spectra", pure), ("mixed spectra", mixed)] {
        if spectra.nrows() == 0 {
            return Err(UnmixError::EmptyDataset {
                dataset: dataset.to_string(),
            });
        }
        if spectra.ncols() != model.in_channels {
            return Err(UnmixError::dimension(
                format!("{dataset} columns"),
                model.in_channels,
                spectra.ncols(),
            ));
        }
    }

    let label_sets = [
        ("training labels", train_labels, pure.nrows()),
        ("evaluation labels", eval_labels, mixed.nrows()),
    ];
    for (dataset, labels, rows) in label_sets {
        if labels.ncols() != model.n_endmembers {
            return Err(UnmixError::dimension(
                format!("{dataset} columns"),
                model.n_endmembers,
                labels.ncols(),
            ));
        }
        if labels.nrows() != rows {
            return Err(UnmixError::dimension(
                format!("{dataset} rows"),
                rows,
                labels.nrows(),
            ));
        }
    }

    Ok(())
}

struct StepReport {
    cost: f32,
    accuracy: f32,
}

struct Evaluation {
    cost: f32,
    accuracy: f32,
    abundances: Array2<f32>,
}

/// Mutable state of one run; created by [`train`] and consumed by `finish`.
struct TrainingSession {
    network: UnmixingNetwork,
    optimizer: AdamOptimizer,
    ctx: ExecutionContext,
    schedule: ExponentialDecay,
    keep_prob: f32,
    reg_coefficient: f32,
    validation: Mode,
}

impl TrainingSession {
    fn new(config: &UnmixingConfig, decay_steps: f32) -> Self {
        let training = &config.training;
        let validation = match training.validation_mode {
            ValidationMode::BatchStatistics => Mode::BatchEvaluation,
            ValidationMode::RunningStatistics => Mode::Inference,
        };

        Self {
            network: UnmixingNetwork::new(&config.model, training.random_seed),
            optimizer: AdamOptimizer::default(),
            ctx: ExecutionContext::new(training.random_seed),
            schedule: ExponentialDecay::new(
                training.base_learning_rate,
                training.learning_rate_decay,
                decay_steps,
            ),
            keep_prob: training.dropout_keep_prob,
            reg_coefficient: training.weight_penalty_coefficient,
            validation,
        }
    }

    fn learning_rate(&self) -> f32 {
        self.schedule.rate_at(self.ctx.global_step())
    }

    fn step(&mut self, batch: &Minibatch, epoch: usize, step: usize) -> UnmixResult<StepReport> {
        let learning_rate = self.learning_rate();
        let trace = self.network.forward_traced(
            &batch.pure,
            &batch.mixed,
            Mode::Training {
                keep_prob: self.keep_prob,
            },
            &mut self.ctx,
        );

        let loss = compute_loss(
            trace.pure_logits(),
            &batch.labels,
            trace.reconstruction(),
            &batch.mixed,
            trace.weight_penalty(),
            self.reg_coefficient,
        );
        if !loss.is_finite() {
            error!(epoch, step, cost = loss.total, "non-finite training cost, aborting run");
            return Err(UnmixError::NonFiniteCost {
                epoch,
                step,
                cost: loss.total,
            });
        }
        let accuracy = abundance_error(&batch.labels, trace.pure_abundances());

        let grad_logits = cross_entropy_gradient(trace.pure_logits(), &batch.labels);
        let grad_reconstruction = reconstruction_gradient(trace.reconstruction(), &batch.mixed);
        let gradients =
            self.network
                .backward(&trace, &grad_logits, &grad_reconstruction, self.reg_coefficient);

        self.network
            .apply_step(&trace, &gradients, &mut self.optimizer, learning_rate);
        let global_step = self.ctx.advance_step();

        debug!(
            epoch,
            step,
            global_step,
            cost = loss.total,
            classification = loss.classification,
            penalty = loss.penalty,
            reconstruction = loss.reconstruction,
            grad_norm = gradients.l2_norm(),
            learning_rate,
            "optimizer step"
        );

        Ok(StepReport {
            cost: loss.total,
            accuracy,
        })
    }

    /// Feeds the mixed set to both branches and scores it against `eval_labels`.
    fn evaluate(
        &mut self,
        mixed: &Array2<f32>,
        eval_labels: &Array2<f32>,
        epoch: usize,
        steps: usize,
    ) -> UnmixResult<Evaluation> {
        let output = self
            .network
            .forward(mixed, mixed, self.validation, &mut self.ctx);
        let loss = compute_loss(
            &output.pure_logits,
            eval_labels,
            &output.reconstruction,
            mixed,
            output.weight_penalty,
            self.reg_coefficient,
        );
        if !loss.is_finite() {
            error!(epoch, cost = loss.total, "non-finite evaluation cost, aborting run");
            return Err(UnmixError::NonFiniteCost {
                epoch,
                step: steps,
                cost: loss.total,
            });
        }

        Ok(Evaluation {
            cost: loss.total,
            accuracy: abundance_error(eval_labels, &output.pure_abundances),
            abundances: output.pure_abundances,
        })
    }

    fn finish(
        self,
        epoch_metrics: Vec<EpochMetrics>,
        abundances: Array2<f32>,
        elapsed: Duration,
    ) -> TrainingResult {
        TrainingResult {
            parameters: self.network.snapshot(),
            validation_accuracy: epoch_metrics.iter().map(|m| m.val_accuracy).collect(),
            abundances,
            epoch_metrics,
            global_steps: self.ctx.global_step(),
            network: self.network,
            total_elapsed_ms: elapsed.as_millis(),
        }
    }
}

/// Trains the dual-branch autoencoder.
///
/// * `pure` - labelled pure spectra, `n_pure × in_channels`
/// * `mixed` - mixed spectra, `n_mixed × in_channels`
/// * `train_labels` - abundance labels of `pure`, `n_pure × n_endmembers`
/// * `eval_labels` - reference abundances of `mixed` for the evaluation pass
///
/// Every epoch draws a fresh shuffle, runs `n_mixed / b` optimizer steps with
/// `b = min(minibatch_size, n_mixed)`, then evaluates on the whole mixed set.
/// Pure rows are cycled to fill each batch. There is no early stopping.
///
/// # Errors
///
/// Returns [`UnmixError::DimensionMismatch`] or [`UnmixError::EmptyDataset`]
/// before any step when the data disagrees with the configuration,
/// [`UnmixError::InvalidConfiguration`] for out-of-range hyperparameters, and
/// [`UnmixError::NonFiniteCost`] if the cost diverges.
pub fn train(
    pure: &Array2<f32>,
    mixed: &Array2<f32>,
    train_labels: &Array2<f32>,
    eval_labels: &Array2<f32>,
    config: &UnmixingConfig,
) -> UnmixResult<TrainingResult> {
    config.validate()?;
    validate_inputs(pure, mixed, train_labels, eval_labels, config)?;

    let training = &config.training;
    let (n_pure, n_mixed) = (pure.nrows(), mixed.nrows());
    let batch_size = effective_batch_size(training.minibatch_size, n_mixed);
    let decay_steps = training
        .decay_steps
        .unwrap_or((n_pure as f32 / batch_size as f32).max(1.0));

    if batch_size < training.minibatch_size {
        warn!(
            requested = training.minibatch_size,
            effective = batch_size,
            "minibatch size clamped to mixed set size"
        );
    }
    info!(
        n_pure,
        n_mixed,
        batch_size,
        steps_per_epoch = n_mixed / batch_size,
        decay_steps,
        num_epochs = training.num_epochs,
        "starting unmixing run"
    );

    let start_time = Instant::now();
    let mut session = TrainingSession::new(config, decay_steps);
    let mut epoch_metrics = Vec::with_capacity(training.num_epochs);
    let mut abundances = Array2::zeros((0, config.model.n_endmembers));

    for epoch in 0..training.num_epochs {
        let epoch_start = Instant::now();
        let seed = session.ctx.next_shuffle_seed();
        let batches = partition(n_pure, n_mixed, training.minibatch_size, seed);

        let mut epoch_cost = 0.0;
        let mut epoch_accuracy = 0.0;
        for (step, indices) in batches.iter().enumerate() {
            let batch = Minibatch::gather(pure, mixed, train_labels, indices);
            let report = session.step(&batch, epoch, step)?;
            epoch_cost += report.cost;
            epoch_accuracy += report.accuracy;
        }

        let steps = batches.len();
        let evaluation = session.evaluate(mixed, eval_labels, epoch, steps)?;
        abundances = evaluation.abundances;

        let metrics = EpochMetrics {
            epoch,
            steps,
            train_cost: epoch_cost / steps as f32,
            train_accuracy: epoch_accuracy / steps as f32,
            val_cost: evaluation.cost,
            val_accuracy: evaluation.accuracy,
            learning_rate: session.learning_rate(),
            elapsed_ms: epoch_start.elapsed().as_millis(),
        };

        if training.verbose_logging && epoch % training.log_every == 0 {
            info!(
                "Epoch {}/{}: train_loss={:.6}, val_loss={:.6}, train_acc={:.6}, val_acc={:.6}",
                epoch,
                training.num_epochs,
                metrics.train_cost,
                metrics.val_cost,
                metrics.train_accuracy,
                metrics.val_accuracy
            );
        }
        if let Some(path) = &training.metrics_log {
            if let Err(err) = log_epoch(path, &metrics, session.ctx.global_step()) {
                warn!(path = %path.display(), %err, "failed to append epoch log");
            }
        }

        epoch_metrics.push(metrics);
    }

    let result = session.finish(epoch_metrics, abundances, start_time.elapsed());
    info!(
        global_steps = result.global_steps,
        total_elapsed_ms = result.total_elapsed_ms as u64,
        final_val_accuracy = result.final_validation_accuracy().unwrap_or(f32::NAN),
        "unmixing run finished"
    );
    Ok(result)
}
