//! Per-feature batch normalization with persistent running statistics.
//!
//! Each layer carries three kinds of state: the trainable scale/shift
//! (`gamma`, `beta`), and the running mean/variance used at inference. The
//! forward pass never mutates the running estimate; it hands back the batch
//! moments it observed and the caller folds them in with [`BatchNorm::commit`].

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Source of the normalization moments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistics {
    /// Mean/variance of the current batch
    Batch,
    /// Frozen running estimates
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNorm {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    pub running_mean: Array1<f32>,
    pub running_var: Array1<f32>,
    pub momentum: f32,
    pub epsilon: f32,
}

/// Per-feature moments of one batch, pending a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMoments {
    pub mean: Array1<f32>,
    pub var: Array1<f32>,
}

/// Values kept from the forward pass for the backward pass.
#[derive(Debug, Clone)]
pub struct NormCache {
    x_hat: Array2<f32>,
    inv_std: Array1<f32>,
    statistics: Statistics,
}

#[derive(Debug, Clone)]
pub struct NormGrad {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
}

impl NormGrad {
    pub fn accumulate(&mut self, other: &NormGrad) {
        self.gamma += &other.gamma;
        self.beta += &other.beta;
    }
}

pub struct NormOutput {
    pub output: Array2<f32>,
    pub cache: NormCache,
    /// Present only when batch statistics were used.
    pub moments: Option<BatchMoments>,
}

impl BatchNorm {
    pub fn new(width: usize, momentum: f32, epsilon: f32) -> Self {
        Self {
            gamma: Array1::ones(width),
            beta: Array1::zeros(width),
            running_mean: Array1::zeros(width),
            running_var: Array1::ones(width),
            momentum,
            epsilon,
        }
    }

    pub fn width(&self) -> usize {
        self.gamma.len()
    }

    pub fn forward(&self, z: &Array2<f32>, statistics: Statistics) -> NormOutput {
        assert_eq!(z.ncols(), self.width(), "normalization width mismatch");

        let (mean, var, moments) = match statistics {
            Statistics::Batch => {
                assert!(z.nrows() > 0, "batch statistics need at least one row");
                let mean = z.mean_axis(Axis(0)).expect("non-empty batch");
                let centered = z - &mean;
                let var = centered
                    .mapv(|v| v * v)
                    .mean_axis(Axis(0))
                    .expect("non-empty batch");
                let moments = BatchMoments {
                    mean: mean.clone(),
                    var: var.clone(),
                };
                (mean, var, Some(moments))
            }
            Statistics::Running => (self.running_mean.clone(), self.running_var.clone(), None),
        };

        let inv_std = var.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let x_hat = (z - &mean) * &inv_std;
        let output = &x_hat * &self.gamma + &self.beta;

        NormOutput {
            output,
            cache: NormCache {
                x_hat,
                inv_std,
                statistics,
            },
            moments,
        }
    }

    /// Gradient w.r.t. the pre-normalization input, plus `gamma`/`beta` gradients.
    pub fn backward(
        &self,
        cache: &NormCache,
        grad_output: &Array2<f32>,
    ) -> (Array2<f32>, NormGrad) {
        let grad = NormGrad {
            gamma: (grad_output * &cache.x_hat).sum_axis(Axis(0)),
            beta: grad_output.sum_axis(Axis(0)),
        };

        let grad_x_hat = grad_output * &self.gamma;
        let grad_input = match cache.statistics {
            Statistics::Running => grad_x_hat * &cache.inv_std,
            Statistics::Batch => {
                // Mean and variance depend on every row of the batch.
                let n = grad_output.nrows() as f32;
                let sum_grad = grad_x_hat.sum_axis(Axis(0));
                let sum_grad_x_hat = (&grad_x_hat * &cache.x_hat).sum_axis(Axis(0));
                let centered = grad_x_hat * n - &sum_grad - &cache.x_hat * &sum_grad_x_hat;
                centered * &(&cache.inv_std / n)
            }
        };

        (grad_input, grad)
    }

    /// Folds one batch's moments into the running estimate.
    pub fn commit(&mut self, moments: &BatchMoments) {
        let keep = self.momentum;
        let take = 1.0 - self.momentum;
        self.running_mean = &self.running_mean * keep + &moments.mean * take;
        self.running_var = &self.running_var * keep + &moments.var * take;
    }
}
