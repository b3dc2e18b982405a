//! Adam with an exponentially decaying learning rate.

use std::collections::HashMap;

use ndarray::{Array, ArrayD, Dimension, IxDyn, Zip};
use serde::{Deserialize, Serialize};

/// `lr(step) = base_rate * decay_rate^(step / decay_steps)`, continuous in `step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialDecay {
    pub base_rate: f32,
    pub decay_rate: f32,
    pub decay_steps: f32,
}

impl ExponentialDecay {
    pub fn new(base_rate: f32, decay_rate: f32, decay_steps: f32) -> Self {
        assert!(decay_steps > 0.0, "decay_steps must be positive");
        Self {
            base_rate,
            decay_rate,
            decay_steps,
        }
    }

    pub fn rate_at(&self, global_step: u64) -> f32 {
        let exponent = global_step as f64 / self.decay_steps as f64;
        (self.base_rate as f64 * (self.decay_rate as f64).powf(exponent)) as f32
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct Moments {
    first: ArrayD<f32>,
    second: ArrayD<f32>,
}

/// Adam (Adaptive Moment Estimation).
///
/// Moments are keyed by parameter name, so every named array owns an
/// independent adaptive step size. The bias-correction counter advances once
/// per [`AdamOptimizer::begin_step`], not once per parameter.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdamOptimizer {
    /// Exponential decay rate for first moment (typically 0.9)
    pub beta1: f32,
    /// Exponential decay rate for second moment (typically 0.999)
    pub beta2: f32,
    /// Small constant for numerical stability
    pub epsilon: f32,
    moments: HashMap<String, Moments>,
    t: u64,
}

impl Default for AdamOptimizer {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

impl AdamOptimizer {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            beta1,
            beta2,
            epsilon,
            moments: HashMap::new(),
            t: 0,
        }
    }

    /// Starts a new optimizer step; call before the `update`s of that step.
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    pub fn steps(&self) -> u64 {
        self.t
    }

    /// Applies one Adam update to `param` in place.
    pub fn update<D: Dimension>(
        &mut self,
        name: &str,
        param: &mut Array<f32, D>,
        gradient: &Array<f32, D>,
        learning_rate: f32,
    ) {
        assert!(self.t > 0, "begin_step must precede update");
        assert_eq!(param.shape(), gradient.shape(), "gradient shape mismatch for {name}");

        let moments = self
            .moments
            .entry(name.to_string())
            .or_insert_with(|| Moments {
                first: ArrayD::zeros(IxDyn(param.shape())),
                second: ArrayD::zeros(IxDyn(param.shape())),
            });
        assert_eq!(
            moments.first.shape(),
            param.shape(),
            "parameter {name} changed shape between steps"
        );

        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let correction1 = 1.0 - beta1.powi(self.t as i32);
        let correction2 = 1.0 - beta2.powi(self.t as i32);

        Zip::from(param.view_mut().into_dyn())
            .and(&mut moments.first)
            .and(&mut moments.second)
            .and(gradient.view().into_dyn())
            .for_each(|p, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / correction1;
                let v_hat = *v / correction2;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            });
    }
}
