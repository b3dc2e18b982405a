//! Element-wise nonlinearities, row softmax and inverted dropout.

use ndarray::{Array2, Axis, Zip};
use rand::Rng;
use rayon::prelude::*;

/// Nonlinearity applied after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Tanh,
    Relu,
    Sigmoid,
}

impl Activation {
    pub fn apply(self, x: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Tanh => x.mapv(f32::tanh),
            Activation::Relu => x.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => x.mapv(sigmoid),
        }
    }

    /// Gradient w.r.t. the activation input, expressed through its output.
    pub fn backward(self, output: &Array2<f32>, grad_output: &Array2<f32>) -> Array2<f32> {
        let mut grad = grad_output.clone();
        Zip::from(&mut grad).and(output).for_each(|g, &y| {
            *g *= match self {
                Activation::Tanh => 1.0 - y * y,
                Activation::Relu => {
                    if y > 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                Activation::Sigmoid => y * (1.0 - y),
            };
        });
        grad
    }
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Row-wise softmax with max subtraction; every row lands on the simplex.
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    probs
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        });
    probs
}

/// Gradient of a loss w.r.t. softmax logits given its gradient w.r.t. the probabilities.
pub fn softmax_backward(probs: &Array2<f32>, grad_probs: &Array2<f32>) -> Array2<f32> {
    let dot = (probs * grad_probs).sum_axis(Axis(1)).insert_axis(Axis(1));
    probs * &(grad_probs - &dot)
}

/// Inverted dropout mask: kept entries scale by `1 / keep_prob`, dropped entries are 0.
pub fn dropout_mask<R: Rng>(shape: (usize, usize), keep_prob: f32, rng: &mut R) -> Array2<f32> {
    assert!(
        keep_prob > 0.0 && keep_prob <= 1.0,
        "keep probability must lie in (0, 1]"
    );
    if keep_prob >= 1.0 {
        return Array2::ones(shape);
    }
    let scale = 1.0 / keep_prob;
    Array2::from_shape_fn(shape, |_| {
        if rng.gen::<f32>() < keep_prob {
            scale
        } else {
            0.0
        }
    })
}
