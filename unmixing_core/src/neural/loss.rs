//! Joint objective: endmember classification on pure spectra, weight decay,
//! and reconstruction of mixed spectra.

use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Individual terms of the joint cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    /// Mean softmax cross-entropy of the pure branch
    pub classification: f32,
    /// `reg_coefficient * weight_penalty`
    pub penalty: f32,
    /// Mean squared reconstruction error of the mixed branch
    pub reconstruction: f32,
    /// Sum of the three terms
    pub total: f32,
}

impl LossBreakdown {
    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
    }
}

/// Computes the joint cost
///
/// ```text
/// cost = mean(CE(softmax(pure_logits), labels)) + reg * penalty + mean((recon - mixed)^2)
/// ```
///
/// # Panics
///
/// Panics if logits and labels, or reconstruction and mixed input, differ in shape.
pub fn compute_loss(
    pure_logits: &Array2<f32>,
    labels: &Array2<f32>,
    reconstruction: &Array2<f32>,
    mixed: &Array2<f32>,
    weight_penalty: f32,
    reg_coefficient: f32,
) -> LossBreakdown {
    let classification = cross_entropy_with_logits(pure_logits, labels);
    let penalty = reg_coefficient * weight_penalty;
    let reconstruction = reconstruction_error(reconstruction, mixed);

    LossBreakdown {
        classification,
        penalty,
        reconstruction,
        total: classification + penalty + reconstruction,
    }
}

fn log_sum_exp(row: ndarray::ArrayView1<f32>) -> f32 {
    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    max + row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln()
}

/// Mean over rows of `-Σ_k y_k log softmax(z)_k`; labels may be soft.
pub fn cross_entropy_with_logits(logits: &Array2<f32>, labels: &Array2<f32>) -> f32 {
    assert_eq!(logits.dim(), labels.dim(), "logits/labels shape mismatch");
    if logits.nrows() == 0 {
        return 0.0;
    }

    let total: f32 = logits
        .outer_iter()
        .zip(labels.outer_iter())
        .map(|(z, y)| {
            let lse = log_sum_exp(z);
            z.iter().zip(y.iter()).map(|(&zk, &yk)| yk * (lse - zk)).sum::<f32>()
        })
        .sum();

    total / logits.nrows() as f32
}

/// Gradient of [`cross_entropy_with_logits`] w.r.t. the logits.
pub fn cross_entropy_gradient(logits: &Array2<f32>, labels: &Array2<f32>) -> Array2<f32> {
    assert_eq!(logits.dim(), labels.dim(), "logits/labels shape mismatch");
    let rows = logits.nrows().max(1) as f32;
    let probs = super::layer::softmax_rows(logits);
    let label_mass = labels.sum_axis(Axis(1)).insert_axis(Axis(1));
    (probs * &label_mass - labels) / rows
}

/// Mean squared error over every element.
pub fn reconstruction_error(reconstruction: &Array2<f32>, target: &Array2<f32>) -> f32 {
    assert_eq!(
        reconstruction.dim(),
        target.dim(),
        "shape mismatch for reconstruction error"
    );
    if reconstruction.is_empty() {
        return 0.0;
    }

    // Sequential fold keeps the reported cost bit-identical across runs.
    let sum = Zip::from(reconstruction)
        .and(target)
        .fold(0.0f32, |acc, &r, &t| acc + (r - t) * (r - t));
    sum / reconstruction.len() as f32
}

/// Gradient of [`reconstruction_error`] w.r.t. the reconstruction.
pub fn reconstruction_gradient(
    reconstruction: &Array2<f32>,
    target: &Array2<f32>,
) -> Array2<f32> {
    assert_eq!(reconstruction.dim(), target.dim());
    let scale = 2.0 / reconstruction.len().max(1) as f32;
    let mut grad = Array2::zeros(reconstruction.dim());
    Zip::from(&mut grad)
        .and(reconstruction)
        .and(target)
        .for_each(|g, &r, &t| *g = scale * (r - t));
    grad
}

/// Mean absolute difference between label and predicted abundances.
///
/// Reported as the run's "accuracy" metric; lower is better.
pub fn abundance_error(labels: &Array2<f32>, abundances: &Array2<f32>) -> f32 {
    assert_eq!(labels.dim(), abundances.dim(), "labels/abundances shape mismatch");
    if labels.is_empty() {
        return 0.0;
    }
    (labels - abundances).mapv(f32::abs).mean().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let logits = Array2::zeros((4, 5));
        let mut labels = Array2::zeros((4, 5));
        for r in 0..4 {
            labels[[r, r]] = 1.0;
        }
        assert_abs_diff_eq!(
            cross_entropy_with_logits(&logits, &labels),
            5.0f32.ln(),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_cross_entropy_is_stable_for_extreme_logits() {
        let logits = array![[1e4, -1e4, 0.0]];
        let labels = array![[0.0, 1.0, 0.0]];
        let ce = cross_entropy_with_logits(&logits, &labels);
        assert!(ce.is_finite());
        assert_abs_diff_eq!(ce, 2e4, epsilon = 1.0);
    }

    #[test]
    fn test_cross_entropy_gradient_matches_finite_differences() {
        let logits = array![[0.5, -0.2, 1.0], [0.0, 0.3, -0.7]];
        let labels = array![[0.0, 1.0, 0.0], [0.2, 0.5, 0.3]];
        let grad = cross_entropy_gradient(&logits, &labels);

        let h = 1e-3;
        for ((r, c), &analytic) in grad.indexed_iter() {
            let mut plus = logits.clone();
            plus[[r, c]] += h;
            let mut minus = logits.clone();
            minus[[r, c]] -= h;
            let numeric = (cross_entropy_with_logits(&plus, &labels)
                - cross_entropy_with_logits(&minus, &labels))
                / (2.0 * h);
            assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_reconstruction_error_and_gradient() {
        let recon = array![[0.5, 0.5], [1.0, 0.0]];
        let target = array![[0.0, 0.5], [1.0, 1.0]];
        assert_abs_diff_eq!(reconstruction_error(&recon, &target), 0.3125, epsilon = 1e-6);

        let grad = reconstruction_gradient(&recon, &target);
        assert_abs_diff_eq!(grad[[0, 0]], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(grad[[1, 1]], -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(grad[[0, 1]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_reconstruction_error_is_order_stable() {
        let recon = Array2::from_shape_fn((64, 48), |(r, c)| ((r * 48 + c) as f32 * 0.13).sin());
        let target = Array2::from_shape_fn((64, 48), |(r, c)| ((r + c) as f32 * 0.07).cos());
        let first = reconstruction_error(&recon, &target);
        for _ in 0..8 {
            assert_eq!(reconstruction_error(&recon, &target).to_bits(), first.to_bits());
        }

        let transposed = reconstruction_error(&recon.t().to_owned(), &target.t().to_owned());
        assert_abs_diff_eq!(transposed, first, epsilon = 1e-6);
    }

    #[test]
    fn test_compute_loss_sums_terms() {
        let logits = Array2::zeros((2, 2));
        let labels = array![[1.0, 0.0], [0.0, 1.0]];
        let recon = array![[0.0, 1.0], [0.0, 0.0]];
        let mixed = Array2::zeros((2, 2));

        let loss = compute_loss(&logits, &labels, &recon, &mixed, 10.0, 0.005);
        assert_abs_diff_eq!(loss.classification, 2.0f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(loss.penalty, 0.05, epsilon = 1e-7);
        assert_abs_diff_eq!(loss.reconstruction, 0.25, epsilon = 1e-7);
        assert_abs_diff_eq!(
            loss.total,
            2.0f32.ln() + 0.05 + 0.25,
            epsilon = 1e-6
        );
        assert!(loss.is_finite());
    }

    #[test]
    fn test_abundance_error() {
        let labels = array![[1.0, 0.0], [0.0, 1.0]];
        let perfect = labels.clone();
        assert_eq!(abundance_error(&labels, &perfect), 0.0);

        let uniform = Array2::from_elem((2, 2), 0.5);
        assert_abs_diff_eq!(abundance_error(&labels, &uniform), 0.5, epsilon = 1e-6);
    }
}
