//! Synthetic spectra for tests, benchmarks and demos.
//!
//! Endmember signatures are smooth sums of Gaussian absorption bands; mixed
//! pixels follow the linear mixing model `x = a · E` with abundances drawn
//! uniformly from the simplex.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

/// Spectra together with their abundance labels (one row each).
#[derive(Debug, Clone)]
pub struct LabeledSpectra {
    pub spectra: Array2<f32>,
    pub labels: Array2<f32>,
}

impl LabeledSpectra {
    pub fn len(&self) -> usize {
        self.spectra.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.nrows() == 0
    }
}

fn one_hot(rows: usize, n_endmembers: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, n_endmembers), |(r, c)| {
        if r % n_endmembers == c {
            1.0
        } else {
            0.0
        }
    })
}

/// Row `r` is zero except band `r % n_endmembers`, which is 1; labelled one-hot.
pub fn one_hot_pure_spectra(
    rows: usize,
    in_channels: usize,
    n_endmembers: usize,
) -> LabeledSpectra {
    assert!(n_endmembers <= in_channels, "need one band per endmember");
    let spectra = Array2::from_shape_fn((rows, in_channels), |(r, band)| {
        if band == r % n_endmembers {
            1.0
        } else {
            0.0
        }
    });
    LabeledSpectra {
        spectra,
        labels: one_hot(rows, n_endmembers),
    }
}

/// `n_endmembers × in_channels` reflectance signatures in `[0.05, 0.95]`.
pub fn endmember_library(n_endmembers: usize, in_channels: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let bands = in_channels.max(1) as f32;
    let mut library = Array2::zeros((n_endmembers, in_channels));

    for mut signature in library.rows_mut() {
        let baseline: f32 = rng.gen_range(0.3..0.7);
        let features: Vec<(f32, f32, f32)> = (0..3)
            .map(|_| {
                (
                    rng.gen_range(0.0..bands),
                    rng.gen_range(bands * 0.03..bands * 0.15),
                    rng.gen_range(-0.3..0.3),
                )
            })
            .collect();

        for (band, value) in signature.iter_mut().enumerate() {
            let x = band as f32;
            let shape: f32 = features
                .iter()
                .map(|&(center, width, depth)| {
                    depth * (-((x - center) / width).powi(2) * 0.5).exp()
                })
                .sum();
            *value = (baseline + shape).clamp(0.05, 0.95);
        }
    }

    library
}

/// Noisy copies of the library rows, cycling through the endmembers.
pub fn pure_samples(library: &Array2<f32>, rows: usize, noise: f32, seed: u64) -> LabeledSpectra {
    let n_endmembers = library.nrows();
    assert!(n_endmembers > 0, "library must hold at least one endmember");
    let mut rng = StdRng::seed_from_u64(seed);

    let mut spectra = Array2::zeros((rows, library.ncols()));
    for (r, mut row) in spectra.rows_mut().into_iter().enumerate() {
        let signature = library.row(r % n_endmembers);
        for (value, &clean) in row.iter_mut().zip(signature.iter()) {
            let jitter = if noise > 0.0 {
                rng.gen_range(-noise..noise)
            } else {
                0.0
            };
            *value = (clean + jitter).clamp(0.0, 1.0);
        }
    }

    LabeledSpectra {
        spectra,
        labels: one_hot(rows, n_endmembers),
    }
}

/// Linear mixtures `a · library` with `a ~ Dirichlet(1, …, 1)`.
pub fn linear_mixtures(library: &Array2<f32>, rows: usize, seed: u64) -> LabeledSpectra {
    let n_endmembers = library.nrows();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut labels = Array2::zeros((rows, n_endmembers));
    for mut row in labels.rows_mut() {
        // Normalized exponentials are uniform on the simplex.
        let draws = Array1::from_shape_fn(n_endmembers, |_| {
            let u: f32 = rng.gen_range(f32::EPSILON..1.0);
            -u.ln()
        });
        let total = draws.sum();
        row.assign(&(draws / total));
    }

    LabeledSpectra {
        spectra: labels.dot(library),
        labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_one_hot_pure_spectra() {
        let data = one_hot_pure_spectra(100, 224, 5);
        assert_eq!(data.spectra.dim(), (100, 224));
        assert_eq!(data.labels.dim(), (100, 5));
        for (r, row) in data.spectra.rows().into_iter().enumerate() {
            assert_eq!(row.sum(), 1.0);
            assert_eq!(row[r % 5], 1.0);
            assert_eq!(data.labels[[r, r % 5]], 1.0);
        }
    }

    #[test]
    fn test_library_is_bounded_and_seeded() {
        let library = endmember_library(5, 224, 3);
        assert_eq!(library.dim(), (5, 224));
        assert!(library.iter().all(|&v| (0.05..=0.95).contains(&v)));
        assert_eq!(library, endmember_library(5, 224, 3));
        assert_ne!(library, endmember_library(5, 224, 4));
    }

    #[test]
    fn test_pure_samples_stay_near_signatures() {
        let library = endmember_library(3, 32, 1);
        let data = pure_samples(&library, 9, 0.02, 7);
        assert_eq!(data.len(), 9);
        for (r, row) in data.spectra.rows().into_iter().enumerate() {
            for (&noisy, &clean) in row.iter().zip(library.row(r % 3).iter()) {
                assert!((noisy - clean).abs() <= 0.02 + 1e-6);
            }
        }
    }

    #[test]
    fn test_mixtures_follow_linear_model() {
        let library = endmember_library(4, 16, 2);
        let data = linear_mixtures(&library, 50, 9);
        for row in data.labels.rows() {
            assert!(row.iter().all(|&a| a >= 0.0));
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-5);
        }
        let expected = data.labels.row(7).dot(&library);
        for (got, want) in data.spectra.row(7).iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
        }
    }
}
