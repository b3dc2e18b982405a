//! Epoch partitioning into paired pure/mixed minibatches.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Rows per minibatch after clamping to the mixed set; the pure set never
/// limits the batch.
pub fn effective_batch_size(requested: usize, n_mixed: usize) -> usize {
    requested.min(n_mixed)
}

/// Row indices of one minibatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchIndices {
    pub pure: Vec<usize>,
    pub mixed: Vec<usize>,
}

/// Splits one epoch into `n_mixed / b` batches of `b` rows each.
///
/// Mixed rows follow a permutation of the mixed set and the trailing partial
/// batch is dropped. Pure rows follow an independent permutation of the pure
/// set, read cyclically across the epoch. Pure rows within one batch are
/// distinct while `b <= n_pure`; a larger batch repeats them.
pub fn partition(
    n_pure: usize,
    n_mixed: usize,
    requested: usize,
    seed: u64,
) -> Vec<BatchIndices> {
    let batch = effective_batch_size(requested, n_mixed);
    if batch == 0 || n_pure == 0 {
        return Vec::new();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut mixed_order: Vec<usize> = (0..n_mixed).collect();
    mixed_order.shuffle(&mut rng);
    let mut pure_order: Vec<usize> = (0..n_pure).collect();
    pure_order.shuffle(&mut rng);

    mixed_order
        .chunks_exact(batch)
        .enumerate()
        .map(|(step, mixed)| BatchIndices {
            pure: (0..batch)
                .map(|j| pure_order[(step * batch + j) % n_pure])
                .collect(),
            mixed: mixed.to_vec(),
        })
        .collect()
}

/// One training minibatch; all three matrices have the same row count.
#[derive(Debug, Clone)]
pub struct Minibatch {
    pub pure: Array2<f32>,
    pub mixed: Array2<f32>,
    pub labels: Array2<f32>,
}

impl Minibatch {
    pub fn gather(
        pure: &Array2<f32>,
        mixed: &Array2<f32>,
        labels: &Array2<f32>,
        indices: &BatchIndices,
    ) -> Self {
        Self {
            pure: pure.select(Axis(0), &indices.pure),
            mixed: mixed.select(Axis(0), &indices.mixed),
            labels: labels.select(Axis(0), &indices.pure),
        }
    }

    pub fn rows(&self) -> usize {
        self.mixed.nrows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_effective_batch_size() {
        assert_eq!(effective_batch_size(8000, 250), 250);
        assert_eq!(effective_batch_size(32, 250), 32);
        assert_eq!(effective_batch_size(32, 10), 10);
    }

    #[test]
    fn test_full_batch_yields_one_step() {
        let batches = partition(100, 100, 8000, 2);
        assert_eq!(batches.len(), 1);
        let mut mixed = batches[0].mixed.clone();
        mixed.sort_unstable();
        assert_eq!(mixed, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_trailing_partial_batch_is_dropped() {
        let batches = partition(40, 103, 10, 5);
        assert_eq!(batches.len(), 10);

        let mut seen = HashSet::new();
        for batch in &batches {
            assert_eq!(batch.mixed.len(), 10);
            assert_eq!(batch.pure.len(), 10);
            for &row in &batch.mixed {
                assert!(row < 103);
                assert!(seen.insert(row), "mixed row {row} drawn twice");
            }
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_pure_rows_are_distinct_within_batch() {
        for batch in partition(7, 50, 7, 11) {
            let unique: HashSet<_> = batch.pure.iter().collect();
            assert_eq!(unique.len(), 7);
            assert!(batch.pure.iter().all(|&row| row < 7));
        }
    }

    #[test]
    fn test_small_pure_set_does_not_split_full_batch() {
        let batches = partition(20, 60, 60, 4);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].mixed.len(), 60);
        assert_eq!(batches[0].pure.len(), 60);

        // Every pure row appears exactly three times.
        let mut counts = [0usize; 20];
        for &row in &batches[0].pure {
            counts[row] += 1;
        }
        assert!(counts.iter().all(|&c| c == 3));
    }

    #[test]
    fn test_partition_depends_on_seed_only() {
        assert_eq!(partition(30, 60, 8, 3), partition(30, 60, 8, 3));
        assert_ne!(partition(30, 60, 8, 3), partition(30, 60, 8, 4));
    }

    #[test]
    fn test_empty_dataset_has_no_batches() {
        assert!(partition(0, 10, 4, 1).is_empty());
        assert!(partition(10, 0, 4, 1).is_empty());
    }

    #[test]
    fn test_gather_keeps_labels_aligned_with_pure_rows() {
        let pure = Array2::from_shape_fn((6, 3), |(r, _)| r as f32);
        let mixed = Array2::from_shape_fn((6, 3), |(r, _)| 10.0 + r as f32);
        let labels = Array2::from_shape_fn((6, 2), |(r, _)| r as f32);

        let indices = BatchIndices {
            pure: vec![4, 1],
            mixed: vec![0, 5],
        };
        let batch = Minibatch::gather(&pure, &mixed, &labels, &indices);
        assert_eq!(batch.rows(), 2);
        assert_eq!(batch.pure.column(0).to_vec(), vec![4.0, 1.0]);
        assert_eq!(batch.labels.column(1).to_vec(), vec![4.0, 1.0]);
        assert_eq!(batch.mixed.column(2).to_vec(), vec![10.0, 15.0]);
    }
}
