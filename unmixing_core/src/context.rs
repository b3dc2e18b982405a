//! Per-run execution context.
//!
//! Holds everything that would otherwise be global: the dropout generator,
//! the minibatch shuffle seed and the global step that drives learning-rate
//! decay. One context belongs to one training run and is passed explicitly to
//! every forward pass.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Offset separating the dropout stream from the initialization stream.
const DROPOUT_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    rng: StdRng,
    shuffle_seed: u64,
    global_step: u64,
}

impl ExecutionContext {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed ^ DROPOUT_STREAM),
            shuffle_seed: seed,
            global_step: 0,
        }
    }

    /// Optimizer steps committed so far.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub(crate) fn advance_step(&mut self) -> u64 {
        self.global_step += 1;
        self.global_step
    }

    /// Advances and returns the shuffle seed; called once per epoch.
    pub fn next_shuffle_seed(&mut self) -> u64 {
        self.shuffle_seed = self.shuffle_seed.wrapping_add(1);
        self.shuffle_seed
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
