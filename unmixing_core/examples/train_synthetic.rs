//! Trains the unmixing autoencoder on synthetic linear mixtures.
//!
//! Run with: cargo run --release --example train_synthetic [config.toml]
//!
//! Set `RUST_LOG=unmixing_core=debug` to see every optimizer step.

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use unmixing_core::data::{endmember_library, linear_mixtures, pure_samples};
use unmixing_core::neural::abundance_error;
use unmixing_core::{train, Checkpointable, UnmixingConfig, UnmixingNetwork};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => UnmixingConfig::load_from_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => {
            let mut config = UnmixingConfig::default();
            config.training.num_epochs = 60;
            config.training.minibatch_size = 256;
            config.training.base_learning_rate = 0.01;
            config
        }
    };

    let model = &config.model;
    println!("Spectral unmixing - synthetic scene");
    println!("===================================");
    println!("  Bands: {}", model.in_channels);
    println!("  Endmembers: {}", model.n_endmembers);
    println!("  Epochs: {}", config.training.num_epochs);
    println!("  Minibatch: {}", config.training.minibatch_size);
    println!();

    let library = endmember_library(model.n_endmembers, model.in_channels, 42);
    let pure = pure_samples(&library, 500, 0.02, 7);
    let mixed = linear_mixtures(&library, 2000, 11);

    let result = train(
        &pure.spectra,
        &mixed.spectra,
        &pure.labels,
        &mixed.labels,
        &config,
    )?;

    println!();
    println!("Finished {} steps in {} ms", result.global_steps, result.total_elapsed_ms);
    if let Some(last) = result.epoch_metrics.last() {
        println!("  Final train cost: {:.4}", last.train_cost);
        println!("  Final val cost:   {:.4}", last.val_cost);
        println!("  Final val error:  {:.4}", last.val_accuracy);
    }

    let checkpoint = std::env::temp_dir().join("unmixing_synthetic.bin");
    result
        .network
        .save_checkpoint(&checkpoint)
        .context("saving checkpoint")?;
    let restored = UnmixingNetwork::load_checkpoint(&checkpoint).context("loading checkpoint")?;

    let fresh = linear_mixtures(&library, 200, 99);
    let predicted = restored.predict_abundances(&fresh.spectra);
    println!(
        "  Held-out abundance error (running statistics): {:.4}",
        abundance_error(&fresh.labels, &predicted)
    );
    println!("  Checkpoint: {}", checkpoint.display());

    Ok(())
}
