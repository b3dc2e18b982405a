//! Forward/backward throughput of the unmixing network
//!
//! Run with: cargo bench --bench forward_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use unmixing_core::data::{endmember_library, linear_mixtures, pure_samples};
use unmixing_core::neural::loss::{cross_entropy_gradient, reconstruction_gradient};
use unmixing_core::{ExecutionContext, Mode, ModelConfig, UnmixingNetwork};

fn bench_forward(c: &mut Criterion) {
    let config = ModelConfig::default();
    let network = UnmixingNetwork::new(&config, 1);
    let library = endmember_library(config.n_endmembers, config.in_channels, 3);

    let mut group = c.benchmark_group("forward");
    for rows in [64, 512, 2048] {
        let pure = pure_samples(&library, rows, 0.02, 5).spectra;
        let mixed = linear_mixtures(&library, rows, 6).spectra;

        group.bench_with_input(BenchmarkId::new("training", rows), &rows, |b, _| {
            let mut ctx = ExecutionContext::new(0);
            b.iter(|| {
                black_box(network.forward(
                    &pure,
                    &mixed,
                    Mode::Training { keep_prob: 0.9 },
                    &mut ctx,
                ))
            });
        });

        group.bench_with_input(BenchmarkId::new("inference", rows), &rows, |b, _| {
            b.iter(|| black_box(network.predict_abundances(&mixed)));
        });
    }
    group.finish();
}

fn bench_backward(c: &mut Criterion) {
    let config = ModelConfig::default();
    let network = UnmixingNetwork::new(&config, 1);
    let library = endmember_library(config.n_endmembers, config.in_channels, 3);
    let pure = pure_samples(&library, 512, 0.02, 5);
    let mixed = linear_mixtures(&library, 512, 6).spectra;
    let mut ctx = ExecutionContext::new(0);

    let trace = network.forward_traced(&pure.spectra, &mixed, Mode::BatchEvaluation, &mut ctx);
    let grad_logits = cross_entropy_gradient(trace.pure_logits(), &pure.labels);
    let grad_reconstruction = reconstruction_gradient(trace.reconstruction(), &mixed);

    c.bench_function("backward_512", |b| {
        b.iter(|| {
            black_box(network.backward(&trace, &grad_logits, &grad_reconstruction, 0.005))
        });
    });
}

criterion_group!(benches, bench_forward, bench_backward);
criterion_main!(benches);
