use ndarray::Array2;
use unmixing_core::data::{endmember_library, linear_mixtures, one_hot_pure_spectra, pure_samples};
use unmixing_core::neural::params::{bias_name, weight_name, Side, DEPTH};
use unmixing_core::{
    train, Checkpointable, ExecutionContext, Mode, UnmixError, UnmixingConfig, UnmixingNetwork,
};

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let values: Vec<f32> = values.collect();
    values.iter().sum::<f32>() / values.len() as f32
}

#[test]
fn one_hot_scenario_cost_decreases_at_default_config() {
    let data = one_hot_pure_spectra(100, 224, 5);
    let config = UnmixingConfig::default();

    let result = train(
        &data.spectra,
        &data.spectra,
        &data.labels,
        &data.labels,
        &config,
    )
    .expect("training succeeds");

    assert_eq!(result.epoch_metrics.len(), 200);
    assert!(result.epoch_metrics.iter().all(|m| m.steps == 1));
    assert_eq!(result.global_steps, 200);

    let costs: Vec<f32> = result.epoch_metrics.iter().map(|m| m.train_cost).collect();
    assert!(costs.iter().all(|c| c.is_finite()));
    let early = mean(costs[..10].iter().copied());
    let late = mean(costs[costs.len() - 10..].iter().copied());
    assert!(late < early, "cost did not decrease: first {early}, last {late}");
}

#[test]
fn snapshot_has_sixteen_arrays_with_declared_shapes() {
    let library = endmember_library(5, 224, 1);
    let pure = pure_samples(&library, 40, 0.01, 2);
    let mixed = linear_mixtures(&library, 40, 3);
    let mut config = UnmixingConfig::default();
    config.training.num_epochs = 2;
    config.training.verbose_logging = false;

    let result = train(&pure.spectra, &mixed.spectra, &pure.labels, &mixed.labels, &config)
        .expect("training succeeds");
    let snapshot = &result.parameters;
    assert_eq!(snapshot.len(), 16);

    let widths = [224, 256, 128, 32, 5];
    for i in 0..DEPTH {
        assert_eq!(
            snapshot.get(&weight_name(Side::Encoder, i)).unwrap().shape(),
            &[widths[i], widths[i + 1]]
        );
        assert_eq!(
            snapshot.get(&bias_name(Side::Encoder, i)).unwrap().shape(),
            &[widths[i + 1]]
        );
        assert_eq!(
            snapshot.get(&weight_name(Side::Decoder, i)).unwrap().shape(),
            &[widths[DEPTH - i], widths[DEPTH - i - 1]]
        );
        assert_eq!(
            snapshot.get(&bias_name(Side::Decoder, i)).unwrap().shape(),
            &[widths[DEPTH - i - 1]]
        );
    }
    assert_eq!(result.abundances.dim(), (40, 5));
}

#[test]
fn trained_network_survives_checkpoint_roundtrip() {
    let library = endmember_library(4, 32, 5);
    let pure = pure_samples(&library, 24, 0.01, 6);
    let mixed = linear_mixtures(&library, 48, 7);

    let config: UnmixingConfig = r#"
        [model]
        in_channels = 32
        n_endmembers = 4

        [training]
        num_epochs = 3
        minibatch_size = 12
        base_learning_rate = 0.01
        verbose_logging = false
        validation_mode = "running_statistics"
    "#
    .parse()
    .expect("valid configuration");

    let result = train(&pure.spectra, &mixed.spectra, &pure.labels, &mixed.labels, &config)
        .expect("training succeeds");

    let path = std::env::temp_dir().join(format!("unmixing_it_{}.bin", uuid::Uuid::new_v4()));
    result.network.save_checkpoint(&path).expect("save");
    let restored = UnmixingNetwork::load_checkpoint(&path).expect("load");
    std::fs::remove_file(&path).ok();

    assert_eq!(restored.snapshot(), result.parameters);
    // The last evaluation pass ran with running statistics, like inference.
    assert_eq!(restored.predict_abundances(&mixed.spectra), result.abundances);
}

#[test]
fn inference_passes_are_identical() {
    let mut config = UnmixingConfig::default();
    config.model.in_channels = 20;
    config.model.n_endmembers = 3;
    let network = UnmixingNetwork::new(&config.model, 3);
    let spectra = Array2::from_shape_fn((9, 20), |(r, c)| ((r * 20 + c) as f32 * 0.37).sin().abs());

    let mut ctx = ExecutionContext::new(1);
    let first = network.forward(&spectra, &spectra, Mode::Inference, &mut ctx);
    let second = network.forward(&spectra, &spectra, Mode::Inference, &mut ctx);
    assert_eq!(first.pure_abundances, second.pure_abundances);
    assert_eq!(first.mixed_abundances, second.mixed_abundances);
    assert_eq!(first.reconstruction, second.reconstruction);
}

#[test]
fn label_width_mismatch_is_a_typed_error() {
    let data = one_hot_pure_spectra(10, 224, 5);
    let wide_labels = Array2::zeros((10, 6));
    let err = train(
        &data.spectra,
        &data.spectra,
        &wide_labels,
        &data.labels,
        &UnmixingConfig::default(),
    )
    .unwrap_err();

    match err {
        UnmixError::DimensionMismatch {
            context,
            expected,
            got,
        } => {
            assert!(context.contains("training labels"));
            assert_eq!((expected, got), (5, 6));
        }
        other => panic!("unexpected error: {other}"),
    }
}
