//! Learnable dense parameters of the encoder/decoder pair.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayD};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Hidden widths of the encoder; the decoder mirrors them in reverse.
pub const HIDDEN_WIDTHS: [usize; 3] = [256, 128, 32];

/// Number of dense layers on each side of the autoencoder.
pub const DEPTH: usize = 4;

/// One affine layer: `y = x · weight + bias`, weight stored `[fan_in, fan_out]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseParams {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl DenseParams {
    /// Glorot-uniform weights and zero bias.
    fn xavier<R: Rng>(fan_in: usize, fan_out: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let weight =
            Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-limit..limit));
        Self {
            weight,
            bias: Array1::zeros(fan_out),
        }
    }

    pub fn fan_in(&self) -> usize {
        self.weight.nrows()
    }

    pub fn fan_out(&self) -> usize {
        self.weight.ncols()
    }

    /// Affine transform of a row-major batch.
    pub fn apply(&self, input: &Array2<f32>) -> Array2<f32> {
        assert_eq!(
            input.ncols(),
            self.fan_in(),
            "affine input width does not match layer fan-in"
        );
        input.dot(&self.weight) + &self.bias
    }
}

/// Which half of the autoencoder a layer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Encoder,
    Decoder,
}

impl Side {
    pub fn prefix(self) -> &'static str {
        match self {
            Side::Encoder => "encoder",
            Side::Decoder => "decoder",
        }
    }
}

/// Weight name for 0-based layer `index`, e.g. `encoder.w1`.
pub fn weight_name(side: Side, index: usize) -> String {
    format!("{}.w{}", side.prefix(), index + 1)
}

/// Bias name for 0-based layer `index`, e.g. `decoder.b4`.
pub fn bias_name(side: Side, index: usize) -> String {
    format!("{}.b{}", side.prefix(), index + 1)
}

/// All 16 dense arrays of the network.
///
/// Encoder and decoder hold independent weights; nothing is tied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub encoder: [DenseParams; DEPTH],
    pub decoder: [DenseParams; DEPTH],
}

impl ParameterSet {
    /// Creates the parameter store for `in_channels → 256 → 128 → 32 → n_endmembers`
    /// and the mirrored decoder.
    ///
    /// Layers are drawn from one generator in a fixed order (encoder 1..4, then
    /// decoder 1..4), so the result depends on `seed` alone.
    ///
    /// # Examples
    ///
    /// ```
    /// use unmixing_core::neural::ParameterSet;
    ///
    /// let params = ParameterSet::initialize(224, 5, 1);
    /// assert_eq!(params.encoder[0].weight.dim(), (224, 256));
    /// assert_eq!(params.decoder[3].weight.dim(), (256, 224));
    /// ```
    pub fn initialize(in_channels: usize, n_endmembers: usize, seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let widths = Self::encoder_widths(in_channels, n_endmembers);

        let encoder =
            std::array::from_fn(|i| DenseParams::xavier(widths[i], widths[i + 1], &mut rng));
        let decoder = std::array::from_fn(|i| {
            DenseParams::xavier(widths[DEPTH - i], widths[DEPTH - i - 1], &mut rng)
        });

        Self { encoder, decoder }
    }

    fn encoder_widths(in_channels: usize, n_endmembers: usize) -> [usize; DEPTH + 1] {
        [
            in_channels,
            HIDDEN_WIDTHS[0],
            HIDDEN_WIDTHS[1],
            HIDDEN_WIDTHS[2],
            n_endmembers,
        ]
    }

    pub fn in_channels(&self) -> usize {
        self.encoder[0].fan_in()
    }

    pub fn n_endmembers(&self) -> usize {
        self.encoder[DEPTH - 1].fan_out()
    }

    pub fn layers(&self, side: Side) -> &[DenseParams; DEPTH] {
        match side {
            Side::Encoder => &self.encoder,
            Side::Decoder => &self.decoder,
        }
    }

    pub fn layers_mut(&mut self, side: Side) -> &mut [DenseParams; DEPTH] {
        match side {
            Side::Encoder => &mut self.encoder,
            Side::Decoder => &mut self.decoder,
        }
    }

    /// `Σ ½‖W‖²` over the eight weight matrices; biases are excluded.
    pub fn weight_penalty(&self) -> f32 {
        self.encoder
            .iter()
            .chain(self.decoder.iter())
            .map(|layer| 0.5 * layer.weight.iter().map(|w| w * w).sum::<f32>())
            .sum()
    }

    /// Detached copy of every array keyed by name.
    pub fn snapshot(&self) -> ParameterSnapshot {
        let mut arrays = BTreeMap::new();
        for side in [Side::Encoder, Side::Decoder] {
            for (i, layer) in self.layers(side).iter().enumerate() {
                arrays.insert(weight_name(side, i), layer.weight.clone().into_dyn());
                arrays.insert(bias_name(side, i), layer.bias.clone().into_dyn());
            }
        }
        ParameterSnapshot { arrays }
    }

    /// Checks that consecutive layers chain and the decoder mirrors the encoder.
    pub fn validate_shapes(&self) -> Result<(), String> {
        for side in [Side::Encoder, Side::Decoder] {
            let layers = self.layers(side);
            for (i, layer) in layers.iter().enumerate() {
                if layer.bias.len() != layer.fan_out() {
                    return Err(format!(
                        "{} has {} entries, expected {}",
                        bias_name(side, i),
                        layer.bias.len(),
                        layer.fan_out()
                    ));
                }
                if i + 1 < DEPTH && layers[i + 1].fan_in() != layer.fan_out() {
                    return Err(format!(
                        "{} output width {} does not feed {} input width {}",
                        weight_name(side, i),
                        layer.fan_out(),
                        weight_name(side, i + 1),
                        layers[i + 1].fan_in()
                    ));
                }
            }
        }

        for i in 0..DEPTH {
            let enc = &self.encoder[i];
            let dec = &self.decoder[DEPTH - 1 - i];
            if enc.fan_in() != dec.fan_out() || enc.fan_out() != dec.fan_in() {
                return Err(format!(
                    "{} {:?} is not mirrored by {} {:?}",
                    weight_name(Side::Encoder, i),
                    enc.weight.dim(),
                    weight_name(Side::Decoder, DEPTH - 1 - i),
                    dec.weight.dim()
                ));
            }
        }

        Ok(())
    }
}

/// Plain named arrays exported at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    arrays: BTreeMap<String, ArrayD<f32>>,
}

impl ParameterSnapshot {
    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.arrays.get(name)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.arrays.iter().map(|(name, array)| (name.as_str(), array))
    }

    pub fn into_inner(self) -> BTreeMap<String, ArrayD<f32>> {
        self.arrays
    }
}
