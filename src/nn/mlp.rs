use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dataset::{InMemoryDataset, TrainTargets};
use crate::loss::{CrossEntropyLoss, Loss, MseLoss};
use crate::nn::{Activation, GraphLayer, NetworkGraph};
use crate::optimizer::Sgd;
use crate::quantization::fake_quantize_weights;
use crate::trainer::{
    ParamOps, TrainError, TrainableModel, Trainer, TrainingParams, TrainingReport,
};

/// Weights and bias of one dense layer. `weight` is `(n_out, n_in)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetParams {
    pub layers: Vec<LayerParams>,
}

impl ParamOps for NetParams {
    fn add(&self, other: &Self) -> Self {
        let layers = self
            .layers
            .iter()
            .zip(other.layers.iter())
            .map(|(a, b)| LayerParams {
                weight: &a.weight + &b.weight,
                bias: &a.bias + &b.bias,
            })
            .collect();
        Self { layers }
    }

    fn scale(&self, scalar: f32) -> Self {
        let layers = self
            .layers
            .iter()
            .map(|l| LayerParams {
                weight: &l.weight * scalar,
                bias: &l.bias * scalar,
            })
            .collect();
        Self { layers }
    }
}

/// Dense feed-forward network trained with fake-quantized weights.
///
/// When weight bits are set, the forward pass sees weights rounded to the
/// integer grid the calibrator will later use, and gradients flow to the float
/// weights unchanged (straight-through estimator). Optional masks pin pruned
/// weights to zero through every update.
#[derive(Debug, Clone)]
pub struct Mlp {
    params: NetParams,
    activation: Activation,
    n_w_bits: Option<u32>,
    masks: Option<Vec<Array2<f32>>>,
}

/// Intermediate values of one forward pass.
struct ForwardCache {
    /// Input of every layer.
    inputs: Vec<Array2<f32>>,
    /// Pre-activation of every layer.
    pre_activations: Vec<Array2<f32>>,
}

impl Mlp {
    /// Build a network with `layer_sizes[0]` inputs and `layer_sizes[last]` outputs.
    ///
    /// Weights and biases are drawn from `U(-1/sqrt(n_in), 1/sqrt(n_in))`.
    pub fn new(
        layer_sizes: &[usize],
        activation: Activation,
        seed: u64,
    ) -> Result<Self, TrainError> {
        if layer_sizes.len() < 2 {
            return Err(TrainError::InvalidArchitecture(format!(
                "need at least an input and an output size, got {layer_sizes:?}"
            )));
        }
        if layer_sizes.contains(&0) {
            return Err(TrainError::InvalidArchitecture(format!(
                "layer sizes must be > 0, got {layer_sizes:?}"
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let layers = layer_sizes
            .windows(2)
            .map(|pair| {
                let (n_in, n_out) = (pair[0], pair[1]);
                let bound = 1.0 / (n_in as f32).sqrt();
                LayerParams {
                    weight: Array2::from_shape_fn((n_out, n_in), |_| {
                        rng.random_range(-bound..bound)
                    }),
                    bias: Array1::from_shape_fn(n_out, |_| rng.random_range(-bound..bound)),
                }
            })
            .collect();

        Ok(Self {
            params: NetParams { layers },
            activation,
            n_w_bits: None,
            masks: None,
        })
    }

    /// Train against weights fake-quantized on `n_bits`.
    pub fn with_weight_bits(mut self, n_bits: u32) -> Self {
        self.n_w_bits = Some(n_bits);
        self
    }

    /// Keep weights where `mask` is zero pinned at zero.
    pub fn with_masks(mut self, masks: Vec<Array2<f32>>) -> Result<Self, TrainError> {
        if masks.len() != self.params.layers.len() {
            return Err(TrainError::InvalidArchitecture(format!(
                "{} masks for {} layers",
                masks.len(),
                self.params.layers.len()
            )));
        }
        for (i, (mask, layer)) in masks.iter().zip(self.params.layers.iter()).enumerate() {
            if mask.dim() != layer.weight.dim() {
                return Err(TrainError::InvalidArchitecture(format!(
                    "mask of layer {i} has shape {:?}, weights have {:?}",
                    mask.dim(),
                    layer.weight.dim()
                )));
            }
        }
        self.masks = Some(masks);
        self.apply_masks();
        Ok(self)
    }

    fn apply_masks(&mut self) {
        if let Some(masks) = &self.masks {
            for (layer, mask) in self.params.layers.iter_mut().zip(masks.iter()) {
                layer.weight *= mask;
            }
        }
    }

    pub fn input_dim(&self) -> usize {
        self.params.layers.first().map(|l| l.weight.ncols()).unwrap_or(0)
    }

    pub fn n_outputs(&self) -> usize {
        self.params.layers.last().map(|l| l.weight.nrows()).unwrap_or(0)
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Largest number of non-zero weights feeding any single neuron.
    pub fn max_fan_in(&self) -> usize {
        self.params
            .layers
            .iter()
            .flat_map(|l| l.weight.rows().into_iter())
            .map(|row| row.iter().filter(|w| **w != 0.0).count())
            .max()
            .unwrap_or(0)
    }

    fn effective_weight(&self, layer: &LayerParams) -> Array2<f32> {
        match self.n_w_bits {
            Some(bits) => fake_quantize_weights(&layer.weight, bits),
            None => layer.weight.clone(),
        }
    }

    fn forward_cached(&self, x: &Array2<f32>) -> (Array2<f32>, ForwardCache) {
        let n_layers = self.params.layers.len();
        let mut cache = ForwardCache {
            inputs: Vec::with_capacity(n_layers),
            pre_activations: Vec::with_capacity(n_layers),
        };
        let mut h = x.clone();
        for (idx, layer) in self.params.layers.iter().enumerate() {
            let w = self.effective_weight(layer);
            let z = h.dot(&w.t()) + &layer.bias;
            cache.inputs.push(h);
            h = if idx + 1 < n_layers {
                z.mapv(|v| self.activation.apply(v))
            } else {
                z.clone()
            };
            cache.pre_activations.push(z);
        }
        (h, cache)
    }

    /// Export the (masked, float) weights for calibration.
    pub fn export(&self, n_w_bits: u32, n_a_bits: u32) -> NetworkGraph {
        let n_layers = self.params.layers.len();
        let layers = self
            .params
            .layers
            .iter()
            .enumerate()
            .map(|(idx, l)| GraphLayer {
                weight: l.weight.clone(),
                bias: l.bias.clone(),
                activation: (idx + 1 < n_layers).then_some(self.activation),
            })
            .collect();
        NetworkGraph {
            layers,
            n_w_bits,
            n_a_bits,
        }
    }

    /// Train on `x` with cross-entropy (class targets) or MSE (value targets).
    pub fn train(
        &mut self,
        x: &Array2<f32>,
        y: &TrainTargets,
        params: &TrainingParams,
    ) -> Result<TrainingReport, TrainError> {
        if x.ncols() != self.input_dim() {
            return Err(TrainError::FeatureWidth {
                expected: self.input_dim(),
                got: x.ncols(),
            });
        }
        if !(params.lr.is_finite() && params.lr > 0.0) {
            return Err(TrainError::InvalidLearningRate(params.lr));
        }
        let n_outputs = self.n_outputs();
        match y {
            TrainTargets::Classes { n_classes, .. } if *n_classes > n_outputs => {
                return Err(TrainError::TooManyClasses {
                    n_classes: *n_classes,
                    n_outputs,
                });
            }
            TrainTargets::Values(v) if v.ncols() != n_outputs => {
                return Err(TrainError::TargetWidth {
                    expected: n_outputs,
                    got: v.ncols(),
                });
            }
            _ => {}
        }

        let dataset = InMemoryDataset::new(x.clone(), y.clone())?;
        match y {
            TrainTargets::Classes { .. } => {
                let loss = match &params.class_weight {
                    Some(w) if w.len() != n_outputs => {
                        return Err(TrainError::ClassWeightLength {
                            expected: n_outputs,
                            got: w.len(),
                        })
                    }
                    Some(w) => CrossEntropyLoss::with_weight(Array1::from(w.clone())),
                    None => CrossEntropyLoss::new(),
                };
                self.train_with(loss, &dataset, params)
            }
            TrainTargets::Values(_) => {
                if params.class_weight.is_some() {
                    warn!("class weights are ignored for regression targets");
                }
                self.train_with(MseLoss, &dataset, params)
            }
        }
    }

    fn train_with<L: Loss>(
        &mut self,
        loss: L,
        dataset: &InMemoryDataset,
        params: &TrainingParams,
    ) -> Result<TrainingReport, TrainError> {
        let trainer = Trainer::builder(loss, Sgd::new(params.lr))
            .batch_size(params.batch_size)
            .max_epochs(params.max_epochs)
            .verbose(params.verbose > 0)
            .shuffle(params.random_state)
            .build();
        trainer.fit(self, dataset)
    }
}

impl TrainableModel for Mlp {
    type Params = NetParams;

    fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        self.forward_cached(input).0
    }

    fn backward(&self, input: &Array2<f32>, grad_output: &Array2<f32>) -> NetParams {
        let (_, cache) = self.forward_cached(input);
        let n_layers = self.params.layers.len();
        let mut grads: Vec<LayerParams> = Vec::with_capacity(n_layers);
        let mut delta = grad_output.clone();

        for idx in (0..n_layers).rev() {
            let layer = &self.params.layers[idx];
            let mut grad_w = delta.t().dot(&cache.inputs[idx]);
            if let Some(masks) = &self.masks {
                grad_w *= &masks[idx];
            }
            let grad_b = delta.sum_axis(Axis(0));

            if idx > 0 {
                let w = self.effective_weight(layer);
                let upstream = delta.dot(&w);
                let z_prev = &cache.pre_activations[idx - 1];
                delta = upstream * &z_prev.mapv(|v| self.activation.derivative(v));
            }
            grads.push(LayerParams {
                weight: grad_w,
                bias: grad_b,
            });
        }
        grads.reverse();
        NetParams { layers: grads }
    }

    fn params(&self) -> &NetParams {
        &self.params
    }

    fn update_params(&mut self, new_params: &NetParams) {
        self.params = new_params.clone();
        self.apply_masks();
    }
}
