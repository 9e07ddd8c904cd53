use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::MAX_BITWIDTH_BACKWARD_COMPATIBLE;
use crate::dataset::TrainTargets;
use crate::error::{BoxError, QnnError, Result};
use crate::nn::{Activation, Mlp, Module, NetworkGraph};
use crate::quantization::{unsigned_qmax, weight_qmax};
use crate::trainer::{TrainableModel, TrainingParams, TrainingReport};

const MAX_QUANTIZATION_BITS: u32 = 16;
const MAX_ACCUMULATOR_BITS: u32 = 32;

/// Hyperparameters of [`SparseQuantNet`].
///
/// `input_dim` and `n_outputs` have no meaningful default and must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleParams {
    /// Number of linear layers, output layer included.
    pub n_layers: usize,
    pub n_w_bits: u32,
    pub n_a_bits: u32,
    pub n_accum_bits: u32,
    pub n_outputs: usize,
    pub input_dim: usize,
    pub activation_function: Activation,
    /// Hidden width is `input_dim * n_hidden_neurons_multiplier`.
    pub n_hidden_neurons_multiplier: usize,
}

impl Default for ModuleParams {
    fn default() -> Self {
        Self {
            n_layers: 3,
            n_w_bits: 3,
            n_a_bits: 3,
            n_accum_bits: MAX_BITWIDTH_BACKWARD_COMPATIBLE,
            n_outputs: 0,
            input_dim: 0,
            activation_function: Activation::Relu,
            n_hidden_neurons_multiplier: 4,
        }
    }
}

impl ModuleParams {
    pub fn new(input_dim: usize, n_outputs: usize) -> Self {
        Self {
            input_dim,
            n_outputs,
            ..Self::default()
        }
    }

    pub fn with_n_layers(mut self, n_layers: usize) -> Self {
        self.n_layers = n_layers;
        self
    }

    pub fn with_n_w_bits(mut self, bits: u32) -> Self {
        self.n_w_bits = bits;
        self
    }

    pub fn with_n_a_bits(mut self, bits: u32) -> Self {
        self.n_a_bits = bits;
        self
    }

    pub fn with_n_accum_bits(mut self, bits: u32) -> Self {
        self.n_accum_bits = bits;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation_function = activation;
        self
    }

    pub fn with_hidden_multiplier(mut self, multiplier: usize) -> Self {
        self.n_hidden_neurons_multiplier = multiplier;
        self
    }

    /// Input size of every layer followed by the output size.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let hidden = self.input_dim * self.n_hidden_neurons_multiplier;
        let mut sizes = Vec::with_capacity(self.n_layers + 1);
        sizes.push(self.input_dim);
        sizes.extend(std::iter::repeat(hidden).take(self.n_layers.saturating_sub(1)));
        sizes.push(self.n_outputs);
        sizes
    }
}

/// Largest fan-in whose worst-case accumulator fits on `n_accum_bits` signed bits.
///
/// A neuron with `k` active inputs accumulates at most
/// `k * weight_qmax(n_w_bits) * (2^n_a_bits - 1)` in magnitude.
pub fn max_fan_in(n_w_bits: u32, n_a_bits: u32, n_accum_bits: u32) -> u64 {
    if n_accum_bits == 0 {
        return 0;
    }
    let per_term = weight_qmax(n_w_bits) as u64 * unsigned_qmax(n_a_bits) as u64;
    let acc_max = (1u64 << (n_accum_bits - 1).min(62)) - 1;
    acc_max / per_term.max(1)
}

fn concept(name: &str) -> Option<&'static str> {
    Some(match name {
        "n_layers" => "number of layers",
        "n_w_bits" => "weight quantization bitwidth",
        "n_a_bits" => "activation quantization bitwidth",
        "n_accum_bits" => "accumulator bitwidth",
        "n_outputs" => "number of outputs",
        "input_dim" => "number of input dimensions",
        "n_hidden_neurons_multiplier" => "number of hidden neurons multiplier",
        _ => return None,
    })
}

fn non_negative(concept: &str, value: &Value) -> Result<u64> {
    let v = value.as_i64().ok_or_else(|| {
        QnnError::InvalidHyperparameter(format!("{concept} must be an integer, got {value}"))
    })?;
    if v < 0 {
        return Err(QnnError::InvalidHyperparameter(format!(
            "{concept} must be > 0, got {v}"
        )));
    }
    Ok(v as u64)
}

/// Fully connected network with fan-in pruned to fit the accumulator budget.
///
/// Weights are trained fake-quantized on `n_w_bits`. At construction, every
/// neuron keeps only its `max_fan_in` largest-magnitude inputs, so once
/// calibrated no accumulator can exceed `n_accum_bits`.
#[derive(Debug, Clone)]
pub struct SparseQuantNet {
    config: ModuleParams,
    mlp: Mlp,
}

impl SparseQuantNet {
    pub fn new(config: ModuleParams, seed: u64) -> Result<Self> {
        Self::validate(&config)?;
        let mlp = Mlp::new(&config.layer_sizes(), config.activation_function, seed)
            .map_err(|e| QnnError::Training(Box::new(e)))?
            .with_weight_bits(config.n_w_bits);

        let k = max_fan_in(config.n_w_bits, config.n_a_bits, config.n_accum_bits) as usize;
        let masks: Vec<Array2<f32>> = mlp
            .params()
            .layers
            .iter()
            .map(|l| top_k_mask(&l.weight, k))
            .collect();
        let mlp = mlp
            .with_masks(masks)
            .map_err(|e| QnnError::Training(Box::new(e)))?;
        debug!(
            layer_sizes = ?config.layer_sizes(),
            max_fan_in = k,
            "built sparse quantized network"
        );
        Ok(Self { config, mlp })
    }

    pub fn config(&self) -> &ModuleParams {
        &self.config
    }

    pub fn mlp(&self) -> &Mlp {
        &self.mlp
    }
}

/// Mask keeping the `k` largest-magnitude weights of every row.
fn top_k_mask(weight: &Array2<f32>, k: usize) -> Array2<f32> {
    let mut mask = Array2::<f32>::zeros(weight.dim());
    for (row, mut mask_row) in weight.rows().into_iter().zip(mask.rows_mut()) {
        let mut order: Vec<usize> = (0..row.len()).collect();
        order.sort_by(|&a, &b| row[b].abs().total_cmp(&row[a].abs()).then(a.cmp(&b)));
        for &i in order.iter().take(k) {
            mask_row[i] = 1.0;
        }
    }
    mask
}

impl Module for SparseQuantNet {
    type Config = ModuleParams;

    fn validate(config: &ModuleParams) -> Result<()> {
        let mut violations = Vec::new();
        if config.n_layers == 0 {
            violations.push("number of layers must be > 0".to_string());
        }
        for (concept, bits) in [
            ("weight quantization bitwidth", config.n_w_bits),
            ("activation quantization bitwidth", config.n_a_bits),
        ] {
            if bits == 0 {
                violations.push(format!("{concept} must be > 0"));
            } else if bits > MAX_QUANTIZATION_BITS {
                violations.push(format!(
                    "{concept} must be <= {MAX_QUANTIZATION_BITS}, got {bits}"
                ));
            }
        }
        if config.n_accum_bits == 0 {
            violations.push("accumulator bitwidth must be > 0".to_string());
        } else if config.n_accum_bits > MAX_ACCUMULATOR_BITS {
            violations.push(format!(
                "accumulator bitwidth must be <= {MAX_ACCUMULATOR_BITS}, got {}",
                config.n_accum_bits
            ));
        }
        if config.n_outputs == 0 {
            violations.push("number of outputs must be > 0".to_string());
        }
        if config.input_dim == 0 {
            violations.push("number of input dimensions must be > 0".to_string());
        }
        if config.n_hidden_neurons_multiplier == 0 {
            violations.push("number of hidden neurons multiplier must be > 0".to_string());
        }

        if violations.is_empty()
            && max_fan_in(config.n_w_bits, config.n_a_bits, config.n_accum_bits) == 0
        {
            violations.push(format!(
                "accumulator bitwidth {} is too small for {}-bit weights and {}-bit activations",
                config.n_accum_bits, config.n_w_bits, config.n_a_bits
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(QnnError::InvalidHyperparameter(violations.join("; ")))
        }
    }

    fn set_param(config: &mut ModuleParams, name: &str, value: &Value) -> Result<bool> {
        if name == "activation_function" {
            let text = value.as_str().ok_or_else(|| {
                QnnError::InvalidHyperparameter(format!(
                    "activation function must be a name, got {value}"
                ))
            })?;
            config.activation_function = text
                .parse()
                .map_err(QnnError::InvalidHyperparameter)?;
            return Ok(true);
        }

        let Some(concept) = concept(name) else {
            return Ok(false);
        };
        let v = non_negative(concept, value)?;
        let bits = v.min(u32::MAX as u64) as u32;
        match name {
            "n_layers" => config.n_layers = v as usize,
            "n_w_bits" => config.n_w_bits = bits,
            "n_a_bits" => config.n_a_bits = bits,
            "n_accum_bits" => config.n_accum_bits = bits,
            "n_outputs" => config.n_outputs = v as usize,
            "input_dim" => config.input_dim = v as usize,
            _ => config.n_hidden_neurons_multiplier = v as usize,
        }
        Ok(true)
    }

    fn build(config: &ModuleParams, seed: u64) -> std::result::Result<Self, BoxError> {
        Ok(Self::new(config.clone(), seed)?)
    }

    fn fit(
        &mut self,
        x: &Array2<f32>,
        y: &TrainTargets,
        params: &TrainingParams,
    ) -> std::result::Result<TrainingReport, BoxError> {
        Ok(self.mlp.train(x, y, params)?)
    }

    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        self.mlp.forward(x)
    }

    fn export(&self) -> NetworkGraph {
        self.mlp.export(self.config.n_w_bits, self.config.n_a_bits)
    }

    fn n_bits_quant(&self) -> u32 {
        self.config.n_a_bits
    }

    fn io_dims(config: &ModuleParams) -> Option<(usize, usize)> {
        Some((config.input_dim, config.n_outputs))
    }
}
