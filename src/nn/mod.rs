//! Trainable networks.
//!
//! The estimators never train anything themselves: they hand the data to a
//! [`Module`] and, once it is trained, ask it to [`export`](Module::export) a
//! [`NetworkGraph`] for calibration. [`SparseQuantNet`] is the module used by
//! default; custom networks implement [`Module`] on top of [`Mlp`].

use std::fmt::Debug;

use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::TrainTargets;
use crate::error::{BoxError, QnnError, Result};
use crate::trainer::{TrainingParams, TrainingReport};

mod activation;
mod mlp;
mod sparse;

pub use activation::Activation;
pub use mlp::{LayerParams, Mlp, NetParams};
pub use sparse::{max_fan_in, ModuleParams, SparseQuantNet};

/// A trainable network the estimators can wrap.
///
/// Configuration lives in `Config` so that an estimator can validate and
/// mutate hyperparameters before any network exists. Failures of
/// [`build`](Module::build) and [`fit`](Module::fit) are reported to the
/// caller unchanged.
pub trait Module: Clone + Debug + Send + Sync + 'static {
    type Config: Clone + Debug + PartialEq + Default + Serialize + DeserializeOwned + Send + Sync;

    /// Check every constraint of `config`, reporting all violations at once.
    fn validate(config: &Self::Config) -> Result<()>;

    /// Set one hyperparameter by name. Returns `Ok(false)` for unknown names.
    fn set_param(config: &mut Self::Config, name: &str, value: &Value) -> Result<bool>;

    /// Create a freshly initialized network.
    fn build(config: &Self::Config, seed: u64) -> std::result::Result<Self, BoxError>;

    fn fit(
        &mut self,
        x: &Array2<f32>,
        y: &TrainTargets,
        params: &TrainingParams,
    ) -> std::result::Result<TrainingReport, BoxError>;

    /// Float inference, raw outputs.
    fn forward(&self, x: &Array2<f32>) -> Array2<f32>;

    /// Export the trained network for calibration.
    fn export(&self) -> NetworkGraph;

    /// Bit width used to quantize activations.
    fn n_bits_quant(&self) -> u32;

    /// Input and output widths fixed by `config`, when it fixes them.
    fn io_dims(_config: &Self::Config) -> Option<(usize, usize)> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLayer {
    /// `(n_out, n_in)`.
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
    pub activation: Option<Activation>,
}

/// Float network handed to a [`Calibrator`](crate::quantization::Calibrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkGraph {
    pub layers: Vec<GraphLayer>,
    pub n_w_bits: u32,
    pub n_a_bits: u32,
}

impl NetworkGraph {
    pub fn input_dim(&self) -> usize {
        self.layers.first().map(|l| l.weight.ncols()).unwrap_or(0)
    }

    pub fn n_outputs(&self) -> usize {
        self.layers.last().map(|l| l.weight.nrows()).unwrap_or(0)
    }

    /// Check that the layers chain and every bias matches its layer.
    pub fn check_shapes(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(QnnError::EmptyData("network has no layers".to_string()));
        }
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.bias.len() != layer.weight.nrows() {
                return Err(QnnError::InvalidShape {
                    expected: format!("bias of length {} in layer {idx}", layer.weight.nrows()),
                    got: format!("length {}", layer.bias.len()),
                });
            }
            if let Some(next) = self.layers.get(idx + 1) {
                if next.weight.ncols() != layer.weight.nrows() {
                    return Err(QnnError::InvalidShape {
                        expected: format!("{} inputs in layer {}", layer.weight.nrows(), idx + 1),
                        got: format!("{}", next.weight.ncols()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Float forward pass.
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut h = x.clone();
        for layer in &self.layers {
            let z = h.dot(&layer.weight.t()) + &layer.bias;
            h = match layer.activation {
                Some(act) => z.mapv(|v| act.apply(v)),
                None => z,
            };
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_graph_forward() {
        let graph = NetworkGraph {
            layers: vec![
                GraphLayer {
                    weight: array![[1.0f32, -1.0]],
                    bias: array![0.5f32],
                    activation: Some(Activation::Relu),
                },
                GraphLayer {
                    weight: array![[2.0f32]],
                    bias: array![0.0f32],
                    activation: None,
                },
            ],
            n_w_bits: 2,
            n_a_bits: 2,
        };
        assert!(graph.check_shapes().is_ok());
        assert_eq!(graph.forward(&array![[1.0f32, 0.0], [0.0, 3.0]]), array![[3.0f32], [0.0]]);
    }

    #[test]
    fn test_check_shapes_rejects_broken_chain() {
        let graph = NetworkGraph {
            layers: vec![
                GraphLayer {
                    weight: Array2::zeros((3, 2)),
                    bias: Array1::zeros(3),
                    activation: Some(Activation::Relu),
                },
                GraphLayer {
                    weight: Array2::zeros((1, 4)),
                    bias: Array1::zeros(1),
                    activation: None,
                },
            ],
            n_w_bits: 2,
            n_a_bits: 2,
        };
        assert!(matches!(
            graph.check_shapes(),
            Err(QnnError::InvalidShape { .. })
        ));
    }
}
