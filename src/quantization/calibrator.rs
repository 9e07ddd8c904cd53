use std::fmt::Debug;

use ndarray::Array2;
use tracing::debug;

use crate::error::{QnnError, Result};
use crate::nn::NetworkGraph;
use crate::quantization::{quantize_weights, QuantizedLayer, QuantizedModule, UniformQuantizer};

/// Turns an exported float network into a calibrated integer program.
pub trait Calibrator: Debug + Send + Sync {
    /// Calibrate `graph` on representative inputs `x`.
    ///
    /// Must be deterministic: the same graph and data give the same program.
    fn calibrate(&self, graph: &NetworkGraph, x: &Array2<f32>) -> Result<QuantizedModule>;
}

/// Post-training calibration from observed value ranges.
///
/// The input quantizer is fitted on `x`. Each hidden layer's output quantizer
/// is fitted on the activations obtained by running `x` through the already
/// quantized prefix of the network, so rounding errors of earlier layers are
/// accounted for.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostTrainingCalibrator;

impl PostTrainingCalibrator {
    pub fn new() -> Self {
        Self
    }
}

impl Calibrator for PostTrainingCalibrator {
    fn calibrate(&self, graph: &NetworkGraph, x: &Array2<f32>) -> Result<QuantizedModule> {
        graph.check_shapes()?;
        if x.nrows() == 0 {
            return Err(QnnError::EmptyData("calibration data is empty".to_string()));
        }
        if x.ncols() != graph.input_dim() {
            return Err(QnnError::FeatureMismatch {
                expected_features: graph.input_dim(),
                got_features: x.ncols(),
            });
        }

        let mut input_q = UniformQuantizer::fit_array(x, graph.n_a_bits);
        let mut h = input_q.quantize_array(x);
        let mut layers = Vec::with_capacity(graph.layers.len());
        let last = graph.layers.len() - 1;

        for (idx, layer) in graph.layers.iter().enumerate() {
            let (weight_q, weight_scale) = quantize_weights(&layer.weight, graph.n_w_bits);
            let mut q_layer = QuantizedLayer::new(
                weight_q,
                weight_scale,
                layer.bias.clone(),
                input_q,
                layer.activation,
                None,
            );

            if idx < last {
                let acc = q_layer.accumulate(&h);
                let mut activations = Array2::<f32>::zeros(acc.dim());
                for ((i, j), v) in activations.indexed_iter_mut() {
                    let z = q_layer.dequantize_accumulator(j, acc[[i, j]]);
                    *v = match layer.activation {
                        Some(act) => act.apply(z),
                        None => z,
                    };
                }
                let output_q = UniformQuantizer::fit_array(&activations, graph.n_a_bits);
                debug!(
                    layer = idx,
                    scale = output_q.scale,
                    zero_point = output_q.zero_point,
                    "calibrated activation quantizer"
                );
                q_layer.output_quantizer = Some(output_q);
                h = output_q.quantize_array(&activations);
                input_q = output_q;
            }
            layers.push(q_layer);
        }

        let module = QuantizedModule {
            layers,
            n_w_bits: graph.n_w_bits,
            n_a_bits: graph.n_a_bits,
        };
        debug!(
            n_layers = module.layers.len(),
            max_accumulator_bits = module.max_accumulator_bits(),
            "calibration finished"
        );
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, GraphLayer};
    use ndarray::array;

    fn graph() -> NetworkGraph {
        NetworkGraph {
            layers: vec![
                GraphLayer {
                    weight: array![[1.0f32, 0.0], [0.0, 1.0], [0.5, -0.5]],
                    bias: array![0.0f32, 0.0, 0.0],
                    activation: Some(Activation::Relu),
                },
                GraphLayer {
                    weight: array![[1.0f32, 1.0, 0.0], [0.0, 0.0, 1.0]],
                    bias: array![0.0f32, 0.1],
                    activation: None,
                },
            ],
            n_w_bits: 4,
            n_a_bits: 4,
        }
    }

    #[test]
    fn test_calibrated_module_tracks_float_network() {
        let g = graph();
        let x = array![[0.0f32, 0.0], [1.0, 0.5], [0.2, 0.9], [1.0, 1.0]];
        let module = PostTrainingCalibrator::new().calibrate(&g, &x).unwrap();
        assert_eq!(module.layers.len(), 2);
        assert!(module.layers[0].output_quantizer.is_some());
        assert!(module.layers[1].output_quantizer.is_none());

        let quantized = module.forward(&x).unwrap();
        let float = g.forward(&x);
        for (q, f) in quantized.iter().zip(float.iter()) {
            assert!((q - f).abs() < 0.25, "quantized {q} vs float {f}");
        }
    }

    #[test]
    fn test_calibration_is_deterministic() {
        let g = graph();
        let x = array![[0.3f32, 0.1], [0.9, 0.4]];
        let a = PostTrainingCalibrator.calibrate(&g, &x).unwrap();
        let b = PostTrainingCalibrator.calibrate(&g, &x).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_wrong_width() {
        let g = graph();
        assert!(matches!(
            PostTrainingCalibrator.calibrate(&g, &array![[1.0f32, 2.0, 3.0]]),
            Err(QnnError::FeatureMismatch { .. })
        ));
    }
}
