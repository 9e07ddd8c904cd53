use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{QnnError, Result};
use crate::nn::Activation;
use crate::quantization::{signed_bits, UniformQuantizer};
use crate::serialization::{read_params, write_params};

/// One dense layer of the integer program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedLayer {
    /// Integer weights, `(n_out, n_in)`.
    pub weight: Array2<i64>,
    pub weight_scale: f32,
    pub bias: Array1<f32>,
    /// Quantizer of the values entering this layer.
    pub input_quantizer: UniformQuantizer,
    pub activation: Option<Activation>,
    /// Re-quantization applied by the lookup table. `None` on the output layer.
    pub output_quantizer: Option<UniformQuantizer>,
    weight_row_sums: Array1<i64>,
}

impl QuantizedLayer {
    pub fn new(
        weight: Array2<i64>,
        weight_scale: f32,
        bias: Array1<f32>,
        input_quantizer: UniformQuantizer,
        activation: Option<Activation>,
        output_quantizer: Option<UniformQuantizer>,
    ) -> Self {
        let weight_row_sums = weight.sum_axis(Axis(1));
        Self {
            weight,
            weight_scale,
            bias,
            input_quantizer,
            activation,
            output_quantizer,
            weight_row_sums,
        }
    }

    pub fn n_inputs(&self) -> usize {
        self.weight.ncols()
    }

    pub fn n_outputs(&self) -> usize {
        self.weight.nrows()
    }

    /// Integer dot products of every sample with every neuron.
    pub fn accumulate(&self, inputs: &Array2<i64>) -> Array2<i64> {
        inputs.dot(&self.weight.t())
    }

    /// Real-valued pre-activation encoded by accumulator `acc` of neuron `neuron`.
    ///
    /// The input zero point is removed here, so the accumulator itself only
    /// ever sums non-negative inputs.
    pub fn dequantize_accumulator(&self, neuron: usize, acc: i64) -> f32 {
        let centered = acc - self.input_quantizer.zero_point * self.weight_row_sums[neuron];
        self.weight_scale * self.input_quantizer.scale * centered as f32 + self.bias[neuron]
    }

    /// Table lookup of neuron `neuron`: accumulator to re-quantized activation.
    ///
    /// Only meaningful on layers with an output quantizer.
    pub fn lookup(&self, neuron: usize, acc: i64) -> i64 {
        let z = self.dequantize_accumulator(neuron, acc);
        let a = match self.activation {
            Some(act) => act.apply(z),
            None => z,
        };
        match &self.output_quantizer {
            Some(q) => q.quantize(a),
            None => acc,
        }
    }

    /// Worst-case accumulator magnitude over all valid inputs.
    pub fn accumulator_bound(&self) -> u64 {
        let in_max = self.input_quantizer.qmax().unsigned_abs();
        self.weight
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|w| w.unsigned_abs()).sum::<u64>() * in_max)
            .max()
            .unwrap_or(0)
    }
}

/// Calibrated integer program of a whole network.
///
/// Produced by a [`Calibrator`](crate::quantization::Calibrator); compiled by
/// an [`FheCompiler`](crate::fhe::FheCompiler); also runnable in the clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedModule {
    pub layers: Vec<QuantizedLayer>,
    pub n_w_bits: u32,
    pub n_a_bits: u32,
}

impl QuantizedModule {
    pub fn input_dim(&self) -> usize {
        self.layers.first().map(QuantizedLayer::n_inputs).unwrap_or(0)
    }

    pub fn n_outputs(&self) -> usize {
        self.layers.last().map(QuantizedLayer::n_outputs).unwrap_or(0)
    }

    pub fn input_quantizer(&self) -> Option<&UniformQuantizer> {
        self.layers.first().map(|l| &l.input_quantizer)
    }

    /// Check that the layers chain and every per-neuron vector matches its layer.
    pub fn check_shapes(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(QnnError::EmptyData("quantized module has no layers".to_string()));
        }
        for (idx, layer) in self.layers.iter().enumerate() {
            let n_out = layer.weight.nrows();
            if layer.bias.len() != n_out {
                return Err(QnnError::InvalidShape {
                    expected: format!("bias of length {n_out} in layer {idx}"),
                    got: format!("length {}", layer.bias.len()),
                });
            }
            if layer.weight_row_sums.len() != n_out {
                return Err(QnnError::InvalidShape {
                    expected: format!("{n_out} weight row sums in layer {idx}"),
                    got: format!("{}", layer.weight_row_sums.len()),
                });
            }
            if let Some(next) = self.layers.get(idx + 1) {
                if layer.output_quantizer.is_none() {
                    return Err(QnnError::InvalidShape {
                        expected: format!("an output quantizer on hidden layer {idx}"),
                        got: "none".to_string(),
                    });
                }
                if next.weight.ncols() != n_out {
                    return Err(QnnError::InvalidShape {
                        expected: format!("{n_out} inputs in layer {}", idx + 1),
                        got: format!("{}", next.weight.ncols()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Quantize clear features into the program's input integers.
    pub fn quantize_input(&self, x: &Array2<f32>) -> Result<Array2<i64>> {
        let quantizer = self
            .input_quantizer()
            .ok_or_else(|| QnnError::EmptyData("quantized module has no layers".to_string()))?;
        if x.ncols() != self.input_dim() {
            return Err(QnnError::FeatureMismatch {
                expected_features: self.input_dim(),
                got_features: x.ncols(),
            });
        }
        Ok(quantizer.quantize_array(x))
    }

    /// Run the integer program with hooks on every accumulator matrix and every lookup.
    ///
    /// `on_accumulator(layer, acc)` may rewrite accumulators in place before the
    /// lookups read them; `on_lookup(layer, value)` may rewrite each lookup
    /// result. Returns the accumulators of the output layer.
    pub fn run_with<A, L>(
        &self,
        q_x: &Array2<i64>,
        mut on_accumulator: A,
        mut on_lookup: L,
    ) -> Array2<i64>
    where
        A: FnMut(usize, &mut Array2<i64>),
        L: FnMut(usize, i64) -> i64,
    {
        let mut h = q_x.clone();
        for (idx, layer) in self.layers.iter().enumerate() {
            let mut acc = layer.accumulate(&h);
            on_accumulator(idx, &mut acc);
            if layer.output_quantizer.is_none() {
                return acc;
            }
            for mut row in acc.axis_iter_mut(Axis(0)) {
                for (j, v) in row.iter_mut().enumerate() {
                    *v = on_lookup(idx, layer.lookup(j, *v));
                }
            }
            h = acc;
        }
        h
    }

    /// Run the integer program in the clear. Returns output-layer accumulators.
    pub fn forward_integer(&self, q_x: &Array2<i64>) -> Array2<i64> {
        self.run_with(q_x, |_, _| {}, |_, v| v)
    }

    /// Map output-layer accumulators back to real values.
    pub fn dequantize_output(&self, acc: &Array2<i64>) -> Array2<f32> {
        let Some(layer) = self.layers.last() else {
            return Array2::zeros((acc.nrows(), 0));
        };
        let mut out = Array2::<f32>::zeros(acc.dim());
        for ((i, j), v) in out.indexed_iter_mut() {
            let z = layer.dequantize_accumulator(j, acc[[i, j]]);
            *v = match layer.activation {
                Some(act) if layer.output_quantizer.is_none() => act.apply(z),
                _ => z,
            };
        }
        out
    }

    /// Clear quantized inference.
    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        let q_x = self.quantize_input(x)?;
        Ok(self.dequantize_output(&self.forward_integer(&q_x)))
    }

    /// Observed `(min, max)` accumulator of every layer on `q_x`.
    pub fn accumulator_ranges(&self, q_x: &Array2<i64>) -> Vec<(i64, i64)> {
        let mut ranges = vec![(i64::MAX, i64::MIN); self.layers.len()];
        self.run_with(
            q_x,
            |idx, acc| {
                let (lo, hi) = &mut ranges[idx];
                for &v in acc.iter() {
                    *lo = (*lo).min(v);
                    *hi = (*hi).max(v);
                }
            },
            |_, v| v,
        );
        ranges
    }

    /// Worst-case accumulator width over all layers and all valid inputs.
    pub fn max_accumulator_bits(&self) -> u32 {
        self.layers
            .iter()
            .map(|l| signed_bits(l.accumulator_bound()))
            .max()
            .unwrap_or(0)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_params(self, path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let module: Self = read_params(path)?;
        module.check_shapes()?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// 2 -> 2 (ReLU) -> 1 with unit scales.
    fn tiny_module() -> QuantizedModule {
        let input_q = UniformQuantizer {
            n_bits: 2,
            scale: 1.0,
            zero_point: 0,
        };
        let hidden_q = UniformQuantizer {
            n_bits: 2,
            scale: 1.0,
            zero_point: 0,
        };
        QuantizedModule {
            layers: vec![
                QuantizedLayer::new(
                    array![[1, 1], [1, -1]],
                    1.0,
                    array![0.0, 0.0],
                    input_q,
                    Some(Activation::Relu),
                    Some(hidden_q),
                ),
                QuantizedLayer::new(
                    array![[1, 1]],
                    1.0,
                    array![0.5],
                    hidden_q,
                    None,
                    None,
                ),
            ],
            n_w_bits: 2,
            n_a_bits: 2,
        }
    }

    #[test]
    fn test_forward_integer() {
        let m = tiny_module();
        // x = (1, 2): hidden acc = (3, -1) -> relu -> (3, 0) -> output acc = 3
        let out = m.forward_integer(&array![[1, 2]]);
        assert_eq!(out, array![[3]]);
        let y = m.dequantize_output(&out);
        assert!((y[[0, 0]] - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_forward_clear() {
        let m = tiny_module();
        let y = m.forward(&array![[2.0f32, 0.0]]).unwrap();
        // hidden acc = (2, 2) -> output acc = 4 -> 4.5
        assert!((y[[0, 0]] - 4.5).abs() < 1e-6);
    }

    #[test]
    fn test_feature_mismatch() {
        let m = tiny_module();
        assert!(matches!(
            m.forward(&array![[1.0f32, 2.0, 3.0]]),
            Err(QnnError::FeatureMismatch {
                expected_features: 2,
                got_features: 3
            })
        ));
    }

    #[test]
    fn test_accumulator_bits_and_ranges() {
        let m = tiny_module();
        // hidden bound = 2 * 3, output bound = 2 * 3
        assert_eq!(m.max_accumulator_bits(), signed_bits(6));
        let ranges = m.accumulator_ranges(&array![[0, 3], [3, 0]]);
        assert_eq!(ranges[0], (-3, 3));
        assert_eq!(ranges[1], (3, 6));
    }

    #[test]
    fn test_save_load() {
        let m = tiny_module();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("program.bin");
        m.save_to_file(&path).unwrap();
        let loaded = QuantizedModule::load_from_file(&path).unwrap();
        assert_eq!(loaded, m);
    }

    fn unit_quantizer() -> UniformQuantizer {
        UniformQuantizer {
            n_bits: 2,
            scale: 1.0,
            zero_point: 0,
        }
    }

    /// Layers of shape (3, 2) then (1, 4): the second expects 4 inputs.
    fn unchained_module() -> QuantizedModule {
        let q = unit_quantizer();
        QuantizedModule {
            layers: vec![
                QuantizedLayer::new(
                    Array2::zeros((3, 2)),
                    1.0,
                    Array1::zeros(3),
                    q,
                    Some(Activation::Relu),
                    Some(q),
                ),
                QuantizedLayer::new(Array2::zeros((1, 4)), 1.0, Array1::zeros(1), q, None, None),
            ],
            n_w_bits: 2,
            n_a_bits: 2,
        }
    }

    #[test]
    fn test_check_shapes_accepts_calibrated_layout() {
        assert!(tiny_module().check_shapes().is_ok());
    }

    #[test]
    fn test_check_shapes_rejects_broken_chain() {
        let err = unchained_module().check_shapes().unwrap_err();
        assert!(matches!(err, QnnError::InvalidShape { .. }), "{err}");
    }

    #[test]
    fn test_check_shapes_rejects_bias_and_row_sum_lengths() {
        let mut m = tiny_module();
        m.layers[0].bias = array![0.0];
        assert!(matches!(m.check_shapes(), Err(QnnError::InvalidShape { .. })));

        let mut m = tiny_module();
        m.layers[1].weight_row_sums = array![1, 2, 3];
        assert!(matches!(m.check_shapes(), Err(QnnError::InvalidShape { .. })));

        let mut m = tiny_module();
        m.layers[0].output_quantizer = None;
        assert!(matches!(m.check_shapes(), Err(QnnError::InvalidShape { .. })));

        let empty = QuantizedModule {
            layers: Vec::new(),
            n_w_bits: 2,
            n_a_bits: 2,
        };
        assert!(matches!(empty.check_shapes(), Err(QnnError::EmptyData(_))));
    }

    #[test]
    fn test_load_rejects_inconsistent_program() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.bin");
        unchained_module().save_to_file(&path).unwrap();
        assert!(matches!(
            QuantizedModule::load_from_file(&path),
            Err(QnnError::InvalidShape { .. })
        ));
    }
}
