//! Post-training quantization.
//!
//! A trained float network is turned into an integer program that an FHE
//! compiler can lower: every activation is an unsigned `n_a_bits` integer,
//! every weight a signed `n_w_bits` integer, and each layer reduces to an
//! integer dot product (the accumulator) followed by a per-neuron table
//! lookup that re-quantizes the activation for the next layer.
//!
//! Scales and zero points are floats that only live in the clear: they are
//! folded into the lookup tables and into the final dequantization.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

mod calibrator;
mod module;

pub use calibrator::{Calibrator, PostTrainingCalibrator};
pub use module::{QuantizedLayer, QuantizedModule};

/// Unsigned asymmetric quantizer: `q = clamp(round(v / scale) + zero_point, 0, 2^n_bits - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformQuantizer {
    pub n_bits: u32,
    pub scale: f32,
    pub zero_point: i64,
}

impl UniformQuantizer {
    /// Fit the quantizer so that `[min, max]` spans the full integer range.
    ///
    /// A degenerate range gets a unit scale with `min` mapped to zero.
    pub fn fit(min: f32, max: f32, n_bits: u32) -> Self {
        let qmax = unsigned_qmax(n_bits);
        if max > min && (max - min).is_finite() {
            let scale = (max - min) / qmax as f32;
            Self {
                n_bits,
                scale,
                zero_point: (-min / scale).round() as i64,
            }
        } else {
            Self {
                n_bits,
                scale: 1.0,
                zero_point: -(min.round() as i64),
            }
        }
    }

    /// Fit on the global range of `values`.
    pub fn fit_array(values: &Array2<f32>, n_bits: u32) -> Self {
        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if min > max {
            return Self::fit(0.0, 0.0, n_bits);
        }
        Self::fit(min, max, n_bits)
    }

    pub fn qmax(&self) -> i64 {
        unsigned_qmax(self.n_bits)
    }

    pub fn quantize(&self, v: f32) -> i64 {
        ((v / self.scale).round() as i64)
            .saturating_add(self.zero_point)
            .clamp(0, self.qmax())
    }

    pub fn dequantize(&self, q: i64) -> f32 {
        (q - self.zero_point) as f32 * self.scale
    }

    pub fn quantize_array(&self, values: &Array2<f32>) -> Array2<i64> {
        values.mapv(|v| self.quantize(v))
    }

    pub fn dequantize_array(&self, values: &Array2<i64>) -> Array2<f32> {
        values.mapv(|q| self.dequantize(q))
    }
}

/// Largest unsigned value on `n_bits`.
pub fn unsigned_qmax(n_bits: u32) -> i64 {
    (1i64 << n_bits.min(62)) - 1
}

/// Largest magnitude of a symmetric narrow-range weight on `n_bits`.
///
/// One-bit weights are signs, so the magnitude is 1.
pub fn weight_qmax(n_bits: u32) -> i64 {
    if n_bits <= 1 {
        1
    } else {
        (1i64 << (n_bits - 1).min(62)) - 1
    }
}

/// Signed integer width able to hold every value in `[-bound, bound]`.
pub fn signed_bits(bound: u64) -> u32 {
    (u64::BITS - bound.leading_zeros()) + 1
}

/// Quantize a weight matrix symmetrically with one scale for the whole layer.
///
/// Returns the integer weights and their scale. Zero weights stay zero, so a
/// pruning mask survives quantization.
pub fn quantize_weights(weight: &Array2<f32>, n_bits: u32) -> (Array2<i64>, f32) {
    if n_bits <= 1 {
        let (sum, count) = weight
            .iter()
            .filter(|w| **w != 0.0)
            .fold((0.0f32, 0usize), |(s, c), w| (s + w.abs(), c + 1));
        let scale = if count > 0 && sum > 0.0 {
            sum / count as f32
        } else {
            1.0
        };
        let q = weight.mapv(|w| {
            if w > 0.0 {
                1
            } else if w < 0.0 {
                -1
            } else {
                0
            }
        });
        return (q, scale);
    }

    let qmax = weight_qmax(n_bits);
    let max_abs = weight.iter().fold(0.0f32, |m, w| m.max(w.abs()));
    let scale = if max_abs > 0.0 && max_abs.is_finite() {
        max_abs / qmax as f32
    } else {
        1.0
    };
    let q = weight.mapv(|w| ((w / scale).round() as i64).clamp(-qmax, qmax));
    (q, scale)
}

/// Quantize then dequantize weights, as seen by the forward pass during training.
pub fn fake_quantize_weights(weight: &Array2<f32>, n_bits: u32) -> Array2<f32> {
    let (q, scale) = quantize_weights(weight, n_bits);
    q.mapv(|v| v as f32 * scale)
}
