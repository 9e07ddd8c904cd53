use ndarray::{Array1, Array2, Axis};

use crate::dataset::TrainTargets;
use crate::trainer::TrainError;

/// A differentiable loss function used during module training.
///
/// Implementors define:
/// - How to compute the scalar loss value (for logging and divergence checks).
/// - How to compute the gradient of the loss w.r.t. the module's raw outputs.
///
/// The gradient is passed to the module's `backward()`.
pub trait Loss {
    /// Mean loss over the batch.
    fn loss(&self, prediction: &Array2<f32>, target: &TrainTargets) -> Result<f32, TrainError>;

    /// Gradient of [`Loss::loss`] w.r.t. `prediction`: ∂L/∂pred.
    fn grad_wrt_prediction(
        &self,
        prediction: &Array2<f32>,
        target: &TrainTargets,
    ) -> Result<Array2<f32>, TrainError>;
}

/// Row-wise softmax, computed with the max-subtraction trick.
pub fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Cross-entropy over logits with optional per-class weights.
///
/// With weights `w`, the batch loss is `Σ w[y_i] · nll_i / Σ w[y_i]`.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropyLoss {
    weight: Option<Array1<f32>>,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self { weight: None }
    }

    pub fn with_weight(weight: Array1<f32>) -> Self {
        Self {
            weight: Some(weight),
        }
    }

    fn classes<'a>(
        &self,
        prediction: &Array2<f32>,
        target: &'a TrainTargets,
    ) -> Result<&'a Array1<usize>, TrainError> {
        let indices = match target {
            TrainTargets::Classes { indices, .. } => indices,
            TrainTargets::Values(_) => {
                return Err(TrainError::TargetKind(
                    "cross-entropy loss requires class targets",
                ))
            }
        };
        if let Some(&bad) = indices.iter().find(|&&c| c >= prediction.ncols()) {
            return Err(TrainError::TooManyClasses {
                n_classes: bad + 1,
                n_outputs: prediction.ncols(),
            });
        }
        if let Some(w) = &self.weight {
            if w.len() != prediction.ncols() {
                return Err(TrainError::ClassWeightLength {
                    expected: prediction.ncols(),
                    got: w.len(),
                });
            }
        }
        Ok(indices)
    }

    fn sample_weights(&self, indices: &Array1<usize>) -> Array1<f32> {
        match &self.weight {
            Some(w) => indices.mapv(|c| w[c]),
            None => Array1::ones(indices.len()),
        }
    }
}

impl Loss for CrossEntropyLoss {
    fn loss(&self, prediction: &Array2<f32>, target: &TrainTargets) -> Result<f32, TrainError> {
        let indices = self.classes(prediction, target)?;
        let probs = softmax(prediction);
        let weights = self.sample_weights(indices);
        let total_weight = weights.sum();
        let nll: f32 = indices
            .iter()
            .zip(weights.iter())
            .enumerate()
            .map(|(i, (&c, &w))| -w * probs[[i, c]].max(f32::MIN_POSITIVE).ln())
            .sum();
        Ok(nll / total_weight)
    }

    fn grad_wrt_prediction(
        &self,
        prediction: &Array2<f32>,
        target: &TrainTargets,
    ) -> Result<Array2<f32>, TrainError> {
        let indices = self.classes(prediction, target)?;
        let mut grad = softmax(prediction);
        let weights = self.sample_weights(indices);
        let total_weight = weights.sum();
        for (i, mut row) in grad.axis_iter_mut(Axis(0)).enumerate() {
            row[indices[i]] -= 1.0;
            let w = weights[i] / total_weight;
            row.mapv_inplace(|v| v * w);
        }
        Ok(grad)
    }
}

/// Mean Squared Error (MSE) loss: `L = (1/n) * Σ(pred_i - target_i)^2`
///
/// Gradient w.r.t. prediction: `∂L/∂pred = (pred - target) / n`
///
/// Note: The factor of 2 is omitted, as it can be absorbed into the learning rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl MseLoss {
    fn values<'a>(
        prediction: &Array2<f32>,
        target: &'a TrainTargets,
    ) -> Result<&'a Array2<f32>, TrainError> {
        match target {
            TrainTargets::Values(v) if v.dim() == prediction.dim() => Ok(v),
            TrainTargets::Values(v) => Err(TrainError::TargetWidth {
                expected: prediction.ncols(),
                got: v.ncols(),
            }),
            TrainTargets::Classes { .. } => {
                Err(TrainError::TargetKind("mse loss requires regression targets"))
            }
        }
    }
}

impl Loss for MseLoss {
    fn loss(&self, prediction: &Array2<f32>, target: &TrainTargets) -> Result<f32, TrainError> {
        let target = Self::values(prediction, target)?;
        let diff = prediction - target;
        Ok(diff.mapv(|d| d * d).sum() / prediction.nrows() as f32)
    }

    fn grad_wrt_prediction(
        &self,
        prediction: &Array2<f32>,
        target: &TrainTargets,
    ) -> Result<Array2<f32>, TrainError> {
        let target = Self::values(prediction, target)?;
        Ok((prediction - target) / prediction.nrows() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn classes(indices: Array1<usize>) -> TrainTargets {
        TrainTargets::Classes {
            indices,
            n_classes: 2,
        }
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let p = softmax(&array![[1.0f32, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
        for row in p.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!((p[[1, 0]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let loss = CrossEntropyLoss::new();
        let l = loss
            .loss(&array![[0.0f32, 0.0], [0.0, 0.0]], &classes(array![0, 1]))
            .unwrap();
        assert!((l - std::f32::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_gradient() {
        let loss = CrossEntropyLoss::new();
        let g = loss
            .grad_wrt_prediction(&array![[0.0f32, 0.0]], &classes(array![1]))
            .unwrap();
        assert!((g[[0, 0]] - 0.5).abs() < 1e-6);
        assert!((g[[0, 1]] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_class_weights_shift_the_loss() {
        let logits = array![[2.0f32, 0.0], [2.0, 0.0]];
        let y = classes(array![0, 1]);
        let plain = CrossEntropyLoss::new().loss(&logits, &y).unwrap();
        let weighted = CrossEntropyLoss::with_weight(array![1.0, 3.0])
            .loss(&logits, &y)
            .unwrap();
        assert!(weighted > plain);
    }

    #[test]
    fn test_class_weight_length_checked() {
        let loss = CrossEntropyLoss::with_weight(array![1.0, 1.0, 1.0]);
        assert!(matches!(
            loss.loss(&array![[0.0f32, 0.0]], &classes(array![0])),
            Err(TrainError::ClassWeightLength {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn test_mse_loss_and_grad() {
        let pred = array![[1.0f32], [3.0]];
        let y = TrainTargets::Values(array![[0.0f32], [1.0]]);
        assert_eq!(MseLoss.loss(&pred, &y).unwrap(), 2.5);
        assert_eq!(
            MseLoss.grad_wrt_prediction(&pred, &y).unwrap(),
            array![[0.5f32], [1.0]]
        );
        assert!(matches!(
            MseLoss.loss(&pred, &classes(array![0, 1])),
            Err(TrainError::TargetKind(_))
        ));
    }
}
