use crate::trainer::ParamOps;

/// Trait for gradient-based optimizers.
///
/// Optimizers are responsible for updating model parameters based on computed
/// gradients. Training logic ([`Trainer`](crate::trainer::Trainer)) is decoupled
/// from the update rule, so any module can be paired with any optimizer.
///
/// # Type Parameters
/// * `P`: parameter type of the model (e.g. [`NetParams`](crate::nn::NetParams))
pub trait Optimizer<P> {
    /// Performs an optimization step and returns the updated parameters.
    ///
    /// This method does not mutate its inputs.
    fn step(&self, params: &P, gradients: &P) -> P;
}

/// Stochastic Gradient Descent (SGD) optimizer.
///
/// ```text
/// θ ← θ - η · ∇L(θ)
/// ```
/// where `η` is the learning rate and `∇L(θ)` is the loss gradient.
///
/// # Example
/// ```rust
/// use fhe_qnn::optimizer::{Optimizer, Sgd};
/// use fhe_qnn::nn::{LayerParams, NetParams};
/// use ndarray::array;
///
/// let params = NetParams {
///     layers: vec![LayerParams { weight: array![[1.0f32, 2.0]], bias: array![0.5f32] }],
/// };
/// let grads = NetParams {
///     layers: vec![LayerParams { weight: array![[10.0f32, -10.0]], bias: array![1.0f32] }],
/// };
/// let updated = Sgd::new(0.1).step(&params, &grads);
/// assert_eq!(updated.layers[0].weight, array![[0.0f32, 3.0]]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    lr: f32,
}

impl Sgd {
    /// Creates a new SGD optimizer with the specified learning rate.
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }

    /// Returns the current learning rate.
    pub fn learning_rate(&self) -> f32 {
        self.lr
    }
}

impl<P: ParamOps> Optimizer<P> for Sgd {
    fn step(&self, params: &P, gradients: &P) -> P {
        params.add(&gradients.scale(-self.lr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{LayerParams, NetParams};
    use ndarray::array;

    #[test]
    fn test_sgd_step() {
        let params = NetParams {
            layers: vec![LayerParams {
                weight: array![[1.0f32, 1.0]],
                bias: array![0.0f32],
            }],
        };
        let grads = NetParams {
            layers: vec![LayerParams {
                weight: array![[2.0f32, -2.0]],
                bias: array![4.0f32],
            }],
        };
        let sgd = Sgd::new(0.5);
        assert_eq!(sgd.learning_rate(), 0.5);
        let updated = sgd.step(&params, &grads);
        assert_eq!(updated.layers[0].weight, array![[0.0f32, 2.0]]);
        assert_eq!(updated.layers[0].bias, array![-2.0f32]);
    }
}
