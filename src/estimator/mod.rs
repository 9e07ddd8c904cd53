//! Quantized neural-network estimators.
//!
//! Every estimator moves through three states:
//!
//! ```text
//! Constructed --fit--> Fitted --compile--> Compiled
//!                        ^----------------------|   fit again drops the circuit
//! ```
//!
//! Operations requested out of order fail with [`QnnError::NotFitted`],
//! [`QnnError::NotCalibrated`] or [`QnnError::NotCompiled`]. Hyperparameters
//! are validated when the estimator is constructed, before any data is seen.
//!
//! [`QnnError::NotFitted`]: crate::error::QnnError::NotFitted
//! [`QnnError::NotCalibrated`]: crate::error::QnnError::NotCalibrated
//! [`QnnError::NotCompiled`]: crate::error::QnnError::NotCompiled

use std::fmt::{self, Debug, Display};

use ndarray::Array2;
use serde_json::Value;

use crate::data::Targets;
use crate::error::Result;

mod base;
mod classifier;
mod regressor;

pub use base::QuantizedEstimator;
pub use classifier::NeuralNetClassifier;
pub use regressor::NeuralNetRegressor;

/// Lifecycle state of an estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimatorState {
    #[default]
    Constructed,
    Fitted,
    Compiled,
}

impl Display for EstimatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EstimatorState::Constructed => "constructed",
            EstimatorState::Fitted => "fitted",
            EstimatorState::Compiled => "compiled",
        };
        f.write_str(name)
    }
}

/// Estimator interface used by [`Pipeline`](crate::model_selection::Pipeline)
/// and [`GridSearchCv`](crate::model_selection::GridSearchCv).
///
/// Inputs are already normalized to a float matrix; targets keep their
/// original container so each estimator can coerce them its own way.
pub trait Estimator: Clone + Debug {
    fn fit_matrix(&mut self, x: &Array2<f32>, y: &Targets) -> Result<()>;

    /// Score in clear quantized mode, higher is better.
    fn score_matrix(&self, x: &Array2<f32>, y: &Targets) -> Result<f64>;

    /// Set one hyperparameter by its flat name.
    fn set_param(&mut self, name: &str, value: &Value) -> Result<()>;
}
