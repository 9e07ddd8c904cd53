//! Fit/transform split of preprocessing steps.
//!
//! A [`Transformer`] holds hyperparameters only; fitting it yields a separate
//! [`FittedTransformer`] that owns the learned state. Both work on the
//! canonical `Array2<f32>` feature matrix.

use std::path::Path;

use ndarray::Array2;
use serde_json::Value;

use crate::error::{QnnError, Result};
use crate::serialization::SerializableParams;

/// Unfitted preprocessing step.
///
/// # Example
/// ```
/// use fhe_qnn::preprocessing::{FittedTransformer, StandardScaler, Transformer};
/// use ndarray::array;
///
/// let data = array![[1.0f32, 10.0], [3.0, 30.0]];
/// let fitted = StandardScaler::new().fit(&data).unwrap();
/// let scaled = fitted.transform(&data).unwrap();
/// assert_eq!(scaled, array![[-1.0f32, -1.0], [1.0, 1.0]]);
/// ```
pub trait Transformer: Clone {
    type Params: SerializableParams;
    type Fitted: FittedTransformer<Params = Self::Params>;

    /// Learn the step's state from `data`.
    ///
    /// Empty or non-finite input is rejected.
    fn fit(&self, data: &Array2<f32>) -> Result<Self::Fitted>;

    fn fit_transform(&self, data: &Array2<f32>) -> Result<Array2<f32>> {
        self.fit(data)?.transform(data)
    }

    /// Set a hyperparameter by name, as routed by a pipeline (`"step__name"`).
    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        Err(QnnError::InvalidParameter(format!(
            "unknown parameter {name:?} (value {value})"
        )))
    }
}

/// Learned preprocessing step.
///
/// `from_params(extract_params())` rebuilds an identical transformer, which is
/// what the file persistence relies on.
pub trait FittedTransformer: Clone {
    type Params: SerializableParams;

    fn transform(&self, data: &Array2<f32>) -> Result<Array2<f32>>;

    /// Reverse the transformation, exactly or approximately.
    fn inverse_transform(&self, data: &Array2<f32>) -> Result<Array2<f32>>;

    fn extract_params(&self) -> Self::Params;

    fn from_params(params: Self::Params) -> Result<Self>
    where
        Self: Sized;

    /// Write the learned parameters with bincode.
    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self
            .extract_params()
            .to_bytes()
            .map_err(|e| QnnError::SerializationError(e.to_string()))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self>
    where
        Self: Sized,
    {
        let bytes = std::fs::read(path)?;
        let params = Self::Params::from_bytes(&bytes)
            .map_err(|e| QnnError::SerializationError(e.to_string()))?;
        Self::from_params(params)
    }

    /// Width of the data seen by `fit`.
    fn n_features_in(&self) -> usize;

    fn n_features_out(&self) -> usize {
        self.n_features_in()
    }
}

/// Shared input validation of transformers.
pub(crate) fn check_input(data: &Array2<f32>, expected_features: Option<usize>) -> Result<()> {
    if data.nrows() == 0 {
        return Err(QnnError::EmptyData("input has no samples".to_string()));
    }
    if let Some(expected) = expected_features {
        if data.ncols() != expected {
            return Err(QnnError::FeatureMismatch {
                expected_features: expected,
                got_features: data.ncols(),
            });
        }
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(QnnError::NumericalError(
            "input contains NaN or infinite values".to_string(),
        ));
    }
    Ok(())
}
