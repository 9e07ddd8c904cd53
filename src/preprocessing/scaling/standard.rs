//! Per-feature standardization, `z = (x - mean) / std`.
//!
//! `std` is the population deviation of the fitted data. A constant feature
//! gets `std = 1`, so it is only centered. Scaling inputs before a quantized
//! network keeps the input quantizer from wasting levels on one wide feature.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QnnError, Result};
use crate::preprocessing::traits::{check_input, FittedTransformer, Transformer};

/// Which of the two steps [`StandardScaler`] applies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScalerConfig {
    pub with_mean: bool,
    pub with_std: bool,
}

impl Default for StandardScalerConfig {
    fn default() -> Self {
        Self {
            with_mean: true,
            with_std: true,
        }
    }
}

/// Persisted form of [`FittedStandardScaler`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandardScalerParams {
    pub config: StandardScalerConfig,
    /// Zeros when `with_mean` is off.
    pub mean: Vec<f32>,
    /// Ones when `with_std` is off.
    pub std: Vec<f32>,
    pub n_features: usize,
}

#[derive(Clone, Debug, Default)]
pub struct StandardScaler {
    config: StandardScalerConfig,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mean(mut self, with_mean: bool) -> Self {
        self.config.with_mean = with_mean;
        self
    }

    pub fn with_std(mut self, with_std: bool) -> Self {
        self.config.with_std = with_std;
        self
    }

    pub fn config(&self) -> &StandardScalerConfig {
        &self.config
    }
}

impl Transformer for StandardScaler {
    type Params = StandardScalerParams;
    type Fitted = FittedStandardScaler;

    fn fit(&self, data: &Array2<f32>) -> Result<FittedStandardScaler> {
        check_input(data, None)?;
        let cols = data.ncols();

        let mean = if self.config.with_mean {
            data.mean_axis(Axis(0))
                .ok_or_else(|| QnnError::EmptyData("Cannot fit StandardScaler on empty data".into()))?
        } else {
            Array1::zeros(cols)
        };

        let std = if self.config.with_std {
            data.std_axis(Axis(0), 0.0)
                .mapv(|s| if s == 0.0 { 1.0 } else { s })
        } else {
            Array1::ones(cols)
        };

        Ok(FittedStandardScaler {
            config: self.config.clone(),
            mean,
            std,
        })
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        let flag = value.as_bool().ok_or_else(|| {
            QnnError::InvalidParameter(format!("{name} expects a boolean, got {value}"))
        });
        match name {
            "with_mean" => self.config.with_mean = flag?,
            "with_std" => self.config.with_std = flag?,
            _ => {
                return Err(QnnError::InvalidParameter(format!(
                    "StandardScaler has no parameter {name:?}"
                )))
            }
        }
        Ok(())
    }
}

/// Learned means and deviations.
#[derive(Clone, Debug)]
pub struct FittedStandardScaler {
    config: StandardScalerConfig,
    mean: Array1<f32>,
    std: Array1<f32>,
}

impl FittedStandardScaler {
    pub fn mean(&self) -> &Array1<f32> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f32> {
        &self.std
    }
}

impl FittedTransformer for FittedStandardScaler {
    type Params = StandardScalerParams;

    fn transform(&self, data: &Array2<f32>) -> Result<Array2<f32>> {
        check_input(data, Some(self.n_features_in()))?;
        let mut result = data.clone();
        if self.config.with_mean {
            result -= &self.mean;
        }
        if self.config.with_std {
            result /= &self.std;
        }
        Ok(result)
    }

    fn inverse_transform(&self, data: &Array2<f32>) -> Result<Array2<f32>> {
        check_input(data, Some(self.n_features_in()))?;
        let mut result = data.clone();
        if self.config.with_std {
            result *= &self.std;
        }
        if self.config.with_mean {
            result += &self.mean;
        }
        Ok(result)
    }

    fn extract_params(&self) -> StandardScalerParams {
        StandardScalerParams {
            config: self.config.clone(),
            mean: self.mean.to_vec(),
            std: self.std.to_vec(),
            n_features: self.mean.len(),
        }
    }

    fn from_params(params: StandardScalerParams) -> Result<Self> {
        if params.mean.len() != params.n_features || params.std.len() != params.n_features {
            return Err(QnnError::InvalidShape {
                expected: format!("{} means and deviations", params.n_features),
                got: format!("{} means, {} deviations", params.mean.len(), params.std.len()),
            });
        }
        Ok(Self {
            config: params.config,
            mean: Array1::from(params.mean),
            std: Array1::from(params.std),
        })
    }

    fn n_features_in(&self) -> usize {
        self.mean.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> Array2<f32> {
        array![[0.0f32, 1.0], [0.0, 1.0], [1.0, 3.0]]
    }

    #[test]
    fn test_standard_scaler_fit() {
        let fitted = StandardScaler::new().fit(&sample()).unwrap();

        // Mean: [1/3, 5/3]
        let mean = fitted.mean();
        assert!((mean[0] - 1.0 / 3.0).abs() < 1e-6);
        assert!((mean[1] - 5.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_standard_scaler_transform() {
        let data = sample();
        let fitted = StandardScaler::new().fit(&data).unwrap();
        let transformed = fitted.transform(&data).unwrap();

        let mean = transformed.mean_axis(Axis(0)).unwrap();
        let std = transformed.std_axis(Axis(0), 0.0);
        for j in 0..2 {
            assert!(mean[j].abs() < 1e-5, "mean[{j}] = {}", mean[j]);
            assert!((std[j] - 1.0).abs() < 1e-5, "std[{j}] = {}", std[j]);
        }
    }

    #[test]
    fn test_standard_scaler_inverse_transform() {
        let data = sample();
        let fitted = StandardScaler::new().fit(&data).unwrap();
        let recovered = fitted
            .inverse_transform(&fitted.transform(&data).unwrap())
            .unwrap();
        for (o, r) in data.iter().zip(recovered.iter()) {
            assert!((o - r).abs() < 1e-5);
        }
    }

    #[test]
    fn test_constant_feature_keeps_unit_std() {
        let data = array![[2.0f32, 1.0], [2.0, 3.0]];
        let fitted = StandardScaler::new().fit(&data).unwrap();
        assert_eq!(fitted.std()[0], 1.0);
        assert_eq!(fitted.transform(&data).unwrap().column(0).to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_standard_scaler_without_mean_or_std() {
        let data = sample();
        let fitted = StandardScaler::new().with_mean(false).fit(&data).unwrap();
        assert!(fitted.mean().iter().all(|&m| m == 0.0));

        let fitted = StandardScaler::new().with_std(false).fit(&data).unwrap();
        assert!(fitted.std().iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_set_param() {
        let mut scaler = StandardScaler::new();
        Transformer::set_param(&mut scaler, "with_mean", &Value::Bool(false)).unwrap();
        assert!(!scaler.config().with_mean);
        assert!(Transformer::set_param(&mut scaler, "with_std", &Value::from(3)).is_err());
        assert!(Transformer::set_param(&mut scaler, "copy", &Value::Bool(true)).is_err());
    }

    #[test]
    fn test_feature_mismatch() {
        let fitted = StandardScaler::new().fit(&sample()).unwrap();
        let err = fitted.transform(&array![[1.0f32, 2.0, 3.0]]).unwrap_err();
        assert!(matches!(
            err,
            QnnError::FeatureMismatch {
                expected_features: 2,
                got_features: 3
            }
        ));
    }

    #[test]
    fn test_standard_scaler_save_load() {
        let data = sample();
        let fitted = StandardScaler::new().fit(&data).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaler.bin");
        fitted.save_to_file(&path).unwrap();
        let loaded = FittedStandardScaler::load_from_file(&path).unwrap();
        assert_eq!(loaded.transform(&data).unwrap(), fitted.transform(&data).unwrap());
    }
}
