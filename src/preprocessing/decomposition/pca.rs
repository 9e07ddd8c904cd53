//! Principal Component Analysis.
//!
//! Components are extracted from the sample covariance matrix by power
//! iteration, deflating the matrix after each component. This keeps the
//! transformer free of a LAPACK dependency; it is accurate for the handful of
//! leading components a pipeline typically keeps.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{QnnError, Result};
use crate::preprocessing::traits::{check_input, FittedTransformer, Transformer};

const MAX_ITER: usize = 200;
const TOLERANCE: f32 = 1e-6;

/// PCA transformer (unfitted).
#[derive(Clone, Debug, PartialEq)]
pub struct Pca {
    n_components: usize,
}

impl Default for Pca {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Pca {
    pub fn new(n_components: usize) -> Self {
        Self { n_components }
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }
}

/// Serializable parameters for a fitted PCA.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PcaParams {
    pub mean: Vec<f32>,
    /// Row-major `(n_components, n_features)` component matrix.
    pub components: Vec<f32>,
    pub n_components: usize,
    pub explained_variance: Vec<f32>,
}

/// Fitted PCA ready for inference.
#[derive(Clone, Debug)]
pub struct FittedPca {
    mean: Array1<f32>,
    /// One principal axis per row.
    components: Array2<f32>,
    explained_variance: Array1<f32>,
}

impl FittedPca {
    pub fn components(&self) -> &Array2<f32> {
        &self.components
    }

    /// Variance captured by each component.
    pub fn explained_variance(&self) -> &Array1<f32> {
        &self.explained_variance
    }
}

fn normalize(v: &mut Array1<f32>) -> f32 {
    let norm = v.dot(v).sqrt();
    if norm > f32::EPSILON {
        *v /= norm;
    }
    norm
}

/// Leading eigenpairs of a symmetric positive semi-definite matrix.
fn power_iteration(matrix: &Array2<f32>, n_components: usize) -> (Array2<f32>, Array1<f32>) {
    let n = matrix.nrows();
    let mut mat = matrix.clone();
    let mut components = Array2::zeros((n_components, n));
    let mut eigenvalues = Array1::zeros(n_components);

    for k in 0..n_components {
        let mut v = Array1::from_shape_fn(n, |i| ((i * 7 + 13) % 100) as f32 / 100.0);
        normalize(&mut v);
        let mut eigenvalue = 0.0f32;

        for _ in 0..MAX_ITER {
            let mut v_new = mat.dot(&v);
            // Rayleigh quotient
            eigenvalue = v_new.dot(&v);
            if normalize(&mut v_new) <= f32::EPSILON {
                break;
            }
            let diff: f32 = (&v - &v_new).mapv(f32::abs).sum();
            v = v_new;
            if diff < TOLERANCE {
                break;
            }
        }

        // Deterministic sign: largest-magnitude coordinate is positive.
        let pivot = v
            .iter()
            .copied()
            .fold(0.0f32, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            v.mapv_inplace(|x| -x);
        }

        let eigenvalue = eigenvalue.max(0.0);
        for i in 0..n {
            for j in 0..n {
                mat[[i, j]] -= eigenvalue * v[i] * v[j];
            }
        }
        components.row_mut(k).assign(&v);
        eigenvalues[k] = eigenvalue;
    }

    (components, eigenvalues)
}

impl Transformer for Pca {
    type Params = PcaParams;
    type Fitted = FittedPca;

    fn fit(&self, data: &Array2<f32>) -> Result<FittedPca> {
        if self.n_components == 0 {
            return Err(QnnError::InvalidParameter(
                "n_components must be at least 1".to_string(),
            ));
        }
        check_input(data, None)?;
        let (n_samples, n_features) = data.dim();

        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| QnnError::EmptyData("Cannot fit PCA on empty data".into()))?;
        let centered = data - &mean;
        let scale = 1.0 / (n_samples as f32 - 1.0).max(1.0);
        let cov = centered.t().dot(&centered) * scale;

        let n_components = self.n_components.min(n_features).min(n_samples);
        if n_components < self.n_components {
            debug!(
                requested = self.n_components,
                kept = n_components,
                "PCA components limited by data shape"
            );
        }
        let (components, explained_variance) = power_iteration(&cov, n_components);

        Ok(FittedPca {
            mean,
            components,
            explained_variance,
        })
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "n_components" => {
                self.n_components = value
                    .as_u64()
                    .filter(|&n| n > 0)
                    .ok_or_else(|| {
                        QnnError::InvalidParameter(format!(
                            "n_components expects a positive integer, got {value}"
                        ))
                    })? as usize;
                Ok(())
            }
            _ => Err(QnnError::InvalidParameter(format!(
                "Pca has no parameter {name:?}"
            ))),
        }
    }
}

impl FittedTransformer for FittedPca {
    type Params = PcaParams;

    fn transform(&self, data: &Array2<f32>) -> Result<Array2<f32>> {
        check_input(data, Some(self.mean.len()))?;
        Ok((data - &self.mean).dot(&self.components.t()))
    }

    /// Maps projections back to feature space. Variance outside the kept
    /// components is lost.
    fn inverse_transform(&self, data: &Array2<f32>) -> Result<Array2<f32>> {
        check_input(data, Some(self.components.nrows()))?;
        Ok(data.dot(&self.components) + &self.mean)
    }

    fn extract_params(&self) -> PcaParams {
        PcaParams {
            mean: self.mean.to_vec(),
            components: self.components.iter().copied().collect(),
            n_components: self.components.nrows(),
            explained_variance: self.explained_variance.to_vec(),
        }
    }

    fn from_params(params: PcaParams) -> Result<Self> {
        let n_features = params.mean.len();
        let components =
            Array2::from_shape_vec((params.n_components, n_features), params.components).map_err(
                |e| QnnError::InvalidShape {
                    expected: format!("{} x {}", params.n_components, n_features),
                    got: e.to_string(),
                },
            )?;
        Ok(Self {
            mean: Array1::from(params.mean),
            components,
            explained_variance: Array1::from(params.explained_variance),
        })
    }

    fn n_features_in(&self) -> usize {
        self.mean.len()
    }

    fn n_features_out(&self) -> usize {
        self.components.nrows()
    }
}
