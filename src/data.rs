//! Input normalization.
//!
//! Estimators accept features and targets in several element types. Instead of
//! branching on dtype in every entry point, inputs are wrapped in one of two
//! closed enums, [`Features`] and [`Targets`], and converted to the canonical
//! representation exactly once:
//!
//! * features become an `Array2<f32>` (one row per sample),
//! * classification targets become an `Array1<i64>`,
//! * regression targets become an `Array2<f32>` (one row per sample).
//!
//! Anything else (unsupported rank, ragged rows, empty input, NaN or infinite
//! values, non-integral class labels) is rejected with a descriptive error.

use ndarray::{Array, Array1, Array2, ArrayD, Axis, Dimension, Ix2};
use tracing::debug;

use crate::error::{QnnError, Result};

/// Feature container accepted by `fit`, `compile` and `predict`.
#[derive(Debug, Clone, PartialEq)]
pub enum Features {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    /// Row-major list of samples.
    Rows(Vec<Vec<f64>>),
}

/// Target container accepted by `fit` and `score`.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
}

macro_rules! impl_from_array {
    ($enum:ident, $variant:ident, $t:ty) => {
        impl<D: Dimension> From<Array<$t, D>> for $enum {
            fn from(a: Array<$t, D>) -> Self {
                $enum::$variant(a.into_dyn())
            }
        }

        impl<D: Dimension> From<&Array<$t, D>> for $enum {
            fn from(a: &Array<$t, D>) -> Self {
                $enum::$variant(a.clone().into_dyn())
            }
        }

        impl From<Vec<$t>> for $enum {
            fn from(v: Vec<$t>) -> Self {
                $enum::$variant(Array1::from(v).into_dyn())
            }
        }
    };
}

impl_from_array!(Features, F32, f32);
impl_from_array!(Features, F64, f64);
impl_from_array!(Features, I32, i32);
impl_from_array!(Features, I64, i64);
impl_from_array!(Targets, F32, f32);
impl_from_array!(Targets, F64, f64);
impl_from_array!(Targets, I32, i32);
impl_from_array!(Targets, I64, i64);

impl From<Vec<Vec<f64>>> for Features {
    fn from(rows: Vec<Vec<f64>>) -> Self {
        Features::Rows(rows)
    }
}

fn matrix_from_dyn(a: ArrayD<f32>, dtype: &str) -> Result<Array2<f32>> {
    let matrix = match a.ndim() {
        1 => {
            let n = a.len();
            Array2::from_shape_vec((1, n), a.iter().copied().collect()).map_err(|e| {
                QnnError::InvalidShape {
                    expected: "(n_features,)".to_string(),
                    got: e.to_string(),
                }
            })?
        }
        2 => a
            .into_dimensionality::<Ix2>()
            .map_err(|e| QnnError::InvalidShape {
                expected: "(n_samples, n_features)".to_string(),
                got: e.to_string(),
            })?,
        other => {
            return Err(QnnError::UnsupportedInput(format!(
                "features of dtype {dtype} must be 1-D or 2-D, got {other} dimensions"
            )))
        }
    };
    check_matrix(&matrix)?;
    Ok(matrix)
}

fn check_matrix(m: &Array2<f32>) -> Result<()> {
    if m.nrows() == 0 || m.ncols() == 0 {
        return Err(QnnError::EmptyData(format!(
            "features have shape ({}, {})",
            m.nrows(),
            m.ncols()
        )));
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(QnnError::UnsupportedInput(
            "features contain NaN or infinite values".to_string(),
        ));
    }
    Ok(())
}

impl Features {
    /// Name of the element type, used in log lines and error messages.
    pub fn dtype(&self) -> &'static str {
        match self {
            Features::F32(_) => "float32",
            Features::F64(_) => "float64",
            Features::I32(_) => "int32",
            Features::I64(_) => "int64",
            Features::Rows(_) => "rows",
        }
    }

    /// Convert to the canonical `(n_samples, n_features)` float matrix.
    ///
    /// A 1-D input is treated as a single sample.
    pub fn to_float_matrix(&self) -> Result<Array2<f32>> {
        let matrix = match self {
            Features::F32(a) => matrix_from_dyn(a.clone(), self.dtype())?,
            Features::F64(a) => matrix_from_dyn(a.mapv(|v| v as f32), self.dtype())?,
            Features::I32(a) => matrix_from_dyn(a.mapv(|v| v as f32), self.dtype())?,
            Features::I64(a) => matrix_from_dyn(a.mapv(|v| v as f32), self.dtype())?,
            Features::Rows(rows) => {
                let n_cols = rows.first().map(Vec::len).unwrap_or(0);
                if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_cols) {
                    return Err(QnnError::InvalidShape {
                        expected: format!("{n_cols} values in every row"),
                        got: format!("{} values in row {i}", row.len()),
                    });
                }
                let flat: Vec<f32> = rows.iter().flatten().map(|&v| v as f32).collect();
                let m = Array2::from_shape_vec((rows.len(), n_cols), flat).map_err(|e| {
                    QnnError::InvalidShape {
                        expected: "rectangular rows".to_string(),
                        got: e.to_string(),
                    }
                })?;
                check_matrix(&m)?;
                m
            }
        };
        if !matches!(self, Features::F32(_)) {
            debug!(
                dtype = self.dtype(),
                shape = ?matrix.dim(),
                "coerced features to float32"
            );
        }
        Ok(matrix)
    }
}

impl Targets {
    pub fn dtype(&self) -> &'static str {
        match self {
            Targets::F32(_) => "float32",
            Targets::F64(_) => "float64",
            Targets::I32(_) => "int32",
            Targets::I64(_) => "int64",
        }
    }

    /// Number of samples (length of the first axis).
    pub fn len(&self) -> usize {
        let shape = match self {
            Targets::F32(a) => a.shape(),
            Targets::F64(a) => a.shape(),
            Targets::I32(a) => a.shape(),
            Targets::I64(a) => a.shape(),
        };
        shape.first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ndim(&self) -> usize {
        match self {
            Targets::F32(a) => a.ndim(),
            Targets::F64(a) => a.ndim(),
            Targets::I32(a) => a.ndim(),
            Targets::I64(a) => a.ndim(),
        }
    }

    /// Keep only the given samples, in the given order.
    ///
    /// `self` must have at least one axis.
    pub fn select_rows(&self, indices: &[usize]) -> Targets {
        match self {
            Targets::F32(a) => Targets::F32(a.select(Axis(0), indices)),
            Targets::F64(a) => Targets::F64(a.select(Axis(0), indices)),
            Targets::I32(a) => Targets::I32(a.select(Axis(0), indices)),
            Targets::I64(a) => Targets::I64(a.select(Axis(0), indices)),
        }
    }

    fn as_f64_dyn(&self) -> ArrayD<f64> {
        match self {
            Targets::F32(a) => a.mapv(f64::from),
            Targets::F64(a) => a.clone(),
            Targets::I32(a) => a.mapv(f64::from),
            Targets::I64(a) => a.mapv(|v| v as f64),
        }
    }

    /// Convert to integer class labels.
    ///
    /// Accepts a 1-D array or a single-column 2-D array. Floating labels must
    /// hold integral values.
    pub fn to_class_labels(&self) -> Result<Array1<i64>> {
        let flat_len = |shape: &[usize]| -> Result<usize> {
            match shape {
                [n] => Ok(*n),
                [n, 1] => Ok(*n),
                _ => Err(QnnError::InvalidShape {
                    expected: "(n_samples,) or (n_samples, 1)".to_string(),
                    got: format!("{shape:?}"),
                }),
            }
        };
        let labels = match self {
            Targets::I64(a) => {
                flat_len(a.shape())?;
                Array1::from_iter(a.iter().copied())
            }
            Targets::I32(a) => {
                flat_len(a.shape())?;
                Array1::from_iter(a.iter().map(|&v| i64::from(v)))
            }
            Targets::F32(_) | Targets::F64(_) => {
                let a = self.as_f64_dyn();
                flat_len(a.shape())?;
                let mut out = Vec::with_capacity(a.len());
                for &v in a.iter() {
                    if !v.is_finite() || v.fract() != 0.0 {
                        return Err(QnnError::UnsupportedInput(format!(
                            "class labels must be integral, got {v}"
                        )));
                    }
                    out.push(v as i64);
                }
                Array1::from(out)
            }
        };
        if labels.is_empty() {
            return Err(QnnError::EmptyData("targets are empty".to_string()));
        }
        if !matches!(self, Targets::I64(_)) {
            debug!(dtype = self.dtype(), n = labels.len(), "coerced targets to int64 labels");
        }
        Ok(labels)
    }

    /// Convert to a `(n_samples, n_targets)` float matrix. 1-D targets become a single column.
    pub fn to_regression_targets(&self) -> Result<Array2<f32>> {
        let a = match self {
            Targets::F32(a) => a.clone(),
            _ => self.as_f64_dyn().mapv(|v| v as f32),
        };
        let matrix = match a.ndim() {
            1 => {
                let n = a.len();
                Array2::from_shape_vec((n, 1), a.iter().copied().collect()).map_err(|e| {
                    QnnError::InvalidShape {
                        expected: "(n_samples,)".to_string(),
                        got: e.to_string(),
                    }
                })?
            }
            2 => a
                .into_dimensionality::<Ix2>()
                .map_err(|e| QnnError::InvalidShape {
                    expected: "(n_samples, n_targets)".to_string(),
                    got: e.to_string(),
                })?,
            other => {
                return Err(QnnError::UnsupportedInput(format!(
                    "regression targets must be 1-D or 2-D, got {other} dimensions"
                )))
            }
        };
        if matrix.is_empty() {
            return Err(QnnError::EmptyData("targets are empty".to_string()));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(QnnError::UnsupportedInput(
                "targets contain NaN or infinite values".to_string(),
            ));
        }
        if !matches!(self, Targets::F32(_)) {
            debug!(dtype = self.dtype(), shape = ?matrix.dim(), "coerced targets to float32");
        }
        Ok(matrix)
    }
}
