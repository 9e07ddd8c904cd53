//! Mapping of arbitrary integer class labels to `0..n_classes`.
//!
//! Maps integer class labels to dense indices (0, 1, 2, ...) in sorted label
//! order, so that arbitrary labels such as `[-1, 7]` can index network outputs.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{QnnError, Result};

/// Encodes class labels as contiguous indices, in ascending label order.
///
/// # Example
/// ```
/// use fhe_qnn::preprocessing::LabelEncoder;
/// use ndarray::array;
///
/// let labels = array![7i64, -1, 7, 3];
/// let fitted = LabelEncoder::new().fit(&labels).unwrap();
/// assert_eq!(fitted.classes(), &array![-1i64, 3, 7]);
/// assert_eq!(fitted.transform(&labels).unwrap(), array![2usize, 0, 2, 1]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct LabelEncoder;

impl LabelEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Collect the distinct labels.
    pub fn fit(&self, labels: &Array1<i64>) -> Result<FittedLabelEncoder> {
        if labels.is_empty() {
            return Err(QnnError::EmptyData(
                "no labels to encode".to_string(),
            ));
        }
        let classes: BTreeSet<i64> = labels.iter().copied().collect();
        Ok(FittedLabelEncoder::from_classes(classes.into_iter().collect()))
    }

    pub fn fit_transform(&self, labels: &Array1<i64>) -> Result<Array1<usize>> {
        self.fit(labels)?.transform(labels)
    }
}

/// Persisted form of [`FittedLabelEncoder`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LabelEncoderParams {
    /// Strictly increasing.
    pub classes: Vec<i64>,
}

/// Label set learned by [`LabelEncoder::fit`].
#[derive(Clone, Debug, PartialEq)]
pub struct FittedLabelEncoder {
    classes: Array1<i64>,
    class_to_idx: BTreeMap<i64, usize>,
}

impl FittedLabelEncoder {
    fn from_classes(classes: Vec<i64>) -> Self {
        let class_to_idx = classes
            .iter()
            .enumerate()
            .map(|(idx, &class)| (class, idx))
            .collect();
        Self {
            classes: Array1::from(classes),
            class_to_idx,
        }
    }

    /// Get the unique classes, sorted.
    pub fn classes(&self) -> &Array1<i64> {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Index of every label. Labels unseen during fit are an error.
    pub fn transform(&self, labels: &Array1<i64>) -> Result<Array1<usize>> {
        labels
            .iter()
            .map(|label| {
                self.class_to_idx.get(label).copied().ok_or_else(|| {
                    QnnError::InvalidParameter(format!("Unknown label value: {label}"))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Array1::from)
    }

    /// Label of every index.
    pub fn inverse_transform(&self, indices: &Array1<usize>) -> Result<Array1<i64>> {
        indices
            .iter()
            .map(|&idx| {
                self.classes.get(idx).copied().ok_or_else(|| {
                    QnnError::InvalidParameter(format!(
                        "Index {idx} out of bounds for {} classes",
                        self.n_classes()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Array1::from)
    }

    pub fn extract_params(&self) -> LabelEncoderParams {
        LabelEncoderParams {
            classes: self.classes.to_vec(),
        }
    }

    pub fn from_params(params: LabelEncoderParams) -> Result<Self> {
        if params.classes.is_empty() {
            return Err(QnnError::EmptyData("LabelEncoder has no classes".into()));
        }
        if params.classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(QnnError::InvalidParameter(
                "LabelEncoder classes must be strictly increasing".into(),
            ));
        }
        Ok(Self::from_classes(params.classes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_label_encoder_fit_transform() {
        let labels = array![2i64, 0, 1, 0, 2];
        let fitted = LabelEncoder::new().fit(&labels).unwrap();
        assert_eq!(fitted.n_classes(), 3);
        assert_eq!(fitted.transform(&labels).unwrap(), array![2usize, 0, 1, 0, 2]);
    }

    #[test]
    fn test_label_encoder_inverse() {
        let labels = array![10i64, -5, 10];
        let fitted = LabelEncoder::new().fit(&labels).unwrap();
        let encoded = fitted.transform(&labels).unwrap();
        assert_eq!(fitted.inverse_transform(&encoded).unwrap(), labels);
        assert!(fitted.inverse_transform(&array![2usize]).is_err());
    }

    #[test]
    fn test_unknown_label() {
        let fitted = LabelEncoder::new().fit(&array![0i64, 1]).unwrap();
        assert!(fitted.transform(&array![3i64]).is_err());
    }

    #[test]
    fn test_empty_labels() {
        assert!(matches!(
            LabelEncoder::new().fit(&Array1::<i64>::zeros(0)),
            Err(QnnError::EmptyData(_))
        ));
    }

    #[test]
    fn test_params_round_trip() {
        let fitted = LabelEncoder::new().fit(&array![4i64, 1, 9]).unwrap();
        let restored = FittedLabelEncoder::from_params(fitted.extract_params()).unwrap();
        assert_eq!(restored, fitted);
        let unsorted = LabelEncoderParams {
            classes: vec![3, 1],
        };
        assert!(FittedLabelEncoder::from_params(unsorted).is_err());
    }
}
