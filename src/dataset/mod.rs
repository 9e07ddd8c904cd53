//! Mini-batch access to training data.
//!
//! The [`Dataset`] trait is what the [`Trainer`](crate::trainer::Trainer)
//! iterates over. [`InMemoryDataset`] is the only implementation the
//! estimators need: the normalized feature matrix and the training targets,
//! both already in memory.

use std::{fmt::Debug, ops::Range};

use ndarray::{Array1, Array2, Axis};

pub mod memory;
pub mod synthetic;

pub use self::memory::InMemoryDataset;

/// Targets in the form the trainable module consumes them.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainTargets {
    /// Encoded class indices in `0..n_classes`.
    Classes {
        indices: Array1<usize>,
        n_classes: usize,
    },
    /// Regression values, one row per sample.
    Values(Array2<f32>),
}

impl TrainTargets {
    pub fn len(&self) -> usize {
        match self {
            TrainTargets::Classes { indices, .. } => indices.len(),
            TrainTargets::Values(v) => v.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the given samples, in the given order.
    pub fn select(&self, rows: &[usize]) -> TrainTargets {
        match self {
            TrainTargets::Classes { indices, n_classes } => TrainTargets::Classes {
                indices: indices.select(Axis(0), rows),
                n_classes: *n_classes,
            },
            TrainTargets::Values(v) => TrainTargets::Values(v.select(Axis(0), rows)),
        }
    }
}

pub trait Dataset {
    type Error: Debug;

    /// Total number of samples, if known.
    fn len(&self) -> Option<usize>;

    fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Iterate over contiguous batches of `batch_size` samples.
    fn batches(&self, batch_size: usize) -> DatasetBatchIter<'_, Self>
    where
        Self: Sized,
    {
        DatasetBatchIter {
            dataset: self,
            order: None,
            batch_size,
            current: 0,
        }
    }

    /// Iterate over batches visiting samples in `order`.
    fn batches_in_order<'a>(&'a self, order: &'a [usize], batch_size: usize) -> DatasetBatchIter<'a, Self>
    where
        Self: Sized,
    {
        DatasetBatchIter {
            dataset: self,
            order: Some(order),
            batch_size,
            current: 0,
        }
    }

    /// Gather the given samples.
    fn get_rows(&self, indices: &[usize]) -> Result<(Array2<f32>, TrainTargets), Self::Error>;

    fn get_batch(&self, range: Range<usize>) -> Result<(Array2<f32>, TrainTargets), Self::Error> {
        let indices: Vec<usize> = range.collect();
        self.get_rows(&indices)
    }
}

/// Iterator over dataset batches.
pub struct DatasetBatchIter<'a, D: ?Sized> {
    dataset: &'a D,
    order: Option<&'a [usize]>,
    batch_size: usize,
    current: usize,
}

impl<'a, D: Dataset> Iterator for DatasetBatchIter<'a, D> {
    type Item = Result<(Array2<f32>, TrainTargets), D::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = match self.order {
            Some(order) => order.len(),
            None => self.dataset.len()?,
        };
        if self.current >= total || self.batch_size == 0 {
            return None;
        }

        let end = (self.current + self.batch_size).min(total);
        let range = self.current..end;
        self.current = end;

        match self.order {
            Some(order) => Some(self.dataset.get_rows(&order[range])),
            None => Some(self.dataset.get_batch(range)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn dataset() -> InMemoryDataset {
        let x = array![[0.0f32], [1.0], [2.0], [3.0], [4.0]];
        let y = TrainTargets::Classes {
            indices: array![0, 1, 0, 1, 0],
            n_classes: 2,
        };
        InMemoryDataset::new(x, y).unwrap()
    }

    #[test]
    fn test_batches_cover_dataset() {
        let ds = dataset();
        let sizes: Vec<usize> = ds.batches(2).map(|b| b.unwrap().0.nrows()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_batches_in_order() {
        let ds = dataset();
        let order = [4, 0, 2];
        let batches: Vec<_> = ds.batches_in_order(&order, 2).map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0, array![[4.0f32], [0.0]]);
        assert_eq!(batches[1].0, array![[2.0f32]]);
    }

    #[test]
    fn test_select_targets() {
        let y = TrainTargets::Values(array![[1.0f32], [2.0], [3.0]]);
        assert_eq!(y.select(&[2, 0]), TrainTargets::Values(array![[3.0f32], [1.0]]));
    }
}
