use ndarray::{Array2, Axis};

use crate::dataset::{Dataset, TrainTargets};
use crate::trainer::TrainError;

/// Features and targets held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    x: Array2<f32>,
    y: TrainTargets,
}

impl InMemoryDataset {
    pub fn new(x: Array2<f32>, y: TrainTargets) -> Result<Self, TrainError> {
        if x.nrows() != y.len() {
            return Err(TrainError::LengthMismatch {
                features: x.nrows(),
                targets: y.len(),
            });
        }
        if x.nrows() == 0 {
            return Err(TrainError::EmptyDataset);
        }
        Ok(Self { x, y })
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.x
    }

    pub fn targets(&self) -> &TrainTargets {
        &self.y
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }
}

impl Dataset for InMemoryDataset {
    type Error = std::convert::Infallible;

    fn len(&self) -> Option<usize> {
        Some(self.x.nrows())
    }

    fn get_rows(&self, indices: &[usize]) -> Result<(Array2<f32>, TrainTargets), Self::Error> {
        Ok((self.x.select(Axis(0), indices), self.y.select(indices)))
    }
}
