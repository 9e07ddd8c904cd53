use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{QnnError, Result};

/// K-fold cross-validation splitter.
///
/// Samples are split into `n_splits` consecutive folds (shuffled first when
/// requested). The first `n_samples % n_splits` folds get one extra sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    n_splits: usize,
    shuffle: Option<u64>,
}

impl Default for KFold {
    fn default() -> Self {
        Self {
            n_splits: 5,
            shuffle: None,
        }
    }
}

impl KFold {
    pub fn new(n_splits: usize) -> Result<Self> {
        if n_splits < 2 {
            return Err(QnnError::InvalidParameter(format!(
                "KFold needs at least 2 splits, got {n_splits}"
            )));
        }
        Ok(Self {
            n_splits,
            shuffle: None,
        })
    }

    /// Shuffle samples with the given seed before splitting.
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = Some(seed);
        self
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// `(train, test)` index sets of every fold.
    pub fn split(&self, n_samples: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
        if n_samples < self.n_splits {
            return Err(QnnError::InvalidParameter(format!(
                "cannot split {n_samples} samples into {} folds",
                self.n_splits
            )));
        }
        let mut indices: Vec<usize> = (0..n_samples).collect();
        if let Some(seed) = self.shuffle {
            indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        }

        let base = n_samples / self.n_splits;
        let extra = n_samples % self.n_splits;
        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for fold in 0..self.n_splits {
            let size = base + usize::from(fold < extra);
            let test = indices[start..start + size].to_vec();
            let train = indices[..start]
                .iter()
                .chain(&indices[start + size..])
                .copied()
                .collect();
            folds.push((train, test));
            start += size;
        }
        Ok(folds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folds_partition_samples() {
        let folds = KFold::new(3).unwrap().split(10).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|(_, test)| test.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);

        let mut seen: Vec<usize> = folds.iter().flat_map(|(_, test)| test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        for (train, test) in &folds {
            assert_eq!(train.len() + test.len(), 10);
            assert!(train.iter().all(|i| !test.contains(i)));
        }
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let a = KFold::new(2).unwrap().with_shuffle(4).split(8).unwrap();
        let b = KFold::new(2).unwrap().with_shuffle(4).split(8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_splits() {
        assert!(KFold::new(1).is_err());
        assert!(KFold::default().split(4).is_err());
    }
}
