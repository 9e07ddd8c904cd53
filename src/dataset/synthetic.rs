//! Seeded synthetic datasets for tests, benches and demos.

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{QnnError, Result};

fn standard_normal() -> Result<Normal<f64>> {
    Normal::new(0.0, 1.0).map_err(|e| QnnError::NumericalError(e.to_string()))
}

/// Gaussian blobs, one per class, with centroids drawn at random.
///
/// Returns `(x, y)` with `x` of shape `(n_samples, n_features)` and labels in
/// `0..n_classes`. Classes are balanced up to one sample.
pub fn make_classification(
    n_samples: usize,
    n_features: usize,
    n_classes: usize,
    random_state: u64,
) -> Result<(Array2<f64>, Array1<i64>)> {
    if n_features == 0 {
        return Err(QnnError::InvalidParameter("n_features must be > 0".into()));
    }
    if n_classes < 2 {
        return Err(QnnError::InvalidParameter("n_classes must be >= 2".into()));
    }
    if n_samples < n_classes {
        return Err(QnnError::InvalidParameter(format!(
            "n_samples ({n_samples}) must be >= n_classes ({n_classes})"
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(random_state);
    let normal = standard_normal()?;
    let class_sep = 2.0;

    let centroids = Array2::from_shape_fn((n_classes, n_features), |_| {
        class_sep * normal.sample(&mut rng)
    });

    let mut labels: Vec<usize> = (0..n_samples).map(|i| i % n_classes).collect();
    labels.shuffle(&mut rng);

    let mut x = Array2::<f64>::zeros((n_samples, n_features));
    for (mut row, &label) in x.axis_iter_mut(Axis(0)).zip(labels.iter()) {
        for (v, c) in row.iter_mut().zip(centroids.row(label).iter()) {
            *v = c + normal.sample(&mut rng);
        }
    }
    let y = labels.into_iter().map(|l| l as i64).collect();
    Ok((x, y))
}

/// Linear regression problem `y = x . coef + noise`.
pub fn make_regression(
    n_samples: usize,
    n_features: usize,
    noise: f64,
    random_state: u64,
) -> Result<(Array2<f64>, Array1<f64>)> {
    if n_samples == 0 || n_features == 0 {
        return Err(QnnError::InvalidParameter(
            "n_samples and n_features must be > 0".into(),
        ));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(random_state);
    let normal = standard_normal()?;

    let coef: Array1<f64> = (0..n_features).map(|_| rng.random_range(-1.0..1.0)).collect();
    let x = Array2::from_shape_fn((n_samples, n_features), |_| normal.sample(&mut rng));
    let mut y = x.dot(&coef);
    y.mapv_inplace(|v| v + noise * normal.sample(&mut rng));
    Ok((x, y))
}

/// Shuffle and split samples into train and test sets.
///
/// `test_size` is the fraction of samples placed in the test set; at least one
/// sample lands on each side.
pub fn train_test_split<A: Clone, B: Clone>(
    x: &Array2<A>,
    y: &Array1<B>,
    test_size: f64,
    random_state: u64,
) -> Result<(Array2<A>, Array2<A>, Array1<B>, Array1<B>)> {
    if x.nrows() != y.len() {
        return Err(QnnError::InvalidShape {
            expected: format!("{} targets", x.nrows()),
            got: format!("{} targets", y.len()),
        });
    }
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(QnnError::InvalidParameter(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    let n = x.nrows();
    let n_test = ((n as f64) * test_size).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(QnnError::InvalidParameter(format!(
            "test_size={test_size} leaves an empty split for {n} samples"
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(random_state);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rng);
    let (test_idx, train_idx) = indices.split_at(n_test);

    Ok((
        x.select(Axis(0), train_idx),
        x.select(Axis(0), test_idx),
        y.select(Axis(0), train_idx),
        y.select(Axis(0), test_idx),
    ))
}
