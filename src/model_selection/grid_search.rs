use std::collections::BTreeMap;

use ndarray::Axis;
use serde_json::Value;
use tracing::{debug, info};

use crate::data::{Features, Targets};
use crate::error::{QnnError, Result};
use crate::estimator::Estimator;
use crate::model_selection::KFold;

/// Candidate values of every searched parameter.
pub type ParamGrid = BTreeMap<String, Vec<Value>>;

/// Cross-validation outcome of one parameter combination.
#[derive(Debug, Clone, PartialEq)]
pub struct CvResult {
    pub params: BTreeMap<String, Value>,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
}

/// Exhaustive search over a parameter grid with k-fold cross-validation.
///
/// Every combination is applied to a clone of the base estimator with
/// [`Estimator::set_param`], fitted on each training fold and scored on the
/// matching test fold. Any failure aborts the search. The combination with
/// the highest mean score is then refitted on the full data.
#[derive(Debug, Clone)]
pub struct GridSearchCv<E> {
    estimator: E,
    param_grid: ParamGrid,
    cv: KFold,
    results: Vec<CvResult>,
    best_index: Option<usize>,
    best_estimator: Option<E>,
}

impl<E: Estimator> GridSearchCv<E> {
    /// Search `param_grid` with 5-fold cross-validation.
    pub fn new(estimator: E, param_grid: ParamGrid) -> Self {
        Self {
            estimator,
            param_grid,
            cv: KFold::default(),
            results: Vec::new(),
            best_index: None,
            best_estimator: None,
        }
    }

    pub fn with_cv(mut self, cv: KFold) -> Self {
        self.cv = cv;
        self
    }

    /// Every parameter combination of the grid, in a stable order.
    pub fn candidates(&self) -> Result<Vec<BTreeMap<String, Value>>> {
        let mut combos = vec![BTreeMap::new()];
        for (name, values) in &self.param_grid {
            if values.is_empty() {
                return Err(QnnError::InvalidParameter(format!(
                    "parameter grid entry {name:?} has no values"
                )));
            }
            combos = combos
                .into_iter()
                .flat_map(|combo| {
                    values.iter().map(move |value| {
                        let mut next = combo.clone();
                        next.insert(name.clone(), value.clone());
                        next
                    })
                })
                .collect();
        }
        Ok(combos)
    }

    fn configured(&self, params: &BTreeMap<String, Value>) -> Result<E> {
        let mut estimator = self.estimator.clone();
        for (name, value) in params {
            estimator.set_param(name, value)?;
        }
        Ok(estimator)
    }

    pub fn fit(&mut self, x: impl Into<Features>, y: impl Into<Targets>) -> Result<&mut Self> {
        let x = x.into().to_float_matrix()?;
        let y = y.into();
        if y.ndim() == 0 {
            return Err(QnnError::InvalidShape {
                expected: "targets with a sample axis".to_string(),
                got: "a scalar".to_string(),
            });
        }
        if y.len() != x.nrows() {
            return Err(QnnError::InvalidShape {
                expected: format!("{} targets", x.nrows()),
                got: format!("{} targets", y.len()),
            });
        }
        let folds = self.cv.split(x.nrows())?;
        let candidates = self.candidates()?;
        self.results.clear();
        self.best_index = None;
        self.best_estimator = None;

        for params in candidates {
            let base = self.configured(&params)?;
            let mut fold_scores = Vec::with_capacity(folds.len());
            for (train, test) in &folds {
                let mut estimator = base.clone();
                estimator.fit_matrix(&x.select(Axis(0), train), &y.select_rows(train))?;
                fold_scores.push(estimator.score_matrix(&x.select(Axis(0), test), &y.select_rows(test))?);
            }
            let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
            debug!(?params, mean_score, "evaluated grid candidate");
            self.results.push(CvResult {
                params,
                fold_scores,
                mean_score,
            });
        }

        let best_index = self
            .results
            .iter()
            .enumerate()
            .fold(None::<(usize, f64)>, |best, (i, r)| match best {
                Some((_, score)) if score >= r.mean_score || r.mean_score.is_nan() => best,
                _ => Some((i, r.mean_score)),
            })
            .map(|(i, _)| i)
            .ok_or_else(|| QnnError::EmptyData("parameter grid produced no candidates".into()))?;

        let best = &self.results[best_index];
        info!(params = ?best.params, score = best.mean_score, "best grid candidate");
        let mut refit = self.configured(&best.params)?;
        refit.fit_matrix(&x, &y)?;
        self.best_index = Some(best_index);
        self.best_estimator = Some(refit);
        Ok(self)
    }

    pub fn cv_results(&self) -> &[CvResult] {
        &self.results
    }

    fn best(&self) -> Result<&CvResult> {
        self.best_index
            .map(|i| &self.results[i])
            .ok_or_else(|| QnnError::not_fitted("the best parameters"))
    }

    pub fn best_params(&self) -> Result<&BTreeMap<String, Value>> {
        self.best().map(|r| &r.params)
    }

    pub fn best_score(&self) -> Result<f64> {
        self.best().map(|r| r.mean_score)
    }

    /// The best combination refitted on the full data.
    pub fn best_estimator(&self) -> Result<&E> {
        self.best_estimator
            .as_ref()
            .ok_or_else(|| QnnError::not_fitted("the best estimator"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use serde_json::json;

    /// Scores `-(shift - 2)^2`, so the best shift is 2.
    #[derive(Debug, Clone, Default)]
    struct Parabola {
        shift: f64,
        fits: usize,
    }

    impl Estimator for Parabola {
        fn fit_matrix(&mut self, _x: &Array2<f32>, _y: &Targets) -> Result<()> {
            self.fits += 1;
            Ok(())
        }

        fn score_matrix(&self, _x: &Array2<f32>, _y: &Targets) -> Result<f64> {
            Ok(-(self.shift - 2.0).powi(2))
        }

        fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
            match (name, value.as_f64()) {
                ("shift", Some(v)) => {
                    self.shift = v;
                    Ok(())
                }
                ("fail", _) => Err(QnnError::InvalidParameter("fail".into())),
                _ => Ok(()),
            }
        }
    }

    fn data() -> (Array2<f32>, Targets) {
        let x = Array2::from_shape_fn((6, 2), |(i, j)| (i + j) as f32);
        (x, Targets::from(vec![0i64, 1, 0, 1, 0, 1]))
    }

    #[test]
    fn test_candidates_cartesian_product() {
        let mut grid = ParamGrid::new();
        grid.insert("a".into(), vec![json!(1), json!(2)]);
        grid.insert("b".into(), vec![json!("x"), json!("y"), json!("z")]);
        let search = GridSearchCv::new(Parabola::default(), grid);
        let candidates = search.candidates().unwrap();
        assert_eq!(candidates.len(), 6);
        assert_eq!(candidates[0]["a"], json!(1));
        assert_eq!(candidates[0]["b"], json!("x"));
    }

    #[test]
    fn test_finds_best_and_refits() {
        let (x, y) = data();
        let mut grid = ParamGrid::new();
        grid.insert("shift".into(), vec![json!(0.0), json!(2.0), json!(5.0)]);
        let mut search =
            GridSearchCv::new(Parabola::default(), grid).with_cv(KFold::new(3).unwrap());
        assert!(matches!(search.best_params(), Err(QnnError::NotFitted(_))));

        search.fit(&x, y).unwrap();
        assert_eq!(search.cv_results().len(), 3);
        assert!(search.cv_results().iter().all(|r| r.fold_scores.len() == 3));
        assert_eq!(search.best_params().unwrap()["shift"], json!(2.0));
        assert_eq!(search.best_score().unwrap(), 0.0);
        let best = search.best_estimator().unwrap();
        assert_eq!(best.shift, 2.0);
        assert_eq!(best.fits, 1);
    }

    #[test]
    fn test_errors_propagate() {
        let (x, y) = data();
        let mut grid = ParamGrid::new();
        grid.insert("fail".into(), vec![json!(true)]);
        let mut search = GridSearchCv::new(Parabola::default(), grid);
        assert!(matches!(
            search.fit(&x, y.clone()),
            Err(QnnError::InvalidParameter(_))
        ));

        let mut empty = ParamGrid::new();
        empty.insert("shift".into(), vec![]);
        assert!(GridSearchCv::new(Parabola::default(), empty).fit(&x, y).is_err());
    }

    #[test]
    fn test_target_length_checked() {
        let (x, _) = data();
        let mut search = GridSearchCv::new(Parabola::default(), ParamGrid::new());
        let err = search.fit(&x, array![0i64, 1]).unwrap_err();
        assert!(matches!(err, QnnError::InvalidShape { .. }));
    }

    #[test]
    fn test_scalar_targets_rejected() {
        let x = Array2::<f32>::zeros((1, 2));
        let mut grid = ParamGrid::new();
        grid.insert("shift".into(), vec![json!(2.0)]);
        let mut search = GridSearchCv::new(Parabola::default(), grid);
        let err = search
            .fit(&x, Targets::I64(ndarray::arr0(1i64).into_dyn()))
            .unwrap_err();
        assert!(matches!(err, QnnError::InvalidShape { .. }), "{err}");
        assert!(search.cv_results().is_empty());
    }
}
