use std::collections::BTreeSet;

use ndarray::Array2;
use serde_json::Value;
use tracing::debug;

use crate::data::{Features, Targets};
use crate::error::{QnnError, Result};
use crate::estimator::Estimator;
use crate::preprocessing::{FittedStep, TransformerStep};

/// Named transformer steps followed by a final estimator.
///
/// Fitting fits every transformer on the output of the previous one and then
/// the estimator on the fully transformed data. Parameters are routed by
/// name: `"scaler__with_mean"` goes to the step named `scaler`,
/// `"net__lr"` to the estimator if it is named `net`.
///
/// # Example
/// ```
/// use fhe_qnn::estimator::NeuralNetClassifier;
/// use fhe_qnn::model_selection::Pipeline;
/// use fhe_qnn::nn::ModuleParams;
/// use fhe_qnn::preprocessing::{Pca, StandardScaler};
/// use fhe_qnn::trainer::TrainingParams;
///
/// let net: NeuralNetClassifier =
///     NeuralNetClassifier::new(ModuleParams::new(2, 2), TrainingParams::default()).unwrap();
/// let pipeline = Pipeline::new("net", net)
///     .add_step("pca", Pca::new(2))
///     .add_step("scaler", StandardScaler::new());
/// assert_eq!(pipeline.step_names(), vec!["pca", "scaler", "net"]);
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline<E> {
    steps: Vec<(String, Box<dyn TransformerStep>)>,
    fitted: Option<Vec<Box<dyn FittedStep>>>,
    estimator_name: String,
    estimator: E,
}

impl<E: Estimator> Pipeline<E> {
    pub fn new(estimator_name: impl Into<String>, estimator: E) -> Self {
        Self {
            steps: Vec::new(),
            fitted: None,
            estimator_name: estimator_name.into(),
            estimator,
        }
    }

    /// Append a transformer in front of the estimator.
    pub fn add_step(mut self, name: impl Into<String>, step: impl TransformerStep + 'static) -> Self {
        self.steps.push((name.into(), Box::new(step)));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Step names in order, the estimator last.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(std::iter::once(self.estimator_name.as_str()))
            .collect()
    }

    pub fn final_estimator(&self) -> &E {
        &self.estimator
    }

    /// Mutable access to the estimator, e.g. to compile it on transformed data.
    pub fn final_estimator_mut(&mut self) -> &mut E {
        &mut self.estimator
    }

    fn check_names(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for name in self.step_names() {
            if name.is_empty() || name.contains("__") {
                return Err(QnnError::InvalidParameter(format!(
                    "invalid pipeline step name {name:?}"
                )));
            }
            if !seen.insert(name) {
                return Err(QnnError::InvalidParameter(format!(
                    "duplicate pipeline step name {name:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn fit(&mut self, x: impl Into<Features>, y: impl Into<Targets>) -> Result<&mut Self> {
        let x = x.into().to_float_matrix()?;
        self.fit_matrix(&x, &y.into())?;
        Ok(self)
    }

    /// Apply the fitted transformers, without the estimator.
    pub fn transform(&self, x: impl Into<Features>) -> Result<Array2<f32>> {
        self.transform_matrix(x.into().to_float_matrix()?)
    }

    fn transform_matrix(&self, mut x: Array2<f32>) -> Result<Array2<f32>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| QnnError::not_fitted("the pipeline transform"))?;
        for step in fitted {
            x = step.transform(&x)?;
        }
        Ok(x)
    }
}

impl<E: Estimator> Estimator for Pipeline<E> {
    fn fit_matrix(&mut self, x: &Array2<f32>, y: &Targets) -> Result<()> {
        self.check_names()?;
        self.fitted = None;
        let mut fitted = Vec::with_capacity(self.steps.len());
        let mut h = x.clone();
        for (name, step) in &self.steps {
            let (fitted_step, transformed) = step.fit_step(&h)?;
            debug!(
                step = name.as_str(),
                transformer = fitted_step.step_name(),
                n_features_out = fitted_step.n_features_out(),
                "fitted pipeline step"
            );
            fitted.push(fitted_step);
            h = transformed;
        }
        self.estimator.fit_matrix(&h, y)?;
        self.fitted = Some(fitted);
        Ok(())
    }

    fn score_matrix(&self, x: &Array2<f32>, y: &Targets) -> Result<f64> {
        let h = self.transform_matrix(x.clone())?;
        self.estimator.score_matrix(&h, y)
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        let (target, param) = name.split_once("__").ok_or_else(|| {
            QnnError::InvalidParameter(format!(
                "pipeline parameters are named <step>__<param>, got {name:?}"
            ))
        })?;
        if target == self.estimator_name {
            return self.estimator.set_param(param, value);
        }
        match self.steps.iter_mut().find(|(step_name, _)| step_name == target) {
            Some((_, step)) => step.set_param(param, value),
            None => Err(QnnError::InvalidParameter(format!(
                "pipeline has no step named {target:?}"
            ))),
        }
    }
}
