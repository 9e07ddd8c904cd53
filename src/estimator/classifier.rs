use std::sync::Arc;

use ndarray::{s, Array1, Array2, Axis};
use serde_json::Value;

use crate::config::CompilationConfig;
use crate::data::{Features, Targets};
use crate::dataset::TrainTargets;
use crate::error::{QnnError, Result};
use crate::estimator::{Estimator, EstimatorState, QuantizedEstimator};
use crate::fhe::FheCompiler;
use crate::loss::softmax;
use crate::nn::{Module, SparseQuantNet};
use crate::preprocessing::{FittedLabelEncoder, LabelEncoder, LabelEncoderParams};
use crate::quantization::QuantizedModule;
use crate::trainer::TrainingParams;

/// Quantized neural-network classifier.
///
/// Labels may be any integers (or integral floats); they are encoded to
/// `0..n_classes` for training and mapped back by [`predict`](Self::predict).
/// The module must have at least as many outputs as there are classes.
///
/// # Example
/// ```
/// use fhe_qnn::config::CompilationConfig;
/// use fhe_qnn::dataset::synthetic::make_classification;
/// use fhe_qnn::estimator::NeuralNetClassifier;
/// use fhe_qnn::nn::ModuleParams;
/// use fhe_qnn::trainer::TrainingParams;
///
/// let (x, y) = make_classification(64, 4, 2, 0).unwrap();
/// let mut clf: NeuralNetClassifier = NeuralNetClassifier::new(
///     ModuleParams::new(4, 2).with_n_w_bits(2).with_n_a_bits(2),
///     TrainingParams::default().with_max_epochs(3),
/// )
/// .unwrap();
/// clf.fit(&x, &y).unwrap();
/// clf.compile(&x, &CompilationConfig::default(), false).unwrap();
/// let predictions = clf.predict(&x, true).unwrap();
/// assert_eq!(predictions.len(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct NeuralNetClassifier<M: Module = SparseQuantNet> {
    inner: QuantizedEstimator<M>,
    encoder: Option<FittedLabelEncoder>,
}

impl<M: Module> NeuralNetClassifier<M> {
    pub fn new(module_config: M::Config, training: TrainingParams) -> Result<Self> {
        Ok(Self {
            inner: QuantizedEstimator::new(module_config, training)?,
            encoder: None,
        })
    }

    /// See [`QuantizedEstimator::from_param_map`].
    pub fn from_param_map(params: &Value) -> Result<Self> {
        Ok(Self {
            inner: QuantizedEstimator::from_param_map(params)?,
            encoder: None,
        })
    }

    /// Restore a fitted classifier from a saved integer program and its class labels.
    pub fn from_quantized_module(
        module_config: M::Config,
        training: TrainingParams,
        quantized: QuantizedModule,
        classes: Vec<i64>,
    ) -> Result<Self> {
        let encoder = FittedLabelEncoder::from_params(LabelEncoderParams { classes })?;
        if encoder.n_classes() > quantized.n_outputs() {
            return Err(QnnError::InvalidShape {
                expected: format!("at most {} classes", quantized.n_outputs()),
                got: format!("{} classes", encoder.n_classes()),
            });
        }
        Ok(Self {
            inner: QuantizedEstimator::from_quantized_module(module_config, training, quantized)?,
            encoder: Some(encoder),
        })
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn FheCompiler>) -> Self {
        self.inner = self.inner.with_compiler(compiler);
        self
    }

    pub fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        self.inner.set_param(name, value)
    }

    pub fn estimator(&self) -> &QuantizedEstimator<M> {
        &self.inner
    }

    pub fn state(&self) -> EstimatorState {
        self.inner.state()
    }

    pub fn n_bits_quant(&self) -> Result<u32> {
        self.inner.n_bits_quant()
    }

    /// Sorted class labels seen during `fit`.
    pub fn classes(&self) -> Result<&Array1<i64>> {
        self.encoder
            .as_ref()
            .map(FittedLabelEncoder::classes)
            .ok_or_else(|| QnnError::not_fitted("the class labels"))
    }

    /// Train on `x`/`y` and calibrate. `y` holds one class label per sample.
    pub fn fit(&mut self, x: impl Into<Features>, y: impl Into<Targets>) -> Result<&mut Self> {
        let x = x.into().to_float_matrix()?;
        let labels = y.into().to_class_labels()?;
        let encoder = LabelEncoder::new().fit(&labels)?;
        let targets = TrainTargets::Classes {
            indices: encoder.transform(&labels)?,
            n_classes: encoder.n_classes(),
        };
        self.inner.fit_module(&x, &targets)?;
        self.encoder = Some(encoder);
        Ok(self)
    }

    pub fn compile(
        &mut self,
        x: impl Into<Features>,
        config: &CompilationConfig,
        use_virtual_lib: bool,
    ) -> Result<&mut Self> {
        self.inner.compile(&x.into(), config, use_virtual_lib)?;
        Ok(self)
    }

    /// Class probabilities, one column per entry of [`classes`](Self::classes).
    ///
    /// Outputs beyond the number of classes are ignored.
    pub fn predict_proba(&self, x: impl Into<Features>, execute_in_fhe: bool) -> Result<Array2<f32>> {
        let raw = self.inner.predict_raw(&x.into(), execute_in_fhe)?;
        let n_classes = self
            .encoder
            .as_ref()
            .map(FittedLabelEncoder::n_classes)
            .unwrap_or(raw.ncols());
        if n_classes > raw.ncols() {
            return Err(QnnError::InvalidShape {
                expected: format!("at least {n_classes} outputs"),
                got: format!("{} outputs", raw.ncols()),
            });
        }
        Ok(softmax(&raw.slice(s![.., ..n_classes]).to_owned()))
    }

    /// Most probable class label of every sample.
    pub fn predict(&self, x: impl Into<Features>, execute_in_fhe: bool) -> Result<Array1<i64>> {
        let proba = self.predict_proba(x, execute_in_fhe)?;
        let indices: Array1<usize> = proba
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &p)| {
                        if p > best.1 {
                            (i, p)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect();
        match &self.encoder {
            Some(encoder) => encoder.inverse_transform(&indices),
            None => Ok(indices.mapv(|i| i as i64)),
        }
    }

    /// Mean accuracy of clear quantized predictions.
    pub fn score(&self, x: impl Into<Features>, y: impl Into<Targets>) -> Result<f64> {
        let predicted = self.predict(x, false)?;
        let labels = y.into().to_class_labels()?;
        if labels.len() != predicted.len() {
            return Err(QnnError::InvalidShape {
                expected: format!("{} labels", predicted.len()),
                got: format!("{} labels", labels.len()),
            });
        }
        let correct = predicted
            .iter()
            .zip(labels.iter())
            .filter(|(p, t)| p == t)
            .count();
        Ok(correct as f64 / labels.len() as f64)
    }
}

impl<M: Module> Estimator for NeuralNetClassifier<M> {
    fn fit_matrix(&mut self, x: &Array2<f32>, y: &Targets) -> Result<()> {
        self.fit(x, y.clone())?;
        Ok(())
    }

    fn score_matrix(&self, x: &Array2<f32>, y: &Targets) -> Result<f64> {
        self.score(x, y.clone())
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        self.inner.set_param(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::ModuleParams;
    use ndarray::array;

    fn classifier(n_outputs: usize) -> NeuralNetClassifier {
        NeuralNetClassifier::new(
            ModuleParams::new(2, n_outputs).with_n_w_bits(2).with_n_a_bits(2),
            TrainingParams::default().with_max_epochs(5).with_lr(0.1),
        )
        .unwrap()
    }

    fn xor_like() -> (Array2<f64>, Array1<i64>) {
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0], [0.1, 0.9], [0.9, 0.1]];
        let y = array![-1i64, 7, 7, -1, 7, 7];
        (x, y)
    }

    #[test]
    fn test_predict_maps_back_to_labels() {
        let (x, y) = xor_like();
        let mut clf = classifier(2);
        clf.fit(&x, &y).unwrap();
        assert_eq!(clf.classes().unwrap(), &array![-1i64, 7]);

        let predicted = clf.predict(&x, false).unwrap();
        assert_eq!(predicted.len(), 6);
        assert!(predicted.iter().all(|p| *p == -1 || *p == 7));

        let proba = clf.predict_proba(&x, false).unwrap();
        assert_eq!(proba.dim(), (6, 2));
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        let accuracy = clf.score(&x, &y).unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn test_extra_outputs_are_ignored() {
        let (x, y) = xor_like();
        let mut clf = classifier(4);
        clf.fit(&x, &y).unwrap();
        assert_eq!(clf.predict_proba(&x, false).unwrap().ncols(), 2);
    }

    #[test]
    fn test_too_many_classes_fails_in_module() {
        let x = array![[0.0f32, 0.0], [1.0, 1.0], [2.0, 2.0]];
        let y = array![0i64, 1, 2];
        let mut clf = classifier(2);
        let err = clf.fit(&x, &y).unwrap_err();
        assert!(matches!(err, QnnError::Training(_)), "{err:?}");
        assert_eq!(clf.state(), EstimatorState::Constructed);
        assert!(matches!(clf.classes(), Err(QnnError::NotFitted(_))));
    }

    #[test]
    fn test_non_integral_labels_rejected() {
        let x = array![[0.0f32, 0.0], [1.0, 1.0]];
        let y = array![0.5f64, 1.0];
        let err = classifier(2).fit(&x, &y).unwrap_err();
        assert!(matches!(err, QnnError::UnsupportedInput(_)));
    }

    #[test]
    fn test_restore_with_classes() {
        let (x, y) = xor_like();
        let mut clf = classifier(2);
        clf.fit(&x, &y).unwrap();
        let program = clf.estimator().quantized_module().unwrap().clone();

        let restored = NeuralNetClassifier::<SparseQuantNet>::from_quantized_module(
            ModuleParams::new(2, 2).with_n_w_bits(2).with_n_a_bits(2),
            TrainingParams::default(),
            program.clone(),
            vec![-1, 7],
        )
        .unwrap();
        assert_eq!(restored.predict(&x, false).unwrap(), clf.predict(&x, false).unwrap());

        assert!(NeuralNetClassifier::<SparseQuantNet>::from_quantized_module(
            ModuleParams::new(2, 2),
            TrainingParams::default(),
            program,
            vec![0, 1, 2],
        )
        .is_err());
    }
}
