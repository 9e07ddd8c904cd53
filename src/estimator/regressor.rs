use std::sync::Arc;

use ndarray::{Array2, Axis};
use serde_json::Value;

use crate::config::CompilationConfig;
use crate::data::{Features, Targets};
use crate::dataset::TrainTargets;
use crate::error::{QnnError, Result};
use crate::estimator::{Estimator, EstimatorState, QuantizedEstimator};
use crate::fhe::FheCompiler;
use crate::nn::{Module, SparseQuantNet};
use crate::quantization::QuantizedModule;
use crate::trainer::TrainingParams;

/// Quantized neural-network regressor.
///
/// Targets may be 1-D (one output) or `(n_samples, n_targets)`; the module
/// must have `n_targets` outputs.
#[derive(Debug, Clone)]
pub struct NeuralNetRegressor<M: Module = SparseQuantNet> {
    inner: QuantizedEstimator<M>,
}

impl<M: Module> NeuralNetRegressor<M> {
    pub fn new(module_config: M::Config, training: TrainingParams) -> Result<Self> {
        Ok(Self {
            inner: QuantizedEstimator::new(module_config, training)?,
        })
    }

    pub fn from_param_map(params: &Value) -> Result<Self> {
        Ok(Self {
            inner: QuantizedEstimator::from_param_map(params)?,
        })
    }

    pub fn from_quantized_module(
        module_config: M::Config,
        training: TrainingParams,
        quantized: QuantizedModule,
    ) -> Result<Self> {
        Ok(Self {
            inner: QuantizedEstimator::from_quantized_module(module_config, training, quantized)?,
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

    pub fn fit(&mut self, x: impl Into<Features>, y: impl Into<Targets>) -> Result<&mut Self> {
        let x = x.into().to_float_matrix()?;
        let targets = TrainTargets::Values(y.into().to_regression_targets()?);
        self.inner.fit_module(&x, &targets)?;
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

    /// Predicted values, one row per sample.
    pub fn predict(&self, x: impl Into<Features>, execute_in_fhe: bool) -> Result<Array2<f32>> {
        self.inner.predict_raw(&x.into(), execute_in_fhe)
    }

    /// Coefficient of determination R² of clear quantized predictions,
    /// averaged over targets.
    pub fn score(&self, x: impl Into<Features>, y: impl Into<Targets>) -> Result<f64> {
        let predicted = self.predict(x, false)?;
        let truth = y.into().to_regression_targets()?;
        if predicted.dim() != truth.dim() {
            return Err(QnnError::InvalidShape {
                expected: format!("{:?}", predicted.dim()),
                got: format!("{:?}", truth.dim()),
            });
        }
        Ok(r2_score(&truth, &predicted))
    }
}

fn r2_score(truth: &Array2<f32>, predicted: &Array2<f32>) -> f64 {
    let n_targets = truth.ncols();
    let mut total = 0.0f64;
    for (t, p) in truth.axis_iter(Axis(1)).zip(predicted.axis_iter(Axis(1))) {
        let mean = t.iter().map(|&v| f64::from(v)).sum::<f64>() / t.len() as f64;
        let ss_res: f64 = t
            .iter()
            .zip(p.iter())
            .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
            .sum();
        let ss_tot: f64 = t.iter().map(|&a| (f64::from(a) - mean).powi(2)).sum();
        total += if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };
    }
    total / n_targets as f64
}

impl<M: Module> Estimator for NeuralNetRegressor<M> {
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
    use crate::dataset::synthetic::make_regression;
    use crate::nn::ModuleParams;
    use ndarray::array;

    fn regressor(n_outputs: usize) -> NeuralNetRegressor {
        NeuralNetRegressor::new(
            ModuleParams::new(3, n_outputs).with_n_w_bits(3).with_n_a_bits(3),
            TrainingParams::default().with_max_epochs(3).with_lr(0.01),
        )
        .unwrap()
    }

    #[test]
    fn test_r2_score() {
        let truth = array![[1.0f32], [2.0], [3.0]];
        assert_eq!(r2_score(&truth, &truth), 1.0);
        let mean = array![[2.0f32], [2.0], [2.0]];
        assert_eq!(r2_score(&truth, &mean), 0.0);
    }

    #[test]
    fn test_fit_compile_predict() {
        let (x, y) = make_regression(40, 3, 0.1, 3).unwrap();
        let mut reg = regressor(1);
        assert!(matches!(reg.predict(&x, false), Err(QnnError::NotFitted(_))));

        reg.fit(&x, &y).unwrap();
        assert_eq!(reg.state(), EstimatorState::Fitted);
        reg.compile(&x, &CompilationConfig::default().with_max_bit_width(16), false)
            .unwrap();
        assert_eq!(reg.state(), EstimatorState::Compiled);

        let predicted = reg.predict(&x, true).unwrap();
        assert_eq!(predicted.dim(), (40, 1));
        assert!(reg.score(&x, &y).unwrap().is_finite());
    }

    #[test]
    fn test_target_width_mismatch_fails_in_module() {
        let x = array![[0.0f32, 1.0, 2.0], [1.0, 2.0, 3.0]];
        let y = array![[1.0f32, 2.0], [3.0, 4.0]];
        let err = regressor(1).fit(&x, &y).unwrap_err();
        assert!(matches!(err, QnnError::Training(_)), "{err:?}");
    }
}
