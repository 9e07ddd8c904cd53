use std::path::Path;
use std::sync::Arc;

use ndarray::Array2;
use serde_json::Value;
use tracing::debug;

use crate::config::CompilationConfig;
use crate::data::Features;
use crate::dataset::TrainTargets;
use crate::error::{QnnError, Result};
use crate::estimator::EstimatorState;
use crate::fhe::{FheCircuit, FheCompiler, SimulatedCompiler};
use crate::nn::{Module, SparseQuantNet};
use crate::quantization::{Calibrator, PostTrainingCalibrator, QuantizedModule};
use crate::trainer::{TrainingParams, TrainingReport};

/// Lifecycle guard around a trainable [`Module`].
///
/// Owns the hyperparameters, the trained module, its calibrated integer
/// program and the compiled circuit, and only hands them out in the states
/// where they exist. The classifier and regressor are thin wrappers that add
/// target handling on top.
///
/// The compiler and the calibrator are injected collaborators; by default
/// they are [`SimulatedCompiler`] and [`PostTrainingCalibrator`].
#[derive(Debug, Clone)]
pub struct QuantizedEstimator<M: Module = SparseQuantNet> {
    module_config: M::Config,
    training: TrainingParams,
    state: EstimatorState,
    module: Option<M>,
    quantized: Option<QuantizedModule>,
    circuit: Option<Arc<dyn FheCircuit>>,
    compiler: Arc<dyn FheCompiler>,
    calibrator: Arc<dyn Calibrator>,
    last_report: Option<TrainingReport>,
}

fn hyperparameter_message(err: QnnError) -> String {
    match err {
        QnnError::InvalidHyperparameter(msg) => msg,
        other => other.to_string(),
    }
}

/// Route one flat parameter: `module__*` goes to the module configuration,
/// everything else (and module names it does not know) to the training
/// parameters.
fn apply_param<M: Module>(
    module_config: &mut M::Config,
    training: &mut TrainingParams,
    name: &str,
    value: &Value,
) -> Result<()> {
    if let Some(module_name) = name.strip_prefix("module__") {
        if M::set_param(module_config, module_name, value)? {
            return Ok(());
        }
    }
    training.set(name, value)
}

impl<M: Module> QuantizedEstimator<M> {
    /// Create an estimator in state `Constructed`.
    ///
    /// # Errors
    /// [`QnnError::InvalidHyperparameter`] listing every violated constraint
    /// of `module_config`.
    pub fn new(module_config: M::Config, training: TrainingParams) -> Result<Self> {
        M::validate(&module_config)?;
        debug!(?module_config, "estimator constructed");
        Ok(Self {
            module_config,
            training,
            state: EstimatorState::Constructed,
            module: None,
            quantized: None,
            circuit: None,
            compiler: Arc::new(SimulatedCompiler::new()),
            calibrator: Arc::new(PostTrainingCalibrator::new()),
            last_report: None,
        })
    }

    /// Create an estimator from a flat JSON object of parameters, such as
    /// `{"module__n_layers": 3, "max_epochs": 5}`.
    ///
    /// All type errors and constraint violations are reported together.
    pub fn from_param_map(params: &Value) -> Result<Self> {
        let map = params.as_object().ok_or_else(|| {
            QnnError::InvalidHyperparameter(format!("parameters must be an object, got {params}"))
        })?;
        let mut module_config = M::Config::default();
        let mut training = TrainingParams::default();
        let mut violations: Vec<String> = map
            .iter()
            .filter_map(|(name, value)| {
                apply_param::<M>(&mut module_config, &mut training, name, value).err()
            })
            .map(hyperparameter_message)
            .collect();
        if let Err(e) = M::validate(&module_config) {
            violations.push(hyperparameter_message(e));
        }
        if !violations.is_empty() {
            return Err(QnnError::InvalidHyperparameter(violations.join("; ")));
        }
        Self::new(module_config, training)
    }

    /// Restore an estimator in state `Fitted` from a saved integer program.
    ///
    /// The float module is not part of the program, so only quantized
    /// inference and compilation are available afterwards.
    pub fn from_quantized_module(
        module_config: M::Config,
        training: TrainingParams,
        quantized: QuantizedModule,
    ) -> Result<Self> {
        quantized.check_shapes()?;
        if let Some((input_dim, n_outputs)) = M::io_dims(&module_config) {
            let got = (quantized.input_dim(), quantized.n_outputs());
            if got != (input_dim, n_outputs) {
                return Err(QnnError::InvalidShape {
                    expected: format!("{input_dim} inputs and {n_outputs} outputs"),
                    got: format!("{} inputs and {} outputs", got.0, got.1),
                });
            }
        }
        let mut estimator = Self::new(module_config, training)?;
        estimator.quantized = Some(quantized);
        estimator.state = EstimatorState::Fitted;
        debug!(state = %estimator.state, "estimator restored from quantized module");
        Ok(estimator)
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn FheCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_calibrator(mut self, calibrator: Arc<dyn Calibrator>) -> Self {
        self.calibrator = calibrator;
        self
    }

    /// Set one parameter by its flat name.
    ///
    /// Only types are checked here; constraints are checked again by `fit`,
    /// as a grid search may pass through invalid intermediate combinations.
    /// The lifecycle state is left untouched.
    pub fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        apply_param::<M>(&mut self.module_config, &mut self.training, name, value)
    }

    pub fn state(&self) -> EstimatorState {
        self.state
    }

    pub fn is_fitted(&self) -> bool {
        self.state != EstimatorState::Constructed
    }

    pub fn is_compiled(&self) -> bool {
        self.state == EstimatorState::Compiled
    }

    pub fn module_config(&self) -> &M::Config {
        &self.module_config
    }

    pub fn training_params(&self) -> &TrainingParams {
        &self.training
    }

    /// The trained float module. `None` before `fit` and after
    /// [`from_quantized_module`](Self::from_quantized_module).
    pub fn module(&self) -> Option<&M> {
        self.module.as_ref()
    }

    pub fn quantized_module(&self) -> Option<&QuantizedModule> {
        self.quantized.as_ref()
    }

    pub fn circuit(&self) -> Option<&Arc<dyn FheCircuit>> {
        self.circuit.as_ref()
    }

    pub fn last_report(&self) -> Option<&TrainingReport> {
        self.last_report.as_ref()
    }

    /// Bit width of the quantized activations.
    ///
    /// # Errors
    /// [`QnnError::NotFitted`] before `fit`.
    pub fn n_bits_quant(&self) -> Result<u32> {
        self.fitted_program("the quantization bit width")
            .map(|quantized| quantized.n_a_bits)
    }

    fn fitted_program(&self, what: &str) -> Result<&QuantizedModule> {
        match (&self.state, &self.quantized) {
            (EstimatorState::Constructed, _) | (_, None) => Err(QnnError::not_fitted(what)),
            (_, Some(quantized)) => Ok(quantized),
        }
    }

    fn calibrated_program(&self) -> Result<&QuantizedModule> {
        match (&self.state, &self.quantized) {
            (EstimatorState::Constructed, _) | (_, None) => Err(QnnError::not_calibrated()),
            (_, Some(quantized)) => Ok(quantized),
        }
    }

    /// Train a fresh module on `x`/`y`, then calibrate it on `x`.
    ///
    /// On success the estimator is `Fitted`; a previously compiled circuit is
    /// dropped. On failure the estimator is left as it was.
    pub(crate) fn fit_module(&mut self, x: &Array2<f32>, y: &TrainTargets) -> Result<()> {
        M::validate(&self.module_config)?;
        let mut module =
            M::build(&self.module_config, self.training.random_state).map_err(QnnError::Training)?;
        let report = module
            .fit(x, y, &self.training)
            .map_err(QnnError::Training)?;
        let quantized = self.calibrator.calibrate(&module.export(), x)?;
        debug!(
            epochs = report.epochs_run,
            final_loss = ?report.final_loss(),
            n_a_bits = quantized.n_a_bits,
            worst_case_accumulator_bits = quantized.max_accumulator_bits(),
            "module trained and calibrated"
        );

        if self.circuit.take().is_some() {
            debug!("dropped compiled circuit of the previous fit");
        }
        self.module = Some(module);
        self.quantized = Some(quantized);
        self.last_report = Some(report);
        self.state = EstimatorState::Fitted;
        debug!(state = %self.state, n_samples = x.nrows(), "estimator fitted");
        Ok(())
    }

    /// Compile the calibrated program, using `x` to determine value bounds.
    ///
    /// Compiling again replaces the previous circuit.
    ///
    /// # Errors
    /// [`QnnError::NotCalibrated`] before `fit`; compiler failures are
    /// returned as [`QnnError::Compilation`].
    pub fn compile(
        &mut self,
        x: &Features,
        config: &CompilationConfig,
        use_virtual_lib: bool,
    ) -> Result<&mut Self> {
        let quantized = self.calibrated_program()?;
        let inputset = quantized.quantize_input(&x.to_float_matrix()?)?;
        let circuit = self
            .compiler
            .compile(quantized, &inputset, config, use_virtual_lib)
            .map_err(QnnError::Compilation)?;

        if self.circuit.replace(circuit).is_some() {
            debug!("replaced previously compiled circuit");
        }
        self.state = EstimatorState::Compiled;
        debug!(
            state = %self.state,
            virtual_lib = use_virtual_lib,
            n_inputset = inputset.nrows(),
            "estimator compiled"
        );
        Ok(self)
    }

    /// Raw network outputs, dequantized.
    ///
    /// With `execute_in_fhe` the compiled circuit is run exactly once for the
    /// whole batch. Otherwise the integer program runs in the clear.
    pub fn predict_raw(&self, x: &Features, execute_in_fhe: bool) -> Result<Array2<f32>> {
        if execute_in_fhe {
            let quantized = self.calibrated_program()?;
            let circuit = self.circuit.as_ref().ok_or_else(QnnError::not_compiled)?;
            let q_x = quantized.quantize_input(&x.to_float_matrix()?)?;
            let acc = circuit.run(&q_x).map_err(QnnError::Execution)?;
            Ok(quantized.dequantize_output(&acc))
        } else {
            let quantized = self.fitted_program("quantized inference")?;
            quantized.forward(&x.to_float_matrix()?)
        }
    }

    /// Save the calibrated integer program.
    pub fn save_quantized<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.fitted_program("the quantized module")?.save_to_file(path)
    }
}
