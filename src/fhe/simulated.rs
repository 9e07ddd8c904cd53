use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CompilationConfig;
use crate::error::BoxError;
use crate::fhe::{FheCircuit, FheCompiler};
use crate::quantization::{signed_bits, QuantizedModule};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("inputset is empty")]
    EmptyInputset,

    #[error("inputset has {got} features, the program expects {expected}")]
    InputsetFeatureMismatch { expected: usize, got: usize },

    #[error("virtual execution requires enable_unsafe_features in the compilation configuration")]
    VirtualRequiresUnsafeFeatures,

    #[error("circuit needs {required}-bit integers, the configuration allows at most {max}")]
    BitWidthExceeded { required: u32, max: u32 },

    #[error("invalid compilation configuration: {0}")]
    InvalidConfig(String),

    #[error("quantized program has no layers")]
    EmptyProgram,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("circuit expects {expected} input features, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("input value {value} does not fit the {n_bits}-bit circuit input")]
    InputOutOfRange { value: i64, n_bits: u32 },
}

/// Compiler producing [`IntegerCircuit`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedCompiler;

impl SimulatedCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl FheCompiler for SimulatedCompiler {
    fn compile(
        &self,
        module: &QuantizedModule,
        inputset: &Array2<i64>,
        config: &CompilationConfig,
        use_virtual_lib: bool,
    ) -> Result<Arc<dyn FheCircuit>, BoxError> {
        config
            .validate()
            .map_err(|e| CompileError::InvalidConfig(e.to_string()))?;
        if module.layers.is_empty() {
            return Err(CompileError::EmptyProgram.into());
        }
        if inputset.nrows() == 0 {
            return Err(CompileError::EmptyInputset.into());
        }
        if inputset.ncols() != module.input_dim() {
            return Err(CompileError::InputsetFeatureMismatch {
                expected: module.input_dim(),
                got: inputset.ncols(),
            }
            .into());
        }
        if use_virtual_lib && !config.enable_unsafe_features {
            return Err(CompileError::VirtualRequiresUnsafeFeatures.into());
        }

        let bounds = module.accumulator_ranges(inputset);
        let accumulator_bits = bounds
            .iter()
            .map(|&(lo, hi)| signed_bits(lo.unsigned_abs().max(hi.unsigned_abs())))
            .max()
            .unwrap_or(0);
        let bit_width = accumulator_bits.max(module.n_a_bits);
        debug!(?bounds, accumulator_bits, "measured accumulator bounds");

        if !use_virtual_lib && bit_width > config.max_bit_width {
            return Err(CompileError::BitWidthExceeded {
                required: bit_width,
                max: config.max_bit_width,
            }
            .into());
        }

        let p_error = if use_virtual_lib { 0.0 } else { config.p_error };
        if p_error > 0.0 {
            warn!(p_error, "table lookups will be perturbed with probability p_error");
        }
        info!(
            bit_width,
            virtual_lib = use_virtual_lib,
            n_layers = module.layers.len(),
            "compiled circuit"
        );

        Ok(Arc::new(IntegerCircuit {
            lookup_max: module
                .layers
                .iter()
                .map(|l| l.output_quantizer.map(|q| q.qmax()).unwrap_or(i64::MAX))
                .collect(),
            module: module.clone(),
            bounds,
            bit_width,
            is_virtual: use_virtual_lib,
            p_error,
            seed: config.seed,
            calls: AtomicU64::new(0),
        }))
    }
}

/// Integer program with compiled accumulator bounds.
///
/// Accumulators are clamped to the range observed on the inputset, as an
/// encrypted circuit can only represent values it was compiled for. In
/// encrypted mode, each table lookup is off by one with probability `p_error`.
#[derive(Debug)]
pub struct IntegerCircuit {
    module: QuantizedModule,
    bounds: Vec<(i64, i64)>,
    lookup_max: Vec<i64>,
    bit_width: u32,
    is_virtual: bool,
    p_error: f64,
    seed: u64,
    calls: AtomicU64,
}

impl IntegerCircuit {
    /// Observed `(min, max)` accumulator of every layer.
    pub fn bounds(&self) -> &[(i64, i64)] {
        &self.bounds
    }

    /// Number of times the circuit has been run.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl FheCircuit for IntegerCircuit {
    fn max_bit_width(&self) -> u32 {
        self.bit_width
    }

    fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    fn input_dim(&self) -> usize {
        self.module.input_dim()
    }

    fn run(&self, q_x: &Array2<i64>) -> Result<Array2<i64>, BoxError> {
        if q_x.ncols() != self.input_dim() {
            return Err(ExecutionError::FeatureMismatch {
                expected: self.input_dim(),
                got: q_x.ncols(),
            }
            .into());
        }
        let n_bits = self.module.n_a_bits;
        let input_max = crate::quantization::unsigned_qmax(n_bits);
        if let Some(&value) = q_x.iter().find(|&&v| v < 0 || v > input_max) {
            return Err(ExecutionError::InputOutOfRange { value, n_bits }.into());
        }

        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(call));
        let p_error = self.p_error;

        let out = self.module.run_with(
            q_x,
            |idx, acc| {
                let (lo, hi) = self.bounds[idx];
                acc.mapv_inplace(|v| v.clamp(lo, hi));
            },
            |idx, v| {
                if p_error > 0.0 && rng.random::<f64>() < p_error {
                    let shifted = if rng.random::<bool>() { v + 1 } else { v - 1 };
                    shifted.clamp(0, self.lookup_max[idx])
                } else {
                    v
                }
            },
        );
        debug!(call, n_samples = q_x.nrows(), "circuit executed");
        Ok(out)
    }
}
