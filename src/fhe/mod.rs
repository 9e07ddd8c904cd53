//! FHE compilation seam.
//!
//! An [`FheCompiler`] lowers a calibrated [`QuantizedModule`] to an executable
//! [`FheCircuit`]. Circuits consume and produce integers: quantizing the inputs
//! and dequantizing the outputs stays in the clear, on the estimator side.
//!
//! [`SimulatedCompiler`] is the in-process backend. It runs the integer
//! program directly instead of on ciphertexts, while enforcing the same
//! bit-width constraints a real backend would.

use std::fmt::Debug;
use std::sync::Arc;

use ndarray::Array2;

use crate::config::CompilationConfig;
use crate::error::BoxError;
use crate::quantization::QuantizedModule;

mod simulated;

pub use simulated::{CompileError, ExecutionError, IntegerCircuit, SimulatedCompiler};

/// Executable artifact produced by an [`FheCompiler`].
pub trait FheCircuit: Debug + Send + Sync {
    /// Widest integer any intermediate value of the circuit needs.
    fn max_bit_width(&self) -> u32;

    /// Whether the circuit runs in virtual (clear) mode.
    fn is_virtual(&self) -> bool;

    fn input_dim(&self) -> usize;

    /// Evaluate the circuit on quantized inputs, one row per sample.
    ///
    /// Returns the output-layer accumulators.
    fn run(&self, q_x: &Array2<i64>) -> Result<Array2<i64>, BoxError>;
}

pub trait FheCompiler: Debug + Send + Sync {
    /// Compile `module`, using `inputset` (quantized) to determine value bounds.
    fn compile(
        &self,
        module: &QuantizedModule,
        inputset: &Array2<i64>,
        config: &CompilationConfig,
        use_virtual_lib: bool,
    ) -> Result<Arc<dyn FheCircuit>, BoxError>;
}
