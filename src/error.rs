//! Error types for estimator operations.
//!
//! [`QnnError`] is the single error type returned by the public API. The four
//! lifecycle kinds (`InvalidHyperparameter`, `NotCalibrated`, `NotFitted`,
//! `NotCompiled`) are raised by the estimator itself. Failures coming from a
//! collaborator (trainable module, FHE compiler, circuit execution) are carried
//! transparently: their `Display` and `source` are those of the original error.

use thiserror::Error;

/// Boxed error produced by a collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, QnnError>;

/// Error type for estimator, preprocessing and model-selection operations.
#[derive(Debug, Error)]
pub enum QnnError {
    /// A hyperparameter violates its constraint. The message names the concept.
    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    /// Compilation or encrypted inference requested before the model was fitted.
    #[error("{0}")]
    NotCalibrated(String),

    /// Fitted metadata requested before the model was trained.
    #[error("{0}")]
    NotFitted(String),

    /// Encrypted inference requested before the model was compiled.
    #[error("{0}")]
    NotCompiled(String),

    /// Input container or value outside the supported set.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// Shape mismatch between expected and actual array dimensions.
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape { expected: String, got: String },

    /// Feature dimension mismatch.
    #[error("Feature mismatch: expected {expected_features} features, got {got_features}")]
    FeatureMismatch {
        expected_features: usize,
        got_features: usize,
    },

    /// Empty data provided where non-empty was required.
    #[error("Empty data: {0}")]
    EmptyData(String),

    /// Invalid parameter of a transformer or model-selection tool.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Numerical computation error.
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// Failure reported by the trainable module.
    #[error(transparent)]
    Training(BoxError),

    /// Failure reported by the FHE compiler.
    #[error(transparent)]
    Compilation(BoxError),

    /// Failure reported by the circuit at execution time.
    #[error(transparent)]
    Execution(BoxError),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl QnnError {
    pub(crate) fn not_calibrated() -> Self {
        QnnError::NotCalibrated(
            "The model needs to be calibrated before compilation or FHE inference: call fit first"
                .to_string(),
        )
    }

    pub(crate) fn not_fitted(what: &str) -> Self {
        QnnError::NotFitted(format!(
            "The estimator must be trained before {what} is available: call fit first"
        ))
    }

    pub(crate) fn not_compiled() -> Self {
        QnnError::NotCompiled(
            "The model is not yet compiled to FHE: call compile before predicting with execute_in_fhe"
                .to_string(),
        )
    }
}

impl From<bincode::Error> for QnnError {
    fn from(err: bincode::Error) -> Self {
        QnnError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for QnnError {
    fn from(err: serde_json::Error) -> Self {
        QnnError::SerializationError(err.to_string())
    }
}
