//! # fhe-qnn
//!
//! Quantized neural-network estimators whose trained models are compiled to
//! integer circuits for homomorphic (FHE) execution, behind a classifier /
//! regressor API with pipelines and grid search.
//!
//! ## Core Design Principles
//!
//! - **Enforced lifecycle**: an estimator is `Constructed`, then `Fitted`
//!   (trained and calibrated), then `Compiled`. Out-of-order calls fail with
//!   descriptive errors instead of producing garbage.
//! - **Early validation**: hyperparameters are checked when the estimator is
//!   built, and every violation is reported at once.
//! - **Collaborators behind traits**: the trainable network ([`nn::Module`]),
//!   the quantization calibrator ([`quantization::Calibrator`]) and the FHE
//!   backend ([`fhe::FheCompiler`]) are injected. In-process defaults ship with
//!   the crate.
//! - **Training/Inference Separation**: training logic lives in losses,
//!   optimizers and the trainer; the compiled artifact holds integers only.
//!
//! ## Quick Start
//!
//! ```rust
//! use fhe_qnn::config::CompilationConfig;
//! use fhe_qnn::dataset::synthetic::{make_classification, train_test_split};
//! use fhe_qnn::estimator::NeuralNetClassifier;
//! use fhe_qnn::nn::ModuleParams;
//! use fhe_qnn::trainer::TrainingParams;
//!
//! let (x, y) = make_classification(120, 6, 2, 42).unwrap();
//! let (x_train, x_test, y_train, _y_test) = train_test_split(&x, &y, 0.25, 0).unwrap();
//!
//! let mut model: NeuralNetClassifier = NeuralNetClassifier::new(
//!     ModuleParams::new(6, 2).with_n_w_bits(2).with_n_a_bits(2),
//!     TrainingParams::default().with_max_epochs(5),
//! )
//! .unwrap();
//!
//! model.fit(&x_train, &y_train).unwrap();
//! model.compile(&x_train, &CompilationConfig::default(), false).unwrap();
//!
//! let clear = model.predict(&x_test, false).unwrap();
//! let encrypted = model.predict(&x_test, true).unwrap();
//! assert_eq!(clear.len(), encrypted.len());
//! ```
//!
//! ## Module Structure
//!
//! - `estimator`: lifecycle guard, classifier and regressor
//! - `data`: accepted feature and target containers, dtype coercion
//! - `nn`: trainable modules (`SparseQuantNet`, `Mlp`)
//! - `trainer`, `loss`, `optimizer`, `dataset`: training loop and its parts
//! - `quantization`: quantizers, calibration, the integer program
//! - `fhe`: compiler and circuit traits, simulated backend
//! - `preprocessing`: transformers (`StandardScaler`, `Pca`, `LabelEncoder`)
//! - `model_selection`: `Pipeline`, `KFold`, `GridSearchCv`
//! - `config`, `error`, `serialization`: compilation settings, errors, persistence

pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod estimator;
pub mod fhe;
pub mod loss;
pub mod model_selection;
pub mod nn;
pub mod optimizer;
pub mod preprocessing;
pub mod quantization;
pub mod serialization;
pub mod trainer;

pub use config::{CompilationConfig, MAX_BITWIDTH_BACKWARD_COMPATIBLE};
pub use data::{Features, Targets};
pub use error::{QnnError, Result};
pub use estimator::{
    Estimator, EstimatorState, NeuralNetClassifier, NeuralNetRegressor, QuantizedEstimator,
};
pub use nn::{Activation, ModuleParams, SparseQuantNet};
pub use trainer::TrainingParams;
