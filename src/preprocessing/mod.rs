//! Feature preprocessing for pipelines in front of a quantized estimator.
//!
//! Transformers follow a fit/transform split: an unfitted [`Transformer`]
//! carries hyperparameters, and fitting it produces a [`FittedTransformer`]
//! holding the learned state. Fitted transformers can be saved and restored.
//!
//! # Available transformers
//!
//! - [`StandardScaler`]: Z-score normalization
//! - [`Pca`]: projection onto the leading principal components
//! - [`LabelEncoder`]: maps integer class labels to dense indices
//!
//! # Example
//!
//! ```
//! use fhe_qnn::preprocessing::{FittedTransformer, Pca, Transformer};
//! use ndarray::array;
//!
//! let data = array![[1.0f32, 2.0, 0.0], [2.0, 4.1, 0.0], [3.0, 5.9, 0.1], [4.0, 8.0, 0.0]];
//! let fitted = Pca::new(1).fit(&data).unwrap();
//! assert_eq!(fitted.transform(&data).unwrap().dim(), (4, 1));
//! ```

pub mod decomposition;
pub mod encoding;
pub mod scaling;
mod step;
mod traits;

pub use decomposition::{FittedPca, Pca, PcaParams};
pub use encoding::{FittedLabelEncoder, LabelEncoder, LabelEncoderParams};
pub use scaling::{FittedStandardScaler, StandardScaler, StandardScalerConfig, StandardScalerParams};
pub use step::{FittedStep, TransformerStep};
pub use traits::{FittedTransformer, Transformer};

pub(crate) use traits::check_input;
