//! Matrix decomposition transformers.

mod pca;

pub use pca::{FittedPca, Pca, PcaParams};
