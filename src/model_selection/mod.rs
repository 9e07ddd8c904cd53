//! Model selection: pipelines, cross-validation splits and grid search.
//!
//! Everything here works on the [`Estimator`](crate::estimator::Estimator)
//! trait, so a [`Pipeline`] ending in an estimator can itself be searched by
//! [`GridSearchCv`]. Parameters are addressed by flat names: `"lr"` on an
//! estimator, `"pca__n_components"` or `"net__module__n_layers"` through a
//! pipeline.

mod grid_search;
mod pipeline;
mod split;

pub use grid_search::{CvResult, GridSearchCv, ParamGrid};
pub use pipeline::Pipeline;
pub use split::KFold;
