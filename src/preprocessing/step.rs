//! Trait object interface for pipeline steps.
//!
//! A [`Pipeline`](crate::model_selection::Pipeline) stores heterogeneous
//! transformers as `Box<dyn TransformerStep>` before fitting and as
//! `Box<dyn FittedStep>` after. Both traits are implemented for every
//! [`Transformer`] / [`FittedTransformer`] through blanket impls.

use std::any::type_name;
use std::fmt::Debug;

use ndarray::Array2;
use serde_json::Value;

use crate::error::Result;
use crate::preprocessing::traits::{FittedTransformer, Transformer};

/// Fitted pipeline step.
pub trait FittedStep: Debug + Send + Sync {
    fn transform(&self, data: &Array2<f32>) -> Result<Array2<f32>>;

    /// Get the step name for debugging.
    fn step_name(&self) -> &'static str;

    fn n_features_in(&self) -> usize;

    fn n_features_out(&self) -> usize;

    fn box_clone(&self) -> Box<dyn FittedStep>;
}

/// Unfitted pipeline step.
pub trait TransformerStep: Debug + Send + Sync {
    /// Fit on `data` and return the fitted step together with the transformed data.
    fn fit_step(&self, data: &Array2<f32>) -> Result<(Box<dyn FittedStep>, Array2<f32>)>;

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()>;

    fn step_name(&self) -> &'static str;

    fn box_clone(&self) -> Box<dyn TransformerStep>;
}

impl Clone for Box<dyn FittedStep> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl Clone for Box<dyn TransformerStep> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Last path segment of a type name, generics stripped.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full_name = type_name::<T>();
    let before_generic = match full_name.find('<') {
        Some(pos) => &full_name[..pos],
        None => full_name,
    };
    match before_generic.rfind("::") {
        Some(pos) => &before_generic[pos + 2..],
        None => before_generic,
    }
}

impl<T> FittedStep for T
where
    T: FittedTransformer + Debug + Send + Sync + 'static,
{
    fn transform(&self, data: &Array2<f32>) -> Result<Array2<f32>> {
        FittedTransformer::transform(self, data)
    }

    fn step_name(&self) -> &'static str {
        short_type_name::<T>()
    }

    fn n_features_in(&self) -> usize {
        FittedTransformer::n_features_in(self)
    }

    fn n_features_out(&self) -> usize {
        FittedTransformer::n_features_out(self)
    }

    fn box_clone(&self) -> Box<dyn FittedStep> {
        Box::new(self.clone())
    }
}

impl<T> TransformerStep for T
where
    T: Transformer + Debug + Send + Sync + 'static,
    T::Fitted: Debug + Send + Sync + 'static,
{
    fn fit_step(&self, data: &Array2<f32>) -> Result<(Box<dyn FittedStep>, Array2<f32>)> {
        let fitted = Transformer::fit(self, data)?;
        let transformed = FittedTransformer::transform(&fitted, data)?;
        Ok((Box::new(fitted), transformed))
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        Transformer::set_param(self, name, value)
    }

    fn step_name(&self) -> &'static str {
        short_type_name::<T>()
    }

    fn box_clone(&self) -> Box<dyn TransformerStep> {
        Box::new(self.clone())
    }
}
