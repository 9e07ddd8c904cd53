//! Mini-batch gradient training.
//!
//! [`Trainer`] runs the classic loop: for every epoch, for every batch,
//! forward, loss, gradient w.r.t. the outputs, backward, optimizer step.
//! It is built once with [`TrainerBuilder`] and can then train any number of
//! models implementing [`TrainableModel`].

use std::convert::Infallible;
use std::marker::PhantomData;

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::loss::Loss;
use crate::optimizer::Optimizer;

mod params;

pub use params::TrainingParams;

/// Errors raised while training a module.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("dataset is empty")]
    EmptyDataset,

    #[error("features have {features} rows but targets have {targets}")]
    LengthMismatch { features: usize, targets: usize },

    #[error("batch size must be > 0")]
    ZeroBatchSize,

    #[error("learning rate must be a positive finite number, got {0}")]
    InvalidLearningRate(f32),

    #[error("loss diverged (non-finite value) at epoch {epoch}")]
    Diverged { epoch: usize },

    #[error("targets contain {n_classes} classes but the network has {n_outputs} outputs")]
    TooManyClasses { n_classes: usize, n_outputs: usize },

    #[error("class weight has {got} entries, expected one per output ({expected})")]
    ClassWeightLength { expected: usize, got: usize },

    #[error("targets have {got} columns, expected {expected}")]
    TargetWidth { expected: usize, got: usize },

    #[error("input has {got} features, expected {expected}")]
    FeatureWidth { expected: usize, got: usize },

    #[error("{0}")]
    TargetKind(&'static str),

    #[error("invalid network architecture: {0}")]
    InvalidArchitecture(String),
}

impl From<Infallible> for TrainError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// Element-wise arithmetic on model parameters, used by optimizers.
pub trait ParamOps: Clone {
    fn add(&self, other: &Self) -> Self;
    fn scale(&self, scalar: f32) -> Self;
}

pub trait TrainableModel {
    type Params: ParamOps;

    fn forward(&self, input: &Array2<f32>) -> Array2<f32>;
    fn backward(&self, input: &Array2<f32>, grad_output: &Array2<f32>) -> Self::Params;
    fn params(&self) -> &Self::Params;
    fn update_params(&mut self, new_params: &Self::Params);
}

/// Summary of a training run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainingReport {
    pub epochs_run: usize,
    /// Mean loss of every epoch, in order.
    pub epoch_losses: Vec<f32>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

pub struct Trainer<L, O, M>
where
    L: Loss,
    M: TrainableModel,
    O: Optimizer<M::Params>,
{
    pub(crate) batch_size: usize,
    pub(crate) max_epochs: usize,
    pub(crate) verbose: bool,
    pub(crate) shuffle_seed: Option<u64>,
    pub(crate) loss_fn: L,
    pub(crate) optimizer: O,
    _phantom_model: PhantomData<M>,
}

pub struct TrainerBuilder<L, O, M>
where
    L: Loss,
    M: TrainableModel,
    O: Optimizer<M::Params>,
{
    batch_size: usize,
    max_epochs: usize,
    verbose: bool,
    shuffle_seed: Option<u64>,
    loss_fn: L,
    optimizer: O,
    _phantom_model: PhantomData<M>,
}

impl<L, O, M> TrainerBuilder<L, O, M>
where
    L: Loss,
    M: TrainableModel,
    O: Optimizer<M::Params>,
{
    pub fn new(loss_fn: L, optimizer: O) -> Self {
        Self {
            batch_size: 32,
            max_epochs: 1000,
            verbose: false,
            shuffle_seed: None,
            loss_fn,
            optimizer,
            _phantom_model: PhantomData,
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn max_epochs(mut self, epochs: usize) -> Self {
        self.max_epochs = epochs;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Visit samples in a fresh seeded order every epoch.
    pub fn shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn build(self) -> Trainer<L, O, M> {
        Trainer {
            batch_size: self.batch_size,
            max_epochs: self.max_epochs,
            verbose: self.verbose,
            shuffle_seed: self.shuffle_seed,
            loss_fn: self.loss_fn,
            optimizer: self.optimizer,
            _phantom_model: PhantomData,
        }
    }
}

impl<L, O, M> Trainer<L, O, M>
where
    L: Loss,
    M: TrainableModel,
    O: Optimizer<M::Params>,
{
    pub fn builder(loss_fn: L, optimizer: O) -> TrainerBuilder<L, O, M> {
        TrainerBuilder::new(loss_fn, optimizer)
    }

    /// Train `model` in place on `dataset`.
    pub fn fit<D>(&self, model: &mut M, dataset: &D) -> Result<TrainingReport, TrainError>
    where
        D: Dataset,
        TrainError: From<D::Error>,
    {
        if self.batch_size == 0 {
            return Err(TrainError::ZeroBatchSize);
        }
        let n_total = dataset.len().ok_or(TrainError::EmptyDataset)?;
        if n_total == 0 {
            return Err(TrainError::EmptyDataset);
        }

        let mut rng = self.shuffle_seed.map(ChaCha8Rng::seed_from_u64);
        let mut order: Vec<usize> = (0..n_total).collect();
        let mut report = TrainingReport::default();

        for epoch in 0..self.max_epochs {
            if let Some(rng) = rng.as_mut() {
                order.shuffle(rng);
            }

            let mut total_loss = 0.0f32;
            for batch in dataset.batches_in_order(&order, self.batch_size) {
                let (batch_x, batch_y) = batch?;
                let preds = model.forward(&batch_x);
                total_loss += self.loss_fn.loss(&preds, &batch_y)? * batch_x.nrows() as f32;
                let grad_preds = self.loss_fn.grad_wrt_prediction(&preds, &batch_y)?;
                let grads = model.backward(&batch_x, &grad_preds);
                let new_params = self.optimizer.step(model.params(), &grads);
                model.update_params(&new_params);
            }

            let avg_loss = total_loss / n_total as f32;
            if !avg_loss.is_finite() {
                return Err(TrainError::Diverged { epoch });
            }
            if self.verbose {
                info!(epoch, loss = avg_loss, "epoch finished");
            } else {
                debug!(epoch, loss = avg_loss, "epoch finished");
            }
            report.epoch_losses.push(avg_loss);
            report.epochs_run = epoch + 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{InMemoryDataset, TrainTargets};
    use crate::loss::MseLoss;
    use crate::optimizer::Sgd;
    use ndarray::{array, Array1};

    /// y = w * x + b with a single output.
    #[derive(Clone)]
    struct Line {
        params: LineParams,
    }

    #[derive(Clone)]
    struct LineParams {
        w: f32,
        b: f32,
    }

    impl ParamOps for LineParams {
        fn add(&self, other: &Self) -> Self {
            Self {
                w: self.w + other.w,
                b: self.b + other.b,
            }
        }

        fn scale(&self, scalar: f32) -> Self {
            Self {
                w: self.w * scalar,
                b: self.b * scalar,
            }
        }
    }

    impl TrainableModel for Line {
        type Params = LineParams;

        fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
            input.mapv(|x| self.params.w * x + self.params.b)
        }

        fn backward(&self, input: &Array2<f32>, grad_output: &Array2<f32>) -> LineParams {
            let g: Array1<f32> = grad_output.column(0).to_owned();
            LineParams {
                w: (&input.column(0) * &g).sum(),
                b: g.sum(),
            }
        }

        fn params(&self) -> &LineParams {
            &self.params
        }

        fn update_params(&mut self, new_params: &LineParams) {
            self.params = new_params.clone();
        }
    }

    fn line_data() -> InMemoryDataset {
        let x = array![[0.0f32], [1.0], [2.0], [3.0]];
        let y = TrainTargets::Values(x.mapv(|v| 2.0 * v + 1.0));
        InMemoryDataset::new(x, y).unwrap()
    }

    #[test]
    fn test_fit_reduces_loss() {
        let mut model = Line {
            params: LineParams { w: 0.0, b: 0.0 },
        };
        let trainer = Trainer::builder(MseLoss, Sgd::new(0.1))
            .batch_size(4)
            .max_epochs(200)
            .build();
        let report = trainer.fit(&mut model, &line_data()).unwrap();
        assert_eq!(report.epochs_run, 200);
        assert!(report.final_loss().unwrap() < report.epoch_losses[0]);
        assert!((model.params.w - 2.0).abs() < 0.1);
        assert!((model.params.b - 1.0).abs() < 0.2);
    }

    #[test]
    fn test_divergence_is_reported() {
        let mut model = Line {
            params: LineParams { w: 0.0, b: 0.0 },
        };
        let trainer = Trainer::builder(MseLoss, Sgd::new(1.0e6))
            .batch_size(1)
            .max_epochs(50)
            .shuffle(3)
            .build();
        assert!(matches!(
            trainer.fit(&mut model, &line_data()),
            Err(TrainError::Diverged { .. })
        ));
    }

    #[test]
    fn test_zero_batch_size() {
        let mut model = Line {
            params: LineParams { w: 0.0, b: 0.0 },
        };
        let trainer = Trainer::builder(MseLoss, Sgd::new(0.1)).batch_size(0).build();
        assert!(matches!(
            trainer.fit(&mut model, &line_data()),
            Err(TrainError::ZeroBatchSize)
        ));
    }
}
