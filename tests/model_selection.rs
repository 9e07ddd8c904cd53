use fhe_qnn::config::CompilationConfig;
use fhe_qnn::dataset::synthetic::make_classification;
use fhe_qnn::dataset::TrainTargets;
use fhe_qnn::error::{BoxError, QnnError, Result};
use fhe_qnn::estimator::{Estimator, EstimatorState, NeuralNetClassifier};
use fhe_qnn::model_selection::{GridSearchCv, KFold, ParamGrid, Pipeline};
use fhe_qnn::nn::{Activation, Mlp, Module, ModuleParams, NetworkGraph};
use fhe_qnn::preprocessing::{Pca, StandardScaler};
use fhe_qnn::trainer::{TrainableModel, TrainingParams, TrainingReport};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn data() -> (Array2<f64>, Array1<i64>) {
    make_classification(150, 6, 2, 3).unwrap()
}

fn net() -> NeuralNetClassifier {
    NeuralNetClassifier::new(
        ModuleParams::new(2, 2)
            .with_n_layers(2)
            .with_n_w_bits(2)
            .with_n_a_bits(2),
        TrainingParams::default().with_max_epochs(2).with_batch_size(32),
    )
    .unwrap()
}

fn pipeline() -> Pipeline<NeuralNetClassifier> {
    Pipeline::new("net", net())
        .add_step("pca", Pca::new(2))
        .add_step("scaler", StandardScaler::new())
}

#[test]
fn test_grid_search_over_pipeline() {
    let (x, y) = data();
    let mut grid = ParamGrid::new();
    grid.insert("net__max_epochs".into(), vec![json!(1), json!(3)]);
    grid.insert("scaler__with_std".into(), vec![json!(true), json!(false)]);

    let mut search = GridSearchCv::new(pipeline(), grid).with_cv(KFold::new(3).unwrap());
    search.fit(&x, &y).unwrap();

    assert_eq!(search.cv_results().len(), 4);
    for result in search.cv_results() {
        assert_eq!(result.fold_scores.len(), 3);
        assert!((0.0..=1.0).contains(&result.mean_score), "{result:?}");
    }
    let best = search.best_params().unwrap();
    assert!(best["net__max_epochs"] == json!(1) || best["net__max_epochs"] == json!(3));
    let best_score = search.best_score().unwrap();
    assert!(search
        .cv_results()
        .iter()
        .all(|r| r.mean_score <= best_score));

    let best_pipeline = search.best_estimator().unwrap();
    assert_eq!(best_pipeline.final_estimator().state(), EstimatorState::Fitted);
}

#[test]
fn test_best_pipeline_compiles_and_predicts_in_fhe() {
    let (x, y) = data();
    let mut grid = ParamGrid::new();
    grid.insert("net__lr".into(), vec![json!(0.01), json!(0.1)]);
    let mut search = GridSearchCv::new(pipeline(), grid).with_cv(KFold::new(2).unwrap());
    search.fit(&x, &y).unwrap();

    let mut best = search.best_estimator().unwrap().clone();
    let transformed = best.transform(&x).unwrap();
    assert_eq!(transformed.ncols(), 2);

    let classifier = best.final_estimator_mut();
    classifier
        .compile(&transformed, &CompilationConfig::default(), false)
        .unwrap();
    let encrypted = classifier.predict(&transformed, true).unwrap();
    assert_eq!(encrypted.len(), x.nrows());
    assert!(encrypted.iter().all(|c| *c == 0 || *c == 1));
}

#[test]
fn test_grid_search_directly_on_classifier() {
    let (x, y) = data();
    let model: NeuralNetClassifier = NeuralNetClassifier::new(
        ModuleParams::new(6, 2).with_n_layers(2),
        TrainingParams::default().with_max_epochs(2),
    )
    .unwrap();
    let mut grid = ParamGrid::new();
    grid.insert("module__n_w_bits".into(), vec![json!(2), json!(3)]);
    grid.insert("module__n_a_bits".into(), vec![json!(2)]);

    let mut search = GridSearchCv::new(model, grid).with_cv(KFold::new(3).unwrap().with_shuffle(1));
    search.fit(&x, &y).unwrap();
    assert_eq!(search.cv_results().len(), 2);

    let best = search.best_estimator().unwrap();
    assert_eq!(best.n_bits_quant().unwrap(), 2);
    assert_eq!(best.predict(&x, false).unwrap().len(), x.nrows());
}

#[test]
fn test_invalid_candidate_aborts_search() {
    let (x, y) = data();
    let mut grid = ParamGrid::new();
    grid.insert("net__module__n_layers".into(), vec![json!(2), json!(0)]);
    let mut search = GridSearchCv::new(pipeline(), grid).with_cv(KFold::new(2).unwrap());
    let err = search.fit(&x, &y).unwrap_err();
    assert!(matches!(err, QnnError::InvalidHyperparameter(_)), "{err:?}");
    assert!(err.to_string().contains("number of layers"));
    assert!(search.best_estimator().is_err());
}

#[test]
fn test_unknown_pipeline_step_rejected() {
    let (x, y) = data();
    let mut grid = ParamGrid::new();
    grid.insert("model__max_epochs".into(), vec![json!(1)]);
    let mut search = GridSearchCv::new(pipeline(), grid).with_cv(KFold::new(2).unwrap());
    assert!(matches!(
        search.fit(&x, &y),
        Err(QnnError::InvalidParameter(_))
    ));
}

/// Hyperparameters of [`DenseNet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct DenseConfig {
    input_dim: usize,
    n_outputs: usize,
    hidden: usize,
    n_bits: u32,
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            input_dim: 2,
            n_outputs: 2,
            hidden: 8,
            n_bits: 4,
        }
    }
}

/// Unpruned two-layer network, compiled in virtual mode only.
#[derive(Debug, Clone)]
struct DenseNet {
    config: DenseConfig,
    mlp: Mlp,
}

impl Module for DenseNet {
    type Config = DenseConfig;

    fn validate(config: &DenseConfig) -> Result<()> {
        let mut violations = Vec::new();
        if config.input_dim == 0 {
            violations.push("number of input dimensions must be > 0");
        }
        if config.n_outputs == 0 {
            violations.push("number of outputs must be > 0");
        }
        if config.hidden == 0 {
            violations.push("hidden width must be > 0");
        }
        if config.n_bits == 0 {
            violations.push("quantization bitwidth must be > 0");
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(QnnError::InvalidHyperparameter(violations.join("; ")))
        }
    }

    fn set_param(config: &mut DenseConfig, name: &str, value: &Value) -> Result<bool> {
        let target = match name {
            "input_dim" => &mut config.input_dim,
            "n_outputs" => &mut config.n_outputs,
            "hidden" => &mut config.hidden,
            "n_bits" => {
                config.n_bits = value.as_u64().ok_or_else(|| {
                    QnnError::InvalidHyperparameter(format!("quantization bitwidth: {value}"))
                })? as u32;
                return Ok(true);
            }
            _ => return Ok(false),
        };
        *target = value.as_u64().ok_or_else(|| {
            QnnError::InvalidHyperparameter(format!("{name} must be a non-negative integer"))
        })? as usize;
        Ok(true)
    }

    fn build(config: &DenseConfig, seed: u64) -> std::result::Result<Self, BoxError> {
        let mlp = Mlp::new(
            &[config.input_dim, config.hidden, config.n_outputs],
            Activation::Relu,
            seed,
        )?
        .with_weight_bits(config.n_bits);
        Ok(Self {
            config: config.clone(),
            mlp,
        })
    }

    fn fit(
        &mut self,
        x: &Array2<f32>,
        y: &TrainTargets,
        params: &TrainingParams,
    ) -> std::result::Result<TrainingReport, BoxError> {
        Ok(self.mlp.train(x, y, params)?)
    }

    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        self.mlp.forward(x)
    }

    fn export(&self) -> NetworkGraph {
        self.mlp.export(self.config.n_bits, self.config.n_bits)
    }

    fn n_bits_quant(&self) -> u32 {
        self.config.n_bits
    }
}

#[test]
fn test_custom_module_in_pipeline() {
    let (x, y) = data();
    let model: NeuralNetClassifier<DenseNet> = NeuralNetClassifier::from_param_map(&json!({
        "module__input_dim": 2,
        "module__hidden": 6,
        "max_epochs": 2,
    }))
    .unwrap();
    let mut pipeline = Pipeline::new("dense", model)
        .add_step("pca", Pca::new(2))
        .add_step("scaler", StandardScaler::new());
    pipeline.set_param("dense__module__n_bits", &json!(3)).unwrap();
    pipeline.fit(&x, &y).unwrap();

    let transformed = pipeline.transform(&x).unwrap();
    let dense = pipeline.final_estimator_mut();
    assert_eq!(dense.n_bits_quant().unwrap(), 3);
    dense
        .compile(
            &transformed,
            &CompilationConfig::default().with_unsafe_features(true),
            true,
        )
        .unwrap();
    assert_eq!(
        dense.predict(&transformed, true).unwrap(),
        dense.predict(&transformed, false).unwrap()
    );
}
