//! Tune a PCA + scaler + quantized classifier pipeline with grid search, then
//! compile the winner for encrypted inference.

use fhe_qnn::config::CompilationConfig;
use fhe_qnn::dataset::synthetic::{make_classification, train_test_split};
use fhe_qnn::estimator::NeuralNetClassifier;
use fhe_qnn::model_selection::{GridSearchCv, KFold, ParamGrid, Pipeline};
use fhe_qnn::nn::ModuleParams;
use fhe_qnn::preprocessing::{Pca, StandardScaler};
use fhe_qnn::trainer::TrainingParams;
use serde_json::json;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (x, y) = make_classification(400, 8, 2, 11)?;
    let (x_train, x_test, y_train, y_test) = train_test_split(&x, &y, 0.2, 11)?;

    let net: NeuralNetClassifier = NeuralNetClassifier::new(
        ModuleParams::new(3, 2).with_n_w_bits(2).with_n_a_bits(2),
        TrainingParams::default().with_batch_size(32),
    )?;
    let pipeline = Pipeline::new("net", net)
        .add_step("pca", Pca::new(3))
        .add_step("scaler", StandardScaler::new());
    println!("Pipeline steps: {:?}", pipeline.step_names());

    let mut grid = ParamGrid::new();
    grid.insert("net__max_epochs".into(), vec![json!(5), json!(20)]);
    grid.insert("net__lr".into(), vec![json!(0.01), json!(0.05)]);
    grid.insert("net__module__n_layers".into(), vec![json!(2), json!(3)]);

    let mut search = GridSearchCv::new(pipeline, grid).with_cv(KFold::new(3)?.with_shuffle(0));
    search.fit(&x_train, &y_train)?;

    println!("\n{:<60} {:>8}", "parameters", "accuracy");
    for result in search.cv_results() {
        let params = serde_json::to_string(&result.params)?;
        println!("{params:<60} {:>8.3}", result.mean_score);
    }
    println!("\nBest parameters: {}", serde_json::to_string(search.best_params()?)?);
    println!("Best CV accuracy: {:.3}", search.best_score()?);

    let mut best = search.best_estimator()?.clone();
    let train_features = best.transform(&x_train)?;
    let test_features = best.transform(&x_test)?;

    let classifier = best.final_estimator_mut();
    classifier.compile(&train_features, &CompilationConfig::default(), false)?;
    println!("Held-out clear accuracy: {:.3}", classifier.score(&test_features, &y_test)?);

    let encrypted = classifier.predict(&test_features, true)?;
    let correct = encrypted
        .iter()
        .zip(y_test.iter())
        .filter(|(p, t)| p == t)
        .count();
    println!(
        "Held-out encrypted accuracy: {:.3}",
        correct as f64 / y_test.len() as f64
    );

    Ok(())
}
