//! Train a quantized classifier, compile it and compare clear and encrypted predictions.
//!
//! Run with `RUST_LOG=fhe_qnn=debug` to follow every lifecycle transition.

use fhe_qnn::config::CompilationConfig;
use fhe_qnn::dataset::synthetic::{make_classification, make_regression, train_test_split};
use fhe_qnn::estimator::{NeuralNetClassifier, NeuralNetRegressor};
use fhe_qnn::fhe::FheCircuit;
use fhe_qnn::nn::ModuleParams;
use fhe_qnn::quantization::QuantizedModule;
use fhe_qnn::trainer::TrainingParams;
use fhe_qnn::QnnError;
use std::error::Error;

fn accuracy(predicted: &ndarray::Array1<i64>, expected: &ndarray::Array1<i64>) -> f64 {
    let correct = predicted
        .iter()
        .zip(expected.iter())
        .filter(|(p, e)| p == e)
        .count();
    correct as f64 / expected.len() as f64
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== Encrypted classifier ===\n");

    let (x, y) = make_classification(600, 10, 3, 7)?;
    let (x_train, x_test, y_train, y_test) = train_test_split(&x, &y, 0.25, 7)?;
    println!(
        "Train: {} samples, test: {} samples, {} features",
        x_train.nrows(),
        x_test.nrows(),
        x_train.ncols()
    );

    let mut model: NeuralNetClassifier = NeuralNetClassifier::new(
        ModuleParams::new(10, 3).with_n_w_bits(2).with_n_a_bits(2),
        TrainingParams::default()
            .with_max_epochs(30)
            .with_lr(0.05)
            .with_batch_size(32),
    )?;

    // Nothing works before fit.
    match model.predict(&x_test, true) {
        Err(QnnError::NotCalibrated(msg)) => println!("Before fit: {msg}"),
        other => println!("Unexpected: {other:?}"),
    }

    model.fit(&x_train, &y_train)?;
    if let Some(report) = model.estimator().last_report() {
        println!(
            "Trained for {} epochs, final loss {:?}",
            report.epochs_run,
            report.final_loss()
        );
    }
    println!("Activation bit width: {}", model.n_bits_quant()?);
    println!("Classes: {}", model.classes()?);

    match model.predict(&x_test, true) {
        Err(QnnError::NotCompiled(msg)) => println!("Before compile: {msg}"),
        other => println!("Unexpected: {other:?}"),
    }

    let clear = model.predict(&x_test, false)?;
    println!("\nClear quantized accuracy: {:.3}", accuracy(&clear, &y_test));

    let virtual_config = CompilationConfig::default().with_unsafe_features(true);
    model.compile(&x_train, &virtual_config, true)?;
    let simulated = model.predict(&x_test, true)?;
    println!("Virtual circuit accuracy: {:.3}", accuracy(&simulated, &y_test));

    model.compile(&x_train, &CompilationConfig::default(), false)?;
    if let Some(circuit) = model.estimator().circuit() {
        println!("Compiled circuit uses {}-bit integers", circuit.max_bit_width());
    }
    let encrypted = model.predict(&x_test, true)?;
    println!("Encrypted accuracy: {:.3}", accuracy(&encrypted, &y_test));
    let agreement = clear
        .iter()
        .zip(encrypted.iter())
        .filter(|(c, e)| c == e)
        .count();
    println!("Clear/encrypted agreement: {agreement}/{}", clear.len());

    // The integer program can be stored and served without retraining.
    let path = std::env::temp_dir().join("fhe_qnn_classifier.bin");
    model.estimator().save_quantized(&path)?;
    let restored: NeuralNetClassifier = NeuralNetClassifier::from_quantized_module(
        ModuleParams::new(10, 3).with_n_w_bits(2).with_n_a_bits(2),
        TrainingParams::default(),
        QuantizedModule::load_from_file(&path)?,
        model.classes()?.to_vec(),
    )?;
    println!(
        "Restored model agrees with the original: {}",
        restored.predict(&x_test, false)? == clear
    );
    std::fs::remove_file(&path)?;

    println!("\n=== Encrypted regressor ===\n");
    let (x, y) = make_regression(400, 4, 0.1, 3)?;
    let (x_train, x_test, y_train, y_test) = train_test_split(&x, &y, 0.25, 3)?;
    let mut regressor: NeuralNetRegressor = NeuralNetRegressor::new(
        ModuleParams::new(4, 1).with_n_w_bits(3).with_n_a_bits(3),
        TrainingParams::default().with_max_epochs(40).with_lr(0.01),
    )?;
    regressor.fit(&x_train, &y_train)?;
    regressor.compile(&x_train, &CompilationConfig::default(), false)?;
    println!("Clear R2: {:.3}", regressor.score(&x_test, &y_test)?);
    let predicted = regressor.predict(&x_test, true)?;
    for (p, t) in predicted.column(0).iter().zip(y_test.iter()).take(5) {
        println!("  predicted {p:>8.3}  expected {t:>8.3}");
    }

    Ok(())
}
