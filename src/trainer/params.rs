use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QnnError, Result};

/// Training controls forwarded to the trainable module on `fit`.
///
/// Keys that are not recognized by [`TrainingParams::set`] are kept in
/// `extra` and handed to the module as they are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub max_epochs: usize,
    pub lr: f32,
    pub batch_size: usize,
    pub verbose: u32,
    /// Per-class weight of the cross-entropy loss.
    pub class_weight: Option<Vec<f32>>,
    /// Seed of weight initialization and batch shuffling.
    pub random_state: u64,
    pub extra: BTreeMap<String, Value>,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            lr: 0.01,
            batch_size: 128,
            verbose: 0,
            class_weight: None,
            random_state: 0,
            extra: BTreeMap::new(),
        }
    }
}

fn as_usize(name: &str, value: &Value) -> Result<usize> {
    value.as_u64().map(|v| v as usize).ok_or_else(|| {
        QnnError::InvalidHyperparameter(format!(
            "{name} expects a non-negative integer, got {value}"
        ))
    })
}

impl TrainingParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_lr(mut self, lr: f32) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_verbose(mut self, verbose: u32) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_class_weight(mut self, class_weight: Vec<f32>) -> Self {
        self.class_weight = Some(class_weight);
        self
    }

    pub fn with_random_state(mut self, random_state: u64) -> Self {
        self.random_state = random_state;
        self
    }

    /// Set one parameter from its flat name.
    ///
    /// `criterion__weight` sets the class weights (`null` clears them).
    /// Unknown names are stored in `extra` without validation.
    pub fn set(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "max_epochs" => self.max_epochs = as_usize(name, value)?,
            "batch_size" => self.batch_size = as_usize(name, value)?,
            "verbose" => self.verbose = as_usize(name, value)? as u32,
            "random_state" => self.random_state = as_usize(name, value)? as u64,
            "lr" => {
                self.lr = value.as_f64().ok_or_else(|| {
                    QnnError::InvalidHyperparameter(format!("lr expects a number, got {value}"))
                })? as f32
            }
            "criterion__weight" => {
                self.class_weight = if value.is_null() {
                    None
                } else {
                    Some(serde_json::from_value(value.clone()).map_err(|e| {
                        QnnError::InvalidHyperparameter(format!(
                            "criterion__weight expects a list of numbers: {e}"
                        ))
                    })?)
                }
            }
            _ => {
                self.extra.insert(name.to_string(), value.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let p = TrainingParams::default();
        assert_eq!(p.max_epochs, 10);
        assert_eq!(p.verbose, 0);
        assert!(p.class_weight.is_none());
    }

    #[test]
    fn test_set_known_keys() {
        let mut p = TrainingParams::new();
        p.set("max_epochs", &json!(3)).unwrap();
        p.set("lr", &json!(0.1)).unwrap();
        p.set("criterion__weight", &json!([1.0, 2.0])).unwrap();
        assert_eq!(p.max_epochs, 3);
        assert!((p.lr - 0.1).abs() < 1e-7);
        assert_eq!(p.class_weight, Some(vec![1.0, 2.0]));

        p.set("criterion__weight", &Value::Null).unwrap();
        assert!(p.class_weight.is_none());
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let mut p = TrainingParams::new();
        p.set("iterator_train__shuffle", &json!(true)).unwrap();
        assert_eq!(p.extra.get("iterator_train__shuffle"), Some(&json!(true)));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let mut p = TrainingParams::new();
        assert!(p.set("max_epochs", &json!("ten")).is_err());
        assert!(p.set("criterion__weight", &json!("heavy")).is_err());
    }

    #[test]
    fn test_serde_partial() {
        let p: TrainingParams = serde_json::from_str(r#"{"max_epochs": 2}"#).unwrap();
        assert_eq!(p.max_epochs, 2);
        assert_eq!(p.batch_size, 128);
    }
}
