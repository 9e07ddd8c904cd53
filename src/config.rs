//! Compilation configuration.
//!
//! [`CompilationConfig`] controls how a calibrated integer program is lowered
//! to an FHE circuit. It is a plain serde struct so it can be kept next to
//! other experiment settings and loaded from JSON.

use serde::{Deserialize, Serialize};

use crate::error::{QnnError, Result};

/// Largest circuit bit width supported by the encrypted backend without
/// unsafe features. Also the default accumulator bit width of the sparse
/// network.
pub const MAX_BITWIDTH_BACKWARD_COMPATIBLE: u32 = 8;

/// Options forwarded to an [`FheCompiler`](crate::fhe::FheCompiler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationConfig {
    /// Maximum integer bit width any intermediate value may need in encrypted mode.
    pub max_bit_width: u32,
    /// Probability that a single table lookup is off by one in encrypted mode.
    pub p_error: f64,
    /// Seed of the lookup-error generator.
    pub seed: u64,
    /// Required for virtual (clear-text) execution.
    pub enable_unsafe_features: bool,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            max_bit_width: MAX_BITWIDTH_BACKWARD_COMPATIBLE,
            p_error: 0.0,
            seed: 0,
            enable_unsafe_features: false,
        }
    }
}

impl CompilationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_max_bit_width(mut self, bits: u32) -> Self {
        self.max_bit_width = bits;
        self
    }

    pub const fn with_p_error(mut self, p_error: f64) -> Self {
        self.p_error = p_error;
        self
    }

    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub const fn with_unsafe_features(mut self, enabled: bool) -> Self {
        self.enable_unsafe_features = enabled;
        self
    }

    /// Check that every field is in range.
    pub fn validate(&self) -> Result<()> {
        if self.max_bit_width == 0 {
            return Err(QnnError::InvalidParameter(
                "max_bit_width must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.p_error) {
            return Err(QnnError::InvalidParameter(format!(
                "p_error must be in [0, 1], got {}",
                self.p_error
            )));
        }
        Ok(())
    }

    /// Parse and validate a configuration from a JSON document.
    ///
    /// Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompilationConfig::default();
        assert_eq!(config.max_bit_width, MAX_BITWIDTH_BACKWARD_COMPATIBLE);
        assert_eq!(config.p_error, 0.0);
        assert!(!config.enable_unsafe_features);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CompilationConfig::new()
            .with_max_bit_width(12)
            .with_p_error(0.01)
            .with_seed(7)
            .with_unsafe_features(true);
        assert_eq!(config.max_bit_width, 12);
        assert_eq!(config.seed, 7);
        assert!(config.enable_unsafe_features);
    }

    #[test]
    fn test_from_json_partial() {
        let config = CompilationConfig::from_json(r#"{"enable_unsafe_features": true}"#).unwrap();
        assert!(config.enable_unsafe_features);
        assert_eq!(config.max_bit_width, 8);
    }

    #[test]
    fn test_validate_rejects_bad_p_error() {
        let config = CompilationConfig::new().with_p_error(1.5);
        assert!(matches!(
            config.validate(),
            Err(QnnError::InvalidParameter(_))
        ));
        assert!(CompilationConfig::from_json(r#"{"max_bit_width": 0}"#).is_err());
    }
}
