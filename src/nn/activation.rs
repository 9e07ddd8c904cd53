use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;
const CELU_ALPHA: f32 = 1.0;

/// Element-wise activation of hidden layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    #[serde(alias = "ReLU", alias = "relu")]
    Relu,
    #[serde(alias = "sigmoid")]
    Sigmoid,
    #[serde(alias = "tanh")]
    Tanh,
    #[serde(alias = "SELU", alias = "selu")]
    Selu,
    #[serde(alias = "CELU", alias = "celu")]
    Celu,
}

impl Activation {
    pub const ALL: [Activation; 5] = [
        Activation::Relu,
        Activation::Sigmoid,
        Activation::Tanh,
        Activation::Selu,
        Activation::Celu,
    ];

    pub fn apply(&self, z: f32) -> f32 {
        match self {
            Activation::Relu => z.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-z).exp()),
            Activation::Tanh => z.tanh(),
            Activation::Selu => {
                if z > 0.0 {
                    SELU_SCALE * z
                } else {
                    SELU_SCALE * SELU_ALPHA * z.exp_m1()
                }
            }
            Activation::Celu => {
                if z > 0.0 {
                    z
                } else {
                    CELU_ALPHA * (z / CELU_ALPHA).exp_m1()
                }
            }
        }
    }

    /// Derivative w.r.t. the pre-activation `z`.
    pub fn derivative(&self, z: f32) -> f32 {
        match self {
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => {
                let s = self.apply(z);
                s * (1.0 - s)
            }
            Activation::Tanh => 1.0 - z.tanh().powi(2),
            Activation::Selu => {
                if z > 0.0 {
                    SELU_SCALE
                } else {
                    SELU_SCALE * SELU_ALPHA * z.exp()
                }
            }
            Activation::Celu => {
                if z > 0.0 {
                    1.0
                } else {
                    (z / CELU_ALPHA).exp()
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::Relu => "ReLU",
            Activation::Sigmoid => "Sigmoid",
            Activation::Tanh => "Tanh",
            Activation::Selu => "SELU",
            Activation::Celu => "CELU",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = String;

    /// Case-insensitive; an optional `nn.` prefix is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name.strip_prefix("nn.").unwrap_or(name);
        Activation::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("unknown activation function {s:?}"))
    }
}
