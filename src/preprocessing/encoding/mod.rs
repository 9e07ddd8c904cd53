//! Target encoding.

mod label;

pub use label::{FittedLabelEncoder, LabelEncoder, LabelEncoderParams};
