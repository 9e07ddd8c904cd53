//! Serialization of calibrated programs and fitted transformer parameters.
//!
//! Anything that is plain data and implements serde's traits can be turned
//! into bytes with bincode, without knowing about the estimator that owns it.

use std::error::Error;
use std::path::Path;

/// A trait for parameter representations that can be serialized to and from bytes.
///
/// Implementors should contain only plain numerical data (arrays, scalars,
/// enums), not compiled circuits or collaborator handles.
pub trait SerializableParams: Sized {
    /// The error type returned during (de)serialization.
    type Error: Error + Send + Sync + 'static;

    /// Serialize the parameters into a byte buffer.
    fn to_bytes(&self) -> Result<Vec<u8>, Self::Error>;

    /// Deserialize the parameters from a byte buffer.
    fn from_bytes(bytes: &[u8]) -> Result<Self, Self::Error>;
}

impl<T> SerializableParams for T
where
    T: serde::Serialize + for<'de> serde::Deserialize<'de>,
{
    type Error = bincode::Error;

    fn to_bytes(&self) -> Result<Vec<u8>, Self::Error> {
        bincode::serialize(self)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Self::Error> {
        bincode::deserialize(bytes)
    }
}

/// Write `params` to `path` in bincode format.
pub(crate) fn write_params<T: SerializableParams, P: AsRef<Path>>(
    params: &T,
    path: P,
) -> crate::error::Result<()>
where
    crate::error::QnnError: From<T::Error>,
{
    let bytes = params.to_bytes()?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read parameters previously written with [`write_params`].
pub(crate) fn read_params<T: SerializableParams, P: AsRef<Path>>(
    path: P,
) -> crate::error::Result<T>
where
    crate::error::QnnError: From<T::Error>,
{
    let bytes = std::fs::read(path)?;
    Ok(T::from_bytes(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::NamedTempFile;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Params {
        weights: Vec<i64>,
        scale: f32,
    }

    #[test]
    fn test_bytes_round_trip() {
        let p = Params {
            weights: vec![-3, 0, 2],
            scale: 0.25,
        };
        let bytes = p.to_bytes().unwrap();
        assert_eq!(Params::from_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn test_file_round_trip() {
        let p = Params {
            weights: vec![1, 1],
            scale: 2.0,
        };
        let file = NamedTempFile::new().unwrap();
        write_params(&p, file.path()).unwrap();
        let loaded: Params = read_params(file.path()).unwrap();
        assert_eq!(loaded, p);
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let res: crate::error::Result<Params> = read_params(dir.path().join("missing.bin"));
        assert!(matches!(res, Err(crate::error::QnnError::IoError(_))));
    }
}
