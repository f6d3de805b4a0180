//! Checkpoint collaborator: named parameter tensors from a persisted file.
//!
//! A checkpoint is a flat JSON map of parameter name to a flat `f32` buffer.
//! Loading failures and missing keys are fatal at startup; nothing in the
//! pipeline starts processing cases against a partially resolved model.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

/// Checkpoint loading and lookup failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse checkpoint {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint is missing required parameter {0:?}")]
    MissingKey(String),

    #[error("parameter {key:?} has {got} values, expected {expected}")]
    BadLength {
        key: String,
        expected: usize,
        got: usize,
    },
}

/// An in-memory map of parameter name to tensor values.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    params: HashMap<String, Vec<f32>>,
}

impl Checkpoint {
    /// Load a checkpoint from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let file = File::open(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let params: HashMap<String, Vec<f32>> = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| CheckpointError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info!(
            "loaded checkpoint {} ({} tensors)",
            path.display(),
            params.len()
        );
        Ok(Self { params })
    }

    /// Build a checkpoint from an in-memory map (tests, synthetic runs).
    pub fn from_map(params: HashMap<String, Vec<f32>>) -> Self {
        Self { params }
    }

    /// Number of tensors in the checkpoint.
    #[inline]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Look up a required tensor by name.
    pub fn tensor(&self, key: &str) -> Result<&[f32], CheckpointError> {
        self.params
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| CheckpointError::MissingKey(key.to_string()))
    }

    /// Look up a required tensor and check its length.
    pub fn tensor_with_len(&self, key: &str, expected: usize) -> Result<&[f32], CheckpointError> {
        let values = self.tensor(key)?;
        if values.len() != expected {
            return Err(CheckpointError::BadLength {
                key: key.to_string(),
                expected,
                got: values.len(),
            });
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample() -> Checkpoint {
        let mut map = HashMap::new();
        map.insert("head.weight".to_string(), vec![1.0, 2.0, 3.0, 4.0]);
        map.insert("head.bias".to_string(), vec![0.1, 0.2]);
        Checkpoint::from_map(map)
    }

    #[test]
    fn lookup_and_length_check() {
        let ckpt = sample();
        assert_eq!(ckpt.tensor("head.bias").unwrap(), &[0.1, 0.2]);
        assert!(ckpt.tensor_with_len("head.weight", 4).is_ok());
        assert!(matches!(
            ckpt.tensor_with_len("head.weight", 6),
            Err(CheckpointError::BadLength { got: 4, .. })
        ));
    }

    #[test]
    fn missing_key_is_fatal() {
        assert!(matches!(
            sample().tensor("encoder.weight"),
            Err(CheckpointError::MissingKey(_))
        ));
    }

    #[test]
    fn load_round_trip() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"head.bias": [1.5, -2.5]}}"#).unwrap();
        let ckpt = Checkpoint::load(file.path()).unwrap();
        assert_eq!(ckpt.tensor("head.bias").unwrap(), &[1.5, -2.5]);
    }

    #[test]
    fn unreadable_file_reports_path() {
        let err = Checkpoint::load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/model.json"));
    }
}
