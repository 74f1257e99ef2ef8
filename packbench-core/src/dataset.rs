//! Dataset Descriptors
//!
//! A dataset is a named raw binary file with a known element type and
//! dimensions. Descriptors come from a JSON array so every process sees
//! the same ordering — dataset ids on the wire are indices into this list.

use crate::data::{DataBuffer, DataError, Dtype};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading dataset descriptors or their contents
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse dataset config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read dataset {name} from {path}: {source}")]
    Read {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset {name} has unexpected shape: {source}")]
    Shape {
        name: String,
        #[source]
        source: DataError,
    },
}

/// Descriptor for one benchmark input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Display name, concatenated with the compressor name for output rows
    pub name: String,
    /// Path to the raw binary file
    pub path: PathBuf,
    /// Element type of the file contents
    pub dtype: Dtype,
    /// Array dimensions
    pub dims: Vec<usize>,
}

impl DatasetConfig {
    /// Read the dataset into memory.
    pub fn load(&self) -> Result<DataBuffer, DatasetError> {
        let bytes = std::fs::read(&self.path).map_err(|source| DatasetError::Read {
            name: self.name.clone(),
            path: self.path.clone(),
            source,
        })?;
        DataBuffer::from_bytes(self.dtype, self.dims.clone(), bytes).map_err(|source| {
            DatasetError::Shape {
                name: self.name.clone(),
                source,
            }
        })
    }
}

/// Load the ordered dataset list from a JSON config file.
pub fn load_datasets(path: &Path) -> Result<Vec<DatasetConfig>, DatasetError> {
    let text = std::fs::read_to_string(path).map_err(|source| DatasetError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let datasets: Vec<DatasetConfig> =
        serde_json::from_str(&text).map_err(|source| DatasetError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
    for dataset in &datasets {
        tracing::info!(dataset = %dataset.name, path = %dataset.path.display(), "loaded dataset descriptor");
    }
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("a.bin");
        let values: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&data_path, &bytes).unwrap();

        let config = DatasetConfig {
            name: "a".to_string(),
            path: data_path,
            dtype: Dtype::Float,
            dims: vec![2, 2],
        };
        let buf = config.load().unwrap();
        assert_eq!(buf.element_count(), 4);
        assert_eq!(buf.bytes(), bytes.as_slice());
    }

    #[test]
    fn test_load_datasets_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("datasets.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        write!(
            file,
            r#"[
                {{"name": "zeta", "path": "/data/z.bin", "dtype": "float", "dims": [10]}},
                {{"name": "alpha", "path": "/data/a.bin", "dtype": "double", "dims": [5]}}
            ]"#
        )
        .unwrap();

        let datasets = load_datasets(&config_path).unwrap();
        assert_eq!(datasets.len(), 2);
        // Order is the file's order, not alphabetical: ids are positional.
        assert_eq!(datasets[0].name, "zeta");
        assert_eq!(datasets[1].name, "alpha");
        assert_eq!(datasets[1].dtype, Dtype::Double);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let config = DatasetConfig {
            name: "ghost".to_string(),
            path: PathBuf::from("/nonexistent/ghost.bin"),
            dtype: Dtype::Float,
            dims: vec![1],
        };
        assert!(matches!(config.load(), Err(DatasetError::Read { .. })));
    }
}
