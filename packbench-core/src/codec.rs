//! Compressor Configurations and Codec Kernels
//!
//! A `CompressorConfig` names a codec and carries its string options, the
//! way the compressor config file states them. Configs are validated at
//! load time so a bad codec id or option aborts the run before dispatch.

use crate::data::{DataBuffer, DataError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from configuration loading or codec execution
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to read compressor config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse compressor config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown codec {codec:?} in configuration {name:?}")]
    UnknownCodec { name: String, codec: String },

    #[error("codec {codec:?} does not accept option {key:?}")]
    UnknownOption { codec: String, key: String },

    #[error("invalid value {value:?} for option {key:?}")]
    InvalidOption { key: String, value: String },

    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("decompressed output has unexpected shape: {0}")]
    Shape(#[from] DataError),
}

/// A compression kernel: compress a typed buffer to bytes and back.
pub trait Codec {
    /// Compress the input buffer.
    fn compress(&mut self, input: &DataBuffer) -> Result<Vec<u8>, CodecError>;

    /// Decompress into the shape described by `template` (the worker passes
    /// the input buffer, since this benchmark round-trips in place).
    fn decompress(
        &mut self,
        compressed: &[u8],
        template: &DataBuffer,
    ) -> Result<DataBuffer, CodecError>;
}

/// Pass-through codec. Establishes the measurement floor: zero
/// reconstruction error, output size equal to input size.
struct NoopCodec;

impl Codec for NoopCodec {
    fn compress(&mut self, input: &DataBuffer) -> Result<Vec<u8>, CodecError> {
        Ok(input.bytes().to_vec())
    }

    fn decompress(
        &mut self,
        compressed: &[u8],
        template: &DataBuffer,
    ) -> Result<DataBuffer, CodecError> {
        Ok(DataBuffer::from_bytes(
            template.dtype(),
            template.dims().to_vec(),
            compressed.to_vec(),
        )?)
    }
}

/// Lossless codec backed by the zstd kernel.
struct ZstdCodec {
    level: i32,
}

impl Codec for ZstdCodec {
    fn compress(&mut self, input: &DataBuffer) -> Result<Vec<u8>, CodecError> {
        zstd::bulk::compress(input.bytes(), self.level).map_err(CodecError::Compress)
    }

    fn decompress(
        &mut self,
        compressed: &[u8],
        template: &DataBuffer,
    ) -> Result<DataBuffer, CodecError> {
        let bytes = zstd::bulk::decompress(compressed, template.byte_len())
            .map_err(CodecError::Decompress)?;
        Ok(DataBuffer::from_bytes(
            template.dtype(),
            template.dims().to_vec(),
            bytes,
        )?)
    }
}

/// Descriptor for one compressor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressorConfig {
    /// Display name, concatenated with the dataset name for output rows
    pub name: String,
    /// Codec identifier: `noop` or `zstd`
    pub codec: String,
    /// Codec options as strings, cast on instantiation
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl CompressorConfig {
    /// Instantiate the codec described by this configuration.
    pub fn build(&self) -> Result<Box<dyn Codec>, CodecError> {
        match self.codec.as_str() {
            "noop" => {
                if let Some(key) = self.options.keys().next() {
                    return Err(CodecError::UnknownOption {
                        codec: self.codec.clone(),
                        key: key.clone(),
                    });
                }
                Ok(Box::new(NoopCodec))
            }
            "zstd" => {
                let mut level = zstd::DEFAULT_COMPRESSION_LEVEL;
                for (key, value) in &self.options {
                    match key.as_str() {
                        "level" => {
                            level = value.parse().map_err(|_| CodecError::InvalidOption {
                                key: key.clone(),
                                value: value.clone(),
                            })?;
                        }
                        _ => {
                            return Err(CodecError::UnknownOption {
                                codec: self.codec.clone(),
                                key: key.clone(),
                            });
                        }
                    }
                }
                Ok(Box::new(ZstdCodec { level }))
            }
            _ => Err(CodecError::UnknownCodec {
                name: self.name.clone(),
                codec: self.codec.clone(),
            }),
        }
    }
}

/// Load the ordered compressor-configuration list from a JSON config file.
///
/// Every configuration is instantiated once here so unknown codecs and
/// malformed options fail at startup, not on a worker mid-run.
pub fn load_compressors(path: &Path) -> Result<Vec<CompressorConfig>, CodecError> {
    let text = std::fs::read_to_string(path).map_err(|source| CodecError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let configs: Vec<CompressorConfig> =
        serde_json::from_str(&text).map_err(|source| CodecError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
    for config in &configs {
        config.build()?;
        tracing::info!(configuration = %config.name, codec = %config.codec, "loaded compressor configuration");
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dtype;

    fn sample_buffer() -> DataBuffer {
        let values: Vec<f32> = (0..64).map(|i| (i % 7) as f32).collect();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        DataBuffer::from_bytes(Dtype::Float, vec![64], bytes).unwrap()
    }

    #[test]
    fn test_noop_roundtrip() {
        let config = CompressorConfig {
            name: "none".to_string(),
            codec: "noop".to_string(),
            options: BTreeMap::new(),
        };
        let mut codec = config.build().unwrap();
        let input = sample_buffer();
        let compressed = codec.compress(&input).unwrap();
        assert_eq!(compressed.len(), input.byte_len());
        let output = codec.decompress(&compressed, &input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let config = CompressorConfig {
            name: "z3".to_string(),
            codec: "zstd".to_string(),
            options: BTreeMap::from([("level".to_string(), "3".to_string())]),
        };
        let mut codec = config.build().unwrap();
        let input = sample_buffer();
        let compressed = codec.compress(&input).unwrap();
        // Repetitive input must actually shrink
        assert!(compressed.len() < input.byte_len());
        let output = codec.decompress(&compressed, &input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_unknown_codec_rejected() {
        let config = CompressorConfig {
            name: "mystery".to_string(),
            codec: "sz3".to_string(),
            options: BTreeMap::new(),
        };
        assert!(matches!(
            config.build(),
            Err(CodecError::UnknownCodec { .. })
        ));
    }

    #[test]
    fn test_bad_option_rejected() {
        let config = CompressorConfig {
            name: "bad".to_string(),
            codec: "zstd".to_string(),
            options: BTreeMap::from([("level".to_string(), "fast".to_string())]),
        };
        assert!(matches!(
            config.build(),
            Err(CodecError::InvalidOption { .. })
        ));
    }
}
