//! Typed Data Buffers
//!
//! An in-memory array with an element type and dimensions, loaded from raw
//! binary files and handed to codecs as flat bytes.

use bytemuck::pod_read_unaligned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Element type of a data buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// 32-bit IEEE float
    Float,
    /// 64-bit IEEE float
    Double,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    Uint8,
    /// Unsigned 16-bit integer
    Uint16,
    /// Unsigned 32-bit integer
    Uint32,
    /// Unsigned 64-bit integer
    Uint64,
}

impl Dtype {
    /// Size of one element in bytes
    pub fn size(self) -> usize {
        match self {
            Dtype::Int8 | Dtype::Uint8 => 1,
            Dtype::Int16 | Dtype::Uint16 => 2,
            Dtype::Float | Dtype::Int32 | Dtype::Uint32 => 4,
            Dtype::Double | Dtype::Int64 | Dtype::Uint64 => 8,
        }
    }
}

/// Errors constructing a data buffer
#[derive(Debug, Error)]
pub enum DataError {
    #[error("buffer length {actual} does not match {expected} bytes ({elements} x {element_size})")]
    LengthMismatch {
        expected: usize,
        actual: usize,
        elements: usize,
        element_size: usize,
    },
}

/// A flat, typed, n-dimensional array
#[derive(Debug, Clone, PartialEq)]
pub struct DataBuffer {
    dtype: Dtype,
    dims: Vec<usize>,
    bytes: Vec<u8>,
}

impl DataBuffer {
    /// Wrap raw bytes, validating the length against dtype and dims.
    pub fn from_bytes(dtype: Dtype, dims: Vec<usize>, bytes: Vec<u8>) -> Result<Self, DataError> {
        let elements: usize = dims.iter().product();
        let expected = elements * dtype.size();
        if bytes.len() != expected {
            return Err(DataError::LengthMismatch {
                expected,
                actual: bytes.len(),
                elements,
                element_size: dtype.size(),
            });
        }
        Ok(Self { dtype, dims, bytes })
    }

    /// Element type
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Dimensions
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Raw bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total size in bytes
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Number of elements
    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Every element widened to f64, for error statistics. Reads are
    /// unaligned because the backing buffer comes straight from a file.
    pub fn elements_f64(&self) -> Vec<f64> {
        fn widen<T: bytemuck::Pod>(bytes: &[u8], size: usize, to: impl Fn(T) -> f64) -> Vec<f64> {
            bytes
                .chunks_exact(size)
                .map(|chunk| to(pod_read_unaligned::<T>(chunk)))
                .collect()
        }

        let b = &self.bytes;
        match self.dtype {
            Dtype::Float => widen(b, 4, |v: f32| v as f64),
            Dtype::Double => widen(b, 8, |v: f64| v),
            Dtype::Int8 => widen(b, 1, |v: i8| v as f64),
            Dtype::Int16 => widen(b, 2, |v: i16| v as f64),
            Dtype::Int32 => widen(b, 4, |v: i32| v as f64),
            Dtype::Int64 => widen(b, 8, |v: i64| v as f64),
            Dtype::Uint8 => widen(b, 1, |v: u8| v as f64),
            Dtype::Uint16 => widen(b, 2, |v: u16| v as f64),
            Dtype::Uint32 => widen(b, 4, |v: u32| v as f64),
            Dtype::Uint64 => widen(b, 8, |v: u64| v as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_validation() {
        let ok = DataBuffer::from_bytes(Dtype::Float, vec![2, 2], vec![0u8; 16]);
        assert!(ok.is_ok());

        let bad = DataBuffer::from_bytes(Dtype::Float, vec![2, 2], vec![0u8; 15]);
        assert!(matches!(bad, Err(DataError::LengthMismatch { .. })));
    }

    #[test]
    fn test_elements_f64_float() {
        let values: Vec<f32> = vec![1.0, -2.5, 3.25];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let buf = DataBuffer::from_bytes(Dtype::Float, vec![3], bytes).unwrap();
        assert_eq!(buf.elements_f64(), vec![1.0, -2.5, 3.25]);
    }

    #[test]
    fn test_elements_f64_uint16() {
        let bytes: Vec<u8> = [1u16, 65535].iter().flat_map(|v| v.to_le_bytes()).collect();
        let buf = DataBuffer::from_bytes(Dtype::Uint16, vec![2], bytes).unwrap();
        assert_eq!(buf.elements_f64(), vec![1.0, 65535.0]);
    }
}
