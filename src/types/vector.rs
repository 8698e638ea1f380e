//! Oracle VECTOR (23ai) wire encoding.
//!
//! Image layout: magic `0xDB`, version, u16 flag word, format byte, u32
//! element count, an optional 8-byte norm block, then the element data.
//! Sparse vectors add a u16 entry count and u32 indices before the values.

use serde_json::Value as Json;

use crate::error::{Error, Result};

const MAGIC: u8 = 0xDB;
const VERSION_BASE: u8 = 0;
const VERSION_BINARY: u8 = 1;
const VERSION_SPARSE: u8 = 2;

const FLAG_NORM: u16 = 0x0002;
const FLAG_NORM_RESERVED: u16 = 0x0010;
const FLAG_SPARSE: u16 = 0x0020;

const FORMAT_F32: u8 = 2;
const FORMAT_F64: u8 = 3;
const FORMAT_I8: u8 = 4;
const FORMAT_BINARY: u8 = 5;

/// Largest accepted VECTOR image.
pub const MAX_VECTOR_LENGTH: usize = 1024 * 1024;

/// Element storage of a vector.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorValues {
    /// 32-bit floats
    F32(Vec<f32>),
    /// 64-bit floats
    F64(Vec<f64>),
    /// 8-bit signed integers
    I8(Vec<i8>),
    /// Packed bits, eight dimensions per byte
    Binary(Vec<u8>),
}

impl VectorValues {
    fn format_byte(&self) -> u8 {
        match self {
            VectorValues::F32(_) => FORMAT_F32,
            VectorValues::F64(_) => FORMAT_F64,
            VectorValues::I8(_) => FORMAT_I8,
            VectorValues::Binary(_) => FORMAT_BINARY,
        }
    }

    /// Logical dimension count.
    pub fn dimensions(&self) -> usize {
        match self {
            VectorValues::F32(v) => v.len(),
            VectorValues::F64(v) => v.len(),
            VectorValues::I8(v) => v.len(),
            VectorValues::Binary(v) => v.len() * 8,
        }
    }
}

/// A dense or sparse VECTOR value.
#[derive(Debug, Clone, PartialEq)]
pub enum Vector {
    /// Every dimension present
    Dense(VectorValues),
    /// Only the listed dimensions are non-zero
    Sparse {
        /// Total dimensions
        dimensions: u32,
        /// Indices of stored values
        indices: Vec<u32>,
        /// Stored values, same length as `indices`
        values: VectorValues,
    },
}

impl Vector {
    /// A dense f32 vector.
    pub fn f32(values: Vec<f32>) -> Self {
        Vector::Dense(VectorValues::F32(values))
    }

    /// A dense f64 vector.
    pub fn f64(values: Vec<f64>) -> Self {
        Vector::Dense(VectorValues::F64(values))
    }

    /// A dense i8 vector.
    pub fn i8(values: Vec<i8>) -> Self {
        Vector::Dense(VectorValues::I8(values))
    }

    /// Logical dimension count.
    pub fn dimensions(&self) -> usize {
        match self {
            Vector::Dense(values) => values.dimensions(),
            Vector::Sparse { dimensions, .. } => *dimensions as usize,
        }
    }

    /// A JSON rendering for embedding in OSON output.
    pub fn to_json(&self) -> Json {
        match self {
            Vector::Dense(VectorValues::F32(v)) => {
                Json::Array(v.iter().map(|&x| serde_json::json!(x)).collect())
            }
            Vector::Dense(VectorValues::F64(v)) => {
                Json::Array(v.iter().map(|&x| serde_json::json!(x)).collect())
            }
            Vector::Dense(VectorValues::I8(v)) => {
                Json::Array(v.iter().map(|&x| Json::from(x as i64)).collect())
            }
            Vector::Dense(VectorValues::Binary(v)) => {
                Json::Array(v.iter().map(|&x| Json::from(x as i64)).collect())
            }
            Vector::Sparse { .. } => Json::Null,
        }
    }
}

/// Decode a VECTOR image.
pub fn decode_vector(data: &[u8]) -> Result<Vector> {
    if data.len() < 10 {
        return Err(Error::Conversion("VECTOR image too short".into()));
    }
    if data[0] != MAGIC {
        return Err(Error::Conversion(format!(
            "bad VECTOR magic byte {:#04x}",
            data[0]
        )));
    }
    let version = data[1];
    if version > VERSION_SPARSE {
        return Err(Error::Conversion(format!(
            "VECTOR version {version} not supported"
        )));
    }

    let flags = u16::from_be_bytes([data[2], data[3]]);
    let format = data[4];
    let dimensions = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
    let mut pos = 9;

    if flags & (FLAG_NORM | FLAG_NORM_RESERVED) != 0 {
        pos += 8;
    }

    if flags & FLAG_SPARSE != 0 {
        if data.len() < pos + 2 {
            return Err(Error::Conversion("sparse VECTOR truncated".into()));
        }
        let entries = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;

        let mut indices = Vec::with_capacity(entries);
        for _ in 0..entries {
            if data.len() < pos + 4 {
                return Err(Error::Conversion("sparse VECTOR indices truncated".into()));
            }
            indices.push(u32::from_be_bytes([
                data[pos],
                data[pos + 1],
                data[pos + 2],
                data[pos + 3],
            ]));
            pos += 4;
        }

        let values = decode_values(&data[pos..], entries, format)?;
        Ok(Vector::Sparse {
            dimensions,
            indices,
            values,
        })
    } else {
        let values = decode_values(&data[pos..], dimensions as usize, format)?;
        Ok(Vector::Dense(values))
    }
}

fn decode_values(data: &[u8], count: usize, format: u8) -> Result<VectorValues> {
    let need = |n: usize| {
        if data.len() < n {
            Err(Error::Conversion("VECTOR data truncated".into()))
        } else {
            Ok(())
        }
    };
    match format {
        FORMAT_F32 => {
            need(count * 4)?;
            Ok(VectorValues::F32(
                data.chunks_exact(4)
                    .take(count)
                    .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ))
        }
        FORMAT_F64 => {
            need(count * 8)?;
            Ok(VectorValues::F64(
                data.chunks_exact(8)
                    .take(count)
                    .map(|c| {
                        f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                    })
                    .collect(),
            ))
        }
        FORMAT_I8 => {
            need(count)?;
            Ok(VectorValues::I8(
                data[..count].iter().map(|&b| b as i8).collect(),
            ))
        }
        FORMAT_BINARY => {
            let bytes = count / 8;
            need(bytes)?;
            Ok(VectorValues::Binary(data[..bytes].to_vec()))
        }
        other => Err(Error::Conversion(format!(
            "VECTOR format {other} not supported"
        ))),
    }
}

/// Encode a VECTOR image.
pub fn encode_vector(vector: &Vector) -> Vec<u8> {
    let (values, dimensions, sparse_indices) = match vector {
        Vector::Dense(values) => (values, values.dimensions() as u32, None),
        Vector::Sparse {
            dimensions,
            indices,
            values,
        } => (values, *dimensions, Some(indices)),
    };

    let version = if sparse_indices.is_some() {
        VERSION_SPARSE
    } else if matches!(values, VectorValues::Binary(_)) {
        VERSION_BINARY
    } else {
        VERSION_BASE
    };

    let mut flags = FLAG_NORM_RESERVED;
    if sparse_indices.is_some() || !matches!(values, VectorValues::Binary(_)) {
        flags |= FLAG_NORM;
    }
    if sparse_indices.is_some() {
        flags |= FLAG_SPARSE;
    }

    let mut out = Vec::with_capacity(32 + values.dimensions() * 8);
    out.push(MAGIC);
    out.push(version);
    out.extend_from_slice(&flags.to_be_bytes());
    out.push(values.format_byte());
    out.extend_from_slice(&dimensions.to_be_bytes());
    out.extend_from_slice(&[0u8; 8]); // norm placeholder

    if let Some(indices) = sparse_indices {
        out.extend_from_slice(&(indices.len() as u16).to_be_bytes());
        for idx in indices {
            out.extend_from_slice(&idx.to_be_bytes());
        }
    }

    match values {
        VectorValues::F32(v) => {
            for x in v {
                out.extend_from_slice(&x.to_be_bytes());
            }
        }
        VectorValues::F64(v) => {
            for x in v {
                out.extend_from_slice(&x.to_be_bytes());
            }
        }
        VectorValues::I8(v) => {
            for x in v {
                out.push(*x as u8);
            }
        }
        VectorValues::Binary(v) => out.extend_from_slice(v),
    }

    out
}
