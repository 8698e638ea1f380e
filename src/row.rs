//! Row values and per-column wire decoding.
//!
//! [`Value`] is the tagged union over every data type the driver can fetch
//! or bind. [`decode_column`] turns the raw column bytes of a row into a
//! typed value using the column's describe metadata; the NUMBER output rule
//! picks i64 for scale-0 columns of precision 18 or less, decimal text for
//! other exact columns, and f64 for unconstrained numbers.

use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::ReadBuffer;
use crate::caps::Capabilities;
use crate::constants::{csfrm, OraType};
use crate::error::{Error, Result};
use crate::statement::ColumnInfo;
use crate::types::{
    decode_binary_double, decode_binary_float, decode_datetime, decode_number, decode_oson,
    decode_rowid, decode_vector, LobLocator, OracleDateTime, OracleNumber, RowId, Vector,
};

/// A single column value.
#[derive(Debug, Clone)]
pub enum Value {
    /// SQL NULL
    Null,
    /// NUMBER with scale 0 and precision within i64
    Integer(i64),
    /// BINARY_DOUBLE / BINARY_FLOAT / unconstrained NUMBER
    Float(f64),
    /// Exact NUMBER kept as decimal text
    Number(OracleNumber),
    /// VARCHAR2 / CHAR / LONG / CLOB content
    String(String),
    /// RAW / LONG RAW / BLOB content
    Bytes(Bytes),
    /// BOOLEAN (Oracle 23+)
    Boolean(bool),
    /// DATE / TIMESTAMP family
    DateTime(OracleDateTime),
    /// INTERVAL DAY TO SECOND, as (days, seconds, nanoseconds)
    IntervalDs(i64, i32, i32),
    /// INTERVAL YEAR TO MONTH, as total months
    IntervalYm(i64),
    /// ROWID / UROWID
    RowId(RowId),
    /// LOB locator for deferred reads
    Lob(LobLocator),
    /// JSON document
    Json(serde_json::Value),
    /// VECTOR value
    Vector(Vector),
    /// REF CURSOR id
    Cursor(u16),
    /// Named object attribute values in describe order
    Object(Vec<Value>),
}

impl Value {
    /// True for NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// As string slice, when the value is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// As i64, converting integral numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Number(n) => n.to_i64().ok(),
            Value::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// As f64, converting numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            Value::Number(n) => n.to_f64().ok(),
            _ => None,
        }
    }

    /// As bytes, when the value is binary.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// As bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// One fetched row.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    names: Arc<Vec<String>>,
}

impl Row {
    /// Build a row from decoded values and the shared column name list.
    pub fn new(values: Vec<Value>, names: Arc<Vec<String>>) -> Self {
        Self { values, names }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value by case-insensitive column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let idx = self
            .names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    /// All values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume into values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// How to materialize NUMBER columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberShape {
    /// Pick per the precision/scale rule
    #[default]
    Auto,
    /// Always decimal text
    Decimal,
    /// Always f64
    Double,
}

fn number_value(raw: &[u8], col: &ColumnInfo, shape: NumberShape) -> Result<Value> {
    let number = decode_number(raw)?;
    match shape {
        NumberShape::Decimal => return Ok(Value::Number(number)),
        NumberShape::Double => return Ok(Value::Float(number.to_f64()?)),
        NumberShape::Auto => {}
    }
    if col.scale == 0 && col.precision > 0 && col.precision <= 18 {
        return Ok(Value::Integer(number.to_i64()?));
    }
    if col.precision == 0 && col.scale == 0 {
        // Unconstrained NUMBER: integral values become integers when they
        // fit, everything else a double.
        if number.is_integer {
            if let Ok(v) = number.to_i64() {
                return Ok(Value::Integer(v));
            }
        }
        return Ok(Value::Float(number.to_f64()?));
    }
    Ok(Value::Number(number))
}

/// Decode one column of a row.
///
/// The caller has already determined the column is present (not suppressed
/// by a compressed-fetch bit vector). Returns `Value::Null` for NULL
/// indicators.
pub fn decode_column(
    buf: &mut ReadBuffer,
    col: &ColumnInfo,
    caps: &Capabilities,
    number_shape: NumberShape,
) -> Result<Value> {
    match col.ora_type {
        OraType::Cursor => {
            // Ref cursors carry a nested describe, then the cursor id.
            buf.skip_ub()?;
            let id = buf.read_ub2()?;
            return Ok(Value::Cursor(id));
        }
        OraType::Boolean => {
            let raw = match buf.read_bytes_with_length()? {
                None => return Ok(Value::Null),
                Some(raw) if raw.is_empty() => return Ok(Value::Null),
                Some(raw) => raw,
            };
            return Ok(Value::Boolean(*raw.last().unwrap() != 0));
        }
        _ => {}
    }

    if col.ora_type.is_lob() && col.ora_type != OraType::Json && col.ora_type != OraType::Vector {
        // CLOB/BLOB/BFILE: ub8 length, ub4 chunk size, then the locator.
        let length = buf.read_ub8()?;
        let chunk_size = buf.read_ub4()?;
        let raw = match buf.read_bytes_with_length()? {
            None => return Ok(Value::Null),
            Some(raw) if raw.is_empty() => return Ok(Value::Null),
            Some(raw) => raw,
        };
        let locator = LobLocator::new(Bytes::from(raw), col.ora_type, col.charset_form)
            .with_chunk_size(chunk_size)
            .with_cached_length(length);
        return Ok(Value::Lob(locator));
    }

    let raw = match buf.read_bytes_with_length()? {
        None => return Ok(Value::Null),
        Some(raw) if raw.is_empty() => return Ok(Value::Null),
        Some(raw) => raw,
    };

    let value = match col.ora_type {
        OraType::Varchar | OraType::Char | OraType::Long => {
            Value::String(decode_text(&raw, col.charset_form)?)
        }
        OraType::Number | OraType::BinaryInteger => number_value(&raw, col, number_shape)?,
        OraType::BinaryDouble => Value::Float(decode_binary_double(&raw)?),
        OraType::BinaryFloat => Value::Float(decode_binary_float(&raw)? as f64),
        OraType::Raw | OraType::LongRaw => Value::Bytes(Bytes::from(raw)),
        OraType::Date | OraType::Timestamp | OraType::TimestampTz | OraType::TimestampLtz => {
            Value::DateTime(decode_datetime(&raw)?)
        }
        OraType::IntervalDs => decode_interval_ds(&raw)?,
        OraType::IntervalYm => decode_interval_ym(&raw)?,
        OraType::Rowid | OraType::Urowid => Value::RowId(decode_rowid(&raw)?),
        OraType::Json => Value::Json(decode_oson(Bytes::from(raw))?),
        OraType::Vector => Value::Vector(decode_vector(&raw)?),
        OraType::Object => Value::Bytes(Bytes::from(raw)),
        other => {
            return Err(Error::NotSupported(format!(
                "fetching {other:?} columns"
            )))
        }
    };

    // Frozen charset ids are validated at connect time; nothing else uses
    // caps during plain column decode today.
    let _ = caps;
    Ok(value)
}

fn decode_text(raw: &[u8], charset_form: u8) -> Result<String> {
    if charset_form == csfrm::NCHAR {
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16(&units)
            .map_err(|e| Error::Conversion(format!("NCHAR data: {e}")));
    }
    String::from_utf8(raw.to_vec()).map_err(|e| Error::Conversion(format!("character data: {e}")))
}

/// INTERVAL DAY TO SECOND: 4-byte biased days, h/m/s bytes biased by 60,
/// 4-byte biased nanoseconds.
fn decode_interval_ds(raw: &[u8]) -> Result<Value> {
    if raw.len() < 11 {
        return Err(Error::Conversion("INTERVAL DS needs 11 bytes".into()));
    }
    let days = i64::from(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])) - 0x8000_0000;
    let hours = raw[4] as i32 - 60;
    let minutes = raw[5] as i32 - 60;
    let seconds = raw[6] as i32 - 60;
    let nanos = i64::from(u32::from_be_bytes([raw[7], raw[8], raw[9], raw[10]])) - 0x8000_0000;
    Ok(Value::IntervalDs(
        days,
        hours * 3600 + minutes * 60 + seconds,
        nanos as i32,
    ))
}

/// INTERVAL YEAR TO MONTH: 4-byte biased years, one biased month byte.
fn decode_interval_ym(raw: &[u8]) -> Result<Value> {
    if raw.len() < 5 {
        return Err(Error::Conversion("INTERVAL YM needs 5 bytes".into()));
    }
    let years = i64::from(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])) - 0x8000_0000;
    let months = raw[4] as i64 - 60;
    Ok(Value::IntervalYm(years * 12 + months))
}
