//! Bind and define variables.
//!
//! A [`Variable`] is a typed buffer holding inbound bind values or outbound
//! column values. Types are fixed explicitly via `setinputsizes`/`var` or
//! inferred at execute time from the first non-null value; character and
//! raw buffers widen in place up to the negotiated maximum as larger values
//! are observed.

use std::sync::Arc;

use crate::constants::{BindDirection, OraType};
use crate::error::{Error, Result};
use crate::row::Value;
use crate::statement::ColumnInfo;

/// Policy for undecodable inbound character data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingErrors {
    /// Fail the fetch
    #[default]
    Strict,
    /// Substitute U+FFFD
    Replace,
}

/// A per-value conversion applied after decode.
pub type Converter = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Requested variable configuration, as returned by an output type handler.
#[derive(Clone)]
pub struct VarConfig {
    /// Wire type
    pub ora_type: OraType,
    /// Buffer size for variable-length types
    pub size: u32,
    /// Optional per-value converter
    pub converter: Option<Converter>,
}

impl std::fmt::Debug for VarConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VarConfig")
            .field("ora_type", &self.ora_type)
            .field("size", &self.size)
            .field("converter", &self.converter.is_some())
            .finish()
    }
}

impl VarConfig {
    /// A config with no converter.
    pub fn new(ora_type: OraType, size: u32) -> Self {
        Self {
            ora_type,
            size,
            converter: None,
        }
    }
}

/// Context handed to an output type handler for each described column.
#[derive(Debug)]
pub struct ColumnContext<'a> {
    /// The described column
    pub column: &'a ColumnInfo,
    /// Position in the select list, zero based
    pub position: usize,
}

/// Callback deciding the fetch variable for a column. Returning `None`
/// keeps the default mapping.
pub type OutputTypeHandler = Arc<dyn Fn(&ColumnContext<'_>) -> Option<VarConfig> + Send + Sync>;

/// A typed bind/define buffer.
#[derive(Clone)]
pub struct Variable {
    /// Wire type
    ora_type: OraType,
    /// Buffer size for variable-length types
    size: u32,
    /// Values, one per array element
    values: Vec<Value>,
    /// Array bind (PL/SQL index-by tables)
    is_array: bool,
    /// Direction
    direction: BindDirection,
    /// Inbound decode policy
    encoding_errors: EncodingErrors,
    /// Optional converter
    converter: Option<Converter>,
}

impl std::fmt::Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("ora_type", &self.ora_type)
            .field("size", &self.size)
            .field("values", &self.values)
            .field("is_array", &self.is_array)
            .field("direction", &self.direction)
            .field("encoding_errors", &self.encoding_errors)
            .field("converter", &self.converter.is_some())
            .finish()
    }
}

impl Variable {
    /// An empty variable of a fixed type.
    pub fn new(ora_type: OraType, size: u32, array_size: usize) -> Self {
        Self {
            ora_type,
            size,
            values: vec![Value::Null; array_size.max(1)],
            is_array: false,
            direction: BindDirection::Input,
            encoding_errors: EncodingErrors::Strict,
            converter: None,
        }
    }

    /// Build a variable from a handler-provided config.
    pub fn from_config(config: &VarConfig, array_size: usize) -> Self {
        let mut var = Self::new(config.ora_type, config.size, array_size);
        var.converter = config.converter.clone();
        var
    }

    /// Infer a variable from the first non-null value in a bind column.
    /// All-null columns bind as VARCHAR2(1).
    pub fn infer(values: &[&Value], array_size: usize) -> Result<Self> {
        let first = values.iter().find(|v| !v.is_null());
        let (ora_type, size) = match first {
            None => (OraType::Varchar, 1),
            Some(value) => infer_type(value)?,
        };
        let mut var = Self::new(ora_type, size, array_size);
        // Size up to the widest observed value.
        for value in values {
            var.widen_for(value);
        }
        Ok(var)
    }

    /// The wire type.
    pub fn ora_type(&self) -> OraType {
        self.ora_type
    }

    /// The buffer size.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The element count.
    pub fn array_size(&self) -> usize {
        self.values.len()
    }

    /// The direction.
    pub fn direction(&self) -> BindDirection {
        self.direction
    }

    /// Set the direction.
    pub fn set_direction(&mut self, direction: BindDirection) {
        self.direction = direction;
    }

    /// Mark as a PL/SQL array bind.
    pub fn set_array(&mut self, is_array: bool) {
        self.is_array = is_array;
    }

    /// True for PL/SQL array binds.
    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// The decode policy.
    pub fn encoding_errors(&self) -> EncodingErrors {
        self.encoding_errors
    }

    /// Set the decode policy.
    pub fn set_encoding_errors(&mut self, policy: EncodingErrors) {
        self.encoding_errors = policy;
    }

    /// Grow the buffer size to fit a value. Shrinking never happens.
    pub fn widen_for(&mut self, value: &Value) {
        let needed = match value {
            Value::String(s) => s.len() as u32,
            Value::Bytes(b) => b.len() as u32,
            _ => 0,
        };
        if needed > self.size {
            self.size = needed;
        }
    }

    /// Resize the element array, filling with NULLs.
    pub fn resize(&mut self, array_size: usize) {
        self.values.resize(array_size.max(1), Value::Null);
    }

    /// Set one element.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        let len = self.values.len();
        let slot = self.values.get_mut(index).ok_or_else(|| {
            Error::Interface(format!("variable index {index} out of range (size {len})"))
        })?;
        if let Value::String(s) = &value {
            if s.len() as u32 > self.size {
                self.size = s.len() as u32;
            }
        }
        if let Value::Bytes(b) = &value {
            if b.len() as u32 > self.size {
                self.size = b.len() as u32;
            }
        }
        *slot = value;
        Ok(())
    }

    /// Get one element, converter applied.
    pub fn get_value(&self, index: usize) -> Result<Value> {
        let value = self
            .values
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Interface(format!("variable index {index} out of range")))?;
        match &self.converter {
            Some(convert) => convert(value),
            None => Ok(value),
        }
    }

    /// Raw elements without conversion.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Append a server-delivered value (OUT binds accumulate per
    /// iteration).
    pub fn push_value(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Clear all elements to NULL.
    pub fn clear(&mut self) {
        for v in self.values.iter_mut() {
            *v = Value::Null;
        }
    }
}

fn infer_type(value: &Value) -> Result<(OraType, u32)> {
    Ok(match value {
        Value::Null => (OraType::Varchar, 1),
        Value::Integer(_) | Value::Number(_) => (OraType::Number, 22),
        Value::Float(_) => (OraType::BinaryDouble, 8),
        Value::String(s) => (OraType::Varchar, (s.len() as u32).max(1)),
        Value::Bytes(b) => (OraType::Raw, (b.len() as u32).max(1)),
        Value::Boolean(_) => (OraType::Boolean, 1),
        Value::DateTime(dt) if dt.has_tz => (OraType::TimestampTz, 13),
        Value::DateTime(dt) if dt.nanosecond > 0 => (OraType::Timestamp, 11),
        Value::DateTime(_) => (OraType::Date, 7),
        Value::IntervalDs(..) => (OraType::IntervalDs, 11),
        Value::IntervalYm(_) => (OraType::IntervalYm, 5),
        Value::RowId(_) => (OraType::Varchar, 18),
        Value::Lob(locator) => (locator.ora_type(), crate::constants::lob_locator::BIND_BUFFER_SIZE),
        Value::Json(_) => (OraType::Json, 4000),
        Value::Vector(v) => (OraType::Vector, (v.dimensions() as u32 * 8).max(8)),
        Value::Cursor(_) => (OraType::Cursor, 0),
        Value::Object(_) => {
            return Err(Error::Interface(
                "object binds require an explicit variable with a type descriptor".into(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_from_first_non_null() {
        let a = Value::Null;
        let b = Value::Integer(5);
        let var = Variable::infer(&[&a, &b], 2).unwrap();
        assert_eq!(var.ora_type(), OraType::Number);
        assert_eq!(var.array_size(), 2);
    }

    #[test]
    fn all_null_binds_as_varchar() {
        let a = Value::Null;
        let var = Variable::infer(&[&a, &a], 2).unwrap();
        assert_eq!(var.ora_type(), OraType::Varchar);
        assert_eq!(var.size(), 1);
    }

    #[test]
    fn widening_tracks_largest_value() {
        let short = Value::from("ab");
        let long = Value::from("abcdefgh");
        let var = Variable::infer(&[&short, &long], 2).unwrap();
        assert_eq!(var.size(), 8);
    }

    #[test]
    fn set_value_widens_in_place() {
        let mut var = Variable::new(OraType::Varchar, 4, 1);
        var.set_value(0, Value::from("a longer string")).unwrap();
        assert_eq!(var.size(), 15);
    }

    #[test]
    fn set_value_bounds_checked() {
        let mut var = Variable::new(OraType::Number, 22, 2);
        assert!(var.set_value(2, Value::Integer(1)).is_err());
    }

    #[test]
    fn converter_applies_on_get() {
        let mut var = Variable::new(OraType::Number, 22, 1);
        var.converter = Some(Arc::new(|v| match v {
            Value::Integer(i) => Ok(Value::Integer(i * 2)),
            other => Ok(other),
        }));
        var.set_value(0, Value::Integer(21)).unwrap();
        assert_eq!(var.get_value(0).unwrap().as_i64(), Some(42));
    }

    #[test]
    fn datetime_inference_shapes() {
        use crate::types::OracleDateTime;
        let date = Value::DateTime(OracleDateTime::date(2024, 1, 1));
        let var = Variable::infer(&[&date], 1).unwrap();
        assert_eq!(var.ora_type(), OraType::Date);

        let ts = Value::DateTime(OracleDateTime::timestamp(2024, 1, 1, 0, 0, 0, 5));
        let var = Variable::infer(&[&ts], 1).unwrap();
        assert_eq!(var.ora_type(), OraType::Timestamp);

        let tz = Value::DateTime(OracleDateTime::timestamp(2024, 1, 1, 0, 0, 0, 0).with_tz(1, 0));
        let var = Variable::infer(&[&tz], 1).unwrap();
        assert_eq!(var.ora_type(), OraType::TimestampTz);
    }

    #[test]
    fn out_values_accumulate() {
        let mut var = Variable::new(OraType::Number, 22, 0);
        var.push_value(Value::Integer(1));
        var.push_value(Value::Integer(2));
        assert_eq!(var.values().len(), 3); // initial slot + two pushed
    }
}
