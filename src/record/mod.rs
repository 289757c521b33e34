//! Runtime field access for arbitrary record shapes.
//!
//! Sources (DTOs, payloads) and destinations (tracked entities) are both
//! records: they expose their fields by name as [`Value`]s and carry a
//! [`RecordType`] token. Implementations are normally generated with
//! [`record_struct!`](crate::record_struct).

use crate::core::{DataType, DbError, RecordType, Result, Value};
use chrono::{DateTime, Utc};
use std::any::Any;
use uuid::Uuid;

mod macros;

/// Anything a field can be read from by name.
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<Value>;
}

/// Object-safe view of a record whose type may only be known at runtime.
pub trait DynRecord: FieldSource + Any + Send + Sync {
    fn record_type(&self) -> RecordType;

    fn set_field(&mut self, name: &str, value: Value) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    /// Reads every declared field, in declaration order.
    fn values(&self) -> Vec<Value> {
        self.record_type()
            .fields()
            .iter()
            .map(|field| self.field(field.name).unwrap_or(Value::Null))
            .collect()
    }
}

/// Statically known record type.
pub trait Record: DynRecord + Default + Sized {
    fn record_type_of() -> RecordType;
}

impl dyn DynRecord {
    pub fn downcast_ref<T: Record>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Unboxes a runtime record into its concrete type.
pub fn downcast_record<T: Record>(record: Box<dyn DynRecord>) -> Result<T> {
    let actual = record.record_type();
    record
        .into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| {
            DbError::TypeMismatch(format!(
                "Expected record '{}', got '{}'",
                T::record_type_of(),
                actual
            ))
        })
}

/// Positional values of a record, read through its type's field list.
#[derive(Debug, Clone, Copy)]
pub struct FieldRow<'a> {
    record_type: RecordType,
    values: &'a [Value],
}

impl<'a> FieldRow<'a> {
    pub fn new(record_type: RecordType, values: &'a [Value]) -> Self {
        Self {
            record_type,
            values,
        }
    }
}

impl FieldSource for FieldRow<'_> {
    fn field(&self, name: &str) -> Option<Value> {
        self.record_type
            .find_field_index(name)
            .and_then(|idx| self.values.get(idx))
            .cloned()
    }
}

/// Conversion between a Rust field type and [`Value`].
pub trait FieldValue: Sized {
    const DATA_TYPE: DataType;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self>;
}

fn null_violation(data_type: DataType) -> DbError {
    DbError::ConstraintViolation(format!("NULL assigned to non-nullable {} field", data_type))
}

fn mismatch(data_type: DataType, value: &Value) -> DbError {
    DbError::TypeMismatch(format!(
        "Expected {}, got {}",
        data_type,
        value.type_name()
    ))
}

impl FieldValue for i64 {
    const DATA_TYPE: DataType = DataType::Integer;

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            Value::Null => Err(null_violation(Self::DATA_TYPE)),
            other => Err(mismatch(Self::DATA_TYPE, &other)),
        }
    }
}

impl FieldValue for i32 {
    const DATA_TYPE: DataType = DataType::Integer;

    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => i32::try_from(i)
                .map_err(|_| DbError::TypeMismatch(format!("{} does not fit in a 32-bit field", i))),
            Value::Null => Err(null_violation(Self::DATA_TYPE)),
            other => Err(mismatch(Self::DATA_TYPE, &other)),
        }
    }
}

impl FieldValue for f64 {
    const DATA_TYPE: DataType = DataType::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            Value::Null => Err(null_violation(Self::DATA_TYPE)),
            other => Err(mismatch(Self::DATA_TYPE, &other)),
        }
    }
}

impl FieldValue for bool {
    const DATA_TYPE: DataType = DataType::Boolean;

    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(b),
            Value::Null => Err(null_violation(Self::DATA_TYPE)),
            other => Err(mismatch(Self::DATA_TYPE, &other)),
        }
    }
}

impl FieldValue for String {
    const DATA_TYPE: DataType = DataType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Null => Err(null_violation(Self::DATA_TYPE)),
            other => Err(mismatch(Self::DATA_TYPE, &other)),
        }
    }
}

impl FieldValue for Uuid {
    const DATA_TYPE: DataType = DataType::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(id) => Ok(id),
            Value::Text(s) => Uuid::parse_str(&s)
                .map_err(|err| DbError::TypeMismatch(format!("Invalid UUID '{}': {}", s, err))),
            Value::Null => Err(null_violation(Self::DATA_TYPE)),
            other => Err(mismatch(Self::DATA_TYPE, &other)),
        }
    }
}

impl FieldValue for DateTime<Utc> {
    const DATA_TYPE: DataType = DataType::Timestamp;

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(ts),
            Value::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|err| DbError::TypeMismatch(format!("Invalid timestamp '{}': {}", s, err))),
            Value::Null => Err(null_violation(Self::DATA_TYPE)),
            other => Err(mismatch(Self::DATA_TYPE, &other)),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const DATA_TYPE: DataType = T::DATA_TYPE;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
