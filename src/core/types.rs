use super::{DataType, DbError, Result, Value};
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Static description of one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub data_type: DataType,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, data_type: DataType, nullable: bool) -> Self {
        Self {
            name,
            data_type,
            nullable,
        }
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Field '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Field '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

/// Runtime type token for a record shape.
///
/// Two tokens are equal when they describe the same Rust type; the name and
/// field list are carried along for diagnostics and member resolution.
#[derive(Debug, Clone, Copy)]
pub struct RecordType {
    id: TypeId,
    name: &'static str,
    fields: &'static [FieldDescriptor],
}

impl RecordType {
    pub fn new<T: 'static>(name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name,
            fields,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &'static [FieldDescriptor] {
        self.fields
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn find_field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Looks a member up by exact name, falling back to an ASCII
    /// case-insensitive match when `ignore_case` is set.
    pub fn resolve_member(&self, name: &str, ignore_case: bool) -> Option<&'static FieldDescriptor> {
        self.field(name).or_else(|| {
            if ignore_case {
                self.fields
                    .iter()
                    .find(|field| field.name.eq_ignore_ascii_case(name))
            } else {
                None
            }
        })
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RecordType {}

impl Hash for RecordType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
