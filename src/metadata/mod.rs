//! Identity metadata: which fields make up an entity type's primary key.

use crate::core::{DataType, DbError, RecordType, Result};
use crate::record::Record;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves the ordered identity members of a destination type.
pub trait IdentityMetadata: Send + Sync {
    fn identity_fields(&self, destination: RecordType) -> Result<Vec<&'static str>>;

    fn contains(&self, destination: RecordType) -> bool;
}

/// How keys of newly added entities are assigned on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGeneration {
    /// The caller supplies key values.
    None,
    /// A single integer key still holding its default is assigned the next
    /// sequence value when the entity is saved.
    Sequence,
}

#[derive(Debug, Clone)]
pub struct EntityType {
    record: RecordType,
    keys: Vec<&'static str>,
    key_generation: KeyGeneration,
}

impl EntityType {
    /// Builds an entity type with the conventional key generation: a single
    /// integer key is sequence-generated, anything else is caller-assigned.
    pub fn new(record: RecordType, keys: &[&str]) -> Result<Self> {
        if keys.is_empty() {
            return Err(DbError::InvalidConfiguration(format!(
                "Entity type '{}' must declare at least one key member",
                record
            )));
        }

        let mut resolved: Vec<&'static str> = Vec::with_capacity(keys.len());
        for key in keys {
            let field = record.field(key).ok_or_else(|| {
                DbError::FieldNotFound(key.to_string(), record.name().to_string())
            })?;
            if resolved.contains(&field.name) {
                return Err(DbError::InvalidConfiguration(format!(
                    "Key member '{}' declared twice on '{}'",
                    key, record
                )));
            }
            if field.nullable {
                return Err(DbError::InvalidConfiguration(format!(
                    "Key member '{}' of '{}' must not be nullable",
                    key, record
                )));
            }
            resolved.push(field.name);
        }

        let key_generation = match resolved.as_slice() {
            [single] if record
                .field(single)
                .is_some_and(|field| field.data_type == DataType::Integer) =>
            {
                KeyGeneration::Sequence
            }
            _ => KeyGeneration::None,
        };

        Ok(Self {
            record,
            keys: resolved,
            key_generation,
        })
    }

    pub fn with_key_generation(mut self, key_generation: KeyGeneration) -> Result<Self> {
        if key_generation == KeyGeneration::Sequence && self.sequence_key().is_none() {
            return Err(DbError::InvalidConfiguration(format!(
                "Sequence keys require a single INTEGER key member on '{}'",
                self.record
            )));
        }
        self.key_generation = key_generation;
        Ok(self)
    }

    pub fn record_type(&self) -> RecordType {
        self.record
    }

    pub fn keys(&self) -> &[&'static str] {
        &self.keys
    }

    pub fn key_generation(&self) -> KeyGeneration {
        self.key_generation
    }

    /// The key member driven by the sequence, if the shape allows one.
    pub fn sequence_key(&self) -> Option<&'static str> {
        match self.keys.as_slice() {
            [single] => self
                .record
                .field(single)
                .filter(|field| field.data_type == DataType::Integer)
                .map(|field| field.name),
            _ => None,
        }
    }
}

/// Registry of entity types known to a storage session.
///
/// Cloning is cheap; registering a type produces a new model and leaves the
/// original untouched.
#[derive(Debug, Clone, Default)]
pub struct EntityModel {
    entities: Arc<HashMap<TypeId, EntityType>>,
}

impl EntityModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` keyed by the given members.
    pub fn with_entity<T: Record>(self, keys: &[&str]) -> Result<Self> {
        self.with_entity_type(EntityType::new(T::record_type_of(), keys)?)
    }

    pub fn with_entity_type(self, entity_type: EntityType) -> Result<Self> {
        let record = entity_type.record_type();
        if self.entities.contains_key(&record.type_id()) {
            return Err(DbError::InvalidConfiguration(format!(
                "Entity type '{}' already registered",
                record
            )));
        }

        let mut entities = (*self.entities).clone();
        entities.insert(record.type_id(), entity_type);

        Ok(Self {
            entities: Arc::new(entities),
        })
    }

    pub fn entity_type(&self, record: RecordType) -> Result<&EntityType> {
        self.find_entity_type(record)
            .ok_or_else(|| DbError::EntityTypeNotFound(record.name().to_string()))
    }

    pub fn find_entity_type(&self, record: RecordType) -> Option<&EntityType> {
        self.entities.get(&record.type_id())
    }

    pub fn list_entity_types(&self) -> Vec<RecordType> {
        self.entities.values().map(EntityType::record_type).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl IdentityMetadata for EntityModel {
    fn identity_fields(&self, destination: RecordType) -> Result<Vec<&'static str>> {
        Ok(self.entity_type(destination)?.keys().to_vec())
    }

    fn contains(&self, destination: RecordType) -> bool {
        self.entities.contains_key(&destination.type_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_struct;

    record_struct! {
        #[derive(Debug, Clone, Default)]
        struct Order {
            id: i64,
            total: f64,
        }
    }

    record_struct! {
        #[derive(Debug, Clone, Default)]
        struct OrderLine {
            order_id: i64,
            line_no: i32,
            sku: String,
            note: Option<String>,
        }
    }

    #[test]
    fn test_resolves_keys_in_declared_order() {
        let model = EntityModel::new()
            .with_entity::<Order>(&["id"])
            .unwrap()
            .with_entity::<OrderLine>(&["line_no", "order_id"])
            .unwrap();

        assert_eq!(
            model.identity_fields(OrderLine::record_type_of()).unwrap(),
            vec!["line_no", "order_id"]
        );
        assert!(model.contains(Order::record_type_of()));
        assert_eq!(model.len(), 2);
    }

    #[test]
    fn test_key_generation_convention() {
        let single = EntityType::new(Order::record_type_of(), &["id"]).unwrap();
        assert_eq!(single.key_generation(), KeyGeneration::Sequence);

        let composite =
            EntityType::new(OrderLine::record_type_of(), &["order_id", "line_no"]).unwrap();
        assert_eq!(composite.key_generation(), KeyGeneration::None);
        assert!(composite.with_key_generation(KeyGeneration::Sequence).is_err());

        let manual = single.with_key_generation(KeyGeneration::None).unwrap();
        assert_eq!(manual.key_generation(), KeyGeneration::None);
    }

    #[test]
    fn test_rejects_invalid_keys() {
        assert!(matches!(
            EntityType::new(Order::record_type_of(), &[]),
            Err(DbError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            EntityType::new(Order::record_type_of(), &["ID"]),
            Err(DbError::FieldNotFound(_, _))
        ));
        assert!(matches!(
            EntityType::new(OrderLine::record_type_of(), &["note"]),
            Err(DbError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            EntityType::new(Order::record_type_of(), &["id", "id"]),
            Err(DbError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unknown_type_and_copy_on_write() {
        let empty = EntityModel::new();
        let model = empty.clone().with_entity::<Order>(&["id"]).unwrap();

        assert!(empty.is_empty());
        assert!(matches!(
            empty.identity_fields(Order::record_type_of()),
            Err(DbError::EntityTypeNotFound(_))
        ));
        assert!(model.clone().with_entity::<Order>(&["id"]).is_err());
    }
}
