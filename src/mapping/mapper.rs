use super::type_map::{Construct, construct};
use super::{MapOptions, MapperSettings, MergeReport, ObjectMapper, PropertyMap, TypeMap, TypeMapExpression};
use crate::core::{DbError, RecordType, Result};
use crate::equivalency::{self, Equivalence};
use crate::metadata::{EntityModel, IdentityMetadata};
use crate::record::{DynRecord, Record, downcast_record};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

struct PendingTypeMap {
    source: RecordType,
    destination: RecordType,
    construct: Construct,
    expression: TypeMapExpression,
}

/// Collects type-pair rules; everything is validated in [`build`](Self::build).
#[derive(Default)]
pub struct MapperConfigurationBuilder {
    settings: MapperSettings,
    pending: Vec<PendingTypeMap>,
    identity: Option<Arc<dyn IdentityMetadata>>,
}

impl MapperConfigurationBuilder {
    pub fn settings(mut self, settings: MapperSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn create_map<S: Record, D: Record>(self) -> Self {
        self.create_map_with::<S, D>(|map| map)
    }

    pub fn create_map_with<S, D>(
        mut self,
        configure: impl FnOnce(TypeMapExpression) -> TypeMapExpression,
    ) -> Self
    where
        S: Record,
        D: Record,
    {
        let expression = configure(TypeMapExpression::default());
        if expression.wants_reverse() {
            self.pending.push(PendingTypeMap {
                source: D::record_type_of(),
                destination: S::record_type_of(),
                construct: construct::<S>,
                expression: expression.reversed(),
            });
        }
        self.pending.push(PendingTypeMap {
            source: S::record_type_of(),
            destination: D::record_type_of(),
            construct: construct::<D>,
            expression,
        });
        self
    }

    /// Derive identity correspondences from the entity model's key members.
    pub fn use_entity_model(self, model: EntityModel) -> Self {
        self.use_identity_metadata(Arc::new(model))
    }

    pub fn use_identity_metadata(mut self, identity: Arc<dyn IdentityMetadata>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn build(self) -> Result<Mapper> {
        let mut type_maps = HashMap::with_capacity(self.pending.len());
        for pending in &self.pending {
            let key = (pending.source.type_id(), pending.destination.type_id());
            if type_maps.contains_key(&key) {
                return Err(DbError::InvalidConfiguration(format!(
                    "Duplicate type map {} --> {}",
                    pending.source, pending.destination
                )));
            }

            let type_map = TypeMap::resolve(
                pending.source,
                pending.destination,
                pending.construct,
                &pending.expression,
                &self.settings,
                self.identity.as_deref(),
            )?;
            type_maps.insert(key, type_map);
        }

        Ok(Mapper {
            config: Arc::new(MapperConfiguration {
                settings: self.settings,
                type_maps,
            }),
        })
    }
}

/// Immutable, validated set of type maps.
#[derive(Debug)]
pub struct MapperConfiguration {
    settings: MapperSettings,
    type_maps: HashMap<(TypeId, TypeId), TypeMap>,
}

impl MapperConfiguration {
    pub fn builder() -> MapperConfigurationBuilder {
        MapperConfigurationBuilder::default()
    }

    pub fn settings(&self) -> &MapperSettings {
        &self.settings
    }

    pub fn find_type_map(&self, source: RecordType, destination: RecordType) -> Result<&TypeMap> {
        self.type_maps
            .get(&(source.type_id(), destination.type_id()))
            .ok_or_else(|| {
                DbError::MappingNotFound(source.name().to_string(), destination.name().to_string())
            })
    }

    pub fn type_maps(&self) -> impl Iterator<Item = &TypeMap> {
        self.type_maps.values()
    }
}

/// Shared handle to a built configuration. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Mapper {
    config: Arc<MapperConfiguration>,
}

impl Mapper {
    pub fn configuration(&self) -> &MapperConfiguration {
        &self.config
    }

    /// Maps `source` into a brand-new `D`.
    pub fn map<S: Record, D: Record>(&self, source: &S) -> Result<D> {
        let created = self.map_new(
            source,
            S::record_type_of(),
            D::record_type_of(),
            &MapOptions::default(),
        )?;
        downcast_record(created)
    }

    /// Merges `source` into `destination`, writing only changed members.
    pub fn merge<S: Record, D: Record>(&self, source: &S, destination: &mut D) -> Result<MergeReport> {
        self.map_into(source, S::record_type_of(), destination, &MapOptions::default())
    }

    /// Builds the identity predicate `source` implies over `D`.
    pub fn equivalence<S: Record, D: Record>(&self, source: &S) -> Result<Equivalence> {
        equivalency::generate(self, source, S::record_type_of(), D::record_type_of())
    }
}

fn check_runtime_type(record: &dyn DynRecord, expected: RecordType) -> Result<()> {
    let actual = record.record_type();
    if actual != expected {
        return Err(DbError::TypeMismatch(format!(
            "Record is a '{}' but was passed as '{}'",
            actual, expected
        )));
    }
    Ok(())
}

impl ObjectMapper for Mapper {
    fn maps_to(&self, destination: RecordType) -> bool {
        self.config
            .type_maps()
            .any(|type_map| type_map.destination_type() == destination)
    }

    fn equivalent_members(
        &self,
        source: RecordType,
        destination: RecordType,
    ) -> Result<&[PropertyMap]> {
        self.config
            .find_type_map(source, destination)?
            .equivalent_members()
            .ok_or_else(|| {
                DbError::EquivalencyNotConfigured(
                    source.name().to_string(),
                    destination.name().to_string(),
                )
            })
    }

    fn map_new(
        &self,
        source: &dyn DynRecord,
        source_type: RecordType,
        destination: RecordType,
        options: &MapOptions,
    ) -> Result<Box<dyn DynRecord>> {
        check_runtime_type(source, source_type)?;
        self.config
            .find_type_map(source_type, destination)?
            .create(source, options)
    }

    fn map_into(
        &self,
        source: &dyn DynRecord,
        source_type: RecordType,
        destination: &mut dyn DynRecord,
        options: &MapOptions,
    ) -> Result<MergeReport> {
        check_runtime_type(source, source_type)?;
        self.config
            .find_type_map(source_type, destination.record_type())?
            .merge(source, destination, options)
    }
}
