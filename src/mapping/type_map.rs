use super::{MapOptions, MapperSettings, MergeReport};
use crate::core::{DbError, FieldDescriptor, RecordType, Result, Value};
use crate::metadata::IdentityMetadata;
use crate::record::{DynRecord, Record};
use log::warn;

pub(crate) type Construct = fn() -> Box<dyn DynRecord>;

pub(crate) fn construct<D: Record>() -> Box<dyn DynRecord> {
    Box::new(D::default())
}

/// One destination member and the source member that feeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyMap {
    source: &'static FieldDescriptor,
    destination: &'static FieldDescriptor,
}

impl PropertyMap {
    pub fn source_member(&self) -> &'static str {
        self.source.name
    }

    pub fn destination_member(&self) -> &'static str {
        self.destination.name
    }

    pub fn source_field(&self) -> &'static FieldDescriptor {
        self.source
    }

    pub fn destination_field(&self) -> &'static FieldDescriptor {
        self.destination
    }
}

/// Per-pair customisation collected by
/// [`MapperConfigurationBuilder::create_map_with`](super::MapperConfigurationBuilder::create_map_with).
#[derive(Debug, Clone, Default)]
pub struct TypeMapExpression {
    member_overrides: Vec<(String, String)>,
    ignored: Vec<String>,
    equivalency: Option<Vec<(String, String)>>,
    reverse: bool,
}

impl TypeMapExpression {
    /// Feed destination member `destination` from source member `source`.
    pub fn for_member(mut self, destination: &str, source: &str) -> Self {
        self.member_overrides
            .push((destination.to_string(), source.to_string()));
        self
    }

    /// Never write destination member `destination`.
    pub fn ignore(mut self, destination: &str) -> Self {
        self.ignored.push(destination.to_string());
        self
    }

    /// Declare the identity correspondence explicitly as
    /// `(destination member, source member)` pairs instead of deriving it
    /// from identity metadata.
    pub fn equivalent_by(mut self, pairs: &[(&str, &str)]) -> Self {
        self.equivalency = Some(
            pairs
                .iter()
                .map(|(destination, source)| (destination.to_string(), source.to_string()))
                .collect(),
        );
        self
    }

    /// Also register the inverse map, with member overrides swapped.
    pub fn reverse_map(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub(crate) fn wants_reverse(&self) -> bool {
        self.reverse
    }

    pub(crate) fn reversed(&self) -> Self {
        Self {
            member_overrides: self
                .member_overrides
                .iter()
                .map(|(destination, source)| (source.clone(), destination.clone()))
                .collect(),
            ignored: Vec::new(),
            equivalency: None,
            reverse: false,
        }
    }
}

/// Resolved member correspondence for one (source, destination) pair.
pub struct TypeMap {
    source: RecordType,
    destination: RecordType,
    property_maps: Vec<PropertyMap>,
    equivalent_members: Option<Vec<PropertyMap>>,
    construct: Construct,
}

impl std::fmt::Debug for TypeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeMap")
            .field("source", &self.source.name())
            .field("destination", &self.destination.name())
            .field("property_maps", &self.property_maps)
            .field("equivalent_members", &self.equivalent_members)
            .finish()
    }
}

fn resolve_member(
    record: RecordType,
    name: &str,
    ignore_case: bool,
) -> Result<&'static FieldDescriptor> {
    record
        .resolve_member(name, ignore_case)
        .ok_or_else(|| DbError::FieldNotFound(name.to_string(), record.name().to_string()))
}

impl TypeMap {
    pub(crate) fn resolve(
        source: RecordType,
        destination: RecordType,
        construct: Construct,
        expression: &TypeMapExpression,
        settings: &MapperSettings,
        identity: Option<&dyn IdentityMetadata>,
    ) -> Result<Self> {
        let ignore_case = settings.case_insensitive_members;

        let mut overrides = Vec::with_capacity(expression.member_overrides.len());
        for (destination_name, source_name) in &expression.member_overrides {
            overrides.push((
                resolve_member(destination, destination_name, ignore_case)?.name,
                resolve_member(source, source_name, ignore_case)?,
            ));
        }

        let mut ignored = Vec::with_capacity(expression.ignored.len());
        for name in &expression.ignored {
            ignored.push(resolve_member(destination, name, ignore_case)?.name);
        }

        let mut property_maps = Vec::new();
        let mut unmapped = Vec::new();
        for destination_field in destination.fields() {
            if ignored.contains(&destination_field.name) {
                continue;
            }

            let source_field = overrides
                .iter()
                .find(|(name, _)| *name == destination_field.name)
                .map(|(_, field)| *field)
                .or_else(|| source.resolve_member(destination_field.name, ignore_case));

            let Some(source_field) = source_field else {
                unmapped.push(destination_field.name);
                continue;
            };

            if !source_field
                .data_type
                .can_cast_to(&destination_field.data_type)
            {
                return Err(DbError::TypeMismatch(format!(
                    "{}.{} ({}) cannot be mapped to {}.{} ({})",
                    source,
                    source_field.name,
                    source_field.data_type,
                    destination,
                    destination_field.name,
                    destination_field.data_type
                )));
            }

            property_maps.push(PropertyMap {
                source: source_field,
                destination: destination_field,
            });
        }

        if !unmapped.is_empty() {
            if settings.assert_configuration_is_valid {
                return Err(DbError::InvalidConfiguration(format!(
                    "Unmapped members on {} --> {}: {}",
                    source,
                    destination,
                    unmapped.join(", ")
                )));
            }
            warn!(
                "Unmapped members on {} --> {} are left untouched: {}",
                source,
                destination,
                unmapped.join(", ")
            );
        }

        let equivalent_members = match &expression.equivalency {
            Some(pairs) => {
                if pairs.is_empty() {
                    return Err(DbError::InvalidConfiguration(format!(
                        "Explicit equivalency for {} --> {} names no members",
                        source, destination
                    )));
                }
                let mut members = Vec::with_capacity(pairs.len());
                for (destination_name, source_name) in pairs {
                    members.push(PropertyMap {
                        source: resolve_member(source, source_name, ignore_case)?,
                        destination: resolve_member(destination, destination_name, ignore_case)?,
                    });
                }
                Some(members)
            }
            None => match identity {
                Some(metadata) if metadata.contains(destination) => {
                    let keys = metadata.identity_fields(destination)?;
                    let mut members = Vec::with_capacity(keys.len());
                    for key in keys {
                        let property_map = property_maps
                            .iter()
                            .find(|pm| pm.destination_member() == key)
                            .copied()
                            .ok_or_else(|| DbError::IdentityNotMapped {
                                entity: destination.name().to_string(),
                                member: key.to_string(),
                                source_type: source.name().to_string(),
                            })?;
                        members.push(property_map);
                    }
                    Some(members)
                }
                _ => None,
            },
        };

        Ok(Self {
            source,
            destination,
            property_maps,
            equivalent_members,
            construct,
        })
    }

    pub fn source_type(&self) -> RecordType {
        self.source
    }

    pub fn destination_type(&self) -> RecordType {
        self.destination
    }

    pub fn property_maps(&self) -> &[PropertyMap] {
        &self.property_maps
    }

    /// Identity correspondence, when the destination has one.
    pub fn equivalent_members(&self) -> Option<&[PropertyMap]> {
        self.equivalent_members.as_deref()
    }

    fn read_source(&self, property_map: &PropertyMap, source: &dyn DynRecord) -> Result<Value> {
        let raw = source.field(property_map.source_member()).ok_or_else(|| {
            DbError::FieldNotFound(
                property_map.source_member().to_string(),
                self.source.name().to_string(),
            )
        })?;
        let destination_field = property_map.destination_field();
        let value = raw.coerce(&destination_field.data_type)?;
        destination_field.validate(&value)?;
        Ok(value)
    }

    /// Builds a fresh destination populated from every mapped member.
    pub(crate) fn create(
        &self,
        source: &dyn DynRecord,
        options: &MapOptions,
    ) -> Result<Box<dyn DynRecord>> {
        let mut destination = (self.construct)();
        for property_map in &self.property_maps {
            if options.skips(property_map.destination_member()) {
                continue;
            }
            let value = self.read_source(property_map, source)?;
            destination.set_field(property_map.destination_member(), value)?;
        }
        options.run_after_map(source, destination.as_mut());
        Ok(destination)
    }

    /// Writes into `destination` only the members whose value differs.
    ///
    /// Every changed member is converted before the first write, so an error
    /// leaves `destination` untouched.
    pub(crate) fn merge(
        &self,
        source: &dyn DynRecord,
        destination: &mut dyn DynRecord,
        options: &MapOptions,
    ) -> Result<MergeReport> {
        let mut changes = Vec::new();
        for property_map in &self.property_maps {
            let member = property_map.destination_member();
            if options.skips(member) {
                continue;
            }

            let value = self.read_source(property_map, source)?;
            let current = destination.field(member).ok_or_else(|| {
                DbError::FieldNotFound(member.to_string(), self.destination.name().to_string())
            })?;
            if current != value {
                changes.push((member, value));
            }
        }

        // Field conversions (e.g. range checks on narrow integers) run here.
        let mut staged = (self.construct)();
        for (member, value) in &changes {
            staged.set_field(member, value.clone())?;
        }

        let mut report = MergeReport::default();
        for (member, value) in changes {
            destination.set_field(member, value)?;
            report.record(member);
        }
        options.run_after_map(source, destination);
        Ok(report)
    }
}
