//! Identity predicates derived from a source record.
//!
//! [`generate`] reads the source's values for every identity member of the
//! destination type and captures them in an [`Equivalence`]: a conjunction of
//! `member = value` terms evaluated by a small interpreter over any
//! [`FieldSource`]. Because the terms are plain data a remote collection can
//! translate them into its own query language instead of scanning.

use crate::core::{DbError, RecordType, Result, Value};
use crate::mapping::ObjectMapper;
use crate::record::{DynRecord, FieldSource};
use std::fmt;

/// One `destination.member = value` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct EquivalenceTerm {
    pub member: &'static str,
    pub value: Value,
}

impl EquivalenceTerm {
    /// `NULL` compares like SQL: it equals nothing, not even another `NULL`.
    pub fn matches(&self, candidate: &dyn FieldSource) -> bool {
        if self.value.is_null() {
            return false;
        }
        candidate
            .field(self.member)
            .is_some_and(|current| current == self.value)
    }
}

/// Predicate over destination entities: true iff every identity member
/// equals the value captured from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Equivalence {
    destination: RecordType,
    terms: Vec<EquivalenceTerm>,
}

impl Equivalence {
    pub fn new(destination: RecordType, terms: Vec<EquivalenceTerm>) -> Result<Self> {
        if terms.is_empty() {
            return Err(DbError::InvalidConfiguration(format!(
                "Equivalence over '{}' needs at least one identity term",
                destination
            )));
        }
        Ok(Self { destination, terms })
    }

    pub fn destination(&self) -> RecordType {
        self.destination
    }

    pub fn terms(&self) -> &[EquivalenceTerm] {
        &self.terms
    }

    pub fn matches(&self, candidate: &dyn FieldSource) -> bool {
        self.terms.iter().all(|term| term.matches(candidate))
    }

    /// Every captured identity value is the unassigned default, so no stored
    /// row can match and an upsert will insert.
    pub fn has_default_identity(&self) -> bool {
        self.terms.iter().all(|term| term.value.is_default())
    }

    /// Adapts the predicate into a closure, e.g. for `Iterator::find`.
    pub fn to_predicate<T: FieldSource>(&self) -> impl Fn(&T) -> bool + '_ {
        move |candidate: &T| self.matches(candidate)
    }
}

impl fmt::Display for Equivalence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, term) in self.terms.iter().enumerate() {
            if idx > 0 {
                write!(f, " AND ")?;
            }
            match &term.value {
                Value::Null => write!(f, "{} = NULL", term.member)?,
                Value::Text(_) | Value::Timestamp(_) | Value::Uuid(_) => {
                    write!(f, "{} = '{}'", term.member, term.value)?
                }
                other => write!(f, "{} = {}", term.member, other)?,
            }
        }
        Ok(())
    }
}

/// Builds the equivalence `source` implies over `destination`.
///
/// Fails with a configuration error when no type map exists for the pair or
/// the pair has no identity correspondence.
pub fn generate(
    mapper: &dyn ObjectMapper,
    source: &dyn DynRecord,
    source_type: RecordType,
    destination: RecordType,
) -> Result<Equivalence> {
    let members = mapper.equivalent_members(source_type, destination)?;

    let mut terms = Vec::with_capacity(members.len());
    for property_map in members {
        let raw = source.field(property_map.source_member()).ok_or_else(|| {
            DbError::FieldNotFound(
                property_map.source_member().to_string(),
                source_type.name().to_string(),
            )
        })?;
        terms.push(EquivalenceTerm {
            member: property_map.destination_member(),
            value: raw.coerce(&property_map.destination_field().data_type)?,
        });
    }

    Equivalence::new(destination, terms)
}
