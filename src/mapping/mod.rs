//! Type-pair mapping rules and the field merge mapper.
//!
//! A [`Mapper`] is built once from a [`MapperConfiguration`] and passed
//! explicitly to whatever needs it. For every registered (source,
//! destination) pair it knows the member correspondence, the identity
//! correspondence used for equivalency lookups, and how to either build a
//! new destination or merge into an existing one without touching members
//! whose value is unchanged.

use crate::core::{RecordType, Result};
use crate::record::DynRecord;
use std::fmt;
use std::sync::Arc;

pub mod config;
mod mapper;
mod type_map;

pub use config::MapperSettings;
pub use mapper::{Mapper, MapperConfiguration, MapperConfigurationBuilder};
pub use type_map::{PropertyMap, TypeMap, TypeMapExpression};

/// The mapping capability consumed by the persistence layer.
pub trait ObjectMapper: Send + Sync {
    /// Returns `true` when at least one type map targets `destination`.
    fn maps_to(&self, destination: RecordType) -> bool;

    /// Identity correspondence between `source` and `destination`.
    fn equivalent_members(
        &self,
        source: RecordType,
        destination: RecordType,
    ) -> Result<&[PropertyMap]>;

    /// Builds a new `destination` instance from `source`.
    fn map_new(
        &self,
        source: &dyn DynRecord,
        source_type: RecordType,
        destination: RecordType,
        options: &MapOptions,
    ) -> Result<Box<dyn DynRecord>>;

    /// Merges `source` into an existing destination, diff-aware.
    fn map_into(
        &self,
        source: &dyn DynRecord,
        source_type: RecordType,
        destination: &mut dyn DynRecord,
        options: &MapOptions,
    ) -> Result<MergeReport>;
}

type AfterMap = Arc<dyn Fn(&dyn DynRecord, &mut dyn DynRecord) + Send + Sync>;

/// Per-call mapping options.
#[derive(Clone, Default)]
pub struct MapOptions {
    ignored: Vec<String>,
    after_map: Option<AfterMap>,
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave `member` of the destination alone for this call.
    pub fn ignore_member(mut self, member: &str) -> Self {
        self.ignored.push(member.to_string());
        self
    }

    /// Run `callback` after members have been copied.
    pub fn after_map<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn DynRecord, &mut dyn DynRecord) + Send + Sync + 'static,
    {
        self.after_map = Some(Arc::new(callback));
        self
    }

    pub(crate) fn skips(&self, member: &str) -> bool {
        self.ignored.iter().any(|ignored| ignored == member)
    }

    pub(crate) fn run_after_map(&self, source: &dyn DynRecord, destination: &mut dyn DynRecord) {
        if let Some(callback) = &self.after_map {
            callback(source, destination);
        }
    }
}

impl fmt::Debug for MapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapOptions")
            .field("ignored", &self.ignored)
            .field("after_map", &self.after_map.is_some())
            .finish()
    }
}

/// Members written by a diff-aware merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    changed: Vec<&'static str>,
}

impl MergeReport {
    pub(crate) fn record(&mut self, member: &'static str) {
        self.changed.push(member);
    }

    pub fn changed_members(&self) -> &[&'static str] {
        &self.changed
    }

    pub fn is_unchanged(&self) -> bool {
        self.changed.is_empty()
    }
}
