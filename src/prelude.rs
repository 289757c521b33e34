//! Everything application code needs for the usual upsert workflow.
//!
//! `use memomap::prelude::*;` brings in the record traits, mapper
//! configuration, entity model, in-memory session and the orchestrator.

pub use crate::core::{DbError, RecordType, Result, Value};
pub use crate::mapping::{MapOptions, Mapper, MapperConfiguration, MapperSettings, ObjectMapper};
pub use crate::metadata::{EntityModel, IdentityMetadata};
pub use crate::persistence::{PersistExt, Persistence};
pub use crate::record::{DynRecord, FieldSource, Record};
pub use crate::tracking::{EntryState, MemorySession, MemorySet, Tracked, TrackedCollection};

pub use tokio_util::sync::CancellationToken;
