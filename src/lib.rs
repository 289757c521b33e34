// ============================================================================
// MemoMap Library
// ============================================================================

//! Identity-based upsert and delete over change-tracked collections.
//!
//! A [`Persistence`] binds a tracked collection of entities to a [`Mapper`].
//! Given any source record (a DTO, a form, a message payload) it finds the
//! stored entity with the same identity and merges the source into it,
//! registers a new entity when nothing matches, or marks the match removed.
//! Saving stays with the caller's session.
//!
//! ```
//! use memomap::prelude::*;
//! use memomap::record_struct;
//!
//! record_struct! {
//!     #[derive(Debug, Clone, Default)]
//!     pub struct Thing {
//!         pub id: i64,
//!         pub title: String,
//!     }
//! }
//!
//! record_struct! {
//!     #[derive(Debug, Clone, Default)]
//!     pub struct ThingDto {
//!         pub id: i64,
//!         pub title: String,
//!     }
//! }
//!
//! # fn main() -> memomap::Result<()> {
//! let model = EntityModel::new().with_entity::<Thing>(&["id"])?;
//! let mapper = MapperConfiguration::builder()
//!     .create_map::<ThingDto, Thing>()
//!     .use_entity_model(model.clone())
//!     .build()?;
//!
//! let session = MemorySession::new(model);
//! let things = session.set::<Thing>()?.persist(mapper)?;
//!
//! let created = things.insert_or_update(&ThingDto { id: 0, title: "New".into() })?;
//! session.save_changes()?;
//! assert_eq!(created.read()?.id, 1);
//!
//! let updated = things.insert_or_update(&ThingDto { id: 1, title: "Renamed".into() })?;
//! assert!(updated.same_entity(&created));
//! assert_eq!(session.entry_state(&updated)?, EntryState::Modified);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod equivalency;
pub mod mapping;
pub mod metadata;
pub mod persistence;
pub mod prelude;
pub mod record;
pub mod tracking;

// Re-export main types for convenience
pub use core::{DataType, DbError, FieldDescriptor, RecordType, Result, Value};
pub use equivalency::{Equivalence, EquivalenceTerm};
pub use mapping::{
    MapOptions, Mapper, MapperConfiguration, MapperConfigurationBuilder, MapperSettings,
    MergeReport, ObjectMapper, TypeMapExpression,
};
pub use metadata::{EntityModel, EntityType, IdentityMetadata, KeyGeneration};
pub use persistence::{PersistExt, Persistence};
pub use record::{DynRecord, FieldSource, FieldValue, Record};
pub use tracking::{
    EntryId, EntryState, MemorySession, MemorySet, Tracked, TrackedCollection,
};
