//! Upsert and delete by identity.
//!
//! [`Persistence`] binds one tracked collection of `T` to a mapper. Every
//! operation builds the source's equivalence over `T`, looks up the first
//! stored match and then either merges into it, registers a freshly mapped
//! `T`, or marks the match removed. Nothing is saved here: callers batch any
//! number of operations and then save through their session.

use crate::core::{DbError, RecordType, Result};
use crate::equivalency::{self, Equivalence};
use crate::mapping::{MapOptions, Mapper, ObjectMapper};
use crate::record::{DynRecord, Record, downcast_record};
use crate::tracking::{Tracked, TrackedCollection};
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug_span, event};

pub struct Persistence<T, C, M = Mapper> {
    collection: C,
    mapper: M,
    destination: RecordType,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C, M> std::fmt::Debug for Persistence<T, C, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl<T, C, M> Persistence<T, C, M>
where
    T: Record,
    C: TrackedCollection<T>,
    M: ObjectMapper,
{
    /// Binds `collection` to `mapper`.
    ///
    /// Fails with [`DbError::MappingNotFound`] when no type map of `mapper`
    /// produces `T`, since every later call would fail the same way.
    pub fn new(collection: C, mapper: M) -> Result<Self> {
        let destination = T::record_type_of();
        if !mapper.maps_to(destination) {
            return Err(DbError::MappingNotFound(
                "*".to_string(),
                destination.name().to_string(),
            ));
        }
        Ok(Self {
            collection,
            mapper,
            destination,
            _marker: PhantomData,
        })
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    pub fn into_inner(self) -> (C, M) {
        (self.collection, self.mapper)
    }

    /// Merges `source` into its stored match, or registers a new `T` mapped
    /// from it. Returns the tracked entity either way.
    pub fn insert_or_update<S: Record>(&self, source: &S) -> Result<Tracked<T>> {
        self.insert_or_update_dyn_with(S::record_type_of(), source, &MapOptions::default())
    }

    pub fn insert_or_update_with<S: Record>(
        &self,
        source: &S,
        options: &MapOptions,
    ) -> Result<Tracked<T>> {
        self.insert_or_update_dyn_with(S::record_type_of(), source, options)
    }

    /// [`insert_or_update`](Self::insert_or_update) for a source whose type is
    /// only known at runtime. `source` must actually be a `source_type`.
    pub fn insert_or_update_dyn(
        &self,
        source_type: RecordType,
        source: &dyn DynRecord,
    ) -> Result<Tracked<T>> {
        self.insert_or_update_dyn_with(source_type, source, &MapOptions::default())
    }

    pub fn insert_or_update_dyn_with(
        &self,
        source_type: RecordType,
        source: &dyn DynRecord,
        options: &MapOptions,
    ) -> Result<Tracked<T>> {
        let span = debug_span!(
            "persistence.insert_or_update",
            destination = %self.destination,
            source = %source_type
        );
        let _enter = span.enter();

        let equivalence = self.equivalence(source_type, source)?;
        let found = self.collection.first_matching(&equivalence)?;
        self.apply_upsert(found, source_type, source, options)
    }

    pub async fn insert_or_update_async<S: Record>(
        &self,
        source: &S,
        cancel: &CancellationToken,
    ) -> Result<Tracked<T>> {
        self.insert_or_update_dyn_async_with(
            S::record_type_of(),
            source,
            cancel,
            &MapOptions::default(),
        )
        .await
    }

    pub async fn insert_or_update_async_with<S: Record>(
        &self,
        source: &S,
        cancel: &CancellationToken,
        options: &MapOptions,
    ) -> Result<Tracked<T>> {
        self.insert_or_update_dyn_async_with(S::record_type_of(), source, cancel, options)
            .await
    }

    pub async fn insert_or_update_dyn_async(
        &self,
        source_type: RecordType,
        source: &dyn DynRecord,
        cancel: &CancellationToken,
    ) -> Result<Tracked<T>> {
        self.insert_or_update_dyn_async_with(source_type, source, cancel, &MapOptions::default())
            .await
    }

    /// Like [`insert_or_update_dyn_with`](Self::insert_or_update_dyn_with)
    /// with an asynchronous lookup. `cancel` is checked before any work is
    /// done and observed by the collection during the lookup.
    pub async fn insert_or_update_dyn_async_with(
        &self,
        source_type: RecordType,
        source: &dyn DynRecord,
        cancel: &CancellationToken,
        options: &MapOptions,
    ) -> Result<Tracked<T>> {
        let span = debug_span!(
            "persistence.insert_or_update_async",
            destination = %self.destination,
            source = %source_type
        );
        async {
            if cancel.is_cancelled() {
                event!(Level::DEBUG, "upsert cancelled before lookup");
                return Err(DbError::Cancelled);
            }
            let equivalence = self.equivalence(source_type, source)?;
            let found = self
                .collection
                .first_matching_async(&equivalence, cancel)
                .await?;
            self.apply_upsert(found, source_type, source, options)
        }
        .instrument(span)
        .await
    }

    /// Marks the stored match of `source` removed.
    ///
    /// Returns `false` without touching the collection when nothing matches.
    pub fn remove<S: Record>(&self, source: &S) -> Result<bool> {
        self.remove_dyn(S::record_type_of(), source)
    }

    pub fn remove_dyn(&self, source_type: RecordType, source: &dyn DynRecord) -> Result<bool> {
        let span = debug_span!(
            "persistence.remove",
            destination = %self.destination,
            source = %source_type
        );
        let _enter = span.enter();

        let equivalence = self.equivalence(source_type, source)?;
        let found = self.collection.first_matching(&equivalence)?;
        self.apply_remove(found, &equivalence)
    }

    pub async fn remove_async<S: Record>(
        &self,
        source: &S,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.remove_dyn_async(S::record_type_of(), source, cancel).await
    }

    pub async fn remove_dyn_async(
        &self,
        source_type: RecordType,
        source: &dyn DynRecord,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let span = debug_span!(
            "persistence.remove_async",
            destination = %self.destination,
            source = %source_type
        );
        async {
            if cancel.is_cancelled() {
                event!(Level::DEBUG, "remove cancelled before lookup");
                return Err(DbError::Cancelled);
            }
            let equivalence = self.equivalence(source_type, source)?;
            let found = self
                .collection
                .first_matching_async(&equivalence, cancel)
                .await?;
            self.apply_remove(found, &equivalence)
        }
        .instrument(span)
        .await
    }

    fn equivalence(&self, source_type: RecordType, source: &dyn DynRecord) -> Result<Equivalence> {
        let actual = source.record_type();
        if actual != source_type {
            return Err(DbError::TypeMismatch(format!(
                "Source is a '{}' but was passed as '{}'",
                actual, source_type
            )));
        }

        let equivalence = equivalency::generate(&self.mapper, source, source_type, self.destination)?;
        if equivalence.has_default_identity() {
            event!(
                Level::DEBUG,
                predicate = %equivalence,
                "source carries a default identity; nothing stored can match"
            );
        }
        Ok(equivalence)
    }

    fn apply_upsert(
        &self,
        found: Option<Tracked<T>>,
        source_type: RecordType,
        source: &dyn DynRecord,
        options: &MapOptions,
    ) -> Result<Tracked<T>> {
        match found {
            Some(tracked) => {
                let report = {
                    let mut entity = tracked.write()?;
                    self.mapper
                        .map_into(source, source_type, &mut *entity, options)?
                };
                event!(
                    Level::DEBUG,
                    entry = %tracked.entry_id(),
                    changed = ?report.changed_members(),
                    "merged into existing entity"
                );
                Ok(tracked)
            }
            None => {
                let created = self
                    .mapper
                    .map_new(source, source_type, self.destination, options)?;
                let entity: T = downcast_record(created)?;
                let tracked = self.collection.add(entity)?;
                event!(Level::DEBUG, entry = %tracked.entry_id(), "registered new entity");
                Ok(tracked)
            }
        }
    }

    fn apply_remove(&self, found: Option<Tracked<T>>, equivalence: &Equivalence) -> Result<bool> {
        match found {
            Some(tracked) => {
                self.collection.remove(&tracked)?;
                event!(Level::DEBUG, entry = %tracked.entry_id(), "marked entity removed");
                Ok(true)
            }
            None => {
                event!(Level::DEBUG, predicate = %equivalence, "nothing to remove");
                Ok(false)
            }
        }
    }
}

/// Binds any tracked collection to a mapper.
pub trait PersistExt<T: Record>: TrackedCollection<T> + Sized {
    fn persist<M: ObjectMapper>(self, mapper: M) -> Result<Persistence<T, Self, M>> {
        Persistence::new(self, mapper)
    }
}

impl<T: Record, C: TrackedCollection<T>> PersistExt<T> for C {}
