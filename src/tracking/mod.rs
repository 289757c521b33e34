//! Tracked collections: the change-tracking sets the persistence layer
//! queries and registers entities with.
//!
//! [`TrackedCollection`] is the seam; [`MemorySession`] / [`MemorySet`] is
//! the in-memory implementation, one session per unit of work.

use crate::core::{DbError, Result};
use crate::equivalency::Equivalence;
use crate::record::Record;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

mod session;
mod table;

pub use session::{MemorySession, MemorySet};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one tracked entry, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    pub fn next() -> Self {
        Self(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry#{}", self.0)
    }
}

/// Change state of a tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Not known to the session.
    Detached,
    /// Matches the last saved values.
    Unchanged,
    /// Registered for insertion on the next save.
    Added,
    /// At least one field differs from the last saved values.
    Modified,
    /// Registered for removal on the next save.
    Deleted,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detached => "Detached",
            Self::Unchanged => "Unchanged",
            Self::Added => "Added",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// Shared handle to an entity owned by a tracked collection.
///
/// Writes through [`write`](Self::write) change the tracked instance itself;
/// the collection notices them on its next change detection.
pub struct Tracked<T> {
    entry: EntryId,
    entity: Arc<RwLock<T>>,
}

impl<T> Tracked<T> {
    pub fn new(entry: EntryId, entity: Arc<RwLock<T>>) -> Self {
        Self { entry, entity }
    }

    pub fn entry_id(&self) -> EntryId {
        self.entry
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>> {
        Ok(self.entity.read()?)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>> {
        Ok(self.entity.write()?)
    }

    /// Copies the current state out of the handle.
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        Ok(self.read()?.clone())
    }

    /// Returns `true` when both handles point at the same tracked instance.
    pub fn same_entity(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entity, &other.entity)
    }

    pub(crate) fn shared(&self) -> &Arc<RwLock<T>> {
        &self.entity
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry,
            entity: Arc::clone(&self.entity),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Tracked");
        debug.field("entry", &self.entry);
        match self.entity.try_read() {
            Ok(entity) => debug.field("entity", &*entity),
            Err(_) => debug.field("entity", &"<locked>"),
        };
        debug.finish()
    }
}

/// A queryable, change-tracked set of `T`.
///
/// Implementations are not expected to be safe for concurrent use of one
/// unit of work; callers serialize operations per session.
#[async_trait]
pub trait TrackedCollection<T: Record>: Send + Sync {
    /// First stored entity satisfying `predicate`, if any.
    fn first_matching(&self, predicate: &Equivalence) -> Result<Option<Tracked<T>>>;

    /// Asynchronous lookup honouring `cancel` before and during the query.
    async fn first_matching_async(
        &self,
        predicate: &Equivalence,
        cancel: &CancellationToken,
    ) -> Result<Option<Tracked<T>>> {
        if cancel.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        self.first_matching(predicate)
    }

    /// Registers `entity` for insertion and hands ownership to the collection.
    fn add(&self, entity: T) -> Result<Tracked<T>>;

    /// Registers `entity` for removal.
    fn remove(&self, entity: &Tracked<T>) -> Result<()>;
}
