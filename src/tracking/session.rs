use super::table::{SavePlan, SaveSummary, Table, TableOps};
use super::{EntryState, Tracked, TrackedCollection};
use crate::core::{DbError, Result};
use crate::equivalency::Equivalence;
use crate::metadata::EntityModel;
use crate::record::Record;
use async_trait::async_trait;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

#[derive(Default)]
struct SessionState {
    tables: HashMap<TypeId, Box<dyn TableOps>>,
}

/// In-memory unit of work.
///
/// Entities added through a [`MemorySet`] stay pending until
/// [`save_changes`](Self::save_changes); queries only see saved values.
/// Clones share the same state.
#[derive(Clone)]
pub struct MemorySession {
    model: EntityModel,
    state: Arc<Mutex<SessionState>>,
}

impl MemorySession {
    pub fn new(model: EntityModel) -> Self {
        Self {
            model,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn model(&self) -> &EntityModel {
        &self.model
    }

    /// Collection of `T`; fails when `T` is not part of the model.
    pub fn set<T: Record>(&self) -> Result<MemorySet<T>> {
        self.with_table::<T, _>(|_| Ok(()))?;
        Ok(MemorySet {
            session: self.clone(),
            _marker: PhantomData,
        })
    }

    /// Persists every pending change and returns the number of entries written.
    ///
    /// All tables are validated before any of them is written, so a key
    /// violation leaves the session exactly as it was.
    pub fn save_changes(&self) -> Result<usize> {
        let mut state = self.state.lock()?;

        let mut plans: Vec<(TypeId, SavePlan)> = Vec::with_capacity(state.tables.len());
        for (type_id, table) in state.tables.iter() {
            plans.push((*type_id, table.prepare_save()?));
        }

        let mut written = 0;
        for (type_id, plan) in plans {
            let Some(table) = state.tables.get_mut(&type_id) else {
                continue;
            };
            let summary: SaveSummary = table.apply_save(plan)?;
            if summary.written() > 0 {
                event!(
                    Level::DEBUG,
                    entity = %table.entity_type().record_type(),
                    added = summary.added,
                    modified = summary.modified,
                    deleted = summary.deleted,
                    "session table saved"
                );
            }
            written += summary.written();
        }

        event!(Level::DEBUG, written, "session changes saved");
        Ok(written)
    }

    pub fn has_changes(&self) -> Result<bool> {
        let state = self.state.lock()?;
        for table in state.tables.values() {
            if table.has_changes()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn entry_state<T: Record>(&self, tracked: &Tracked<T>) -> Result<EntryState> {
        self.with_table::<T, _>(|table| table.state_of(tracked))
    }

    pub fn count_in_state<T: Record>(&self, state: EntryState) -> Result<usize> {
        self.with_table::<T, _>(|table| table.count_in_state(state))
    }

    fn with_table<T, R>(&self, f: impl FnOnce(&mut Table<T>) -> Result<R>) -> Result<R>
    where
        T: Record,
    {
        let record_type = T::record_type_of();
        let entity_type = self.model.entity_type(record_type)?;

        let mut state = self.state.lock()?;
        let table = state
            .tables
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Table::<T>::new(entity_type.clone())) as Box<dyn TableOps>);
        let table = table
            .as_any_mut()
            .downcast_mut::<Table<T>>()
            .ok_or_else(|| DbError::TypeMismatch(format!("Table for '{}' has the wrong shape", record_type)))?;
        f(table)
    }
}

/// Tracked collection of one entity type inside a [`MemorySession`].
pub struct MemorySet<T> {
    session: MemorySession,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for MemorySet<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> MemorySet<T> {
    pub fn session(&self) -> &MemorySession {
        &self.session
    }

    /// Number of saved entities, including those pending deletion.
    pub fn count(&self) -> Result<usize> {
        self.session.with_table::<T, _>(|table| {
            let unchanged = table.count_in_state(EntryState::Unchanged)?;
            let modified = table.count_in_state(EntryState::Modified)?;
            let deleted = table.count_in_state(EntryState::Deleted)?;
            Ok(unchanged + modified + deleted)
        })
    }

    /// Saved entities not pending deletion, in insertion order.
    pub fn stored(&self) -> Result<Vec<Tracked<T>>> {
        self.session.with_table::<T, _>(|table| Ok(table.stored()))
    }

    pub fn entry_state(&self, tracked: &Tracked<T>) -> Result<EntryState> {
        self.session.entry_state(tracked)
    }
}

#[async_trait]
impl<T: Record> TrackedCollection<T> for MemorySet<T> {
    fn first_matching(&self, predicate: &Equivalence) -> Result<Option<Tracked<T>>> {
        let found = self
            .session
            .with_table::<T, _>(|table| table.first_matching(predicate))?;
        event!(
            Level::TRACE,
            entity = %predicate.destination(),
            predicate = %predicate,
            hit = found.is_some(),
            "memory set lookup"
        );
        Ok(found)
    }

    async fn first_matching_async(
        &self,
        predicate: &Equivalence,
        cancel: &CancellationToken,
    ) -> Result<Option<Tracked<T>>> {
        if cancel.is_cancelled() {
            return Err(DbError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                event!(Level::DEBUG, entity = %predicate.destination(), "memory set lookup cancelled");
                Err(DbError::Cancelled)
            }
            found = async {
                tokio::task::yield_now().await;
                self.first_matching(predicate)
            } => found,
        }
    }

    fn add(&self, entity: T) -> Result<Tracked<T>> {
        self.session.with_table::<T, _>(|table| Ok(table.add(entity)))
    }

    fn remove(&self, entity: &Tracked<T>) -> Result<()> {
        self.session.with_table::<T, _>(|table| table.remove(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::equivalency::EquivalenceTerm;
    use crate::record_struct;

    record_struct! {
        #[derive(Debug, Clone, Default, PartialEq)]
        struct Tag {
            id: i64,
            label: String,
        }
    }

    record_struct! {
        #[derive(Debug, Clone, Default, PartialEq)]
        struct Untracked {
            id: i64,
        }
    }

    fn session() -> MemorySession {
        MemorySession::new(EntityModel::new().with_entity::<Tag>(&["id"]).unwrap())
    }

    fn by_id(id: i64) -> Equivalence {
        Equivalence::new(
            Tag::record_type_of(),
            vec![EquivalenceTerm {
                member: "id",
                value: Value::Integer(id),
            }],
        )
        .unwrap()
    }

    fn tag(id: i64, label: &str) -> Tag {
        Tag {
            id,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_set_requires_registered_type() {
        let result = session().set::<Untracked>();
        assert!(matches!(result, Err(DbError::EntityTypeNotFound(_))));
    }

    #[test]
    fn test_pending_entries_are_invisible_until_saved() {
        let session = session();
        let tags = session.set::<Tag>().unwrap();

        let added = tags.add(tag(1, "one")).unwrap();
        assert_eq!(session.entry_state(&added).unwrap(), EntryState::Added);
        assert!(tags.first_matching(&by_id(1)).unwrap().is_none());
        assert!(session.has_changes().unwrap());

        assert_eq!(session.save_changes().unwrap(), 1);
        assert!(!session.has_changes().unwrap());

        let found = tags.first_matching(&by_id(1)).unwrap().unwrap();
        assert!(found.same_entity(&added));
        assert_eq!(session.entry_state(&found).unwrap(), EntryState::Unchanged);
    }

    #[test]
    fn test_modified_is_detected_by_value() {
        let session = session();
        let tags = session.set::<Tag>().unwrap();
        let tracked = tags.add(tag(1, "one")).unwrap();
        session.save_changes().unwrap();

        tracked.write().unwrap().label = "one".to_string();
        assert_eq!(session.entry_state(&tracked).unwrap(), EntryState::Unchanged);

        tracked.write().unwrap().label = "uno".to_string();
        assert_eq!(session.entry_state(&tracked).unwrap(), EntryState::Modified);
        assert_eq!(session.count_in_state::<Tag>(EntryState::Modified).unwrap(), 1);

        // Lookups still see the saved values.
        assert!(tags.first_matching(&by_id(1)).unwrap().is_some());
        assert_eq!(session.save_changes().unwrap(), 1);
        assert_eq!(session.entry_state(&tracked).unwrap(), EntryState::Unchanged);
    }

    #[test]
    fn test_sequence_keys_are_assigned_on_save() {
        let session = session();
        let tags = session.set::<Tag>().unwrap();
        tags.add(tag(5, "explicit")).unwrap();
        let generated = tags.add(tag(0, "generated")).unwrap();
        session.save_changes().unwrap();

        assert_eq!(generated.read().unwrap().id, 6);
        assert_eq!(tags.count().unwrap(), 2);
    }

    #[test]
    fn test_exhausted_sequence_is_a_constraint_violation() {
        let session = session();
        let tags = session.set::<Tag>().unwrap();
        tags.add(tag(i64::MAX, "last")).unwrap();
        session.save_changes().unwrap();

        let pending = tags.add(tag(0, "overflow")).unwrap();
        let err = session.save_changes().unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
        assert_eq!(session.entry_state(&pending).unwrap(), EntryState::Added);
        assert_eq!(pending.read().unwrap().id, 0);
    }

    #[test]
    fn test_duplicate_keys_leave_session_untouched() {
        let session = session();
        let tags = session.set::<Tag>().unwrap();
        tags.add(tag(1, "first")).unwrap();
        session.save_changes().unwrap();

        let duplicate = tags.add(tag(1, "second")).unwrap();
        let err = session.save_changes().unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
        assert_eq!(session.entry_state(&duplicate).unwrap(), EntryState::Added);

        tags.remove(&duplicate).unwrap();
        assert_eq!(session.entry_state(&duplicate).unwrap(), EntryState::Detached);
        assert_eq!(session.save_changes().unwrap(), 0);
    }

    #[test]
    fn test_remove_then_save_drops_entity() {
        let session = session();
        let tags = session.set::<Tag>().unwrap();
        tags.add(tag(1, "a")).unwrap();
        tags.add(tag(2, "b")).unwrap();
        session.save_changes().unwrap();

        let found = tags.first_matching(&by_id(2)).unwrap().unwrap();
        tags.remove(&found).unwrap();
        assert_eq!(session.entry_state(&found).unwrap(), EntryState::Deleted);
        assert!(tags.first_matching(&by_id(2)).unwrap().is_none());
        assert_eq!(tags.stored().unwrap().len(), 1);

        assert_eq!(session.save_changes().unwrap(), 1);
        assert_eq!(tags.count().unwrap(), 1);
        assert_eq!(session.entry_state(&found).unwrap(), EntryState::Detached);

        assert!(matches!(tags.remove(&found), Err(DbError::NotTracked(_))));
    }

    #[tokio::test]
    async fn test_async_lookup_honours_cancellation() {
        let session = session();
        let tags = session.set::<Tag>().unwrap();
        tags.add(tag(1, "a")).unwrap();
        session.save_changes().unwrap();

        let token = CancellationToken::new();
        let found = tags.first_matching_async(&by_id(1), &token).await.unwrap();
        assert!(found.is_some());

        token.cancel();
        let err = tags.first_matching_async(&by_id(1), &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
