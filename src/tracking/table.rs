use super::{EntryId, EntryState, Tracked};
use crate::core::{DbError, RecordType, Result, Value};
use crate::equivalency::Equivalence;
use crate::metadata::{EntityType, KeyGeneration};
use crate::record::{FieldRow, Record};
use std::any::Any;
use std::sync::{Arc, RwLock};

/// Type-erased view of a [`Table`] so a session can hold one per entity type.
pub(crate) trait TableOps: Send {
    fn entity_type(&self) -> &EntityType;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn has_changes(&self) -> Result<bool>;

    /// Validates pending inserts without touching any entry.
    fn prepare_save(&self) -> Result<SavePlan>;

    fn apply_save(&mut self, plan: SavePlan) -> Result<SaveSummary>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SaveSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl SaveSummary {
    pub fn written(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}

/// Keys to assign to pending inserts, computed before anything is written.
#[derive(Debug, Default)]
pub(crate) struct SavePlan {
    assigned: Vec<(EntryId, i64)>,
    next_key: i64,
}

struct Entry<T> {
    id: EntryId,
    entity: Arc<RwLock<T>>,
    /// Values as of the last save; `None` until the entry is first saved.
    original: Option<Vec<Value>>,
    state: EntryState,
}

impl<T: Record> Entry<T> {
    fn is_persisted(&self) -> bool {
        self.original.is_some()
    }

    fn current_state(&self) -> Result<EntryState> {
        if self.state != EntryState::Unchanged {
            return Ok(self.state);
        }
        let current = self.entity.read()?.values();
        match &self.original {
            Some(original) if *original != current => Ok(EntryState::Modified),
            _ => Ok(EntryState::Unchanged),
        }
    }

    fn handle(&self) -> Tracked<T> {
        Tracked::new(self.id, Arc::clone(&self.entity))
    }
}

pub(crate) struct Table<T> {
    entity_type: EntityType,
    entries: Vec<Entry<T>>,
    next_key: i64,
}

impl<T: Record> Table<T> {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            entries: Vec::new(),
            next_key: 0,
        }
    }

    fn record_type(&self) -> RecordType {
        self.entity_type.record_type()
    }

    /// First saved, non-deleted entry whose saved values satisfy `predicate`.
    pub fn first_matching(&self, predicate: &Equivalence) -> Result<Option<Tracked<T>>> {
        if predicate.destination() != self.record_type() {
            return Err(DbError::TypeMismatch(format!(
                "Predicate over '{}' used against set of '{}'",
                predicate.destination(),
                self.record_type()
            )));
        }

        let found = self
            .entries
            .iter()
            .filter(|entry| entry.state != EntryState::Deleted)
            .find(|entry| match &entry.original {
                Some(original) => predicate.matches(&FieldRow::new(self.record_type(), original)),
                None => false,
            });
        Ok(found.map(Entry::handle))
    }

    pub fn add(&mut self, entity: T) -> Tracked<T> {
        let entry = Entry {
            id: EntryId::next(),
            entity: Arc::new(RwLock::new(entity)),
            original: None,
            state: EntryState::Added,
        };
        let handle = entry.handle();
        self.entries.push(entry);
        handle
    }

    /// Marks a saved entry deleted; a pending insert is simply discarded.
    pub fn remove(&mut self, tracked: &Tracked<T>) -> Result<()> {
        let position = self
            .position_of(tracked)
            .ok_or_else(|| DbError::NotTracked(tracked.entry_id().to_string()))?;

        if self.entries[position].is_persisted() {
            self.entries[position].state = EntryState::Deleted;
        } else {
            self.entries.remove(position);
        }
        Ok(())
    }

    pub fn state_of(&self, tracked: &Tracked<T>) -> Result<EntryState> {
        match self.position_of(tracked) {
            Some(position) => self.entries[position].current_state(),
            None => Ok(EntryState::Detached),
        }
    }

    pub fn count_in_state(&self, state: EntryState) -> Result<usize> {
        let mut count = 0;
        for entry in &self.entries {
            if entry.current_state()? == state {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Entries as of the last save that are not pending deletion.
    pub fn stored(&self) -> Vec<Tracked<T>> {
        self.entries
            .iter()
            .filter(|entry| entry.is_persisted() && entry.state != EntryState::Deleted)
            .map(Entry::handle)
            .collect()
    }

    fn position_of(&self, tracked: &Tracked<T>) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.id == tracked.entry_id() && Arc::ptr_eq(&entry.entity, tracked.shared()))
    }

    fn key_of(&self, entity: &T) -> Vec<Value> {
        self.entity_type
            .keys()
            .iter()
            .map(|key| entity.field(key).unwrap_or(Value::Null))
            .collect()
    }
}

impl<T: Record> TableOps for Table<T> {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn has_changes(&self) -> Result<bool> {
        for entry in &self.entries {
            if entry.current_state()? != EntryState::Unchanged {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn prepare_save(&self) -> Result<SavePlan> {
        let sequence_key = match self.entity_type.key_generation() {
            KeyGeneration::Sequence => self.entity_type.sequence_key(),
            KeyGeneration::None => None,
        };

        let mut next_key = self.next_key;
        let mut kept_keys: Vec<Vec<Value>> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.iter().filter(|entry| entry.state != EntryState::Deleted) {
            let entity = entry.entity.read()?;
            if let Some(Value::Integer(existing)) = sequence_key.and_then(|key| entity.field(key)) {
                next_key = next_key.max(existing);
            }
        }

        let mut plan = SavePlan::default();
        for entry in self.entries.iter().filter(|entry| entry.state != EntryState::Deleted) {
            let entity = entry.entity.read()?;
            let mut key = self.key_of(&entity);

            if entry.state == EntryState::Added {
                if let Some(member) = sequence_key {
                    if entity.field(member).is_some_and(|value| value.is_default()) {
                        next_key = next_key.checked_add(1).ok_or_else(|| {
                            DbError::ConstraintViolation(format!(
                                "Key sequence of entity '{}' is exhausted",
                                self.record_type()
                            ))
                        })?;
                        plan.assigned.push((entry.id, next_key));
                        key = vec![Value::Integer(next_key)];
                    }
                }
            }

            if key.iter().any(Value::is_null) {
                return Err(DbError::ConstraintViolation(format!(
                    "NULL key value in entity '{}'",
                    self.record_type()
                )));
            }
            if kept_keys.contains(&key) {
                let rendered: Vec<String> = key.iter().map(ToString::to_string).collect();
                return Err(DbError::ConstraintViolation(format!(
                    "Duplicate key ({}) in entity '{}'",
                    rendered.join(", "),
                    self.record_type()
                )));
            }
            kept_keys.push(key);
        }

        plan.next_key = next_key;
        Ok(plan)
    }

    fn apply_save(&mut self, plan: SavePlan) -> Result<SaveSummary> {
        let sequence_key = self.entity_type.sequence_key();
        let mut summary = SaveSummary::default();

        for entry in &mut self.entries {
            let state = entry.current_state()?;
            match state {
                EntryState::Added => summary.added += 1,
                EntryState::Modified => summary.modified += 1,
                EntryState::Deleted => summary.deleted += 1,
                EntryState::Unchanged | EntryState::Detached => {}
            }
            if state == EntryState::Deleted {
                continue;
            }

            let mut entity = entry.entity.write()?;
            if let (Some(member), Some((_, key))) = (
                sequence_key,
                plan.assigned.iter().find(|(id, _)| *id == entry.id),
            ) {
                entity.set_field(member, Value::Integer(*key))?;
            }
            entry.original = Some(entity.values());
            entry.state = EntryState::Unchanged;
        }

        self.entries.retain(|entry| entry.state != EntryState::Deleted);
        self.next_key = plan.next_key;
        Ok(summary)
    }
}
