//! In-memory [`EventIndex`] for small datasets and tests.

use std::collections::{BTreeMap, HashMap};

use crate::derive::{Boundary, Delta, IntervalDelta, derive};
use crate::duration::DurationError;
use crate::event::Event;
use crate::index::{EventIndex, IndexError, StoredEvent};
use crate::state::State;
use crate::timestamp::Timestamp;
use crate::types::{EventId, FieldName, Revision};

/// Keeps every event plus its derived rows, sorted per field.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    events: HashMap<EventId, StoredEvent>,
    boundaries: BTreeMap<FieldName, Vec<Boundary>>,
    deltas: BTreeMap<FieldName, Vec<IntervalDelta>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an event, re-deriving its rows.
    pub fn insert(&mut self, event: Event) -> Result<Revision, DurationError> {
        let derived = derive(&event)?;
        let revision = self
            .events
            .get(&event.id)
            .map_or(Revision::INITIAL, |stored| stored.revision.next());

        self.remove_rows(&event.id);
        let boundaries = self.boundaries.entry(event.field.clone()).or_default();
        boundaries.extend(derived.boundaries);
        boundaries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let deltas = self.deltas.entry(event.field.clone()).or_default();
        deltas.extend(derived.deltas);
        deltas.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        self.events
            .insert(event.id.clone(), StoredEvent { event, revision });
        Ok(revision)
    }

    fn remove_rows(&mut self, id: &EventId) {
        for rows in self.boundaries.values_mut() {
            rows.retain(|row| &row.event_id != id);
        }
        for rows in self.deltas.values_mut() {
            rows.retain(|row| &row.event_id != id);
        }
    }

    fn field_boundaries(&self, field: &FieldName) -> &[Boundary] {
        self.boundaries.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    fn field_deltas(&self, field: &FieldName) -> &[IntervalDelta] {
        self.deltas.get(field).map(Vec::as_slice).unwrap_or_default()
    }
}

impl EventIndex for MemoryIndex {
    fn boundaries(
        &self,
        field: &FieldName,
        start: Timestamp,
        end: Option<Timestamp>,
    ) -> Result<Vec<Boundary>, IndexError> {
        Ok(self
            .field_boundaries(field)
            .iter()
            .filter(|row| row.timestamp >= start && end.is_none_or(|end| row.timestamp < end))
            .cloned()
            .collect())
    }

    fn boundary_before(
        &self,
        field: &FieldName,
        before: Timestamp,
    ) -> Result<Option<Boundary>, IndexError> {
        Ok(self
            .field_boundaries(field)
            .iter()
            .rev()
            .find(|row| row.timestamp < before)
            .cloned())
    }

    fn deltas(
        &self,
        field: &FieldName,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<IntervalDelta>, IndexError> {
        Ok(self
            .field_deltas(field)
            .iter()
            .filter(|row| row.timestamp >= start && row.timestamp <= end)
            .cloned()
            .collect())
    }

    fn block_change_before(
        &self,
        field: &FieldName,
        before: Timestamp,
    ) -> Result<Option<IntervalDelta>, IndexError> {
        Ok(self
            .field_deltas(field)
            .iter()
            .rev()
            .find(|row| row.timestamp < before && row.delta != Delta::Point)
            .cloned())
    }

    fn event(&self, id: &EventId) -> Result<Option<StoredEvent>, IndexError> {
        Ok(self.events.get(id).cloned())
    }

    fn patch_last_state(
        &mut self,
        id: &EventId,
        expected: Revision,
        last_state: State,
    ) -> Result<Revision, IndexError> {
        let stored = self
            .events
            .get(id)
            .ok_or_else(|| IndexError::NotFound { id: id.clone() })?;
        if stored.revision != expected {
            return Err(IndexError::Conflict {
                id: id.clone(),
                expected,
            });
        }
        let event = stored.event.clone().with_last_state(last_state);
        self.insert(event)
            .map_err(|err| IndexError::Backend(Box::new(err)))
    }
}
