//! The ordered event index the consistency checker reads from and repairs through.
//!
//! Any store works as long as it regenerates the per-event facts from
//! [`crate::derive::derive`] and returns them ordered by their `sort_key`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::derive::{Boundary, IntervalDelta};
use crate::event::Event;
use crate::state::State;
use crate::timestamp::Timestamp;
use crate::types::{EventId, FieldName, Revision};

/// Errors raised by an [`EventIndex`] implementation.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Another writer changed the event since its revision was read.
    #[error("event {id} was modified concurrently (expected revision {expected})")]
    Conflict { id: EventId, expected: Revision },

    #[error("event not found: {id}")]
    NotFound { id: EventId },

    /// Storage failure, treated as transient rather than a consistency problem.
    #[error("event index unavailable")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// An event together with its current revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event: Event,
    pub revision: Revision,
}

/// Range scans over the derived boundary and interval-delta views, plus the
/// single write the checker performs.
pub trait EventIndex {
    /// Boundaries of `field` with `start <= timestamp < end` (`None` = unbounded).
    fn boundaries(
        &self,
        field: &FieldName,
        start: Timestamp,
        end: Option<Timestamp>,
    ) -> Result<Vec<Boundary>, IndexError>;

    /// The last boundary of `field` strictly before `before`.
    fn boundary_before(
        &self,
        field: &FieldName,
        before: Timestamp,
    ) -> Result<Option<Boundary>, IndexError>;

    /// Interval deltas of `field` with `start <= timestamp <= end`.
    fn deltas(
        &self,
        field: &FieldName,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<IntervalDelta>, IndexError>;

    /// The last non-point delta of `field` strictly before `before`.
    fn block_change_before(
        &self,
        field: &FieldName,
        before: Timestamp,
    ) -> Result<Option<IntervalDelta>, IndexError>;

    fn event(&self, id: &EventId) -> Result<Option<StoredEvent>, IndexError>;

    /// The state `field` is in just before `at` ([`State::Untracked`] with no history).
    fn state_before(&self, field: &FieldName, at: Timestamp) -> Result<State, IndexError> {
        Ok(self
            .boundary_before(field, at)?
            .map_or(State::Untracked, |row| row.active_state))
    }

    /// Sets an event's `lastState` if it is still at `expected`, returning the
    /// new revision. Derived rows for the event must reflect the change.
    fn patch_last_state(
        &mut self,
        id: &EventId,
        expected: Revision,
        last_state: State,
    ) -> Result<Revision, IndexError>;
}
