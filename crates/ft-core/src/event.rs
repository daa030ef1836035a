//! User-logged events.

use serde::{Deserialize, Deserializer, Serialize};

use crate::state::State;
use crate::timestamp::Timestamp;
use crate::types::{EventId, FieldName};

/// A timestamped record against a field.
///
/// `state` and `last_state` distinguish "absent" (`None`) from an explicit
/// `null` (`Some(State::Untracked)`); the two resolve differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub field: FieldName,
    pub occur_time: Timestamp,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub state: Option<State>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub last_state: Option<State>,
    /// Signed ISO 8601 duration, validated when the event is normalized.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "dur")]
    pub duration: Option<String>,
}

impl Event {
    /// An instantaneous occurrence with no explicit state.
    pub const fn occurrence(id: EventId, field: FieldName, occur_time: Timestamp) -> Self {
        Self {
            id,
            field,
            occur_time,
            state: None,
            last_state: None,
            duration: None,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn with_last_state(mut self, last_state: State) -> Self {
        self.last_state = Some(last_state);
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }
}

/// A present key always yields `Some`, even when its value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<State>, D::Error>
where
    D: Deserializer<'de>,
{
    State::deserialize(deserializer).map(Some)
}
