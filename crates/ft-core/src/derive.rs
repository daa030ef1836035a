//! Derivation of timeline facts from a single event.
//!
//! Each event maps to zero, one or two [`Boundary`] facts (state transitions)
//! and one or two [`IntervalDelta`] facts (block opens/closes and points).
//! The mapping is a pure function of the event, so an index can store the
//! output per event and regenerate it whenever that event changes.
//!
//! | Event                         | Boundaries                                  | Deltas            |
//! |-------------------------------|---------------------------------------------|-------------------|
//! | bare occurrence               | `Untracked → Inactive` if last state is null | `0` at T          |
//! | state, no duration            | `last → state` at T                          | `0` at T          |
//! | positive duration `s`         | `last → state` at T-s, `state → after` at T  | `+1` T-s, `-1` T  |
//! | negative duration (hole)      | `state → false` at T-s, `false → state` at T | `+1` T-s, `-1` T  |
//! | zero duration                 | none                                         | `0` at T          |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::duration::DurationError;
use crate::event::Event;
use crate::normalize::{EffectiveDuration, NormalizedEvent, normalize};
use crate::state::State;
use crate::timestamp::Timestamp;
use crate::types::{EventId, FieldName};

/// Identifier carried by the synthetic row that stands in for "no history".
pub const INITIAL_ROW_ID: &str = "<initial>";

/// Which part of an event a boundary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    /// An instantaneous state change.
    Transition,
    /// An occurrence that starts tracking a previously untracked field.
    Bootstrap,
    BlockOpen,
    BlockClose,
    HoleOpen,
    HoleClose,
}

impl BoundaryKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transition => "transition",
            Self::Bootstrap => "bootstrap",
            Self::BlockOpen => "block_open",
            Self::BlockClose => "block_close",
            Self::HoleOpen => "hole_open",
            Self::HoleClose => "hole_close",
        }
    }

    /// The delta this boundary sits at, used to order rows sharing a timestamp.
    pub const fn delta(self) -> Delta {
        match self {
            Self::BlockClose | Self::HoleClose => Delta::Close,
            Self::BlockOpen | Self::HoleOpen => Delta::Open,
            Self::Transition | Self::Bootstrap => Delta::Point,
        }
    }

    /// Whether the boundary's `last_state` is read straight from the event's
    /// `lastState`, i.e. whether rewriting that field changes this boundary.
    ///
    /// A bootstrap row only exists because `lastState` is null, so rewriting
    /// it to a tracked state removes the row.
    pub const fn reads_last_state(self) -> bool {
        matches!(self, Self::Transition | Self::Bootstrap | Self::BlockOpen)
    }
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoundaryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transition" => Ok(Self::Transition),
            "bootstrap" => Ok(Self::Bootstrap),
            "block_open" => Ok(Self::BlockOpen),
            "block_close" => Ok(Self::BlockClose),
            "hole_open" => Ok(Self::HoleOpen),
            "hole_close" => Ok(Self::HoleClose),
            _ => Err(format!("invalid boundary kind: {s}")),
        }
    }
}

/// Open/close/point nature of an interval fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delta {
    Close,
    Point,
    Open,
}

impl Delta {
    pub const fn value(self) -> i8 {
        match self {
            Self::Close => -1,
            Self::Point => 0,
            Self::Open => 1,
        }
    }

    pub const fn from_value(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Self::Close),
            0 => Some(Self::Point),
            1 => Some(Self::Open),
            _ => None,
        }
    }

    /// Tie-break rank at equal timestamps: closes, then opens, then points.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Close => 0,
            Self::Open => 1,
            Self::Point => 2,
        }
    }
}

impl Serialize for Delta {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i8(self.value())
    }
}

/// "At `timestamp`, `field` changed from `last_state` to `active_state`."
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Boundary {
    pub event_id: EventId,
    pub field: FieldName,
    pub timestamp: Timestamp,
    /// When the emitting event occurred (the end of its block, if any).
    pub occur_time: Timestamp,
    pub kind: BoundaryKind,
    pub last_state: State,
    pub active_state: State,
}

impl Boundary {
    /// The row standing in for a field with no history before a window.
    pub fn initial(field: FieldName) -> Self {
        Self {
            event_id: EventId::initial(),
            field,
            timestamp: Timestamp::MIN,
            occur_time: Timestamp::MIN,
            kind: BoundaryKind::Transition,
            last_state: State::Untracked,
            active_state: State::Untracked,
        }
    }

    /// Total ordering used by every index: time, then delta rank, then event.
    pub fn sort_key(&self) -> (Timestamp, u8, &str) {
        (self.timestamp, self.kind.delta().rank(), self.event_id.as_str())
    }
}

/// An open (`+1`), close (`-1`) or point (`0`) fact for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalDelta {
    pub event_id: EventId,
    pub field: FieldName,
    pub timestamp: Timestamp,
    pub occur_time: Timestamp,
    pub delta: Delta,
}

impl IntervalDelta {
    /// The synthetic row describing whether a block is open entering a window.
    pub fn initial(field: FieldName, timestamp: Timestamp, open: bool) -> Self {
        Self {
            event_id: EventId::initial(),
            field,
            timestamp,
            occur_time: timestamp,
            delta: if open { Delta::Open } else { Delta::Close },
        }
    }

    pub fn sort_key(&self) -> (Timestamp, u8, &str) {
        (self.timestamp, self.delta.rank(), self.event_id.as_str())
    }
}

/// Everything one event contributes to its field's timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub boundaries: Vec<Boundary>,
    pub deltas: Vec<IntervalDelta>,
}

/// Normalizes `event` and derives its boundaries and interval deltas.
pub fn derive(event: &Event) -> Result<Derived, DurationError> {
    let normalized = normalize(event)?;
    Ok(Derived {
        boundaries: boundaries(&normalized)?,
        deltas: interval_deltas(&normalized)?,
    })
}

/// Boundary facts for a normalized event.
pub fn boundaries(n: &NormalizedEvent<'_>) -> Result<Vec<Boundary>, DurationError> {
    let event = n.event;
    let end = event.occur_time;
    let boundary = |timestamp: Timestamp, kind, last_state: &State, active_state: &State| Boundary {
        event_id: event.id.clone(),
        field: event.field.clone(),
        timestamp,
        occur_time: end,
        kind,
        last_state: last_state.clone(),
        active_state: active_state.clone(),
    };

    let rows = match &n.duration {
        EffectiveDuration::Unset => {
            if n.last_state.is_untracked() && !n.state.is_untracked() {
                vec![boundary(
                    end,
                    BoundaryKind::Bootstrap,
                    &State::Untracked,
                    &State::Inactive,
                )]
            } else {
                Vec::new()
            }
        }
        EffectiveDuration::Instant => vec![boundary(
            end,
            BoundaryKind::Transition,
            &n.last_state,
            &n.state,
        )],
        EffectiveDuration::Span(d) if d.is_zero() => Vec::new(),
        EffectiveDuration::Span(d) => {
            let begin = end.at(d.span_start(end.instant())?);
            if d.is_negative() {
                vec![
                    boundary(begin, BoundaryKind::HoleOpen, &n.state, &State::Inactive),
                    boundary(end, BoundaryKind::HoleClose, &State::Inactive, &n.state),
                ]
            } else {
                let inactive = State::Inactive;
                let after = if n.last_state.is_untracked() {
                    &inactive
                } else {
                    &n.last_state
                };
                vec![
                    boundary(begin, BoundaryKind::BlockOpen, &n.last_state, &n.state),
                    boundary(end, BoundaryKind::BlockClose, &n.state, after),
                ]
            }
        }
    };
    Ok(rows)
}

/// Interval-delta facts for a normalized event.
pub fn interval_deltas(n: &NormalizedEvent<'_>) -> Result<Vec<IntervalDelta>, DurationError> {
    let event = n.event;
    let end = event.occur_time;
    let delta = |timestamp: Timestamp, delta| IntervalDelta {
        event_id: event.id.clone(),
        field: event.field.clone(),
        timestamp,
        occur_time: end,
        delta,
    };

    let rows = match &n.duration {
        EffectiveDuration::Span(d) if !d.is_zero() => {
            let begin = end.at(d.span_start(end.instant())?);
            vec![delta(begin, Delta::Open), delta(end, Delta::Close)]
        }
        _ => vec![delta(end, Delta::Point)],
    };
    Ok(rows)
}
