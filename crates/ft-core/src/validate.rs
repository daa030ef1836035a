//! Timeline consistency checks over ordered rows of one field.
//!
//! Both checks take rows already sorted by [`Boundary::sort_key`] /
//! [`IntervalDelta::sort_key`] and prefixed with a synthetic row describing
//! the situation just before the window. With `fail_on_error` they stop at
//! the first problem; otherwise every problem is collected.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::derive::{Boundary, Delta, IntervalDelta};
use crate::state::State;
use crate::timestamp::Timestamp;
use crate::types::{EventId, FieldName};

/// Why two interval facts can't both hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapReason {
    BlockStartsWithinBlock,
    StateChangesWithinBlock,
    /// A close with no open block to close.
    BlockEndsWithinBlock,
}

impl fmt::Display for OverlapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BlockStartsWithinBlock => "block starts within a block",
            Self::StateChangesWithinBlock => "state changes within a block",
            Self::BlockEndsWithinBlock => "block ends within a block",
        })
    }
}

/// A broken timeline invariant, naming the two events involved.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StateChangeError {
    /// A boundary's prior state doesn't match the state before it.
    #[error(
        "{field}: lastState of {} at {occur_time} is {found}, but {} left it {expected}",
        .ids[1],
        .ids[0]
    )]
    LastState {
        field: FieldName,
        occur_time: Timestamp,
        ids: [EventId; 2],
        expected: State,
        found: State,
    },

    /// Duration blocks that intersect or don't nest.
    #[error("{field}: {reason} at {occur_time} ({} and {})", .ids[0], .ids[1])]
    OverlappingBlock {
        field: FieldName,
        occur_time: Timestamp,
        ids: [EventId; 2],
        reason: OverlapReason,
    },
}

impl StateChangeError {
    pub const fn field(&self) -> &FieldName {
        match self {
            Self::LastState { field, .. } | Self::OverlappingBlock { field, .. } => field,
        }
    }

    pub const fn occur_time(&self) -> Timestamp {
        match self {
            Self::LastState { occur_time, .. } | Self::OverlappingBlock { occur_time, .. } => {
                *occur_time
            }
        }
    }

    pub const fn ids(&self) -> &[EventId; 2] {
        match self {
            Self::LastState { ids, .. } | Self::OverlappingBlock { ids, .. } => ids,
        }
    }

    pub const fn is_overlap(&self) -> bool {
        matches!(self, Self::OverlappingBlock { .. })
    }
}

/// Index of the first row whose `last_state` doesn't continue the row before.
pub fn find_chain_break(rows: &[Boundary]) -> Option<usize> {
    rows.windows(2)
        .position(|pair| pair[0].active_state != pair[1].last_state)
        .map(|i| i + 1)
}

/// The error for a break between `prev` and `curr`.
pub fn last_state_error(prev: &Boundary, curr: &Boundary) -> StateChangeError {
    StateChangeError::LastState {
        field: curr.field.clone(),
        occur_time: curr.timestamp,
        ids: [prev.event_id.clone(), curr.event_id.clone()],
        expected: prev.active_state.clone(),
        found: curr.last_state.clone(),
    }
}

/// Checks state continuity between consecutive boundaries.
///
/// This is the read-only entry point for callers holding a fixed row list.
/// [`crate::check_field`] steps through breaks with [`find_chain_break`]
/// instead, because each repair changes the rows after it.
pub fn check_chain(
    rows: &[Boundary],
    fail_on_error: bool,
) -> Result<Vec<StateChangeError>, StateChangeError> {
    let mut errors = Vec::new();
    let mut anchor = 0;
    while let Some(offset) = find_chain_break(&rows[anchor..]) {
        let i = anchor + offset;
        let err = last_state_error(&rows[i - 1], &rows[i]);
        if fail_on_error {
            return Err(err);
        }
        errors.push(err);
        anchor = i;
    }
    Ok(errors)
}

/// Checks that duration blocks open and close in turn.
///
/// Point rows never change whether a block is open, but a point inside an
/// open block is still an error.
pub fn check_blocks(
    rows: &[IntervalDelta],
    fail_on_error: bool,
) -> Result<Vec<StateChangeError>, StateChangeError> {
    let mut errors = Vec::new();
    let Some((first, rest)) = rows.split_first() else {
        return Ok(errors);
    };

    let mut last_change = first;
    for curr in rest {
        let reason = match (last_change.delta, curr.delta) {
            (Delta::Open, Delta::Open) => Some(OverlapReason::BlockStartsWithinBlock),
            (Delta::Open, Delta::Point) => Some(OverlapReason::StateChangesWithinBlock),
            (Delta::Close, Delta::Close) => Some(OverlapReason::BlockEndsWithinBlock),
            _ => None,
        };
        if let Some(reason) = reason {
            let err = StateChangeError::OverlappingBlock {
                field: curr.field.clone(),
                occur_time: curr.timestamp,
                ids: [last_change.event_id.clone(), curr.event_id.clone()],
                reason,
            };
            if fail_on_error {
                return Err(err);
            }
            errors.push(err);
        }
        if curr.delta != Delta::Point {
            last_change = curr;
        }
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::{BoundaryKind, derive};
    use crate::event::Event;

    fn field() -> FieldName {
        FieldName::new("sleep").unwrap()
    }

    fn event(id: &str, at: &str) -> Event {
        Event::occurrence(EventId::new(id).unwrap(), field(), at.parse().unwrap())
    }

    fn boundary(id: &str, at: &str, last: State, active: State) -> Boundary {
        Boundary {
            event_id: EventId::new(id).unwrap(),
            field: field(),
            timestamp: at.parse().unwrap(),
            occur_time: at.parse().unwrap(),
            kind: BoundaryKind::Transition,
            last_state: last,
            active_state: active,
        }
    }

    fn delta_rows(events: &[Event], open: bool) -> Vec<IntervalDelta> {
        let mut rows: Vec<IntervalDelta> = events
            .iter()
            .flat_map(|e| derive(e).unwrap().deltas)
            .collect();
        rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let mut all = vec![IntervalDelta::initial(field(), Timestamp::MIN, open)];
        all.extend(rows);
        all
    }

    #[test]
    fn continuous_chain_passes() {
        let rows = vec![
            Boundary::initial(field()),
            boundary("a", "2024-01-01T22:00:00Z", State::Untracked, State::Active),
            boundary("b", "2024-01-02T07:00:00Z", State::Active, State::Inactive),
        ];
        assert_eq!(check_chain(&rows, true), Ok(Vec::new()));
        assert_eq!(find_chain_break(&rows), None);
    }

    #[test]
    fn chain_break_names_both_events() {
        let rows = vec![
            Boundary::initial(field()),
            boundary("a", "2024-01-01T22:00:00Z", State::Untracked, State::Active),
            boundary("b", "2024-01-02T07:00:00Z", State::Inactive, State::Active),
        ];
        let err = check_chain(&rows, true).unwrap_err();
        assert_eq!(err.ids()[0].as_str(), "a");
        assert_eq!(err.ids()[1].as_str(), "b");
        assert_eq!(err.occur_time().to_string(), "2024-01-02T07:00:00Z");
        assert_eq!(find_chain_break(&rows), Some(2));
        assert_eq!(
            err.to_string(),
            "sleep: lastState of b at 2024-01-02T07:00:00Z is false, but a left it true"
        );
    }

    #[test]
    fn accumulate_mode_collects_every_break() {
        let rows = vec![
            Boundary::initial(field()),
            boundary("a", "2024-01-01T00:00:00Z", State::Active, State::Active),
            boundary("b", "2024-01-02T00:00:00Z", State::Active, State::Inactive),
            boundary("c", "2024-01-03T00:00:00Z", State::Active, State::Inactive),
        ];
        let errors = check_chain(&rows, false).unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].ids()[0].as_str(), "<initial>");
        assert_eq!(errors[1].ids()[1].as_str(), "c");
    }

    #[test]
    fn chain_compares_states_structurally() {
        let extra = || State::from_json(serde_json::json!({"id": "home", "floor": 2})).unwrap();
        let rows = vec![
            boundary("a", "2024-01-01T00:00:00Z", State::Inactive, extra()),
            boundary("b", "2024-01-02T00:00:00Z", extra(), State::Inactive),
        ];
        assert!(check_chain(&rows, true).is_ok());
    }

    #[test]
    fn sequential_blocks_do_not_overlap() {
        let events = [
            event("a", "2024-01-01T10:00:00Z").with_duration("PT1H"),
            event("b", "2024-01-01T11:00:00Z").with_duration("PT1H"),
            event("c", "2024-01-01T12:30:00Z"),
        ];
        assert_eq!(check_blocks(&delta_rows(&events, false), true), Ok(Vec::new()));
    }

    #[test]
    fn intersecting_blocks_overlap() {
        let events = [
            event("a", "2024-01-01T10:00:00Z").with_duration("PT1H"),
            event("b", "2024-01-01T10:30:00Z").with_duration("PT1H"),
        ];
        let err = check_blocks(&delta_rows(&events, false), true).unwrap_err();
        assert!(matches!(
            err,
            StateChangeError::OverlappingBlock {
                reason: OverlapReason::BlockStartsWithinBlock,
                ..
            }
        ));
        assert_eq!(err.ids()[0].as_str(), "a");
        assert_eq!(err.ids()[1].as_str(), "b");
    }

    #[test]
    fn point_inside_block_is_reported() {
        let events = [
            event("a", "2024-01-01T10:00:00Z").with_duration("PT1H"),
            event("p", "2024-01-01T09:30:00Z").with_state(State::Inactive),
        ];
        let err = check_blocks(&delta_rows(&events, false), true).unwrap_err();
        assert!(matches!(
            err,
            StateChangeError::OverlappingBlock {
                reason: OverlapReason::StateChangesWithinBlock,
                ..
            }
        ));
    }

    #[test]
    fn point_at_block_begin_is_inside_but_at_end_is_not() {
        let at_begin = [
            event("a", "2024-01-01T10:00:00Z").with_duration("PT1H"),
            event("p", "2024-01-01T09:00:00Z"),
        ];
        assert!(check_blocks(&delta_rows(&at_begin, false), true).is_err());

        let at_end = [
            event("a", "2024-01-01T10:00:00Z").with_duration("PT1H"),
            event("p", "2024-01-01T10:00:00Z"),
        ];
        assert!(check_blocks(&delta_rows(&at_end, false), true).is_ok());
    }

    #[test]
    fn close_without_open_is_reported() {
        let events = [event("a", "2024-01-01T10:00:00Z").with_duration("PT1H")];
        let mut rows = delta_rows(&events, false);
        // drop the open row, leaving a dangling close
        rows.remove(1);
        let err = check_blocks(&rows, true).unwrap_err();
        assert!(matches!(
            err,
            StateChangeError::OverlappingBlock {
                reason: OverlapReason::BlockEndsWithinBlock,
                ..
            }
        ));
    }

    #[test]
    fn block_open_entering_window_is_respected() {
        let events = [event("p", "2024-01-01T10:00:00Z")];
        assert!(check_blocks(&delta_rows(&events, true), true).is_err());
        assert!(check_blocks(&delta_rows(&events, false), true).is_ok());
    }

    #[test]
    fn accumulate_mode_keeps_scanning_blocks() {
        let events = [
            event("a", "2024-01-01T10:00:00Z").with_duration("PT1H"),
            event("b", "2024-01-01T10:30:00Z").with_duration("PT1H"),
            event("c", "2024-01-01T12:00:00Z").with_duration("PT1H"),
            event("d", "2024-01-01T11:30:00Z"),
        ];
        let errors = check_blocks(&delta_rows(&events, false), false).unwrap();
        // b opens inside a, b's close then dangles, d lands inside c
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(StateChangeError::is_overlap));
    }

    #[test]
    fn errors_render_for_humans_and_json() {
        let prev = boundary("a", "2024-01-01T22:00:00Z", State::Untracked, State::Active);
        let curr = boundary("b", "2024-01-02T07:00:00Z", State::named("nap"), State::Inactive);
        let err = last_state_error(&prev, &curr);

        insta::assert_snapshot!(
            err.to_string(),
            @r#"sleep: lastState of b at 2024-01-02T07:00:00Z is "nap", but a left it true"#
        );
        insta::assert_snapshot!(serde_json::to_string_pretty(&err).unwrap(), @r#"
        {
          "kind": "last_state",
          "field": "sleep",
          "occurTime": "2024-01-02T07:00:00Z",
          "ids": [
            "a",
            "b"
          ],
          "expected": true,
          "found": "nap"
        }
        "#);
    }
}
