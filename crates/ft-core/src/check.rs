//! Field-range consistency checking with root-causing and repair.
//!
//! # Algorithm
//!
//! 1. Load the field's boundaries for the window, prefixed with the last
//!    boundary before it (or a synthetic untracked row).
//! 2. Find the first continuity break between consecutive boundaries.
//! 3. Before blaming the break on a bad `lastState`, check the interval deltas
//!    between the two rows (extended to both events' occurrence times) for
//!    overlapping blocks. An overlap is the more fundamental problem and is
//!    reported instead; the scan then resumes after that window.
//! 4. Otherwise the break stands. With `fix`, the later event's `lastState` is
//!    rewritten to the earlier row's active state and the scan restarts from
//!    the earlier row, because the rewrite changes what later rows derive to.
//!
//! Overlaps are never repaired: there is no single correct rewrite for them.
//!
//! Within one root-cause window only overlaps are reported. An unrelated
//! `lastState` break inside that same window is skipped along with it.

use serde::Serialize;
use thiserror::Error;

use crate::derive::{Boundary, Delta, IntervalDelta};
use crate::index::{EventIndex, IndexError};
use crate::state::State;
use crate::timestamp::Timestamp;
use crate::types::{EventId, FieldName, Revision};
use crate::validate::{StateChangeError, check_blocks, find_chain_break, last_state_error};

/// How a check reacts to the problems it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    /// Stop at the first unresolved problem instead of collecting all of them.
    pub fail_on_error: bool,
    /// Rewrite `lastState` fields to heal continuity breaks.
    pub fix: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            fail_on_error: true,
            fix: false,
        }
    }
}

/// A `lastState` rewrite performed by a check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedFix {
    pub event_id: EventId,
    pub last_state: State,
    pub revision: Revision,
}

/// Outcome of a check. `ok` is true iff no problem was found (fixed or not).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub ok: bool,
    pub errors: Vec<StateChangeError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fixes: Vec<AppliedFix>,
}

impl CheckSummary {
    pub const fn new() -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
            fixes: Vec::new(),
        }
    }

    fn record(&mut self, err: StateChangeError) {
        self.ok = false;
        if !self.errors.contains(&err) {
            self.errors.push(err);
        }
    }
}

impl Default for CheckSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that end a check early.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The first unresolved problem, in fail-fast mode, along with the
    /// repairs already written before it was reached.
    #[error("{error}")]
    StateChange {
        error: StateChangeError,
        fixes: Vec<AppliedFix>,
    },

    /// A repair lost the race against another writer twice in a row.
    #[error("event {id} kept changing while being repaired")]
    Conflict { id: EventId },

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Checks `field` over `[start, end)` (`None` = unbounded on that side).
pub fn check_field<I>(
    index: &mut I,
    field: &FieldName,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    options: CheckOptions,
) -> Result<CheckSummary, CheckError>
where
    I: EventIndex + ?Sized,
{
    ConsistencyChecker {
        index,
        field,
        end,
        options,
    }
    .run(start.unwrap_or(Timestamp::MIN))
}

struct ConsistencyChecker<'a, I: ?Sized> {
    index: &'a mut I,
    field: &'a FieldName,
    end: Option<Timestamp>,
    options: CheckOptions,
}

impl<I: EventIndex + ?Sized> ConsistencyChecker<'_, I> {
    fn run(mut self, start: Timestamp) -> Result<CheckSummary, CheckError> {
        let mut summary = CheckSummary::new();
        let mut window_start = start;
        let mut last_fix: Option<(EventId, Timestamp)> = None;
        let mut last_conflict: Option<EventId> = None;

        'scan: loop {
            let rows = self.load_boundaries(window_start)?;
            tracing::debug!(
                field = %self.field,
                start = %window_start,
                rows = rows.len() - 1,
                "scanning boundaries"
            );

            let mut anchor = 0;
            while let Some(offset) = find_chain_break(&rows[anchor..]) {
                let i = anchor + offset;
                let (prev, curr) = (&rows[i - 1], &rows[i]);

                let until = curr.timestamp.max(prev.occur_time).max(curr.occur_time);
                let mut overlaps = self.overlaps(prev.timestamp, until)?;
                if !overlaps.is_empty() {
                    if self.options.fail_on_error {
                        return Err(unresolved(summary, overlaps.swap_remove(0)));
                    }
                    for err in overlaps {
                        tracing::debug!(field = %self.field, %err, "break explained by overlap");
                        summary.record(err);
                    }
                    anchor = rows.partition_point(|row| row.timestamp < until).max(i);
                    continue;
                }

                let err = last_state_error(prev, curr);
                let repeated = last_fix
                    .as_ref()
                    .is_some_and(|(id, at)| *id == curr.event_id && *at == curr.timestamp);
                if self.options.fix && !repeated && is_repairable(curr) {
                    match self.repair(prev, curr) {
                        Ok(fix) => {
                            summary.record(err);
                            summary.fixes.push(fix);
                            last_fix = Some((curr.event_id.clone(), curr.timestamp));
                            last_conflict = None;
                        }
                        Err(IndexError::Conflict { id, .. }) => {
                            if last_conflict.as_ref() == Some(&id) {
                                return Err(CheckError::Conflict { id });
                            }
                            tracing::warn!(field = %self.field, event_id = %id, "repair conflicted, rechecking");
                            last_conflict = Some(id);
                        }
                        Err(other) => return Err(other.into()),
                    }
                    window_start = prev.timestamp.max(window_start);
                    continue 'scan;
                }

                if self.options.fix {
                    tracing::warn!(field = %self.field, %err, "break cannot be repaired by rewriting lastState");
                }
                if self.options.fail_on_error {
                    return Err(unresolved(summary, err));
                }
                summary.record(err);
                anchor = i;
            }

            return Ok(summary);
        }
    }

    /// Window rows prefixed with the state in effect just before `start`.
    fn load_boundaries(&self, start: Timestamp) -> Result<Vec<Boundary>, IndexError> {
        let initial = self
            .index
            .boundary_before(self.field, start)?
            .unwrap_or_else(|| Boundary::initial(self.field.clone()));
        let mut rows = vec![initial];
        rows.extend(self.index.boundaries(self.field, start, self.end)?);
        Ok(rows)
    }

    /// Overlapping-block errors within `[start, end]`, in timeline order.
    fn overlaps(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<StateChangeError>, IndexError> {
        let open = self
            .index
            .block_change_before(self.field, start)?
            .is_some_and(|row| row.delta == Delta::Open);
        let mut rows = vec![IntervalDelta::initial(self.field.clone(), start, open)];
        rows.extend(self.index.deltas(self.field, start, end)?);
        Ok(check_blocks(&rows, false).unwrap_or_else(|err| vec![err]))
    }

    fn repair(&mut self, prev: &Boundary, curr: &Boundary) -> Result<AppliedFix, IndexError> {
        let stored = self
            .index
            .event(&curr.event_id)?
            .ok_or_else(|| IndexError::NotFound {
                id: curr.event_id.clone(),
            })?;
        let last_state = prev.active_state.clone();
        let revision =
            self.index
                .patch_last_state(&curr.event_id, stored.revision, last_state.clone())?;

        tracing::info!(
            field = %self.field,
            event_id = %curr.event_id,
            last_state = %last_state,
            %revision,
            "repaired lastState"
        );
        Ok(AppliedFix {
            event_id: curr.event_id.clone(),
            last_state,
            revision,
        })
    }
}

fn unresolved(summary: CheckSummary, error: StateChangeError) -> CheckError {
    CheckError::StateChange {
        error,
        fixes: summary.fixes,
    }
}

/// Rewriting the event's `lastState` only moves boundaries that read it.
fn is_repairable(row: &Boundary) -> bool {
    row.kind.reads_last_state() && !row.event_id.is_initial()
}
