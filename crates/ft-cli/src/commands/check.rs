//! Check command for validating field timelines.
//!
//! `--all` checks every field concurrently. Each rayon worker opens its own
//! connection and runs an independent checker; fields never share state.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use ft_core::{
    CheckError, CheckOptions, CheckSummary, EventIndex, FieldName, Timestamp, check_field,
};
use ft_db::Database;
use rayon::prelude::*;
use serde::Serialize;

/// Time range and behaviour shared by every field in one invocation.
#[derive(Debug, Clone, Copy)]
pub struct CheckRequest {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub options: CheckOptions,
}

#[derive(Debug, Serialize)]
struct FieldReport {
    field: FieldName,
    #[serde(flatten)]
    summary: CheckSummary,
}

/// Checks one field. Returns whether it was consistent.
pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    field: &FieldName,
    request: CheckRequest,
    json: bool,
) -> Result<bool> {
    let report = FieldReport {
        field: field.clone(),
        summary: check_one(db, field, request)?,
    };
    let ok = report.summary.ok;
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        write_report(writer, &report)?;
    }
    Ok(ok)
}

/// Checks every known field in parallel. Returns whether all were consistent.
pub fn run_all<W: Write>(
    writer: &mut W,
    database_path: &Path,
    request: CheckRequest,
    json: bool,
) -> Result<bool> {
    let fields = Database::open(database_path)
        .with_context(|| format!("failed to open {}", database_path.display()))?
        .list_fields()?;

    let reports = fields
        .into_par_iter()
        .map(|summary| -> Result<FieldReport> {
            let mut db = Database::open(database_path)
                .with_context(|| format!("failed to open {}", database_path.display()))?;
            let result = check_one(&mut db, &summary.field, request)?;
            Ok(FieldReport {
                field: summary.field,
                summary: result,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let ok = reports.iter().all(|report| report.summary.ok);
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&reports)?)?;
    } else if reports.is_empty() {
        writeln!(writer, "No fields recorded.")?;
    } else {
        for report in &reports {
            write_report(writer, report)?;
        }
    }
    Ok(ok)
}

/// Runs the checker, treating a fail-fast stop as a one-error summary that
/// still lists the repairs written before it.
fn check_one<I>(index: &mut I, field: &FieldName, request: CheckRequest) -> Result<CheckSummary>
where
    I: EventIndex + ?Sized,
{
    match check_field(index, field, request.start, request.end, request.options) {
        Ok(summary) => Ok(summary),
        Err(CheckError::StateChange { error, fixes }) => Ok(CheckSummary {
            ok: false,
            errors: vec![error],
            fixes,
        }),
        Err(err) => Err(err).with_context(|| format!("failed to check {field}")),
    }
}

fn write_report<W: Write>(writer: &mut W, report: &FieldReport) -> Result<()> {
    let summary = &report.summary;
    if summary.ok {
        writeln!(writer, "{}: ok", report.field)?;
        return Ok(());
    }

    let noun = if summary.errors.len() == 1 {
        "error"
    } else {
        "errors"
    };
    write!(writer, "{}: {} {noun}", report.field, summary.errors.len())?;
    if summary.fixes.is_empty() {
        writeln!(writer)?;
    } else {
        writeln!(writer, ", {} fixed", summary.fixes.len())?;
    }
    for err in &summary.errors {
        writeln!(writer, "  - {err}")?;
    }
    for fix in &summary.fixes {
        writeln!(
            writer,
            "  fixed {}: lastState = {} (revision {})",
            fix.event_id, fix.last_state, fix.revision
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use ft_core::{Event, EventId, State};
    use insta::assert_snapshot;

    fn accumulate(fix: bool) -> CheckRequest {
        CheckRequest {
            start: None,
            end: None,
            options: CheckOptions {
                fail_on_error: false,
                fix,
            },
        }
    }

    fn transition(field: &str, id: &str, at: &str, last: State, state: State) -> Event {
        Event::occurrence(
            EventId::new(id).unwrap(),
            FieldName::new(field).unwrap(),
            at.parse().unwrap(),
        )
        .with_state(state)
        .with_last_state(last)
    }

    /// `mood` has one broken link; `sleep` is consistent.
    fn seed(db: &mut Database) {
        let happy = State::named("happy");
        for event in [
            transition("mood", "m1", "2024-01-01T08:00:00Z", State::Untracked, happy),
            transition(
                "mood",
                "m2",
                "2024-01-01T12:00:00Z",
                State::named("calm"),
                State::named("tired"),
            ),
            transition(
                "sleep",
                "s1",
                "2024-01-01T07:00:00Z",
                State::Untracked,
                State::Inactive,
            ),
        ] {
            db.upsert_event(&event).unwrap();
        }
    }

    fn output_of(f: impl FnOnce(&mut Vec<u8>) -> Result<bool>) -> (bool, String) {
        let mut output = Vec::new();
        let ok = f(&mut output).unwrap();
        (ok, String::from_utf8(output).unwrap())
    }

    #[test]
    fn reports_consistent_field() {
        let mut db = Database::open_in_memory().unwrap();
        seed(&mut db);
        let field = FieldName::new("sleep").unwrap();

        let (ok, output) = output_of(|w| run(w, &mut db, &field, accumulate(false), false));
        assert!(ok);
        assert_snapshot!(output.trim_end(), @"sleep: ok");
    }

    #[test]
    fn reports_broken_link() {
        let mut db = Database::open_in_memory().unwrap();
        seed(&mut db);
        let field = FieldName::new("mood").unwrap();

        let (ok, output) = output_of(|w| run(w, &mut db, &field, accumulate(false), false));
        assert!(!ok);
        assert_snapshot!(output.trim_end(), @r#"
        mood: 1 error
          - mood: lastState of m2 at 2024-01-01T12:00:00Z is "calm", but m1 left it "happy"
        "#);
    }

    #[test]
    fn fail_fast_reports_first_error() {
        let mut db = Database::open_in_memory().unwrap();
        seed(&mut db);
        let field = FieldName::new("mood").unwrap();
        let request = CheckRequest {
            options: CheckOptions::default(),
            ..accumulate(false)
        };

        let (ok, output) = output_of(|w| run(w, &mut db, &field, request, false));
        assert!(!ok);
        assert!(output.starts_with("mood: 1 error"), "{output}");
    }

    #[test]
    fn fix_reports_repair_as_json() {
        let mut db = Database::open_in_memory().unwrap();
        seed(&mut db);
        let field = FieldName::new("mood").unwrap();

        let (ok, output) = output_of(|w| run(w, &mut db, &field, accumulate(true), true));
        assert!(!ok);
        assert_snapshot!(output.trim_end(), @r#"
        {
          "field": "mood",
          "ok": false,
          "errors": [
            {
              "kind": "last_state",
              "field": "mood",
              "occurTime": "2024-01-01T12:00:00Z",
              "ids": [
                "m1",
                "m2"
              ],
              "expected": "happy",
              "found": "calm"
            }
          ],
          "fixes": [
            {
              "eventId": "m2",
              "lastState": "happy",
              "revision": 2
            }
          ]
        }
        "#);

        let (ok, _) = output_of(|w| run(w, &mut db, &field, accumulate(false), false));
        assert!(ok);
    }

    #[test]
    fn fail_fast_lists_repairs_made_before_stopping() {
        let mut db = Database::open_in_memory().unwrap();
        let hole = Event::occurrence(
            EventId::new("h").unwrap(),
            FieldName::new("work").unwrap(),
            "2024-01-01T12:00:00Z".parse().unwrap(),
        )
        .with_state(State::named("x"))
        .with_duration("-PT10M");
        for event in [
            transition(
                "work",
                "a",
                "2024-01-01T08:00:00Z",
                State::Untracked,
                State::Inactive,
            ),
            transition("work", "e1", "2024-01-01T09:00:00Z", State::Active, State::Active),
            hole,
        ] {
            db.upsert_event(&event).unwrap();
        }
        let field = FieldName::new("work").unwrap();
        let request = CheckRequest {
            options: CheckOptions {
                fail_on_error: true,
                fix: true,
            },
            ..accumulate(false)
        };

        let (ok, output) = output_of(|w| run(w, &mut db, &field, request, false));
        assert!(!ok);
        assert_snapshot!(output.trim_end(), @r#"
        work: 1 error, 1 fixed
          - work: lastState of h at 2024-01-01T11:50:00Z is "x", but e1 left it true
          fixed e1: lastState = false (revision 2)
        "#);
    }

    #[test]
    fn check_all_covers_every_field() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ft.db");
        seed(&mut Database::open(&path).unwrap());

        let (ok, output) = output_of(|w| run_all(w, &path, accumulate(false), false));
        assert!(!ok);
        assert_snapshot!(output.trim_end(), @r#"
        mood: 1 error
          - mood: lastState of m2 at 2024-01-01T12:00:00Z is "calm", but m1 left it "happy"
        sleep: ok
        "#);
    }

    #[test]
    fn check_all_on_empty_database() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ft.db");

        let (ok, output) = output_of(|w| run_all(w, &path, accumulate(false), false));
        assert!(ok);
        assert_snapshot!(output.trim_end(), @"No fields recorded.");
    }
}
