//! Timeline command for showing a field's derived state changes.

use std::io::Write;

use anyhow::Result;
use ft_core::{EventIndex, FieldName, Timestamp};
use ft_db::Database;

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    field: &FieldName,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    json: bool,
) -> Result<()> {
    let rows = db.boundaries(field, start.unwrap_or(Timestamp::MIN), end)?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }
    if rows.is_empty() {
        writeln!(writer, "No state changes for {field}.")?;
        return Ok(());
    }
    for row in rows {
        writeln!(
            writer,
            "{}  {:<11}  {} -> {}  ({})",
            row.timestamp,
            row.kind.as_str(),
            row.last_state,
            row.active_state,
            row.event_id
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use ft_core::{Event, EventId, State};
    use insta::assert_snapshot;

    fn seeded() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let field = FieldName::new("sleep").unwrap();
        let night = Event::occurrence(
            EventId::new("night").unwrap(),
            field.clone(),
            "2024-01-02T07:00:00+01:00".parse().unwrap(),
        )
        .with_duration("PT8H")
        .with_last_state(State::Untracked);
        let wake = Event::occurrence(
            EventId::new("awake").unwrap(),
            field,
            "2024-01-02T08:00:00+01:00".parse().unwrap(),
        )
        .with_state(State::named("up"))
        .with_last_state(State::Inactive);
        db.upsert_event(&night).unwrap();
        db.upsert_event(&wake).unwrap();
        db
    }

    fn render(db: &Database, start: Option<&str>, json: bool) -> String {
        let field = FieldName::new("sleep").unwrap();
        let start = start.map(|s| s.parse().unwrap());
        let mut output = Vec::new();
        run(&mut output, db, &field, start, None, json).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn timeline_lists_boundaries_in_order() {
        let db = seeded();
        assert_snapshot!(render(&db, None, false).trim_end(), @r#"
        2024-01-01T23:00:00+01:00  block_open   null -> true  (night)
        2024-01-02T07:00:00+01:00  block_close  true -> false  (night)
        2024-01-02T08:00:00+01:00  transition   false -> "up"  (awake)
        "#);
    }

    #[test]
    fn timeline_respects_start() {
        let db = seeded();
        let output = render(&db, Some("2024-01-02T07:30:00+01:00"), true);
        assert_snapshot!(output.trim_end(), @r#"
        [
          {
            "eventId": "awake",
            "field": "sleep",
            "timestamp": "2024-01-02T08:00:00+01:00",
            "occurTime": "2024-01-02T08:00:00+01:00",
            "kind": "transition",
            "lastState": false,
            "activeState": "up"
          }
        ]
        "#);
    }

    #[test]
    fn empty_timeline() {
        let db = Database::open_in_memory().unwrap();
        assert_snapshot!(render(&db, None, false).trim_end(), @"No state changes for sleep.");
    }
}
