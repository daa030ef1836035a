//! Add command for recording an event against a field.

use std::io::Write;

use anyhow::{Context, Result};
use ft_core::{Event, EventId, EventIndex, Timestamp, derive};
use ft_db::Database;
use uuid::Uuid;

use super::util::{parse_field, parse_state, parse_time};

/// Raw `add` arguments as given on the command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddArgs<'a> {
    pub field: &'a str,
    pub at: &'a str,
    pub id: Option<&'a str>,
    pub state: Option<&'a str>,
    pub last_state: Option<&'a str>,
    pub duration: Option<&'a str>,
}

pub fn run<W: Write>(writer: &mut W, db: &mut Database, args: AddArgs<'_>) -> Result<()> {
    let field = parse_field(args.field)?;
    let occur_time = parse_time(args.at).context("invalid --at")?;
    let id = match args.id {
        Some(id) => EventId::new(id).context("invalid --id")?,
        None => generated_id(occur_time)?,
    };

    let mut event = Event::occurrence(id, field, occur_time);
    if let Some(state) = args.state {
        event = event.with_state(parse_state(state).context("invalid --state")?);
    }
    if let Some(duration) = args.duration {
        event = event.with_duration(duration);
    }
    match args.last_state {
        Some(last_state) => {
            event = event.with_last_state(parse_state(last_state).context("invalid --last-state")?);
        }
        None => {
            let last_state = prior_state(db, &event)?;
            tracing::debug!(%last_state, "inferred lastState");
            event = event.with_last_state(last_state);
        }
    }

    let revision = db
        .upsert_event(&event)
        .with_context(|| format!("failed to record {}", event.id))?;
    writeln!(
        writer,
        "Recorded {} on {} (revision {revision})",
        event.id, event.field
    )?;
    Ok(())
}

/// `<occurTime>_<8 hex chars>`, unique enough for hand-entered events.
fn generated_id(occur_time: Timestamp) -> Result<EventId> {
    let suffix = Uuid::new_v4().simple().to_string();
    let id = format!("{occur_time}_{}", &suffix[..8]);
    EventId::new(id).context("failed to generate event ID")
}

/// The field's state just before the event's first boundary.
fn prior_state(db: &Database, event: &Event) -> Result<ft_core::State> {
    let derived = derive(event).context("invalid --duration")?;
    let at = derived
        .boundaries
        .first()
        .map_or(event.occur_time, |row| row.timestamp);
    db.state_before(&event.field, at)
        .context("failed to read the field's prior state")
}
