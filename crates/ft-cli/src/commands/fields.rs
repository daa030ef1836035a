//! Fields command for listing what has been recorded.

use std::io::Write;

use anyhow::Result;
use ft_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database) -> Result<()> {
    let fields = db.list_fields()?;
    if fields.is_empty() {
        writeln!(writer, "No fields recorded.")?;
        return Ok(());
    }
    for field in fields {
        let noun = if field.events == 1 { "event" } else { "events" };
        writeln!(
            writer,
            "{}: {} {noun}, last at {}",
            field.field, field.events, field.last_occur_time
        )?;
    }
    Ok(())
}
