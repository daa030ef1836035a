//! Shared utilities for CLI commands.

use std::sync::LazyLock;

use anyhow::Context;
use chrono::{Duration, Utc};
use ft_core::{FieldName, State, Timestamp};
use regex::Regex;
use serde_json::Value;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+(minute|hour|day|week)s?\s+ago$").unwrap());

/// Conservative bounds for relative time parsing (~1000 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 1000 * 365 * 24 * 60;

/// Parse a time as RFC 3339, naive ISO 8601 (UTC), `now`, or relative time.
///
/// Supports:
/// - RFC 3339: "2026-01-15T10:30:00+02:00" (the offset is kept for display)
/// - Naive: "2026-01-15T10:30:00"
/// - Relative: "2 hours ago", "30 minutes ago", "1 day ago", "1 week ago"
pub fn parse_time(s: &str) -> anyhow::Result<Timestamp> {
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Ok(ts);
    }
    if s == "now" {
        return Ok(Timestamp::utc(Utc::now()));
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s) else {
        anyhow::bail!(
            "Invalid time: {s}. Use ISO 8601 (e.g., 2026-01-15T10:30:00Z) or relative (e.g., '2 hours ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let (max_for_unit, minutes_per_unit) = match &caps[2] {
        "minute" => (MAX_RELATIVE_MINUTES, 1),
        "hour" => (MAX_RELATIVE_MINUTES / 60, 60),
        "day" => (MAX_RELATIVE_MINUTES / (60 * 24), 60 * 24),
        "week" => (MAX_RELATIVE_MINUTES / (60 * 24 * 7), 60 * 24 * 7),
        unit => anyhow::bail!("Unknown time unit: {unit}"),
    };

    if n > max_for_unit {
        anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
    }

    let duration = Duration::minutes(n * minutes_per_unit);
    Ok(Timestamp::utc(Utc::now() - duration))
}

/// Parses an optional `--start`/`--end` style argument.
pub fn parse_optional_time(s: Option<&str>, name: &str) -> anyhow::Result<Option<Timestamp>> {
    s.map(|s| parse_time(s).with_context(|| format!("invalid --{name}")))
        .transpose()
}

/// Parse a state given on the command line.
///
/// Anything that isn't valid JSON is taken as a state name, so `--state nap`
/// and `--state '"nap"'` mean the same thing.
pub fn parse_state(s: &str) -> anyhow::Result<State> {
    let value = serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()));
    State::from_json(value).with_context(|| format!("invalid state: {s}"))
}

pub fn parse_field(s: &str) -> anyhow::Result<FieldName> {
    FieldName::new(s).context("invalid --field")
}
