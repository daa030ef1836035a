//! Signed ISO 8601 durations (`PT1H30M`, `-PT10M`, `P1DT2H`).
//!
//! Years and months are kept apart from the fixed part so they can be applied
//! against the calendar. Everything from weeks down is a fixed span.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Months, TimeDelta, Utc};
use regex::Regex;
use thiserror::Error;

/// Pre-compiled ISO 8601 duration grammar.
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([+-])?P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:[.,](\d{1,9}))?S)?)?$",
    )
    .unwrap()
});

/// Errors for duration strings that can't be interpreted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationError {
    /// Not a signed ISO 8601 duration.
    #[error("invalid duration: {input:?} (expected ISO 8601, e.g. PT1H30M or -PT10M)")]
    Malformed { input: String },

    /// Syntactically fine but too large to apply.
    #[error("duration out of range: {input:?}")]
    OutOfRange { input: String },
}

/// A parsed, signed ISO 8601 duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDuration {
    negative: bool,
    months: u32,
    fixed: TimeDelta,
    text: String,
}

impl SignedDuration {
    pub fn parse(input: &str) -> Result<Self, DurationError> {
        let malformed = || DurationError::Malformed {
            input: input.to_string(),
        };
        let out_of_range = || DurationError::OutOfRange {
            input: input.to_string(),
        };

        let caps = DURATION_RE.captures(input.trim()).ok_or_else(malformed)?;

        let has_date_part = (2..=5).any(|i| caps.get(i).is_some());
        let has_time_part = (7..=9).any(|i| caps.get(i).is_some());
        // "P" alone and a dangling "T" are not durations
        if !(has_date_part || has_time_part) || (caps.get(6).is_some() && !has_time_part) {
            return Err(malformed());
        }

        let number = |i: usize| -> Result<i64, DurationError> {
            caps.get(i)
                .map_or(Ok(0), |m| m.as_str().parse::<i64>())
                .map_err(|_| out_of_range())
        };

        let months = number(2)?
            .checked_mul(12)
            .and_then(|m| m.checked_add(number(3).ok()?))
            .and_then(|m| u32::try_from(m).ok())
            .ok_or_else(out_of_range)?;

        let nanos = caps.get(10).map_or(Ok(0), |m| {
            // right-pad the fraction to nanoseconds
            format!("{:0<9}", m.as_str())
                .parse::<i64>()
                .map_err(|_| out_of_range())
        })?;

        let units: [(i64, fn(i64) -> Option<TimeDelta>); 5] = [
            (number(4)?, TimeDelta::try_weeks),
            (number(5)?, TimeDelta::try_days),
            (number(7)?, TimeDelta::try_hours),
            (number(8)?, TimeDelta::try_minutes),
            (number(9)?, TimeDelta::try_seconds),
        ];
        let fixed = units
            .into_iter()
            .try_fold(TimeDelta::nanoseconds(nanos), |acc, (n, unit)| {
                unit(n).and_then(|d| acc.checked_add(&d))
            })
            .ok_or_else(out_of_range)?;

        Ok(Self {
            negative: caps.get(1).is_some_and(|m| m.as_str() == "-"),
            months,
            fixed,
            text: input.trim().to_string(),
        })
    }

    /// True for `-P...` durations ("holes").
    pub const fn is_negative(&self) -> bool {
        self.negative
    }

    /// A zero-length duration describes no block at all.
    pub const fn is_zero(&self) -> bool {
        self.months == 0 && self.fixed.is_zero()
    }

    /// The instant `|self|` before `end`.
    pub fn span_start(&self, end: DateTime<Utc>) -> Result<DateTime<Utc>, DurationError> {
        end.checked_sub_months(Months::new(self.months))
            .and_then(|t| t.checked_sub_signed(self.fixed))
            .ok_or_else(|| DurationError::OutOfRange {
                input: self.text.clone(),
            })
    }
}

impl FromStr for SignedDuration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SignedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
