//! Absolute instants with an optional UTC-offset hint.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error for timestamp strings that are neither RFC 3339 nor naive ISO 8601.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid timestamp: {0} (expected RFC 3339, e.g. 2023-08-22T15:00:00Z)")]
pub struct TimestampError(String);

/// When something happened, plus the UTC offset it was recorded in (if known).
///
/// The offset is only a display hint. Equality, ordering and hashing use the
/// instant alone.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    instant: DateTime<Utc>,
    offset: Option<FixedOffset>,
}

impl Timestamp {
    /// Earliest representable instant. Starts unbounded windows and dates the
    /// synthetic row of a field with no history.
    pub const MIN: Self = Self {
        instant: DateTime::<Utc>::MIN_UTC,
        offset: None,
    };

    pub const fn utc(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            offset: None,
        }
    }

    pub fn with_offset(instant: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            instant,
            offset: Some(offset),
        }
    }

    pub const fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    pub const fn offset(&self) -> Option<FixedOffset> {
        self.offset
    }

    /// The same offset hint applied to another instant.
    #[must_use]
    pub const fn at(&self, instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            offset: self.offset,
        }
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.instant == other.instant
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant.cmp(&other.instant)
    }
}

impl std::hash::Hash for Timestamp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.instant.hash(state);
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::utc(instant)
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::with_offset(dt.with_timezone(&Utc), *dt.offset()));
        }
        // No offset written down: treat as UTC without a hint
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Self::utc(naive.and_utc()))
            .map_err(|_| TimestampError(s.to_string()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self.offset {
            Some(offset) => self
                .instant
                .with_timezone(&offset)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            None => self.instant.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        };
        f.write_str(&text)
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
