//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The value is reserved for internal use.
    #[error("{field} {value:?} is reserved")]
    Reserved { field: &'static str, value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal, reserved: $reserved:expr
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                const RESERVED: &[&str] = $reserved;
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                if RESERVED.contains(&id.as_str()) {
                    return Err(ValidationError::Reserved {
                        field: $field_name,
                        value: id,
                    });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated event identifier.
    ///
    /// Event IDs must be non-empty strings and can't take the name of the
    /// synthetic initial row. Uniqueness is enforced by the event store.
    EventId, "event ID", reserved: &[crate::derive::INITIAL_ROW_ID]
);

define_string_id!(
    /// A validated field name (e.g., "sleep", "environment").
    ///
    /// Every event belongs to exactly one field, and each field has its own
    /// timeline.
    FieldName, "field", reserved: &[]
);

impl EventId {
    /// ID of the synthetic row that precedes a field's first real row.
    pub(crate) fn initial() -> Self {
        Self(crate::derive::INITIAL_ROW_ID.to_string())
    }

    /// Whether this is the synthetic "no history" row rather than a stored event.
    pub fn is_initial(&self) -> bool {
        self.0 == crate::derive::INITIAL_ROW_ID
    }
}

/// Document revision used for optimistic concurrency on event patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The revision every newly inserted event starts at.
    pub const INITIAL: Self = Self(1);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The revision a successful write produces.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
