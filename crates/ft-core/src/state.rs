//! The state a field can be in.
//!
//! States are stored as plain JSON on events:
//!
//! | JSON                       | State                          |
//! |----------------------------|--------------------------------|
//! | `null`                     | [`State::Untracked`]           |
//! | `true` / `false`           | [`State::Active`] / [`State::Inactive`] |
//! | `"asleep"`, `3`            | [`State::Named`] with no extras |
//! | `{"id": "asleep", ...}`    | [`State::Named`] with extras    |
//! | `[...]`                    | [`State::Composite`]            |
//!
//! Every `State` built from JSON goes through [`State::normalize`], so two
//! spellings of the same state compare equal.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Errors raised while interpreting a state value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// An object state without a usable `id`.
    #[error("state object must have a string, number or boolean \"id\": {value}")]
    MissingId { value: String },

    /// `null` mixed with other states inside a composite.
    #[error("untracked (null) cannot be combined with other states")]
    UntrackedInComposite,
}

/// Identifier of a named state.
#[derive(Debug, Clone, PartialEq)]
pub enum NamedId {
    Text(String),
    Number(Number),
    Flag(bool),
}

impl NamedId {
    fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Flag(b) => Value::Bool(*b),
        }
    }
}

/// The value a field holds over time.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    /// The field is not being tracked at all.
    Untracked,
    /// Plain "on".
    Active,
    /// Plain "off".
    Inactive,
    /// A named state, optionally carrying extra attributes.
    Named {
        id: NamedId,
        extra: Map<String, Value>,
    },
    /// Several states held at once.
    Composite(Vec<State>),
}

impl State {
    /// Shorthand for a named state without extras.
    pub fn named(id: impl Into<String>) -> Self {
        Self::Named {
            id: NamedId::Text(id.into()),
            extra: Map::new(),
        }
    }

    /// Builds a state from its JSON representation and normalizes it.
    pub fn from_json(value: Value) -> Result<Self, StateError> {
        Self::from_json_raw(value)?.normalize()
    }

    fn from_json_raw(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Null => Ok(Self::Untracked),
            Value::Bool(true) => Ok(Self::Active),
            Value::Bool(false) => Ok(Self::Inactive),
            Value::String(s) => Ok(Self::Named {
                id: NamedId::Text(s),
                extra: Map::new(),
            }),
            Value::Number(n) => Ok(Self::Named {
                id: NamedId::Number(n),
                extra: Map::new(),
            }),
            Value::Array(items) => items
                .into_iter()
                .map(Self::from_json_raw)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Composite),
            Value::Object(mut map) => {
                let id = match map.remove("id") {
                    Some(Value::String(s)) => NamedId::Text(s),
                    Some(Value::Number(n)) => NamedId::Number(n),
                    Some(Value::Bool(b)) => NamedId::Flag(b),
                    other => {
                        if let Some(id) = other {
                            map.insert("id".to_string(), id);
                        }
                        return Err(StateError::MissingId {
                            value: Value::Object(map).to_string(),
                        });
                    }
                };
                Ok(Self::Named { id, extra: map })
            }
        }
    }

    /// Returns the canonical form of this state.
    ///
    /// Nested composites are flattened; an empty composite becomes
    /// [`State::Inactive`] and a single-element composite becomes its element.
    pub fn normalize(self) -> Result<Self, StateError> {
        let Self::Composite(items) = self else {
            return Ok(self);
        };

        let mut flat = Vec::with_capacity(items.len());
        flatten_into(items, &mut flat);

        if flat.len() > 1 && flat.iter().any(|s| matches!(s, Self::Untracked)) {
            return Err(StateError::UntrackedInComposite);
        }

        match flat.len() {
            0 => Ok(Self::Inactive),
            1 => Ok(flat.remove(0)),
            _ => Ok(Self::Composite(flat)),
        }
    }

    /// JSON representation, the inverse of [`State::from_json`].
    pub fn to_json(&self) -> Value {
        match self {
            Self::Untracked => Value::Null,
            Self::Active => Value::Bool(true),
            Self::Inactive => Value::Bool(false),
            Self::Named { id, extra } => match id {
                // A bare boolean would read back as Active/Inactive
                NamedId::Text(_) | NamedId::Number(_) if extra.is_empty() => id.to_json(),
                _ => {
                    let mut map = extra.clone();
                    map.insert("id".to_string(), id.to_json());
                    Value::Object(map)
                }
            },
            Self::Composite(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    pub const fn is_untracked(&self) -> bool {
        matches!(self, Self::Untracked)
    }
}

fn flatten_into(items: Vec<State>, out: &mut Vec<State>) {
    for item in items {
        match item {
            State::Composite(inner) => flatten_into(inner, out),
            leaf => out.push(leaf),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for State {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}
