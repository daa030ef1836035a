//! Core domain logic for the field tracker.
//!
//! Events logged against named fields are turned into per-field timelines:
//! - Normalization: filling in an event's implicit state, prior state and duration
//! - Derivation: mapping one event to its boundary and interval-delta facts
//! - Validation: checking state continuity and block nesting over ordered facts
//! - Checking: driving both validations over a field's time range through an
//!   [`EventIndex`], root-causing breaks and optionally repairing them

mod check;
pub mod derive;
pub mod duration;
pub mod event;
pub mod index;
pub mod memory;
pub mod normalize;
pub mod state;
pub mod timestamp;
pub mod types;
pub mod validate;

pub use check::{AppliedFix, CheckError, CheckOptions, CheckSummary, check_field};
pub use derive::{Boundary, BoundaryKind, Delta, Derived, IntervalDelta, derive};
pub use duration::{DurationError, SignedDuration};
pub use event::Event;
pub use index::{EventIndex, IndexError, StoredEvent};
pub use memory::MemoryIndex;
pub use state::{State, StateError};
pub use timestamp::{Timestamp, TimestampError};
pub use types::{EventId, FieldName, Revision, ValidationError};
pub use validate::{OverlapReason, StateChangeError};
