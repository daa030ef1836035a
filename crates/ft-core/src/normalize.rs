//! Resolution of an event's implicit state, prior state and duration.

use crate::duration::{DurationError, SignedDuration};
use crate::event::Event;
use crate::state::State;

/// What an event's duration resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveDuration {
    /// Neither a state nor a duration was given: a bare occurrence.
    Unset,
    /// A state without a duration: an instantaneous transition.
    Instant,
    /// An explicit duration (possibly zero or negative).
    Span(SignedDuration),
}

/// An event with every implicit value filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent<'a> {
    pub event: &'a Event,
    pub state: State,
    pub last_state: State,
    pub duration: EffectiveDuration,
}

/// Fills in defaults for `state`, `last_state` and `duration`.
///
/// - `duration` is kept when present, otherwise it is [`EffectiveDuration::Unset`]
///   for events without a state and [`EffectiveDuration::Instant`] for events with one.
/// - `state` defaults to [`State::Active`].
/// - `last_state` defaults to `Active` when the state is `Inactive` and to
///   `Inactive` otherwise.
pub fn normalize(event: &Event) -> Result<NormalizedEvent<'_>, DurationError> {
    let duration = match (&event.duration, &event.state) {
        (Some(text), _) => EffectiveDuration::Span(SignedDuration::parse(text)?),
        (None, None) => EffectiveDuration::Unset,
        (None, Some(_)) => EffectiveDuration::Instant,
    };

    let state = event.state.clone().unwrap_or(State::Active);
    let last_state = event.last_state.clone().unwrap_or_else(|| {
        if state == State::Inactive {
            State::Active
        } else {
            State::Inactive
        }
    });

    Ok(NormalizedEvent {
        event,
        state,
        last_state,
        duration,
    })
}
