//! Notification Primitive
//!
//! Every other component announces state changes through [`Event`], a
//! priority-ordered multi-subscriber broadcaster. Callers never need to know
//! who listens.
//!
//! # Priorities
//!
//! Priorities range from [`MIN_PRIORITY`] (-5) to [`MAX_PRIORITY`] (10).
//! Lower values fire earlier. Negative values are reserved for framework
//! observers such as extensions, which must observe a change before any
//! dependent user component does.
//!
//! # Failure semantics
//!
//! The primitive does not swallow panics raised by a subscriber; they unwind
//! to whoever called `emit`. The subscriber tables stay consistent either way.

mod emitter;
mod subscriber;

pub use emitter::{Callback, Event};
pub use subscriber::{
    priority_in_range, SubscriberId, DEFAULT_PRIORITY, INTERNAL_PRIORITY, MAX_PRIORITY,
    MIN_PRIORITY,
};
