//! Shared data model: key edges, gestures, rules and actions.

mod action;
mod event;
mod rule;

pub use action::{Action, ExtraValue, LaunchDescriptor};
pub use event::{
    Edge, Gesture, GestureKind, PhysicalKey, RawEvent, Source, Timestamp, UnknownGestureKind,
};
pub use rule::{Rule, RuleError, RuleSet, Tunables};
