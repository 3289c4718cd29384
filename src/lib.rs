//! keyrules: gesture recognition and rule dispatch for physical keys.
//!
//! Raw key edges go into [`engine::Engine::handle`]. The tracker turns them
//! into gestures (clicks, short and long presses, double-clicks, two-key
//! combos), the matcher resolves gestures to configured rules, and matched
//! actions are queued to a background dispatcher. Rules are reloaded from a
//! [`config::RuleStore`] without ever blocking the caller.

pub mod backend;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod model;
pub mod rules;
pub mod tracker;

pub use engine::{Engine, EngineConfig, RuleProvider, Verdict};
