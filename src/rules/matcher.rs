//! Gesture-to-rule resolution against the currently published generation.

use std::sync::Arc;

use super::SharedRules;
use crate::model::{Gesture, GestureKind, PhysicalKey, Rule};

/// Resolves recognised gestures to rules. Cheap to clone.
#[derive(Clone)]
pub struct RuleMatcher {
    rules: SharedRules,
}

impl RuleMatcher {
    pub fn new(rules: SharedRules) -> Self {
        Self { rules }
    }

    pub fn match_rule(&self, key: PhysicalKey, kind: GestureKind, held_ms: u64) -> Option<Arc<Rule>> {
        self.rules.load().index.match_rule(key, kind, held_ms).cloned()
    }

    pub fn match_combo(&self, a: PhysicalKey, b: PhysicalKey, kind: GestureKind) -> Option<Arc<Rule>> {
        self.rules.load().index.match_combo(a, b, kind).cloned()
    }

    /// Routes combo gestures to the pair lookup and everything else to the
    /// `(key, kind)` lookup.
    pub fn match_gesture(&self, gesture: &Gesture) -> Option<Arc<Rule>> {
        match gesture.combo_key {
            Some(second) if gesture.kind.is_combo() => {
                self.match_combo(gesture.primary_key, second, gesture.kind)
            }
            _ => self.match_rule(gesture.primary_key, gesture.kind, gesture.held_duration_ms),
        }
    }
}
