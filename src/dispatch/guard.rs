//! Short suppression window for duplicated event delivery.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::model::{Gesture, GestureKind, PhysicalKey, Timestamp};

type GuardKey = (PhysicalKey, Option<PhysicalKey>, GestureKind);

/// Entries older than this many windows are pruned on insert.
const PRUNE_AFTER_WINDOWS: u64 = 50;

/// Admits a gesture at most once per window for the same
/// `(key, combo key, kind)`.
#[derive(Debug)]
pub struct ReentryGuard {
    window_ms: u64,
    last: Mutex<HashMap<GuardKey, Timestamp>>,
}

impl ReentryGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `false` if the same gesture was admitted less than one
    /// window before `now`. Otherwise records `now` and returns `true`.
    pub fn admit(&self, gesture: &Gesture, now: Timestamp) -> bool {
        let key = (gesture.primary_key, gesture.combo_key, gesture.kind);
        let mut last = self.last.lock();

        if let Some(prev) = last.get(&key) {
            if now.millis_since(*prev) < self.window_ms {
                tracing::trace!(
                    key = %gesture.primary_key,
                    kind = %gesture.kind,
                    "duplicate delivery suppressed"
                );
                return false;
            }
        }

        let horizon = self.window_ms.saturating_mul(PRUNE_AFTER_WINDOWS);
        last.retain(|_, at| now.millis_since(*at) < horizon);
        last.insert(key, now);
        true
    }

    pub fn clear(&self) {
        self.last.lock().clear();
    }
}
