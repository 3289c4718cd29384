//! Gesture recognition: turns raw key edges into clicks, presses,
//! double-clicks and two-key combos.
//!
//! [`GestureTracker::on_event`] runs on the event-delivery thread and only
//! ever takes one short lock at a time: the combo lock or a single key's
//! lock, never both. Threshold gestures that must fire while a key is still
//! held (`LongPress`, `ComboLongPress`) come from
//! [`GestureTracker::poll_timers`], driven by the [`TimerScheduler`].

mod scheduler;
mod state;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::model::{Edge, Gesture, GestureKind, PhysicalKey, RawEvent, Rule, Source, Timestamp};
use crate::rules::{Generation, SharedRules};

pub use scheduler::TimerScheduler;
pub use state::TimerHandle;
use state::{ComboState, KeyState};

/// A rule the timer path decided to fire, handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct TimerFire {
    pub gesture: Gesture,
    pub rule: Arc<Rule>,
}

/// Per-key and combo timing state machine.
///
/// Construct one per input pipeline; tests can build as many independent
/// trackers as they like.
pub struct GestureTracker {
    rules: SharedRules,
    keys: RwLock<HashMap<PhysicalKey, Arc<Mutex<KeyState>>>>,
    combo: Mutex<ComboState>,
    next_timer: AtomicU64,
}

impl GestureTracker {
    pub fn new(rules: SharedRules) -> Self {
        Self {
            rules,
            keys: RwLock::new(HashMap::new()),
            combo: Mutex::new(ComboState::default()),
            next_timer: AtomicU64::new(1),
        }
    }

    /// Feeds one raw edge and returns the gesture it completes, if any.
    ///
    /// Synthetic events are ignored so that keys sent by actions never
    /// re-enter recognition.
    pub fn on_event(&self, event: &RawEvent) -> Option<Gesture> {
        if event.source == Source::Synthetic {
            tracing::trace!(key = %event.key, "synthetic event ignored");
            return None;
        }
        let generation = self.rules.load();
        match event.edge {
            Edge::Down => self.on_down(event.key, event.timestamp, &generation),
            Edge::Up => self.on_up(event.key, event.timestamp, &generation),
        }
    }

    /// Aborts whatever gesture `key` was part of without emitting anything.
    pub fn cancel(&self, key: PhysicalKey) {
        self.release_combo(key);
        if let Some(state) = self.existing_state(key) {
            state.lock().clear();
        }
    }

    /// Cancels every key, e.g. on focus loss.
    pub fn cancel_all(&self) {
        self.combo.lock().reset();
        let states: Vec<_> = self.keys.read().values().cloned().collect();
        for state in states {
            state.lock().clear();
        }
    }

    /// Checks every armed timer against `now` and returns the rules that
    /// crossed a threshold. At most one threshold fires per key per call.
    pub fn poll_timers(&self, now: Timestamp) -> Vec<TimerFire> {
        let generation = self.rules.load();
        let states: Vec<_> = self
            .keys
            .read()
            .iter()
            .map(|(key, state)| (*key, Arc::clone(state)))
            .collect();

        let mut fires: Vec<TimerFire> = states
            .iter()
            .filter_map(|(key, state)| Self::tick_key(*key, state, now, &generation))
            .collect();
        fires.extend(self.tick_combo(now, &generation));
        fires
    }

    /// Whether `key` is currently held as far as the tracker knows.
    pub fn is_held(&self, key: PhysicalKey) -> bool {
        self.existing_state(key)
            .is_some_and(|state| state.lock().down_time.is_some())
    }

    /// Current combo slot as `(first, second)`.
    pub fn combo_keys(&self) -> (Option<PhysicalKey>, Option<PhysicalKey>) {
        let combo = self.combo.lock();
        (combo.first_key, combo.second_key)
    }

    fn on_down(&self, key: PhysicalKey, now: Timestamp, generation: &Generation) -> Option<Gesture> {
        let state = self.state(key);
        if state.lock().down_time.is_some() {
            tracing::trace!(key = %key, "key repeat ignored");
            return None;
        }

        if let Some(first) = self.try_form_combo(key, now, generation) {
            if let Some(first_state) = self.existing_state(first) {
                let mut first_state = first_state.lock();
                first_state.timer = None;
                first_state.in_combo = true;
            }
            let mut s = state.lock();
            s.timer = None;
            s.down_time = Some(now);
            s.fired_thresholds.clear();
            s.long_press_armed = false;
            s.in_combo = true;
            tracing::debug!(first = %first, second = %key, "combo formed");
            return Some(Gesture::combo(GestureKind::ComboDown, first, key, 0));
        }

        let tunables = generation.tunables;
        let wants_timer = generation.index.has_rules(key, GestureKind::LongPress)
            || generation.index.has_rules(key, GestureKind::LongPressRelease);

        let mut s = state.lock();
        if s.down_time.is_some() {
            return None;
        }
        s.pending_click_count = match s.last_up_time {
            Some(up) if now.millis_since(up) < tunables.double_press_interval_ms => {
                s.pending_click_count + 1
            }
            _ => 1,
        };
        s.down_time = Some(now);
        s.fired_thresholds.clear();
        s.long_press_armed = false;
        s.in_combo = false;
        s.timer = wants_timer.then(|| self.arm(now));
        Some(Gesture::solo(GestureKind::Down, key, 0))
    }

    fn on_up(&self, key: PhysicalKey, now: Timestamp, generation: &Generation) -> Option<Gesture> {
        self.release_combo(key);

        let Some(state) = self.existing_state(key) else {
            tracing::trace!(key = %key, "release without press ignored");
            return None;
        };
        let mut s = state.lock();
        s.timer = None;
        let Some(down) = s.down_time.take() else {
            tracing::trace!(key = %key, "release without press ignored");
            return None;
        };

        let held = now.millis_since(down);
        let was_long = std::mem::take(&mut s.long_press_armed);
        s.last_up_time = Some(now);

        if std::mem::take(&mut s.in_combo) {
            s.pending_click_count = 0;
            return None;
        }

        let tunables = generation.tunables;
        if (was_long || held >= tunables.long_press_min_ms)
            && generation
                .index
                .match_rule(key, GestureKind::LongPressRelease, held)
                .is_some()
        {
            return Some(Gesture::solo(GestureKind::LongPressRelease, key, held));
        }

        if s.pending_click_count == 2 {
            s.pending_click_count = 0;
            return Some(Gesture::solo(GestureKind::DoubleClick, key, held));
        }

        if !was_long && held < tunables.long_press_min_ms {
            let kind = if held < tunables.short_press_min_ms {
                GestureKind::Up
            } else {
                GestureKind::ShortPress
            };
            return Some(Gesture::solo(kind, key, held));
        }

        None
    }

    /// Pairs `key` with a waiting candidate, or records `key` as the new
    /// candidate. Returns the partner when a combo forms.
    fn try_form_combo(&self, key: PhysicalKey, now: Timestamp, generation: &Generation) -> Option<PhysicalKey> {
        let mut combo = self.combo.lock();

        if let (Some(first), None, Some(since)) = (combo.first_key, combo.second_key, combo.down_time) {
            if first != key {
                if now.millis_since(since) > generation.tunables.combo_window_ms {
                    tracing::trace!(first = %first, "combo candidate expired");
                    combo.reset();
                } else if generation.index.pairs(first, key) {
                    combo.second_key = Some(key);
                    combo.down_time = Some(now);
                    combo.fired_thresholds.clear();
                    combo.timer = generation
                        .index
                        .has_combo_kind(first, key, GestureKind::ComboLongPress)
                        .then(|| self.arm(now));
                    return Some(first);
                }
            }
        }

        if !combo.is_formed() {
            *combo = ComboState::candidate(key, now);
        }
        None
    }

    fn release_combo(&self, key: PhysicalKey) {
        let mut combo = self.combo.lock();
        if combo.involves(key) {
            combo.reset();
        }
    }

    fn tick_key(
        key: PhysicalKey,
        state: &Mutex<KeyState>,
        now: Timestamp,
        generation: &Generation,
    ) -> Option<TimerFire> {
        let mut s = state.lock();
        let handle = s.timer?;
        let Some(down) = s.down_time else {
            s.timer = None;
            return None;
        };

        // Rule thresholds below longPressMinMs wait for the floor.
        let elapsed = now.millis_since(down);
        if elapsed < generation.tunables.long_press_min_ms {
            return None;
        }
        s.long_press_armed = true;

        let rule = generation.index.match_rule(key, GestureKind::LongPress, elapsed)?;
        if !s.fired_thresholds.insert(rule.min_duration_ms) {
            return None;
        }
        tracing::debug!(
            key = %key,
            timer = handle.id,
            armed_at = handle.armed_at.as_millis(),
            elapsed,
            threshold = rule.min_duration_ms,
            "long press threshold crossed"
        );
        Some(TimerFire {
            gesture: Gesture::solo(GestureKind::LongPress, key, elapsed),
            rule: Arc::clone(rule),
        })
    }

    fn tick_combo(&self, now: Timestamp, generation: &Generation) -> Option<TimerFire> {
        let mut combo = self.combo.lock();
        let (first, since) = (combo.first_key?, combo.down_time?);
        let elapsed = now.millis_since(since);

        let Some(second) = combo.second_key else {
            if elapsed > generation.tunables.combo_window_ms {
                combo.reset();
            }
            return None;
        };
        let handle = combo.timer?;
        if elapsed < generation.tunables.long_press_min_ms {
            return None;
        }

        let rule = generation
            .index
            .match_combo_held(first, second, GestureKind::ComboLongPress, elapsed)?;
        if !combo.fired_thresholds.insert(rule.min_duration_ms) {
            return None;
        }
        tracing::debug!(
            first = %first,
            second = %second,
            timer = handle.id,
            armed_at = handle.armed_at.as_millis(),
            elapsed,
            threshold = rule.min_duration_ms,
            "combo long press threshold crossed"
        );
        Some(TimerFire {
            gesture: Gesture::combo(GestureKind::ComboLongPress, first, second, elapsed),
            rule: Arc::clone(rule),
        })
    }

    fn arm(&self, now: Timestamp) -> TimerHandle {
        TimerHandle {
            id: self.next_timer.fetch_add(1, Ordering::Relaxed),
            armed_at: now,
        }
    }

    fn existing_state(&self, key: PhysicalKey) -> Option<Arc<Mutex<KeyState>>> {
        self.keys.read().get(&key).cloned()
    }

    fn state(&self, key: PhysicalKey) -> Arc<Mutex<KeyState>> {
        if let Some(state) = self.existing_state(key) {
            return state;
        }
        Arc::clone(self.keys.write().entry(key).or_default())
    }
}
