//! Per-key and combo timing state owned by the tracker.

use std::collections::BTreeSet;

use crate::model::{PhysicalKey, Timestamp};

/// Registration of a background threshold check.
///
/// The scheduler only inspects states that hold a handle; dropping the
/// handle disarms the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub id: u64,
    pub armed_at: Timestamp,
}

/// Timing state for one physical key. Created on first sight and kept for
/// the tracker's lifetime.
#[derive(Debug, Default)]
pub(crate) struct KeyState {
    pub down_time: Option<Timestamp>,
    pub last_up_time: Option<Timestamp>,
    pub pending_click_count: u32,
    /// Thresholds already fired during the current hold.
    pub fired_thresholds: BTreeSet<u64>,
    pub long_press_armed: bool,
    pub timer: Option<TimerHandle>,
    /// Set while this key takes part in a formed combo; its release then
    /// emits no solo gesture.
    pub in_combo: bool,
}

impl KeyState {
    pub fn clear(&mut self) {
        let last_up_time = self.last_up_time;
        *self = Self {
            last_up_time,
            ..Self::default()
        };
    }
}

/// The single shared combo slot.
///
/// With only `first_key` set it is a speculative candidate waiting for a
/// partner; with both keys set the combo is formed and `down_time` is the
/// moment the second key went down.
#[derive(Debug, Default)]
pub(crate) struct ComboState {
    pub first_key: Option<PhysicalKey>,
    pub second_key: Option<PhysicalKey>,
    pub down_time: Option<Timestamp>,
    pub fired_thresholds: BTreeSet<u64>,
    pub timer: Option<TimerHandle>,
}

impl ComboState {
    pub fn candidate(key: PhysicalKey, now: Timestamp) -> Self {
        Self {
            first_key: Some(key),
            down_time: Some(now),
            ..Self::default()
        }
    }

    pub fn involves(&self, key: PhysicalKey) -> bool {
        self.first_key == Some(key) || self.second_key == Some(key)
    }

    pub fn is_formed(&self) -> bool {
        self.first_key.is_some() && self.second_key.is_some()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
