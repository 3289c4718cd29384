//! Raw key edges and the gestures recognised from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque hardware key identifier. The core attaches no meaning to the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalKey(pub u32);

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic instant in milliseconds.
///
/// Event timestamps and [`Clock`](crate::clock::Clock) readings must come
/// from the same time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, clamped to zero when the
    /// timestamps arrive out of order.
    pub const fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Key transition direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Down,
    Up,
}

/// Where an event came from. Synthetic events are produced by the action
/// backends themselves (e.g. `SendKey`) and must never re-trigger rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Real,
    Synthetic,
}

/// One physical key transition as delivered by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub key: PhysicalKey,
    pub edge: Edge,
    pub timestamp: Timestamp,
    pub source: Source,
}

impl RawEvent {
    pub fn down(key: u32, at_ms: u64) -> Self {
        Self {
            key: PhysicalKey(key),
            edge: Edge::Down,
            timestamp: Timestamp::from_millis(at_ms),
            source: Source::Real,
        }
    }

    pub fn up(key: u32, at_ms: u64) -> Self {
        Self {
            edge: Edge::Up,
            ..Self::down(key, at_ms)
        }
    }

    pub fn synthetic(self) -> Self {
        Self {
            source: Source::Synthetic,
            ..self
        }
    }
}

/// Closed set of gestures the tracker can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GestureKind {
    Down,
    Up,
    ShortPress,
    /// Fired by the timer while the key is still held.
    LongPress,
    LongPressRelease,
    DoubleClick,
    ComboDown,
    /// Fired by the timer while both combo keys are still held.
    ComboLongPress,
}

impl GestureKind {
    pub const ALL: [GestureKind; 8] = [
        Self::Down,
        Self::Up,
        Self::ShortPress,
        Self::LongPress,
        Self::LongPressRelease,
        Self::DoubleClick,
        Self::ComboDown,
        Self::ComboLongPress,
    ];

    pub const fn is_combo(self) -> bool {
        matches!(self, Self::ComboDown | Self::ComboLongPress)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Down => "DOWN",
            Self::Up => "UP",
            Self::ShortPress => "SHORT_PRESS",
            Self::LongPress => "LONG_PRESS",
            Self::LongPressRelease => "LONG_PRESS_RELEASE",
            Self::DoubleClick => "DOUBLE_CLICK",
            Self::ComboDown => "COMBO_DOWN",
            Self::ComboLongPress => "COMBO_LONG_PRESS",
        }
    }
}

impl fmt::Display for GestureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a kind string names no known gesture.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown gesture kind '{0}'")]
pub struct UnknownGestureKind(pub String);

impl FromStr for GestureKind {
    type Err = UnknownGestureKind;

    /// Accepts `LONG_PRESS`, `long_press`, `LongPress` and `long-press`
    /// spellings. `DOUBLE_PRESS` and `CLICK` are kept as aliases from older
    /// rule files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let kind = match folded.as_str() {
            "DOWN" => Self::Down,
            "UP" | "CLICK" => Self::Up,
            "SHORTPRESS" => Self::ShortPress,
            "LONGPRESS" => Self::LongPress,
            "LONGPRESSRELEASE" => Self::LongPressRelease,
            "DOUBLECLICK" | "DOUBLEPRESS" => Self::DoubleClick,
            "COMBODOWN" => Self::ComboDown,
            "COMBOLONGPRESS" => Self::ComboLongPress,
            _ => return Err(UnknownGestureKind(s.to_string())),
        };
        Ok(kind)
    }
}

/// A recognised gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gesture {
    pub kind: GestureKind,
    pub primary_key: PhysicalKey,
    pub combo_key: Option<PhysicalKey>,
    pub held_duration_ms: u64,
}

impl Gesture {
    pub(crate) fn solo(kind: GestureKind, key: PhysicalKey, held_duration_ms: u64) -> Self {
        Self {
            kind,
            primary_key: key,
            combo_key: None,
            held_duration_ms,
        }
    }

    pub(crate) fn combo(
        kind: GestureKind,
        first: PhysicalKey,
        second: PhysicalKey,
        held_duration_ms: u64,
    ) -> Self {
        Self {
            kind,
            primary_key: first,
            combo_key: Some(second),
            held_duration_ms,
        }
    }
}
