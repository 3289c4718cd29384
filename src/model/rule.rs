//! Rules, rule sets and the global timing tunables.

use serde::{Deserialize, Serialize};

use super::{Action, GestureKind, LaunchDescriptor, PhysicalKey};

/// Why a single rule was refused at load time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("unknown gesture kind '{0}'")]
    UnknownKind(String),
    #[error("combo rule has no combo key")]
    MissingComboKey,
    #[error("non-combo rule carries a combo key")]
    UnexpectedComboKey,
    #[error("combo key equals primary key {0}")]
    ComboKeyEqualsKey(PhysicalKey),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("malformed rule: {0}")]
    Malformed(String),
}

/// One user rule: when `kind` is recognised on `key` (paired with
/// `combo_key` for combo kinds) after at least `min_duration_ms`, run
/// `action`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub key: PhysicalKey,
    pub combo_key: Option<PhysicalKey>,
    pub kind: GestureKind,
    pub min_duration_ms: u64,
    pub action: Action,
}

impl Rule {
    pub fn new(key: u32, kind: GestureKind, min_duration_ms: u64, action: Action) -> Self {
        Self {
            key: PhysicalKey(key),
            combo_key: None,
            kind,
            min_duration_ms,
            action,
        }
    }

    pub fn combo(
        key: u32,
        combo_key: u32,
        kind: GestureKind,
        min_duration_ms: u64,
        action: Action,
    ) -> Self {
        Self {
            combo_key: Some(PhysicalKey(combo_key)),
            ..Self::new(key, kind, min_duration_ms, action)
        }
    }

    /// Checks the combo-key invariant and the action payload.
    pub fn validate(&self) -> Result<(), RuleError> {
        match (self.kind.is_combo(), self.combo_key) {
            (true, None) => return Err(RuleError::MissingComboKey),
            (true, Some(combo)) if combo == self.key => {
                return Err(RuleError::ComboKeyEqualsKey(combo));
            }
            (false, Some(_)) => return Err(RuleError::UnexpectedComboKey),
            _ => {}
        }
        self.action.check().map_err(RuleError::InvalidAction)
    }
}

/// Global timing parameters shipped with every rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tunables {
    pub double_press_interval_ms: u64,
    pub long_press_min_ms: u64,
    pub short_press_min_ms: u64,
    pub combo_window_ms: u64,
    pub action_timeout_ms: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            double_press_interval_ms: 300,
            long_press_min_ms: 500,
            short_press_min_ms: 300,
            combo_window_ms: 300,
            action_timeout_ms: 5000,
        }
    }
}

impl Tunables {
    /// Replaces unusable values with defaults, logging each repair.
    ///
    /// `long_press_min_ms` is never lowered to match per-rule thresholds.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let mut out = self;
        let repair = |name: &'static str, field: &mut u64, fallback: u64| {
            if *field == 0 {
                tracing::warn!(tunable = name, fallback, "zero tunable replaced with default");
                *field = fallback;
            }
        };
        repair(
            "doublePressIntervalMs",
            &mut out.double_press_interval_ms,
            defaults.double_press_interval_ms,
        );
        repair("longPressMinMs", &mut out.long_press_min_ms, defaults.long_press_min_ms);
        repair("comboWindowMs", &mut out.combo_window_ms, defaults.combo_window_ms);
        repair("actionTimeoutMs", &mut out.action_timeout_ms, defaults.action_timeout_ms);

        if out.short_press_min_ms > out.long_press_min_ms {
            tracing::warn!(
                short_press_min_ms = out.short_press_min_ms,
                long_press_min_ms = out.long_press_min_ms,
                "shortPressMinMs above longPressMinMs; clamping"
            );
            out.short_press_min_ms = out.long_press_min_ms;
        }
        out
    }
}

/// An ordered rule list plus its tunables. Replaced wholesale on reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pub tunables: Tunables,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(tunables: Tunables, rules: Vec<Rule>) -> Self {
        Self { tunables, rules }
    }

    /// Rule set used until a store load succeeds for the first time.
    ///
    /// Key codes are Linux input codes for handset-style buttons.
    pub fn builtin_default() -> Self {
        const POWER: u32 = 116;
        const VOLUME_UP: u32 = 115;
        const VOLUME_DOWN: u32 = 114;
        const CAMERA: u32 = 212;
        const SYSRQ: u32 = 99;

        let rules = vec![
            Rule::new(
                POWER,
                GestureKind::LongPress,
                500,
                Action::LaunchTarget {
                    target: LaunchDescriptor {
                        action: Some("android.intent.action.VOICE_ASSIST".into()),
                        ..Default::default()
                    },
                },
            ),
            Rule::new(
                POWER,
                GestureKind::LongPress,
                2000,
                Action::RunCommand {
                    command: format!("input keyevent {POWER}"),
                },
            ),
            Rule::new(
                POWER,
                GestureKind::LongPressRelease,
                2000,
                Action::RunCommand {
                    command: "am broadcast -a android.intent.action.SHOW_BRIGHTNESS_DIALOG".into(),
                },
            ),
            Rule::new(
                POWER,
                GestureKind::DoubleClick,
                0,
                Action::SendKey {
                    key: PhysicalKey(CAMERA),
                },
            ),
            Rule::combo(
                POWER,
                VOLUME_UP,
                GestureKind::ComboDown,
                0,
                Action::SendKey {
                    key: PhysicalKey(SYSRQ),
                },
            ),
            Rule::combo(
                VOLUME_UP,
                VOLUME_DOWN,
                GestureKind::ComboLongPress,
                1000,
                Action::RunCommand {
                    command: "cmd audio set-ringer-mode silent".into(),
                },
            ),
        ];
        Self::new(Tunables::default(), rules)
    }
}
