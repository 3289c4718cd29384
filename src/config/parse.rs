//! JSON rule file format.
//!
//! ```json
//! {
//!   "version": 1,
//!   "doublePressIntervalMs": 300,
//!   "longPressMinMs": 500,
//!   "rules": [
//!     { "key": 116, "kind": "LONG_PRESS", "minDurationMs": 500,
//!       "action": { "type": "run_command", "command": "..." } },
//!     { "key": 116, "comboKey": 115, "kind": "COMBO_DOWN",
//!       "action": { "type": "send_key", "key": 99 } }
//!   ]
//! }
//! ```
//!
//! Older files spelled the rule fields `keyCode`, `comboKeyCode`,
//! `behavior` and `durationMs`; those are accepted too. Every rule entry is
//! parsed on its own and a bad one is logged and skipped.

use serde::{Deserialize, Serialize};

use super::store::LoadError;
use crate::model::{Action, GestureKind, PhysicalKey, Rule, RuleError, RuleSet, Tunables};

const FORMAT_VERSION: u32 = 1;

#[derive(Deserialize)]
struct RuleFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(flatten)]
    tunables: Tunables,
    #[serde(default)]
    rules: Vec<serde_json::Value>,
}

fn default_version() -> u32 {
    FORMAT_VERSION
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
    #[serde(alias = "keyCode")]
    key: u32,
    #[serde(default, alias = "comboKeyCode")]
    combo_key: Option<u32>,
    #[serde(alias = "behavior")]
    kind: String,
    #[serde(default, alias = "durationMs")]
    min_duration_ms: u64,
    action: Action,
}

/// Parse a whole rule file. Fails only if the document itself is unusable.
pub fn parse_rule_file(text: &str) -> Result<RuleSet, LoadError> {
    let file: RuleFile = serde_json::from_str(text).map_err(|e| LoadError::Parse(e.to_string()))?;
    if file.version > FORMAT_VERSION {
        tracing::warn!(version = file.version, supported = FORMAT_VERSION, "rule file is newer than this build");
    }

    let total = file.rules.len();
    let rules: Vec<Rule> = file
        .rules
        .into_iter()
        .enumerate()
        .filter_map(|(position, value)| match parse_rule(value) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!(position, error = %e, "rule dropped");
                None
            }
        })
        .collect();

    tracing::debug!(total, kept = rules.len(), "rule file parsed");
    Ok(RuleSet::new(file.tunables, rules))
}

fn parse_rule(value: serde_json::Value) -> Result<Rule, RuleError> {
    let raw: RawRule = serde_json::from_value(value).map_err(|e| RuleError::Malformed(e.to_string()))?;
    let kind: GestureKind = raw
        .kind
        .parse()
        .map_err(|_| RuleError::UnknownKind(raw.kind.clone()))?;

    let rule = Rule {
        key: PhysicalKey(raw.key),
        combo_key: raw.combo_key.map(PhysicalKey),
        kind,
        min_duration_ms: raw.min_duration_ms,
        action: raw.action,
    };
    rule.validate()?;
    Ok(rule)
}

#[derive(Serialize)]
struct RuleFileOut<'a> {
    version: u32,
    #[serde(flatten)]
    tunables: &'a Tunables,
    rules: Vec<RuleOut<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuleOut<'a> {
    key: PhysicalKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    combo_key: Option<PhysicalKey>,
    kind: &'static str,
    #[serde(skip_serializing_if = "is_zero")]
    min_duration_ms: u64,
    action: &'a Action,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Render `set` in the current file format.
pub fn render_rule_file(set: &RuleSet) -> Result<String, serde_json::Error> {
    let out = RuleFileOut {
        version: FORMAT_VERSION,
        tunables: &set.tunables,
        rules: set
            .rules
            .iter()
            .map(|r| RuleOut {
                key: r.key,
                combo_key: r.combo_key,
                kind: r.kind.as_str(),
                min_duration_ms: r.min_duration_ms,
                action: &r.action,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LaunchDescriptor;

    #[test]
    fn reads_current_format() {
        let set = parse_rule_file(
            r#"{
                "version": 1,
                "comboWindowMs": 250,
                "rules": [
                    { "key": 116, "comboKey": 115, "kind": "COMBO_LONG_PRESS", "minDurationMs": 1000,
                      "action": { "type": "run_command", "command": "cmd audio ringer silent" } },
                    { "key": 116, "kind": "LONG_PRESS", "minDurationMs": 500,
                      "action": { "type": "launch_target",
                                  "target": { "action": "android.intent.action.VOICE_ASSIST" } } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(set.tunables.combo_window_ms, 250);
        assert_eq!(set.tunables.long_press_min_ms, Tunables::default().long_press_min_ms);
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.rules[0].combo_key, Some(PhysicalKey(115)));
        assert_eq!(set.rules[0].kind, GestureKind::ComboLongPress);
        assert_eq!(
            set.rules[1].action,
            Action::LaunchTarget {
                target: LaunchDescriptor {
                    action: Some("android.intent.action.VOICE_ASSIST".into()),
                    ..LaunchDescriptor::default()
                }
            }
        );
    }

    #[test]
    fn accepts_legacy_field_names() {
        let set = parse_rule_file(
            r#"{
                "doublePressIntervalMs": 250,
                "rules": [
                    { "keyCode": 116, "behavior": "double_press", "durationMs": 0,
                      "action": { "type": "send_key", "keyCode": 212 } },
                    { "keyCode": 116, "behavior": "LONG_PRESS", "durationMs": 800,
                      "action": { "type": "run_shell", "command": "reboot" } },
                    { "keyCode": 116, "comboKeyCode": 114, "behavior": "COMBO_DOWN",
                      "action": { "type": "launch_intent", "intent": { "package": "com.example" } } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(set.tunables.double_press_interval_ms, 250);
        let kinds: Vec<_> = set.rules.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            [GestureKind::DoubleClick, GestureKind::LongPress, GestureKind::ComboDown]
        );
        assert_eq!(set.rules[0].action, Action::SendKey { key: PhysicalKey(212) });
        assert_eq!(set.rules[1].min_duration_ms, 800);
    }

    #[test]
    fn bad_entries_are_dropped_individually() {
        let set = parse_rule_file(
            r#"{
                "rules": [
                    { "key": 1, "kind": "WIGGLE", "action": { "type": "run_command", "command": "x" } },
                    { "key": 1, "comboKey": 1, "kind": "COMBO_DOWN", "action": { "type": "run_command", "command": "x" } },
                    { "key": 1, "kind": "COMBO_DOWN", "action": { "type": "run_command", "command": "x" } },
                    { "key": -4, "kind": "UP", "action": { "type": "run_command", "command": "x" } },
                    { "key": 1, "kind": "UP", "action": { "type": "teleport" } },
                    { "key": 1, "kind": "UP", "action": { "type": "run_command", "command": "  " } },
                    "not an object",
                    { "key": 1, "kind": "UP", "action": { "type": "run_command", "command": "ok" } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(set.rules.len(), 1);
        assert_eq!(
            set.rules[0].action,
            Action::RunCommand { command: "ok".into() }
        );
    }

    #[test]
    fn unusable_document_is_rejected() {
        assert!(matches!(parse_rule_file("[]"), Err(LoadError::Parse(_))));
        assert!(matches!(parse_rule_file(""), Err(LoadError::Parse(_))));
    }

    #[test]
    fn empty_rule_list_is_valid() {
        let set = parse_rule_file("{}").unwrap();
        assert!(set.rules.is_empty());
        assert_eq!(set.tunables, Tunables::default());
    }

    #[test]
    fn rendered_defaults_parse_back() {
        let defaults = RuleSet::builtin_default();
        let text = render_rule_file(&defaults).unwrap();
        assert_eq!(parse_rule_file(&text).unwrap(), defaults);
    }
}
