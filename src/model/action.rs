//! Action payloads handed to the backends.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::PhysicalKey;

/// What a matched rule asks the backend to do.
///
/// The set is closed; backends receive one of these and report completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Run a shell command line.
    #[serde(alias = "run_shell")]
    RunCommand { command: String },
    /// Emit a synthetic press of `key`.
    SendKey {
        #[serde(alias = "keyCode")]
        key: PhysicalKey,
    },
    /// Start an application or activity described by `target`.
    #[serde(alias = "launch_intent")]
    LaunchTarget {
        #[serde(alias = "intent")]
        target: LaunchDescriptor,
    },
}

impl Action {
    /// Short label for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RunCommand { .. } => "run_command",
            Self::SendKey { .. } => "send_key",
            Self::LaunchTarget { .. } => "launch_target",
        }
    }

    /// Rejects payloads a backend could never act on.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Self::RunCommand { command } if command.trim().is_empty() => {
                Err("run_command with empty command".into())
            }
            Self::LaunchTarget { target } if target.is_empty() => {
                Err("launch_target with empty descriptor".into())
            }
            _ => Ok(()),
        }
    }
}

/// A typed launcher extra.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Structured description of something to launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchDescriptor {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, alias = "category")]
    pub categories: Vec<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, ExtraValue>,
}

impl LaunchDescriptor {
    pub fn is_empty(&self) -> bool {
        self.action.is_none()
            && self.package.is_none()
            && self.data.is_none()
            && self.categories.is_empty()
            && self.extras.is_empty()
    }

    /// Renders the descriptor as launcher arguments (`-a`, `-d`, `-n`/`-p`,
    /// `-c`, typed extras). Returns `None` when there is nothing to launch.
    ///
    /// Text extras that look like booleans or integers are passed with the
    /// matching typed flag.
    pub fn to_launch_args(&self) -> Option<Vec<String>> {
        if self.is_empty() {
            return None;
        }

        let mut args = Vec::new();
        if let Some(action) = &self.action {
            args.extend(["-a".to_string(), action.clone()]);
        }
        if let Some(data) = &self.data {
            args.extend(["-d".to_string(), data.clone()]);
        }
        if let Some(package) = &self.package {
            match &self.class_name {
                Some(class) => args.extend(["-n".to_string(), format!("{package}/{class}")]),
                None => args.extend(["-p".to_string(), package.clone()]),
            }
        }
        for category in &self.categories {
            args.extend(["-c".to_string(), category.clone()]);
        }
        for (name, value) in &self.extras {
            let (flag, rendered) = match value {
                ExtraValue::Bool(b) => ("--ez", b.to_string()),
                ExtraValue::Int(i) => ("--el", i.to_string()),
                ExtraValue::Float(f) => ("--ef", f.to_string()),
                ExtraValue::Text(t) if t.parse::<bool>().is_ok() => ("--ez", t.clone()),
                ExtraValue::Text(t) if t.parse::<i32>().is_ok() => ("--ei", t.clone()),
                ExtraValue::Text(t) => ("--es", t.clone()),
            };
            args.extend([flag.to_string(), name.clone(), rendered]);
        }
        Some(args)
    }
}
