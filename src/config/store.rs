//! Rule store contract and the JSON file implementation.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::parse::parse_rule_file;
use crate::model::RuleSet;

/// Why the current rules could not be read.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("rule store unavailable: {0}")]
    Unavailable(String),
    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed rule file: {0}")]
    Parse(String),
    #[error("rules not loaded yet")]
    NotYetLoaded,
}

/// Cheap staleness token. Equal signatures mean the content is assumed
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of rule sets, polled by the config gate.
pub trait RuleStore: Send + Sync {
    /// Staleness token; must be much cheaper than [`RuleStore::load_current`].
    fn signature(&self) -> Result<Signature, LoadError>;

    fn load_current(&self) -> Result<RuleSet, LoadError>;
}

/// Rules kept in a JSON file. The signature is the file's modification
/// time and length.
#[derive(Debug, Clone)]
pub struct FileRuleStore {
    path: PathBuf,
}

impl FileRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> LoadError {
        if source.kind() == io::ErrorKind::NotFound {
            LoadError::Unavailable(format!("{} does not exist", self.path.display()))
        } else {
            LoadError::Io {
                path: self.path.clone(),
                source,
            }
        }
    }
}

impl RuleStore for FileRuleStore {
    fn signature(&self) -> Result<Signature, LoadError> {
        let meta = std::fs::metadata(&self.path).map_err(|e| self.io_error(e))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        Ok(Signature::new(format!("{modified}:{}", meta.len())))
    }

    fn load_current(&self) -> Result<RuleSet, LoadError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        parse_rule_file(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GestureKind;

    const ONE_RULE: &str = r#"{
        "rules": [
            { "key": 116, "kind": "DOUBLE_CLICK", "action": { "type": "send_key", "key": 212 } }
        ]
    }"#;

    const TWO_RULES: &str = r#"{
        "longPressMinMs": 700,
        "rules": [
            { "key": 116, "kind": "DOUBLE_CLICK", "action": { "type": "send_key", "key": 212 } },
            { "key": 116, "kind": "LONG_PRESS", "minDurationMs": 800,
              "action": { "type": "run_command", "command": "true" } }
        ]
    }"#;

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRuleStore::new(dir.path().join("rules.json"));
        assert!(matches!(store.signature(), Err(LoadError::Unavailable(_))));
        assert!(matches!(store.load_current(), Err(LoadError::Unavailable(_))));
    }

    #[test]
    fn loads_rules_and_tracks_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, ONE_RULE).unwrap();
        let store = FileRuleStore::new(&path);

        let first = store.signature().unwrap();
        assert_eq!(store.signature().unwrap(), first);
        let set = store.load_current().unwrap();
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].kind, GestureKind::DoubleClick);

        std::fs::write(&path, TWO_RULES).unwrap();
        assert_ne!(store.signature().unwrap(), first);
        let set = store.load_current().unwrap();
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.tunables.long_press_min_ms, 700);
    }

    #[test]
    fn unreadable_content_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileRuleStore::new(&path);
        assert!(store.signature().is_ok());
        assert!(matches!(store.load_current(), Err(LoadError::Parse(_))));
    }
}
