//! Constant-time rule lookup by `(key, kind)` and by unordered key pair.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{GestureKind, PhysicalKey, Rule, RuleSet};

/// Order-independent pair of keys, stored as `(min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyPair(PhysicalKey, PhysicalKey);

impl KeyPair {
    pub fn new(a: PhysicalKey, b: PhysicalKey) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }

    pub fn contains(&self, key: PhysicalKey) -> bool {
        self.0 == key || self.1 == key
    }
}

/// Two combo rules registered for the same pair, kind and threshold.
/// The first one inserted wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboConflict {
    pub pair: KeyPair,
    pub kind: GestureKind,
    pub min_duration_ms: u64,
}

/// Immutable lookup structure derived from one [`RuleSet`].
///
/// Rules that fail validation are left out; the rest are indexed.
#[derive(Debug, Default)]
pub struct RuleIndex {
    by_kind: HashMap<(PhysicalKey, GestureKind), Vec<Arc<Rule>>>,
    by_pair: HashMap<KeyPair, Vec<Arc<Rule>>>,
    conflicts: Vec<ComboConflict>,
    indexed: usize,
    dropped: usize,
}

impl RuleIndex {
    pub fn build(set: &RuleSet) -> Self {
        let mut index = Self::default();

        for (position, rule) in set.rules.iter().enumerate() {
            if let Err(e) = rule.validate() {
                tracing::warn!(position, key = %rule.key, kind = %rule.kind, error = %e, "rule excluded from index");
                index.dropped += 1;
                continue;
            }
            let rule = Arc::new(rule.clone());

            match rule.combo_key {
                Some(combo) if rule.kind.is_combo() => {
                    let pair = KeyPair::new(rule.key, combo);
                    let bucket = index.by_pair.entry(pair).or_default();
                    if bucket
                        .iter()
                        .any(|r| r.kind == rule.kind && r.min_duration_ms == rule.min_duration_ms)
                    {
                        tracing::debug!(key = %rule.key, combo = %combo, kind = %rule.kind, "duplicate combo rule; first one wins");
                        index.conflicts.push(ComboConflict {
                            pair,
                            kind: rule.kind,
                            min_duration_ms: rule.min_duration_ms,
                        });
                    }
                    bucket.push(rule);
                }
                _ => {
                    index.by_kind.entry((rule.key, rule.kind)).or_default().push(rule);
                }
            }
            index.indexed += 1;
        }

        index
    }

    /// Best rule for a solo gesture: among rules with
    /// `min_duration_ms <= held_ms`, the one with the largest threshold.
    /// Ties go to the rule listed first.
    pub fn match_rule(&self, key: PhysicalKey, kind: GestureKind, held_ms: u64) -> Option<&Arc<Rule>> {
        longest_qualifying(self.by_kind.get(&(key, kind))?.iter(), held_ms)
    }

    /// First combo rule of `kind` registered for `{a, b}` in either order.
    pub fn match_combo(&self, a: PhysicalKey, b: PhysicalKey, kind: GestureKind) -> Option<&Arc<Rule>> {
        self.combo_bucket(a, b, kind).next()
    }

    /// Combo lookup with longest-threshold-wins, used by the combo timer.
    pub fn match_combo_held(
        &self,
        a: PhysicalKey,
        b: PhysicalKey,
        kind: GestureKind,
        held_ms: u64,
    ) -> Option<&Arc<Rule>> {
        longest_qualifying(self.combo_bucket(a, b, kind), held_ms)
    }

    /// Whether any combo rule pairs `a` with `b`.
    pub fn pairs(&self, a: PhysicalKey, b: PhysicalKey) -> bool {
        self.by_pair.contains_key(&KeyPair::new(a, b))
    }

    pub fn has_combo_kind(&self, a: PhysicalKey, b: PhysicalKey, kind: GestureKind) -> bool {
        self.combo_bucket(a, b, kind).next().is_some()
    }

    pub fn has_rules(&self, key: PhysicalKey, kind: GestureKind) -> bool {
        self.by_kind.get(&(key, kind)).is_some_and(|b| !b.is_empty())
    }

    pub fn conflicts(&self) -> &[ComboConflict] {
        &self.conflicts
    }

    /// Number of rules that made it into the index.
    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }

    /// Number of rules refused by validation.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn combo_bucket(
        &self,
        a: PhysicalKey,
        b: PhysicalKey,
        kind: GestureKind,
    ) -> impl Iterator<Item = &Arc<Rule>> {
        self.by_pair
            .get(&KeyPair::new(a, b))
            .into_iter()
            .flatten()
            .filter(move |r| {
                r.kind == kind
                    && ((r.key == a && r.combo_key == Some(b)) || (r.key == b && r.combo_key == Some(a)))
            })
    }
}

fn longest_qualifying<'a>(
    rules: impl Iterator<Item = &'a Arc<Rule>>,
    held_ms: u64,
) -> Option<&'a Arc<Rule>> {
    rules
        .filter(|r| r.min_duration_ms <= held_ms)
        .reduce(|best, r| if r.min_duration_ms > best.min_duration_ms { r } else { best })
}
