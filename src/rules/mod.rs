//! Rule snapshots: the index built from one rule set, published atomically.

mod index;
mod matcher;

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::model::{RuleSet, Tunables};

pub use index::{ComboConflict, KeyPair, RuleIndex};
pub use matcher::RuleMatcher;

/// Where the active rules came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSource {
    Builtin,
    Store,
}

/// One immutable rule set generation: tunables plus the derived index.
///
/// Readers load a whole generation at once, so tunables and rules always
/// belong together.
#[derive(Debug)]
pub struct Generation {
    pub tunables: Tunables,
    pub index: RuleIndex,
    pub source: RuleSource,
}

impl Generation {
    pub fn build(set: &RuleSet, source: RuleSource) -> Self {
        Self {
            tunables: set.tunables.sanitized(),
            index: RuleIndex::build(set),
            source,
        }
    }
}

/// The published generation, swapped wholesale on reload.
pub type SharedRules = Arc<ArcSwap<Generation>>;

/// Publishes `set` as the first generation.
pub fn share(set: &RuleSet, source: RuleSource) -> SharedRules {
    Arc::new(ArcSwap::from_pointee(Generation::build(set, source)))
}
