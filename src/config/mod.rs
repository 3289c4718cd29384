//! Rule loading: stores, the JSON format and the throttled reload gate.

mod cache;
mod parse;
mod store;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::model::{RuleSet, Timestamp};
use crate::rules::{Generation, RuleSource, SharedRules};

pub use cache::CachedRuleStore;
pub use parse::{parse_rule_file, render_rule_file};
pub use store::{FileRuleStore, LoadError, RuleStore, Signature};

#[derive(Default)]
struct GateState {
    last_check: Option<Timestamp>,
    signature: Option<Signature>,
    loaded_once: bool,
    store_down: bool,
}

/// Decides when the published rules are replaced.
///
/// [`ConfigGate::maybe_reload`] is meant to be called on every event. It
/// consults the store at most once per interval, and only loads when the
/// store's signature changed. Failed loads keep whatever is published; if
/// nothing was ever loaded, the built-in defaults are published instead.
pub struct ConfigGate {
    store: Arc<dyn RuleStore>,
    rules: SharedRules,
    clock: Arc<dyn Clock>,
    interval_ms: u64,
    state: Mutex<GateState>,
}

impl ConfigGate {
    pub fn new(
        store: Arc<dyn RuleStore>,
        rules: SharedRules,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            rules,
            clock,
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            state: Mutex::new(GateState::default()),
        }
    }

    /// Returns `true` if a new generation was published.
    ///
    /// Never blocks: a concurrent caller already checking makes this call
    /// return `false` immediately.
    pub fn maybe_reload(&self) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            tracing::trace!("reload check already running");
            return false;
        };
        let now = self.clock.now();
        if let Some(last) = state.last_check {
            if now.millis_since(last) < self.interval_ms {
                return false;
            }
        }
        state.last_check = Some(now);
        self.check(&mut state, false)
    }

    /// Load from the store now, ignoring the interval and the signature.
    pub fn force_reload(&self) -> bool {
        let mut state = self.state.lock();
        state.last_check = Some(self.clock.now());
        self.check(&mut state, true)
    }

    fn check(&self, state: &mut GateState, force: bool) -> bool {
        let signature = match self.store.signature() {
            Ok(signature) => signature,
            Err(e) => {
                if !state.store_down {
                    tracing::warn!(error = %e, "rule store signature unavailable");
                    state.store_down = true;
                }
                state.signature = None;
                return self.fall_back(state);
            }
        };
        state.store_down = false;

        if !force && state.signature.as_ref() == Some(&signature) {
            return false;
        }

        let loaded = self.store.load_current();
        state.signature = Some(signature.clone());
        match loaded {
            Ok(set) => {
                self.publish(&set, &signature);
                state.loaded_once = true;
                true
            }
            Err(e) => {
                tracing::warn!(
                    signature = %signature,
                    error = %e,
                    keeping = ?self.rules.load().source,
                    "rule reload failed"
                );
                self.fall_back(state)
            }
        }
    }

    fn publish(&self, set: &RuleSet, signature: &Signature) {
        let generation = Generation::build(set, RuleSource::Store);
        for conflict in generation.index.conflicts() {
            tracing::warn!(
                kind = %conflict.kind,
                min_duration_ms = conflict.min_duration_ms,
                pair = ?conflict.pair,
                "combo rules overlap; the first listed wins"
            );
        }
        if generation.index.is_empty() {
            tracing::info!(signature = %signature, "rule set is empty; every key passes through");
        } else {
            tracing::info!(
                signature = %signature,
                rules = generation.index.len(),
                dropped = generation.index.dropped(),
                "rules reloaded"
            );
        }
        self.rules.store(Arc::new(generation));
    }

    /// Publishes the built-in rules if no load ever succeeded and they are
    /// not already active.
    fn fall_back(&self, state: &GateState) -> bool {
        if state.loaded_once || self.rules.load().source == RuleSource::Builtin {
            return false;
        }
        tracing::warn!("no rules loaded yet; using built-in defaults");
        self.rules.store(Arc::new(Generation::build(
            &RuleSet::builtin_default(),
            RuleSource::Builtin,
        )));
        true
    }
}
