//! The assembled pipeline: reload gate, tracker, matcher, re-entry guard
//! and dispatcher, plus the background threads that serve them.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::{ConfigGate, RuleStore};
use crate::dispatch::{ActionDispatcher, ActionExecutor, DispatchOutcome, ReentryGuard};
use crate::model::{PhysicalKey, RawEvent, RuleSet, Source, Timestamp};
use crate::rules::{RuleMatcher, RuleSource, SharedRules, share};
use crate::tracker::{GestureTracker, TimerFire, TimerScheduler};

/// Engine-level constants. Per-rule-set timing lives in `Tunables`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the long-press timer thread. `None` runs no thread; the
    /// host then drives timers through [`Engine::poll_timers`].
    pub tick: Option<Duration>,
    pub reload_interval: Duration,
    pub queue_capacity: usize,
    pub reentry_window: Duration,
    /// Keys whose events are never reported as consumed, even when a rule
    /// fired for them.
    pub never_consume: HashSet<PhysicalKey>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick: Some(Duration::from_millis(50)),
            reload_interval: Duration::from_millis(1000),
            queue_capacity: 10,
            reentry_window: Duration::from_millis(100),
            never_consume: HashSet::new(),
        }
    }
}

/// Where the engine gets its rules.
pub enum RuleProvider {
    Builtin,
    Fixed(RuleSet),
    /// Consulted from [`Engine::handle`] at most once per reload interval.
    ///
    /// The store's `signature` runs on the event thread, so stores that touch
    /// the filesystem or the network belong behind a
    /// [`CachedRuleStore`](crate::config::CachedRuleStore).
    Store(Arc<dyn RuleStore>),
}

/// What the host should do with the event it just delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A rule fired for this event; the host should swallow it.
    Consumed,
    PassThrough,
}

pub struct Engine {
    rules: SharedRules,
    gate: Option<ConfigGate>,
    tracker: Arc<GestureTracker>,
    matcher: RuleMatcher,
    guard: ReentryGuard,
    dispatcher: Arc<ActionDispatcher>,
    scheduler: Mutex<Option<TimerScheduler>>,
    never_consume: HashSet<PhysicalKey>,
}

impl Engine {
    /// Build the pipeline and start its worker threads.
    ///
    /// With a store, the first reload happens here, before any event.
    pub fn start(
        config: EngineConfig,
        provider: RuleProvider,
        executor: Arc<dyn ActionExecutor>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let (rules, gate) = match provider {
            RuleProvider::Builtin => (share(&RuleSet::builtin_default(), RuleSource::Builtin), None),
            RuleProvider::Fixed(set) => (share(&set, RuleSource::Store), None),
            RuleProvider::Store(store) => {
                let rules = share(&RuleSet::builtin_default(), RuleSource::Builtin);
                let gate = ConfigGate::new(store, Arc::clone(&rules), Arc::clone(&clock), config.reload_interval);
                gate.maybe_reload();
                (rules, Some(gate))
            }
        };

        let timeout = Duration::from_millis(rules.load().tunables.action_timeout_ms);
        let dispatcher = Arc::new(ActionDispatcher::spawn(executor, config.queue_capacity, timeout)?);
        let tracker = Arc::new(GestureTracker::new(Arc::clone(&rules)));

        let scheduler = match config.tick {
            Some(period) => {
                let dispatcher = Arc::clone(&dispatcher);
                Some(TimerScheduler::spawn(
                    Arc::clone(&tracker),
                    Arc::clone(&clock),
                    period,
                    move |fire| {
                        submit_fire(&dispatcher, fire);
                    },
                )?)
            }
            None => None,
        };

        let generation = rules.load();
        tracing::info!(
            source = ?generation.source,
            rules = generation.index.len(),
            capacity = dispatcher.capacity(),
            "engine started"
        );

        Ok(Self {
            matcher: RuleMatcher::new(Arc::clone(&rules)),
            rules,
            gate,
            tracker,
            guard: ReentryGuard::new(config.reentry_window),
            dispatcher,
            scheduler: Mutex::new(scheduler),
            never_consume: config.never_consume,
        })
    }

    /// Feed one raw event through the pipeline. Never blocks on I/O.
    pub fn handle(&self, event: &RawEvent) -> Verdict {
        if event.source == Source::Synthetic {
            return Verdict::PassThrough;
        }
        self.refresh_rules();

        let Some(gesture) = self.tracker.on_event(event) else {
            return Verdict::PassThrough;
        };
        let Some(rule) = self.matcher.match_gesture(&gesture) else {
            tracing::trace!(key = %gesture.primary_key, kind = %gesture.kind, "no rule");
            return Verdict::PassThrough;
        };
        if !self.guard.admit(&gesture, event.timestamp) {
            return Verdict::PassThrough;
        }

        tracing::debug!(
            key = %gesture.primary_key,
            kind = %gesture.kind,
            held_ms = gesture.held_duration_ms,
            action = rule.action.label(),
            "rule matched"
        );
        let outcome = self.dispatcher.submit(rule.action.clone());
        if outcome.is_accepted() && !self.never_consume.contains(&event.key) {
            Verdict::Consumed
        } else {
            Verdict::PassThrough
        }
    }

    /// Run the timer check once. Returns how many actions were queued.
    pub fn poll_timers(&self, now: Timestamp) -> usize {
        self.tracker
            .poll_timers(now)
            .into_iter()
            .map(|fire| submit_fire(&self.dispatcher, fire))
            .filter(DispatchOutcome::is_accepted)
            .count()
    }

    pub fn cancel(&self, key: PhysicalKey) {
        self.tracker.cancel(key);
    }

    /// Drop every in-progress gesture, e.g. when input focus is lost.
    pub fn cancel_all(&self) {
        self.tracker.cancel_all();
        self.guard.clear();
    }

    /// Reload from the store immediately. Returns `false` without a store.
    pub fn reload_now(&self) -> bool {
        let reloaded = self.gate.as_ref().is_some_and(ConfigGate::force_reload);
        if reloaded {
            self.apply_tunables();
        }
        reloaded
    }

    pub fn rules(&self) -> &SharedRules {
        &self.rules
    }

    pub fn tracker(&self) -> &GestureTracker {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Stop the timer thread, then the dispatcher.
    pub fn shutdown(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
        }
        self.dispatcher.shutdown();
    }

    fn refresh_rules(&self) {
        if self.gate.as_ref().is_some_and(ConfigGate::maybe_reload) {
            self.apply_tunables();
        }
    }

    fn apply_tunables(&self) {
        let timeout_ms = self.rules.load().tunables.action_timeout_ms;
        self.dispatcher
            .set_action_timeout(Duration::from_millis(timeout_ms));
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn submit_fire(dispatcher: &ActionDispatcher, fire: TimerFire) -> DispatchOutcome {
    tracing::debug!(
        key = %fire.gesture.primary_key,
        kind = %fire.gesture.kind,
        held_ms = fire.gesture.held_duration_ms,
        action = fire.rule.action.label(),
        "timer rule fired"
    );
    dispatcher.submit(fire.rule.action.clone())
}
