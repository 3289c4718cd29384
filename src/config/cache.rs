//! In-memory mirror of a slow rule store, refreshed by a background thread.
//!
//! The gate runs on the event-delivery thread, so it must never wait on the
//! disk. [`CachedRuleStore`] answers `signature` and `load_current` from
//! memory; a poller thread keeps that copy current. A failed refresh keeps
//! the last good copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::store::{LoadError, RuleStore, Signature};
use crate::model::RuleSet;

#[derive(Default)]
struct Snapshot {
    entry: Option<(Signature, Arc<RuleSet>)>,
    failing: bool,
}

pub struct CachedRuleStore {
    snapshot: Arc<RwLock<Snapshot>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CachedRuleStore {
    /// Refresh once on the calling thread, then keep refreshing every
    /// `period` on a background thread.
    pub fn spawn(inner: Arc<dyn RuleStore>, period: Duration) -> std::io::Result<Self> {
        let snapshot = Arc::new(RwLock::new(Snapshot::default()));
        refresh(inner.as_ref(), &snapshot);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_snapshot = Arc::clone(&snapshot);
        let handle = std::thread::Builder::new()
            .name("keyrules-store".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    refresh(inner.as_ref(), &thread_snapshot);
                }
            })?;

        Ok(Self {
            snapshot,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("store poller panicked");
            }
        }
    }
}

impl Drop for CachedRuleStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RuleStore for CachedRuleStore {
    fn signature(&self) -> Result<Signature, LoadError> {
        match &self.snapshot.read().entry {
            Some((signature, _)) => Ok(signature.clone()),
            None => Err(LoadError::NotYetLoaded),
        }
    }

    fn load_current(&self) -> Result<RuleSet, LoadError> {
        match &self.snapshot.read().entry {
            Some((_, set)) => Ok(RuleSet::clone(set)),
            None => Err(LoadError::NotYetLoaded),
        }
    }
}

fn refresh(inner: &dyn RuleStore, snapshot: &RwLock<Snapshot>) {
    let signature = match inner.signature() {
        Ok(signature) => signature,
        Err(e) => return record_failure(snapshot, &e),
    };
    let unchanged = snapshot
        .read()
        .entry
        .as_ref()
        .is_some_and(|(current, _)| *current == signature);
    if unchanged {
        return;
    }

    match inner.load_current() {
        Ok(set) => {
            tracing::debug!(signature = %signature, rules = set.rules.len(), "rule cache refreshed");
            let mut snapshot = snapshot.write();
            snapshot.entry = Some((signature, Arc::new(set)));
            snapshot.failing = false;
        }
        Err(e) => record_failure(snapshot, &e),
    }
}

/// Logs the first failure of a run; repeats stay quiet until a refresh
/// succeeds again.
fn record_failure(snapshot: &RwLock<Snapshot>, error: &LoadError) {
    let mut snapshot = snapshot.write();
    if !snapshot.failing {
        tracing::warn!(error = %error, cached = snapshot.entry.is_some(), "rule store refresh failed");
        snapshot.failing = true;
    }
}
