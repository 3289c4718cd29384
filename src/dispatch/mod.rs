//! Bounded single-consumer action queue.
//!
//! [`ActionDispatcher::submit`] never blocks: it either takes one of
//! `capacity` in-flight permits and queues the action, or rejects it. A
//! dedicated worker thread runs a current-thread tokio runtime and executes
//! queued actions one at a time, in submission order, each under the action
//! timeout. Execution failures stop at the worker and are only logged.

mod guard;

use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc};
use tokio_util::sync::CancellationToken;

use crate::model::Action;

pub use guard::ReentryGuard;

/// Why a backend could not carry out an action.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("spawn failed: {0}")]
    Spawn(#[source] io::Error),
    #[error("exited with status {0}")]
    NonZeroExit(i32),
    #[error("terminated by signal")]
    Signalled,
    #[error("unsupported action: {0}")]
    Unsupported(&'static str),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("executor panicked")]
    Panicked,
}

/// Carries out one action. Implementations may take as long as they like;
/// the dispatcher enforces the timeout by dropping the returned future.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action) -> Result<(), ExecError>;
}

/// How one accepted action ended.
#[derive(Debug)]
pub enum ExecOutcome {
    Completed,
    Failed(ExecError),
    TimedOut,
    /// The dispatcher shut down while the action was running.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    ShuttingDown,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Result of [`ActionDispatcher::submit`]. `Accepted` means queued, not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Running totals since the dispatcher started.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub accepted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared between submitters and the worker.
struct Shared {
    timeout_ms: AtomicU64,
    counters: Counters,
}

/// An accepted action waiting for, or held by, the worker.
///
/// The permit is returned when the task is dropped, so a running action
/// still occupies its slot until it finishes.
struct DispatchTask {
    action: Action,
    enqueued_at: Instant,
    _permit: OwnedSemaphorePermit,
}

pub struct ActionDispatcher {
    tx: mpsc::Sender<DispatchTask>,
    slots: Arc<Semaphore>,
    shared: Arc<Shared>,
    capacity: usize,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ActionDispatcher {
    /// Start the worker thread.
    ///
    /// `capacity` bounds queued plus executing actions and is at least one.
    pub fn spawn(
        executor: Arc<dyn ActionExecutor>,
        capacity: usize,
        action_timeout: Duration,
    ) -> io::Result<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            timeout_ms: AtomicU64::new(as_millis(action_timeout)),
            counters: Counters::default(),
        });
        let cancel = CancellationToken::new();

        let worker = Worker {
            executor,
            rx,
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("keyrules-dispatch".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            tx,
            slots: Arc::new(Semaphore::new(capacity)),
            shared,
            capacity,
            cancel,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue `action` for execution without blocking.
    pub fn submit(&self, action: Action) -> DispatchOutcome {
        let label = action.label();
        if self.cancel.is_cancelled() {
            return self.reject(label, RejectReason::ShuttingDown);
        }

        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return self.reject(label, RejectReason::QueueFull),
            Err(TryAcquireError::Closed) => return self.reject(label, RejectReason::ShuttingDown),
        };

        let task = DispatchTask {
            action,
            enqueued_at: Instant::now(),
            _permit: permit,
        };
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                return self.reject(label, RejectReason::QueueFull);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return self.reject(label, RejectReason::ShuttingDown);
            }
        }
        bump(&self.shared.counters.accepted);
        tracing::trace!(action = label, "action queued");
        DispatchOutcome::Accepted
    }

    /// Timeout applied to actions started from now on.
    pub fn set_action_timeout(&self, timeout: Duration) {
        self.shared
            .timeout_ms
            .store(as_millis(timeout), Ordering::Relaxed);
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.shared.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queued plus executing actions.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.slots.available_permits())
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.shared.counters;
        DispatchStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, abort the running action and join the worker.
    /// Actions still queued are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.slots.close();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("dispatch thread panicked");
            }
        }
    }

    fn reject(&self, label: &'static str, reason: RejectReason) -> DispatchOutcome {
        bump(&self.shared.counters.rejected);
        tracing::warn!(
            action = label,
            reason = reason.as_str(),
            in_flight = self.in_flight(),
            capacity = self.capacity,
            "action dropped"
        );
        DispatchOutcome::Rejected(reason)
    }
}

impl Drop for ActionDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

struct Worker {
    executor: Arc<dyn ActionExecutor>,
    rx: mpsc::Receiver<DispatchTask>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Worker {
    fn run(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %e, "dispatch runtime failed to start");
                return;
            }
        };
        runtime.block_on(self.drain());
    }

    async fn drain(mut self) {
        loop {
            let task = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(task) => task,
                    None => break,
                },
            };

            let timeout = Duration::from_millis(self.shared.timeout_ms.load(Ordering::Relaxed));
            let started = Instant::now();
            tracing::trace!(
                action = task.action.label(),
                waited_ms = as_millis(started.duration_since(task.enqueued_at)),
                "action started"
            );
            let outcome = self.execute(&task.action, timeout).await;
            self.report(&task.action, outcome, started.elapsed());
        }

        self.rx.close();
        let mut discarded = 0usize;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::warn!(discarded, "queued actions dropped on shutdown");
        }
        tracing::debug!("dispatch worker stopped");
    }

    async fn execute(&self, action: &Action, timeout: Duration) -> ExecOutcome {
        let run = AssertUnwindSafe(self.executor.execute(action)).catch_unwind();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => ExecOutcome::Cancelled,
            result = tokio::time::timeout(timeout, run) => match result {
                Err(_) => ExecOutcome::TimedOut,
                Ok(Err(_)) => ExecOutcome::Failed(ExecError::Panicked),
                Ok(Ok(Err(e))) => ExecOutcome::Failed(e),
                Ok(Ok(Ok(()))) => ExecOutcome::Completed,
            },
        }
    }

    fn report(&self, action: &Action, outcome: ExecOutcome, elapsed: Duration) {
        let counters = &self.shared.counters;
        let elapsed_ms = as_millis(elapsed);
        match outcome {
            ExecOutcome::Completed => {
                bump(&counters.completed);
                tracing::debug!(action = action.label(), elapsed_ms, "action completed");
            }
            ExecOutcome::Failed(e) => {
                bump(&counters.failed);
                tracing::warn!(action = action.label(), elapsed_ms, error = %e, "action failed");
            }
            ExecOutcome::TimedOut => {
                bump(&counters.timed_out);
                tracing::warn!(action = action.label(), elapsed_ms, "action timed out and was terminated");
            }
            ExecOutcome::Cancelled => {
                tracing::debug!(action = action.label(), elapsed_ms, "action aborted by shutdown");
            }
        }
    }
}
