//! Periodic background tick driving long-press and combo long-press checks.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{GestureTracker, TimerFire};
use crate::clock::Clock;

/// Owns the timer thread. Stops and joins it on drop.
pub struct TimerScheduler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimerScheduler {
    /// Spawn the tick thread.
    ///
    /// Every `period` the thread polls `tracker` and passes each fire to
    /// `on_fire`. No tracker lock is held while `on_fire` runs.
    pub fn spawn<F>(
        tracker: Arc<GestureTracker>,
        clock: Arc<dyn Clock>,
        period: Duration,
        on_fire: F,
    ) -> io::Result<Self>
    where
        F: Fn(TimerFire) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("keyrules-timer".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    for fire in tracker.poll_timers(clock.now()) {
                        tracing::debug!(
                            key = %fire.gesture.primary_key,
                            kind = %fire.gesture.kind,
                            elapsed_ms = fire.gesture.held_duration_ms,
                            threshold_ms = fire.rule.min_duration_ms,
                            "threshold crossed"
                        );
                        on_fire(fire);
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the tick thread and wait for it to exit.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("timer thread panicked");
            }
        }
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::clock::SystemClock;
    use crate::model::{Action, GestureKind, RawEvent, Rule, RuleSet, Tunables};
    use crate::rules::{RuleSource, share};

    #[test]
    fn fires_long_press_while_key_is_held() {
        let rules = share(
            &RuleSet::new(
                Tunables {
                    long_press_min_ms: 100,
                    short_press_min_ms: 50,
                    ..Tunables::default()
                },
                vec![Rule::new(
                    30,
                    GestureKind::LongPress,
                    100,
                    Action::RunCommand {
                        command: "hold".into(),
                    },
                )],
            ),
            RuleSource::Store,
        );
        let tracker = Arc::new(GestureTracker::new(rules));
        let clock = Arc::new(SystemClock::new());
        let (tx, rx) = mpsc::channel();

        let mut scheduler = TimerScheduler::spawn(
            Arc::clone(&tracker),
            clock.clone(),
            Duration::from_millis(10),
            move |fire| {
                let _ = tx.send(fire);
            },
        )
        .unwrap();

        let mut down = RawEvent::down(30, 0);
        down.timestamp = clock.now();
        tracker.on_event(&down);

        let fire = rx.recv_timeout(Duration::from_secs(2)).expect("long press fired");
        assert_eq!(fire.gesture.kind, GestureKind::LongPress);
        assert!(fire.gesture.held_duration_ms >= 100);
        assert!(tracker.is_held(down.key), "fired before release");

        scheduler.shutdown();
        assert!(rx.try_recv().is_err(), "threshold fires only once");
    }
}
