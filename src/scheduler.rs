//! Single-shot timer facility.
//!
//! The reset timer is the only asynchrony in the engine, so the host's
//! timer loop is abstracted behind [`Scheduler`]. [`ThreadScheduler`] is a
//! self-contained implementation backed by one thread per pending timer;
//! [`ManualScheduler`] gives tests deterministic control over firing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Opaque handle to a pending single-shot timer.
pub type TimerId = u64;

/// Single-shot scheduling contract consumed by triggers.
pub trait Scheduler: Send + Sync {
    /// Schedule `callback` to run once after `delay`, on the scheduler's
    /// own dispatch context.
    fn schedule_once(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerId;

    /// Cancel a pending timer. Returns false when the timer already fired
    /// or was never scheduled.
    fn cancel(&self, id: TimerId) -> bool;
}

struct TimerGate {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Thread-backed scheduler: each pending timer parks one thread on a
/// condvar so cancellation takes effect immediately.
pub struct ThreadScheduler {
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<TimerId, Arc<TimerGate>>>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers not yet fired or cancelled.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule_once(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let gate = Arc::new(TimerGate {
            cancelled: Mutex::new(false),
            signal: Condvar::new(),
        });
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, gate.clone());
        }
        let pending = self.pending.clone();
        std::thread::spawn(move || {
            let fired = {
                let Ok(guard) = gate.cancelled.lock() else {
                    return;
                };
                let Ok((guard, _)) = gate
                    .signal
                    .wait_timeout_while(guard, delay, |cancelled| !*cancelled)
                else {
                    return;
                };
                !*guard
            };
            if let Ok(mut pending) = pending.lock() {
                pending.remove(&id);
            }
            if fired {
                callback();
            }
        });
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let gate = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&id),
            Err(_) => None,
        };
        let Some(gate) = gate else {
            return false;
        };
        if let Ok(mut cancelled) = gate.cancelled.lock() {
            *cancelled = true;
        }
        gate.signal.notify_all();
        true
    }
}

type PendingCallback = (TimerId, Duration, Box<dyn FnOnce() + Send>);

/// Test scheduler: timers fire only when the test says so.
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    pending: Mutex<Vec<PendingCallback>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Fire every pending timer, in scheduling order.
    pub fn fire_all(&self) -> usize {
        let drained: Vec<PendingCallback> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return 0,
        };
        let count = drained.len();
        for (_, _, callback) in drained {
            callback();
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut pending) = self.pending.lock() {
            pending.push((id, delay, callback));
        }
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let Ok(mut pending) = self.pending.lock() else {
            return false;
        };
        let before = pending.len();
        pending.retain(|(pending_id, _, _)| *pending_id != id);
        pending.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn thread_scheduler_fires_once() {
        let scheduler = ThreadScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        scheduler.schedule_once(
            Duration::from_millis(10),
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn thread_scheduler_cancel_prevents_firing() {
        let scheduler = ThreadScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let id = scheduler.schedule_once(
            Duration::from_secs(30),
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn manual_scheduler_fires_on_demand() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let id = scheduler.schedule_once(
            Duration::from_secs(1),
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.fire_all(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.cancel(id));
    }
}
