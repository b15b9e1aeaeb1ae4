//! Timer service over the tokio runtime.
//!
//! Mirrors the host runtime's `setTimeout` / `setInterval` / `nextTick`
//! primitives with cancellable handles, and tracks every live timer so they
//! can all be cleared at teardown.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Shortest interval period; zero periods are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Schedules and tracks timers.
#[derive(Default)]
pub struct TimerService {
    timers: Arc<DashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("timers", &self.timers.len())
            .finish()
    }
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, id: u64, handle: JoinHandle<()>) -> TimerHandle {
        // A one-shot timer may finish before it is tracked; it is pruned by
        // the next count.
        self.timers.insert(id, handle);
        TimerHandle(id)
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Runs `callback` once after `delay`.
    pub fn set_timeout<F, Fut>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.allocate();
        let timers = self.timers.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback().await;
            timers.remove(&id);
        });
        trace!("Scheduled timeout {} in {:?}", id, delay);
        self.track(id, handle)
    }

    /// Runs `callback` every `period`, first after one full period.
    pub fn set_interval<F, Fut>(&self, period: Duration, callback: F) -> TimerHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = if period.is_zero() {
            warn!("⚠️ Zero interval period, using {:?}", MIN_INTERVAL);
            MIN_INTERVAL
        } else {
            period
        };
        let id = self.allocate();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                callback().await;
            }
        });
        trace!("Scheduled interval {} every {:?}", id, period);
        self.track(id, handle)
    }

    /// Runs `callback` once the current task yields.
    pub fn next_tick<F, Fut>(&self, callback: F) -> TimerHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.allocate();
        let timers = self.timers.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            callback().await;
            timers.remove(&id);
        });
        self.track(id, handle)
    }

    /// Cancels a timer. Returns `false` if it already finished or was
    /// cleared.
    pub fn clear(&self, handle: TimerHandle) -> bool {
        match self.timers.remove(&handle.0) {
            Some((_, task)) => {
                let was_running = !task.is_finished();
                task.abort();
                was_running
            }
            None => false,
        }
    }

    /// Cancels every live timer, returning how many were still running.
    pub fn clear_all(&self) -> usize {
        let ids: Vec<u64> = self.timers.iter().map(|entry| *entry.key()).collect();
        let cleared = ids
            .into_iter()
            .filter(|id| self.clear(TimerHandle(*id)))
            .count();
        if cleared > 0 {
            debug!("⏹️ Cleared {} timers", cleared);
        }
        cleared
    }

    /// Number of timers still pending.
    pub fn active_count(&self) -> usize {
        self.timers.retain(|_, task| !task.is_finished());
        self.timers.len()
    }
}
