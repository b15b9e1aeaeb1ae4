//! Boot sequencer.
//!
//! Drives the boot state machine
//! `DrainingBefore -> DrainingAfter -> DrainingAfterBootstrap -> Done`:
//!
//! 1. drain the `before` bucket;
//! 2. start the event dispatcher, so every subscription is live;
//! 3. drain the `after` bucket;
//! 4. drain the `afterBootstrap` bucket.
//!
//! Each step completes before the next begins. Nothing in the sequence aborts
//! boot: failed, skipped and timed-out entries only show up in the logs and
//! the returned [`BootReport`].

use crate::queue::{BootQueue, Bucket, BucketReport};
use keystone_event_system::{EventDispatcher, FrameworkContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

/// Observable state of the boot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BootPhase {
    DrainingBefore,
    DrainingAfter,
    DrainingAfterBootstrap,
    Done,
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootPhase::DrainingBefore => "draining before",
            BootPhase::DrainingAfter => "draining after",
            BootPhase::DrainingAfterBootstrap => "draining afterBootstrap",
            BootPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Summary of a completed boot sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootReport {
    /// One report per bucket, in drain order
    pub buckets: Vec<BucketReport>,
    /// Subscriptions created when the dispatcher started
    pub subscriptions: usize,
    pub elapsed: Duration,
}

impl BootReport {
    pub fn bucket(&self, bucket: Bucket) -> Option<&BucketReport> {
        self.buckets.iter().find(|report| report.bucket == bucket)
    }

    pub fn entries_run(&self) -> usize {
        self.buckets.iter().map(|report| report.run).sum()
    }

    /// Whether every entry ran to completion.
    pub fn is_clean(&self) -> bool {
        self.buckets
            .iter()
            .all(|report| report.failed == 0 && report.skipped == 0 && report.timed_out == 0)
    }
}

pub struct Loader {
    context: Arc<FrameworkContext>,
    dispatcher: EventDispatcher,
    queue: Arc<BootQueue>,
    phase: watch::Sender<BootPhase>,
    started: AtomicBool,
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("phase", &self.phase())
            .field("queue", &self.queue)
            .finish()
    }
}

impl Loader {
    pub fn new(
        context: Arc<FrameworkContext>,
        dispatcher: EventDispatcher,
        queue: Arc<BootQueue>,
    ) -> Self {
        let (phase, _) = watch::channel(BootPhase::DrainingBefore);
        Self {
            context,
            dispatcher,
            queue,
            phase,
            started: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> BootPhase {
        *self.phase.borrow()
    }

    /// Receiver notified on every phase transition.
    pub fn subscribe_phase(&self) -> watch::Receiver<BootPhase> {
        self.phase.subscribe()
    }

    /// Resolves once the sequence reaches [`BootPhase::Done`].
    pub async fn wait_until_done(&self) {
        let mut phases = self.subscribe_phase();
        // The sender lives as long as `self`, so this only ends on Done.
        let _ = phases.wait_for(|phase| *phase == BootPhase::Done).await;
    }

    /// Runs the boot sequence. Only the first call does anything; later
    /// calls log a warning and return `None`.
    pub async fn boot(&self) -> Option<BootReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("⚠️ Boot sequence already started, ignoring");
            return None;
        }

        let started = Instant::now();
        let components = self.context.components();
        info!("🚀 Starting boot sequence ({} entries queued)", self.queue.len());

        info!("Phase 1: Running 'before' boot entries");
        let before = self.queue.drain(Bucket::Before, components).await;

        info!("Phase 2: Activating event subscriptions");
        let subscriptions = self.dispatcher.start();
        self.enter(BootPhase::DrainingAfter);

        info!("Phase 3: Running 'after' boot entries");
        let after = self.queue.drain(Bucket::After, components).await;
        self.enter(BootPhase::DrainingAfterBootstrap);

        info!("Phase 4: Running 'afterBootstrap' boot entries");
        let after_bootstrap = self.queue.drain(Bucket::AfterBootstrap, components).await;
        self.enter(BootPhase::Done);

        let report = BootReport {
            buckets: vec![before, after, after_bootstrap],
            subscriptions,
            elapsed: started.elapsed(),
        };

        if report.is_clean() {
            info!(
                "✅ Boot complete in {:?}: {} entries run, {} subscriptions",
                report.elapsed,
                report.entries_run(),
                report.subscriptions
            );
        } else {
            warn!(
                "⚠️ Boot complete in {:?} with problems: {:?}",
                report.elapsed, report.buckets
            );
        }

        Some(report)
    }

    fn enter(&self, phase: BootPhase) {
        self.phase.send_replace(phase);
        info!("Boot phase: {}", phase);
    }
}
