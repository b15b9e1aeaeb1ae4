//! # Boot Queue
//!
//! Three ordered buckets of deferred startup actions. Each entry names an
//! owner component and a method; the component is resolved when the entry
//! runs, not when it is queued, so lazily constructed singletons are only
//! built if their boot step actually executes.
//!
//! Entries in a bucket run strictly one after another in registration order.
//! An entry with a poll interval is awaited in bounded steps: once the bound
//! is exceeded the queue logs a warning and moves on, leaving the entry to
//! finish in the background.

use crate::config::BootConfig;
use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use futures::FutureExt;
use keystone_event_system::{ComponentRegistrar, HandlerError, Instance, ResolveError};
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Boot phase an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Bucket {
    /// Runs before any event subscription exists
    Before,
    /// Runs once every subscription is live
    After,
    /// Runs last
    AfterBootstrap,
}

impl Bucket {
    /// Drain order.
    pub const ORDER: [Bucket; 3] = [Bucket::Before, Bucket::After, Bucket::AfterBootstrap];

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Before => "before",
            Bucket::After => "after",
            Bucket::AfterBootstrap => "afterBootstrap",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Boot methods
// ============================================================================

/// Future returned by a boot method.
pub type BootFuture = BoxFuture<'static, Result<(), HandlerError>>;

type BootFn = dyn Fn(Instance) -> BootFuture + Send + Sync;

/// Signal handed to boot methods that report completion themselves.
///
/// Dropping it without calling [`done`](Self::done) or [`fail`](Self::fail)
/// counts as a failure of the entry.
#[derive(Debug)]
pub struct Completion {
    sender: oneshot::Sender<Result<(), HandlerError>>,
}

impl Completion {
    pub fn done(self) {
        let _ = self.sender.send(Ok(()));
    }

    pub fn fail(self, error: HandlerError) {
        let _ = self.sender.send(Err(error));
    }
}

/// A named startup method on a component.
#[derive(Clone)]
pub struct BootMethod {
    name: Arc<str>,
    call: Arc<BootFn>,
}

impl fmt::Debug for BootMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BootMethod").field(&self.name).finish()
    }
}

impl BootMethod {
    /// An async startup method; the entry completes when the future does.
    pub fn new<C, F, Fut>(name: &str, method: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let method_name: Arc<str> = Arc::from(name);
        let label = method_name.clone();
        Self {
            name: method_name,
            call: Arc::new(move |instance: Instance| -> BootFuture {
                match instance.downcast::<C>() {
                    Ok(component) => method(component).boxed(),
                    Err(_) => futures::future::ready(Err(HandlerError::Resolve(
                        ResolveError::TypeMismatch {
                            name: label.to_string(),
                            expected: type_name::<C>(),
                        },
                    )))
                    .boxed(),
                }
            }),
        }
    }

    /// A synchronous startup method.
    pub fn sync<C, F>(name: &str, method: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(&C) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let method = Arc::new(method);
        Self::new(name, move |component: Arc<C>| {
            let method = method.clone();
            async move { method(component.as_ref()) }
        })
    }

    /// A startup method that signals completion through a [`Completion`],
    /// possibly from another task.
    pub fn with_completion<C, F>(name: &str, method: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(Arc<C>, Completion) + Send + Sync + 'static,
    {
        let method = Arc::new(method);
        Self::new(name, move |component: Arc<C>| {
            let method = method.clone();
            async move {
                let (sender, receiver) = oneshot::channel();
                method(component, Completion { sender });
                receiver.await.unwrap_or_else(|_| {
                    Err(HandlerError::execution(
                        "completion dropped without being signalled",
                    ))
                })
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the method against `instance`. Panics, at call time or while
    /// the future runs, surface as [`HandlerError::Panicked`].
    pub fn invoke(&self, instance: Instance) -> BootFuture {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.call)(instance))) {
            Ok(future) => future,
            Err(panic) => return futures::future::ready(Err(HandlerError::from_panic(panic))).boxed(),
        };

        AssertUnwindSafe(future)
            .catch_unwind()
            .map(|result| result.unwrap_or_else(|panic| Err(HandlerError::from_panic(panic))))
            .boxed()
    }
}

/// One queued startup action.
#[derive(Debug, Clone)]
pub struct BootEntry {
    bucket: Bucket,
    owner: String,
    method: BootMethod,
    poll_interval: Option<Duration>,
}

impl BootEntry {
    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn method_name(&self) -> &str {
        self.method.name()
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }
}

/// What happened to the entries of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketReport {
    pub bucket: Bucket,
    /// Entries that completed successfully
    pub run: usize,
    /// Entries whose method returned an error or panicked
    pub failed: usize,
    /// Entries whose owner could not be resolved
    pub skipped: usize,
    /// Entries still running when their readiness bound ran out
    pub timed_out: usize,
}

impl BucketReport {
    fn new(bucket: Bucket) -> Self {
        Self {
            bucket,
            run: 0,
            failed: 0,
            skipped: 0,
            timed_out: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.run + self.failed + self.skipped + self.timed_out
    }
}

enum EntryOutcome {
    Finished(Result<(), HandlerError>),
    TimedOut,
}

// ============================================================================
// Queue
// ============================================================================

/// Shortest readiness poll period; zero intervals are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Deferred startup actions, drained once per bucket.
#[derive(Default)]
pub struct BootQueue {
    config: BootConfig,
    buckets: DashMap<Bucket, Vec<BootEntry>>,
    drained: DashSet<Bucket>,
}

impl fmt::Debug for BootQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootQueue")
            .field("config", &self.config)
            .field("pending", &self.len())
            .finish()
    }
}

impl BootQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BootConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Appends an entry to `bucket`. Returns `false`, and drops the entry,
    /// if the bucket has already started draining.
    pub fn add(
        &self,
        bucket: Bucket,
        owner: &str,
        method: BootMethod,
        poll_interval: Option<Duration>,
    ) -> bool {
        // The bucket slot is held while checking the drained set so a
        // concurrent drain either sees this entry or rejects it.
        let mut entries = self.buckets.entry(bucket).or_default();
        if self.drained.contains(&bucket) {
            warn!(
                "⚠️ Boot bucket {} already drained, {}::{} will never run",
                bucket,
                owner,
                method.name()
            );
            return false;
        }

        let mut poll_interval = poll_interval.or(self.config.default_poll_interval());
        if poll_interval.is_some_and(|period| period.is_zero()) {
            warn!(
                "⚠️ Zero poll interval for {}::{}, using {:?}",
                owner,
                method.name(),
                MIN_POLL_INTERVAL
            );
            poll_interval = Some(MIN_POLL_INTERVAL);
        }

        debug!("📝 Queued {}::{} in boot bucket {}", owner, method.name(), bucket);
        entries.push(BootEntry {
            bucket,
            owner: owner.to_string(),
            method,
            poll_interval,
        });
        true
    }

    pub fn before(&self, owner: &str, method: BootMethod) -> bool {
        self.add(Bucket::Before, owner, method, None)
    }

    pub fn after(&self, owner: &str, method: BootMethod) -> bool {
        self.add(Bucket::After, owner, method, None)
    }

    pub fn after_bootstrap(&self, owner: &str, method: BootMethod) -> bool {
        self.add(Bucket::AfterBootstrap, owner, method, None)
    }

    /// Entries waiting in `bucket`.
    pub fn pending(&self, bucket: Bucket) -> usize {
        self.buckets
            .get(&bucket)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Entries waiting across every bucket.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_drained(&self, bucket: Bucket) -> bool {
        self.drained.contains(&bucket)
    }

    /// Runs every entry of `bucket` in registration order, each to completion
    /// (or to its readiness bound) before the next starts.
    ///
    /// A bucket drains at most once; later calls report nothing.
    pub async fn drain(&self, bucket: Bucket, components: &ComponentRegistrar) -> BucketReport {
        let mut report = BucketReport::new(bucket);

        if !self.drained.insert(bucket) {
            warn!("⚠️ Boot bucket {} was already drained", bucket);
            return report;
        }

        let entries = self
            .buckets
            .remove(&bucket)
            .map(|(_, entries)| entries)
            .unwrap_or_default();

        info!("🚀 Draining boot bucket {} ({} entries)", bucket, entries.len());

        for entry in entries {
            let instance = match components.resolve_one(&entry.owner) {
                Ok(instance) => instance,
                Err(e) => {
                    error!(
                        "❌ Skipping boot entry {}::{}: {}",
                        entry.owner,
                        entry.method_name(),
                        e
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            match self.run_entry(&entry, instance).await {
                EntryOutcome::Finished(Ok(())) => {
                    debug!("✅ Boot entry {}::{} finished", entry.owner, entry.method_name());
                    report.run += 1;
                }
                EntryOutcome::Finished(Err(HandlerError::Resolve(e))) => {
                    error!(
                        "❌ Skipping boot entry {}::{}: {}",
                        entry.owner,
                        entry.method_name(),
                        e
                    );
                    report.skipped += 1;
                }
                EntryOutcome::Finished(Err(e)) => {
                    error!(
                        "❌ Boot entry {}::{} failed: {}",
                        entry.owner,
                        entry.method_name(),
                        e
                    );
                    report.failed += 1;
                }
                EntryOutcome::TimedOut => report.timed_out += 1,
            }
        }

        info!(
            "Boot bucket {} drained: {} run, {} failed, {} skipped, {} timed out",
            bucket, report.run, report.failed, report.skipped, report.timed_out
        );
        report
    }

    async fn run_entry(&self, entry: &BootEntry, instance: Instance) -> EntryOutcome {
        let mut future = entry.method.invoke(instance);

        let Some(period) = entry.poll_interval else {
            return EntryOutcome::Finished(future.await);
        };

        let max_polls = self.config.max_readiness_polls;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = 0u32;

        loop {
            tokio::select! {
                result = &mut future => return EntryOutcome::Finished(result),
                _ = ticker.tick() => {
                    polls += 1;
                    trace!(
                        "⏳ {}::{} not ready after {} polls",
                        entry.owner,
                        entry.method_name(),
                        polls
                    );
                    if polls >= max_polls {
                        break;
                    }
                }
            }
        }

        warn!(
            "⚠️ Boot entry {}::{} not ready after {} polls of {:?}, continuing without it",
            entry.owner,
            entry.method_name(),
            polls,
            period
        );

        let owner = entry.owner.clone();
        let method = entry.method_name().to_string();
        tokio::spawn(async move {
            match future.await {
                Ok(()) => info!("Boot entry {}::{} completed late", owner, method),
                Err(e) => error!("❌ Boot entry {}::{} failed late: {}", owner, method, e),
            }
        });

        EntryOutcome::TimedOut
    }
}
