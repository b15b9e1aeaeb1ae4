//! # Keystone Loader
//!
//! Boot sequencing for the Keystone framework.
//!
//! Startup work is queued into three buckets (`before`, `after`,
//! `afterBootstrap`) while modules are configured. [`Loader::boot`] then
//! drains `before`, activates the event dispatcher, drains `after` and
//! finally `afterBootstrap`, each step finishing before the next starts.
//! Components that must not see live events initialise in `before`; anything
//! that needs subscriptions in place goes in `after`.

pub mod config;
pub mod loader;
pub mod module;
pub mod queue;

pub use config::BootConfig;
pub use loader::{BootPhase, BootReport, Loader};
pub use module::{App, AppBuilder, Module, ModuleBinder};
pub use queue::{BootEntry, BootFuture, BootMethod, BootQueue, Bucket, BucketReport, Completion};
