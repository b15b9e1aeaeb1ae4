//! # Keystone Event System
//!
//! Event registration and dispatch for the Keystone game server framework.
//!
//! Components declare which events they handle by adding [`EventBinding`]s to
//! the [`EventRegistry`]. Nothing is subscribed at that point. When the boot
//! sequence reaches the dispatcher, [`EventDispatcher::start`] turns the
//! registry into live subscriptions on the host [`Platform`]: one per distinct
//! `(channel, event name)` pair, multiplexed across every binding sharing it.
//!
//! ## Channels
//!
//! - **Generic** (`on`, `once`, `onClient`, `onceClient`, `onServer`,
//!   `onceServer`, `onGui`): arguments are forwarded unchanged to every
//!   instance registered under the binding's owner.
//! - **Region** (`entityEnterRegion`, `entityLeaveRegion`): filtered by
//!   col-shape type, col-shape name and entity type, in that order.
//! - **Meta** (`metaChange`, `streamedMetaChange`): filtered by entity type
//!   and meta key.
//!
//! ## Failure isolation
//!
//! A binding whose owner cannot be resolved is skipped; a method that returns
//! an error or panics is logged. Neither stops the other handlers of the same
//! event.
//!
//! ## Example
//!
//! ```rust
//! use keystone_event_system::*;
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! # async fn demo() {
//! let platform = Arc::new(LocalPlatform::new());
//! let context = Arc::new(FrameworkContext::new(platform));
//!
//! context.components().register_value("Greeter", Greeter);
//! context.registry().add(
//!     ChannelType::OnClient,
//!     Some("hello"),
//!     "Greeter",
//!     EventMethod::sync("hello", |_: &Greeter, payload| {
//!         let _name: String = payload.args()?.get(0)?;
//!         Ok(())
//!     }),
//!     None,
//! );
//!
//! let dispatcher = EventDispatcher::new(context.clone());
//! dispatcher.start();
//! # }
//! ```

pub mod components;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod local;
pub mod payload;
pub mod platform;
pub mod registry;
pub mod service;
pub mod timers;
pub mod types;

pub use components::{ComponentRegistrar, Instance, Strategy};
pub use context::FrameworkContext;
pub use dispatcher::{DispatcherStats, EventDispatcher};
pub use error::{HandlerError, ResolveError};
pub use local::{LocalPlatform, OutboundMessage};
pub use payload::{EventArgs, EventPayload, MetaChange};
pub use platform::{
    raw_events, Outbound, Platform, SubscriptionId, TransportCallback, TransportChannel,
};
pub use registry::{EventBinding, EventMethod, EventRegistry, MethodFuture};
pub use service::{EventService, ListenerHandle};
pub use timers::{TimerHandle, TimerService};
pub use types::{
    BoundingRegion, ChannelType, ColShapeRef, EntityKind, EntityRef, MatchOptions, Vector3,
};
