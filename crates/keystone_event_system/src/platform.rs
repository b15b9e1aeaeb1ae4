//! # Platform Boundary
//!
//! The host game runtime as seen by the framework: channel-qualified
//! publish/subscribe, outbound messaging and entity meta lookup. Everything
//! behind this trait (network transport, entity simulation, col-shape
//! tracking) belongs to the runtime.
//!
//! [`LocalPlatform`](crate::local::LocalPlatform) is the in-process
//! implementation used by tests and the sandbox server.

use crate::payload::{EventArgs, EventPayload};
use crate::types::EntityRef;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Names of the raw runtime events behind the specialized channels.
pub mod raw_events {
    pub const ENTITY_ENTER_COLSHAPE: &str = "entityEnterColshape";
    pub const ENTITY_LEAVE_COLSHAPE: &str = "entityLeaveColshape";
    pub const SYNCED_META_CHANGE: &str = "syncedMetaChange";
    pub const STREAM_SYNCED_META_CHANGE: &str = "streamSyncedMetaChange";
}

/// Origin of inbound traffic on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportChannel {
    /// Emitted inside this process
    Local,
    /// Sent by a game client
    Client,
    /// Sent by the server side of the runtime
    Server,
    /// Raised by an embedded GUI view
    Gui,
    /// Raised by the runtime itself (col-shapes, meta)
    Runtime,
}

impl fmt::Display for TransportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportChannel::Local => "local",
            TransportChannel::Client => "client",
            TransportChannel::Server => "server",
            TransportChannel::Gui => "gui",
            TransportChannel::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// Destination of an outbound emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outbound {
    /// A single connected player
    Client(EntityRef),
    /// Every connected player
    AllClients,
    /// The server side of the runtime
    Server,
    /// The embedded GUI view
    Gui,
}

/// Identifies one live subscription on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked for every delivery on a subscription.
pub type TransportCallback = Arc<dyn Fn(EventPayload) -> BoxFuture<'static, ()> + Send + Sync>;

/// Host runtime primitives consumed by the framework.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Subscribes `callback` to `event_name` on `channel`.
    fn subscribe(
        &self,
        channel: TransportChannel,
        event_name: &str,
        callback: TransportCallback,
    ) -> SubscriptionId;

    /// Like [`subscribe`](Self::subscribe), removed after the first delivery.
    fn subscribe_once(
        &self,
        channel: TransportChannel,
        event_name: &str,
        callback: TransportCallback,
    ) -> SubscriptionId;

    /// Removes a subscription. Returns `false` if it was already gone.
    fn unsubscribe(&self, channel: TransportChannel, event_name: &str, id: SubscriptionId)
        -> bool;

    /// Delivers `payload` to every subscriber of `event_name` on `channel`,
    /// returning how many callbacks ran.
    async fn emit(&self, channel: TransportChannel, event_name: &str, payload: EventPayload)
        -> usize;

    /// Sends an event out of the process.
    async fn send(&self, target: Outbound, event_name: &str, args: EventArgs);

    /// Reads a synced meta value from an entity.
    fn meta_get(&self, entity: EntityRef, key: &str) -> Option<Value>;

    /// Reads a stream-synced meta value from an entity.
    fn stream_meta_get(&self, entity: EntityRef, key: &str) -> Option<Value>;
}
