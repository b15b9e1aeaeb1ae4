//! Runtime event API: on/once/off/emit per channel.
//!
//! Component bindings go through the registry and the dispatcher. This facade
//! is for everything else: emitting events, and attaching ad-hoc closure
//! listeners that are not owned by a component.

use crate::error::HandlerError;
use crate::payload::{EventArgs, EventPayload};
use crate::platform::{Outbound, Platform, SubscriptionId, TransportCallback, TransportChannel};
use crate::types::EntityRef;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Handle returned by the listener methods, used to detach the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerHandle {
    channel: TransportChannel,
    event_name: String,
    id: SubscriptionId,
}

impl ListenerHandle {
    pub fn channel(&self) -> TransportChannel {
        self.channel
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }
}

/// Event facade over the platform. Cheap to clone.
#[derive(Clone)]
pub struct EventService {
    platform: Arc<dyn Platform>,
}

impl std::fmt::Debug for EventService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventService").finish_non_exhaustive()
    }
}

impl EventService {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    // ------------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------------

    /// Emits a server-local event, returning how many subscribers ran.
    pub async fn emit(&self, event_name: &str, args: EventArgs) -> usize {
        self.platform
            .emit(TransportChannel::Local, event_name, args.into())
            .await
    }

    /// Sends an event to one player.
    pub async fn emit_client(&self, player: EntityRef, event_name: &str, args: EventArgs) {
        self.platform
            .send(Outbound::Client(player), event_name, args)
            .await;
    }

    /// Sends an event to every connected player.
    pub async fn emit_all_clients(&self, event_name: &str, args: EventArgs) {
        self.platform
            .send(Outbound::AllClients, event_name, args)
            .await;
    }

    pub async fn emit_server(&self, event_name: &str, args: EventArgs) {
        self.platform.send(Outbound::Server, event_name, args).await;
    }

    pub async fn emit_gui(&self, event_name: &str, args: EventArgs) {
        self.platform.send(Outbound::Gui, event_name, args).await;
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    pub fn on<F, Fut>(&self, event_name: &str, listener: F) -> ListenerHandle
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.listen(TransportChannel::Local, event_name, false, listener)
    }

    pub fn once<F, Fut>(&self, event_name: &str, listener: F) -> ListenerHandle
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.listen(TransportChannel::Local, event_name, true, listener)
    }

    pub fn on_client<F, Fut>(&self, event_name: &str, listener: F) -> ListenerHandle
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.listen(TransportChannel::Client, event_name, false, listener)
    }

    pub fn once_client<F, Fut>(&self, event_name: &str, listener: F) -> ListenerHandle
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.listen(TransportChannel::Client, event_name, true, listener)
    }

    pub fn on_server<F, Fut>(&self, event_name: &str, listener: F) -> ListenerHandle
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.listen(TransportChannel::Server, event_name, false, listener)
    }

    pub fn on_gui<F, Fut>(&self, event_name: &str, listener: F) -> ListenerHandle
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.listen(TransportChannel::Gui, event_name, false, listener)
    }

    /// Detaches a listener. Returns `false` if it was already gone.
    pub fn off(&self, handle: &ListenerHandle) -> bool {
        self.platform
            .unsubscribe(handle.channel, &handle.event_name, handle.id)
    }

    fn listen<F, Fut>(
        &self,
        channel: TransportChannel,
        event_name: &str,
        once: bool,
        listener: F,
    ) -> ListenerHandle
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let listener = Arc::new(listener);
        let name = event_name.to_string();
        let callback: TransportCallback = Arc::new(move |payload: EventPayload| {
            let listener = listener.clone();
            let name = name.clone();
            async move {
                let args = match payload {
                    EventPayload::Args(args) => args,
                    other => {
                        warn!("⚠️ Listener for {} ignored a {} payload", name, other.kind());
                        return;
                    }
                };
                if let Err(e) = listener(args).await {
                    error!("❌ Listener for {} failed: {}", name, e);
                }
            }
            .boxed()
        });

        let id = if once {
            self.platform.subscribe_once(channel, event_name, callback)
        } else {
            self.platform.subscribe(channel, event_name, callback)
        };
        debug!("👂 Listening for {}:{}", channel, event_name);

        ListenerHandle {
            channel,
            event_name: event_name.to_string(),
            id,
        }
    }
}
