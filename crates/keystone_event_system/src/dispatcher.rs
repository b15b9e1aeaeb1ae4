//! # Event Dispatcher
//!
//! Bridges the declarative [`EventRegistry`] to live transport subscriptions.
//!
//! [`EventDispatcher::start`] creates exactly one subscription per distinct
//! `(channel, event name)` pair in the registry. The subscription callback
//! looks the pair's bindings up again on every delivery, filters them with
//! their match options, resolves every instance registered under each
//! binding's owner and invokes the bound method on each one, sequentially.
//!
//! Failures never leave the dispatch loop: an unresolvable owner or a failing
//! method is logged and counted, and the remaining handlers still run.

use crate::context::FrameworkContext;
use crate::error::HandlerError;
use crate::payload::EventPayload;
use crate::platform::{SubscriptionId, TransportCallback};
use crate::registry::EventBinding;
use crate::types::ChannelType;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace};

type SubscriptionKey = (ChannelType, String);

/// Counters maintained by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Live transport subscriptions
    pub subscriptions: usize,
    /// Transport deliveries handled
    pub events_dispatched: u64,
    /// Component method invocations that completed successfully
    pub handlers_invoked: u64,
    /// Component method invocations that returned an error or panicked
    pub handler_failures: u64,
    /// Bindings skipped because their owner could not be resolved
    pub resolution_failures: u64,
}

#[derive(Default)]
struct DispatchOutcome {
    invoked: u64,
    failed: u64,
    unresolved: u64,
}

struct DispatcherInner {
    context: Arc<FrameworkContext>,
    subscriptions: DashMap<SubscriptionKey, SubscriptionId>,
    active: AtomicBool,
    stats: RwLock<DispatcherStats>,
}

/// Routes transport events to bound component methods. Cheap to clone.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("active", &self.is_active())
            .field("subscriptions", &self.active_subscriptions())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new(context: Arc<FrameworkContext>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                context,
                subscriptions: DashMap::new(),
                active: AtomicBool::new(false),
                stats: RwLock::new(DispatcherStats::default()),
            }),
        }
    }

    pub fn context(&self) -> &Arc<FrameworkContext> {
        &self.inner.context
    }

    /// Subscribes every registered `(channel, event name)` pair that has no
    /// live subscription yet, returning how many subscriptions were created.
    ///
    /// Calling it again only picks up pairs registered since the last call.
    pub fn start(&self) -> usize {
        let registry = self.inner.context.registry();
        let mut created = 0;

        for channel in ChannelType::ALL {
            for event_name in registry.event_names(channel) {
                if self.ensure_subscription(channel, &event_name) {
                    created += 1;
                }
            }
        }

        self.inner.active.store(true, Ordering::SeqCst);
        info!(
            "🎧 Event dispatcher started: {} new subscriptions ({} live)",
            created,
            self.active_subscriptions()
        );
        created
    }

    /// Records a binding at runtime. Once the dispatcher is started the pair
    /// is subscribed immediately.
    pub fn bind(&self, binding: EventBinding) {
        let channel = binding.channel();
        let event_name = binding.event_name().to_string();
        self.inner.context.registry().insert(binding);

        if self.is_active() {
            self.ensure_subscription(channel, &event_name);
        }
    }

    /// Removes every binding of a pair and tears its subscription down.
    /// Returns the number of bindings removed.
    pub fn unsubscribe(&self, channel: ChannelType, event_name: &str) -> usize {
        let removed = self
            .inner
            .context
            .registry()
            .remove_event(channel, event_name);
        self.release_if_unbound(channel, event_name);
        removed
    }

    /// Removes the bindings of a pair that call `owner::method`. The
    /// subscription is torn down once no binding remains for the pair.
    pub fn unsubscribe_method(
        &self,
        channel: ChannelType,
        event_name: &str,
        owner: &str,
        method: &str,
    ) -> usize {
        let removed = self
            .inner
            .context
            .registry()
            .remove_method(channel, event_name, owner, method);
        self.release_if_unbound(channel, event_name);
        removed
    }

    /// Removes every live subscription. Bindings stay in the registry, so a
    /// later [`start`](Self::start) re-creates them.
    pub fn stop(&self) -> usize {
        let keys: Vec<SubscriptionKey> = self
            .inner
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let released = keys
            .into_iter()
            .filter(|(channel, event_name)| self.release(*channel, event_name))
            .count();

        self.inner.active.store(false, Ordering::SeqCst);
        info!("🛑 Event dispatcher stopped: {} subscriptions released", released);
        released
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn is_subscribed(&self, channel: ChannelType, event_name: &str) -> bool {
        self.inner
            .subscriptions
            .contains_key(&(channel, event_name.to_string()))
    }

    pub async fn stats(&self) -> DispatcherStats {
        let mut stats = self.inner.stats.read().await.clone();
        stats.subscriptions = self.active_subscriptions();
        stats
    }

    // ------------------------------------------------------------------------
    // Subscription bookkeeping
    // ------------------------------------------------------------------------

    fn ensure_subscription(&self, channel: ChannelType, event_name: &str) -> bool {
        match self.inner.subscriptions.entry((channel, event_name.to_string())) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(self.subscribe(channel, event_name));
                true
            }
        }
    }

    fn subscribe(&self, channel: ChannelType, event_name: &str) -> SubscriptionId {
        // The callback holds a weak reference: the platform outlives the
        // dispatcher's subscriptions, not the other way round.
        let inner: Weak<DispatcherInner> = Arc::downgrade(&self.inner);
        let name = event_name.to_string();
        let callback: TransportCallback = Arc::new(move |payload: EventPayload| {
            let inner = inner.clone();
            let name = name.clone();
            async move {
                if let Some(inner) = inner.upgrade() {
                    inner.dispatch(channel, &name, payload).await;
                }
            }
            .boxed()
        });

        let platform = self.inner.context.platform();
        let transport = channel.transport();
        let id = if channel.is_once() {
            platform.subscribe_once(transport, event_name, callback)
        } else {
            platform.subscribe(transport, event_name, callback)
        };

        debug!("🔗 Subscribed {}:{} on {} transport", channel, event_name, transport);
        id
    }

    fn release_if_unbound(&self, channel: ChannelType, event_name: &str) {
        if self
            .inner
            .context
            .registry()
            .bindings_for(channel, event_name)
            .is_empty()
        {
            self.release(channel, event_name);
        }
    }

    fn release(&self, channel: ChannelType, event_name: &str) -> bool {
        let Some((_, id)) = self
            .inner
            .subscriptions
            .remove(&(channel, event_name.to_string()))
        else {
            return false;
        };

        self.inner
            .context
            .platform()
            .unsubscribe(channel.transport(), event_name, id);
        debug!("🔌 Unsubscribed {}:{}", channel, event_name);
        true
    }
}

impl DispatcherInner {
    async fn dispatch(&self, channel: ChannelType, event_name: &str, payload: EventPayload) {
        let registry = self.context.registry();
        let bindings = registry.bindings_for(channel, event_name);

        // The transport already dropped a once-subscription; the bindings go
        // too so a later start() cannot bring them back.
        if channel.is_once() {
            self.subscriptions.remove(&(channel, event_name.to_string()));
            registry.remove_event(channel, event_name);
        }

        let matching: Vec<&EventBinding> = bindings
            .iter()
            .filter(|binding| binding.accepts(&payload))
            .collect();

        trace!(
            "📤 Dispatching {}:{} to {} of {} bindings",
            channel,
            event_name,
            matching.len(),
            bindings.len()
        );

        let mut outcome = DispatchOutcome::default();
        for binding in matching {
            self.invoke_binding(binding, &payload, &mut outcome).await;
        }

        let mut stats = self.stats.write().await;
        stats.events_dispatched += 1;
        stats.handlers_invoked += outcome.invoked;
        stats.handler_failures += outcome.failed;
        stats.resolution_failures += outcome.unresolved;
    }

    async fn invoke_binding(
        &self,
        binding: &EventBinding,
        payload: &EventPayload,
        outcome: &mut DispatchOutcome,
    ) {
        let instances = match self.context.components().resolve_all(binding.owner()) {
            Ok(instances) => instances,
            Err(e) => {
                error!(
                    "❌ Skipping {}:{} -> {}::{}: {}",
                    binding.channel(),
                    binding.event_name(),
                    binding.owner(),
                    binding.method_name(),
                    e
                );
                outcome.unresolved += 1;
                return;
            }
        };

        for instance in instances {
            match binding.method().invoke(instance, payload.clone()).await {
                Ok(()) => outcome.invoked += 1,
                Err(HandlerError::Resolve(e)) => {
                    error!(
                        "❌ Skipping {}:{} -> {}::{}: {}",
                        binding.channel(),
                        binding.event_name(),
                        binding.owner(),
                        binding.method_name(),
                        e
                    );
                    outcome.unresolved += 1;
                }
                Err(e) => {
                    error!(
                        "❌ Handler {}::{} failed on {}:{}: {}",
                        binding.owner(),
                        binding.method_name(),
                        binding.channel(),
                        binding.event_name(),
                        e
                    );
                    outcome.failed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalPlatform;
    use crate::payload::EventArgs;
    use crate::platform::{raw_events, Platform, TransportChannel};
    use crate::registry::EventMethod;
    use crate::types::{BoundingRegion, ColShapeRef, EntityKind, EntityRef, MatchOptions, Vector3};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        hits: AtomicUsize,
    }

    impl Counter {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    fn count(name: &str) -> EventMethod {
        EventMethod::sync(name, |counter: &Counter, _| {
            counter.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn setup() -> (Arc<LocalPlatform>, Arc<FrameworkContext>, EventDispatcher) {
        let platform = Arc::new(LocalPlatform::new());
        let context = Arc::new(FrameworkContext::new(platform.clone()));
        let dispatcher = EventDispatcher::new(context.clone());
        (platform, context, dispatcher)
    }

    fn counter(context: &FrameworkContext, name: &str) -> Arc<Counter> {
        context.components().register_value(name, Counter::default());
        context
            .components()
            .resolve::<Counter>(name)
            .expect("counter registered")
    }

    fn region_event(shape_type: &str, name: &str, kind: EntityKind) -> EventPayload {
        EventPayload::Region {
            shape: Arc::new(ColShapeRef {
                id: 1,
                shape_type: shape_type.to_string(),
                name: Some(name.to_string()),
                region: BoundingRegion::Sphere {
                    center: Vector3::default(),
                    radius: 5.0,
                },
            }),
            entity: EntityRef::new(7, kind),
        }
    }

    #[tokio::test]
    async fn start_creates_one_subscription_per_pair() {
        let (platform, context, dispatcher) = setup();
        let registry = context.registry();
        registry.add(ChannelType::OnClient, Some("chat"), "A", count("a"), None);
        registry.add(ChannelType::OnClient, Some("chat"), "B", count("b"), None);
        registry.add(ChannelType::OnClient, Some("chat"), "A", count("a"), None);
        registry.add(ChannelType::OnClient, Some("move"), "A", count("a"), None);
        registry.add(ChannelType::On, Some("chat"), "A", count("a"), None);

        assert_eq!(dispatcher.start(), 3);
        assert_eq!(platform.total_subscriptions(), 3);
        assert_eq!(platform.subscriber_count(TransportChannel::Client, "chat"), 1);

        assert_eq!(dispatcher.start(), 0);
        assert_eq!(platform.total_subscriptions(), 3);
        assert_eq!(dispatcher.stats().await.subscriptions, 3);
    }

    #[tokio::test]
    async fn region_bindings_filter_by_type_then_name() {
        let (platform, context, dispatcher) = setup();
        let zone = counter(&context, "Zone");
        context.registry().add(
            ChannelType::EntityEnterRegion,
            None,
            "Zone",
            count("onEnter"),
            Some(MatchOptions::region("T1").named("zoneA")),
        );
        dispatcher.start();

        let enter = raw_events::ENTITY_ENTER_COLSHAPE;
        platform
            .emit(TransportChannel::Runtime, enter, region_event("T1", "zoneA", EntityKind::Player))
            .await;
        assert_eq!(zone.hits(), 1);

        platform
            .emit(TransportChannel::Runtime, enter, region_event("T2", "zoneA", EntityKind::Player))
            .await;
        platform
            .emit(TransportChannel::Runtime, enter, region_event("T1", "zoneB", EntityKind::Player))
            .await;
        assert_eq!(zone.hits(), 1);
    }

    #[tokio::test]
    async fn region_bindings_respect_entity_kind_and_owner() {
        let (platform, context, dispatcher) = setup();
        let garage = counter(&context, "Garage");
        let lobby = counter(&context, "Lobby");
        context.registry().add(
            ChannelType::EntityEnterRegion,
            None,
            "Garage",
            count("onEnter"),
            Some(MatchOptions::region("garage").for_entity(EntityKind::Vehicle)),
        );
        context.registry().add(
            ChannelType::EntityEnterRegion,
            None,
            "Lobby",
            count("onEnter"),
            Some(MatchOptions::region("garage")),
        );
        dispatcher.start();

        let enter = raw_events::ENTITY_ENTER_COLSHAPE;
        platform
            .emit(TransportChannel::Runtime, enter, region_event("garage", "g1", EntityKind::Player))
            .await;
        platform
            .emit(TransportChannel::Runtime, enter, region_event("garage", "g1", EntityKind::Vehicle))
            .await;

        assert_eq!(garage.hits(), 1);
        assert_eq!(lobby.hits(), 2);
    }

    #[tokio::test]
    async fn meta_bindings_filter_by_entity_kind_and_key() {
        let (platform, context, dispatcher) = setup();
        let fuel = counter(&context, "FuelWatcher");
        context.registry().add(
            ChannelType::MetaChange,
            None,
            "FuelWatcher",
            count("onFuel"),
            Some(MatchOptions::meta(EntityKind::Vehicle).with_key("fuel")),
        );
        dispatcher.start();

        let car = platform.spawn_entity(EntityKind::Vehicle, Vector3::default()).await;
        let player = platform.spawn_entity(EntityKind::Player, Vector3::default()).await;

        platform.set_synced_meta(car, "fuel", json!(80)).await;
        platform.set_synced_meta(car, "color", json!("red")).await;
        platform.set_synced_meta(player, "fuel", json!(10)).await;
        // Stream-synced meta is a different channel
        platform.set_stream_synced_meta(car, "fuel", json!(70)).await;

        assert_eq!(fuel.hits(), 1);
    }

    #[tokio::test]
    async fn once_bindings_fire_a_single_time() {
        let (platform, context, dispatcher) = setup();
        let round = counter(&context, "Round");
        context
            .registry()
            .add(ChannelType::Once, Some("roundStart"), "Round", count("begin"), None);
        dispatcher.start();

        let events = context.events();
        events.emit("roundStart", EventArgs::empty()).await;
        events.emit("roundStart", EventArgs::empty()).await;
        assert_eq!(round.hits(), 1);

        assert_eq!(dispatcher.start(), 0);
        events.emit("roundStart", EventArgs::empty()).await;
        assert_eq!(round.hits(), 1);

        assert!(context.registry().entries_for(ChannelType::Once).is_empty());
        assert!(!dispatcher.is_subscribed(ChannelType::Once, "roundStart"));
        assert_eq!(platform.total_subscriptions(), 0);
    }

    #[tokio::test]
    async fn failing_handlers_do_not_block_siblings() {
        let (platform, context, dispatcher) = setup();
        let shop = counter(&context, "Shop");
        let registry = context.registry();
        registry.add(
            ChannelType::OnClient,
            Some("buy"),
            "Shop",
            EventMethod::sync("reject", |_: &Counter, _| {
                Err(HandlerError::execution("out of stock"))
            }),
            None,
        );
        registry.add(
            ChannelType::OnClient,
            Some("buy"),
            "Shop",
            EventMethod::sync("explode", |_: &Counter, _| panic!("corrupt cart")),
            None,
        );
        registry.add(ChannelType::OnClient, Some("buy"), "Shop", count("record"), None);
        dispatcher.start();

        platform
            .emit(TransportChannel::Client, "buy", EventArgs::empty().into())
            .await;

        assert_eq!(shop.hits(), 1);
        let stats = dispatcher.stats().await;
        assert_eq!(stats.handler_failures, 2);
        assert_eq!(stats.handlers_invoked, 1);
    }

    #[tokio::test]
    async fn unresolvable_owners_are_skipped() {
        let (platform, context, dispatcher) = setup();
        let audit = counter(&context, "Audit");
        context.components().register_value("Wrong", 42u32);
        let registry = context.registry();
        registry.add(ChannelType::OnServer, Some("sync"), "Ghost", count("onSync"), None);
        registry.add(ChannelType::OnServer, Some("sync"), "Wrong", count("onSync"), None);
        registry.add(ChannelType::OnServer, Some("sync"), "Audit", count("onSync"), None);
        dispatcher.start();

        platform
            .emit(TransportChannel::Server, "sync", EventArgs::empty().into())
            .await;

        assert_eq!(audit.hits(), 1);
        assert_eq!(dispatcher.stats().await.resolution_failures, 2);
    }

    #[tokio::test]
    async fn every_registered_instance_is_invoked() {
        let (_, context, dispatcher) = setup();
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        context.components().add_instance("Listener", first.clone());
        context.components().add_instance("Listener", second.clone());
        context
            .registry()
            .add(ChannelType::On, Some("tick"), "Listener", count("onTick"), None);
        dispatcher.start();

        context.events().emit("tick", EventArgs::empty()).await;

        assert_eq!(first.hits(), 1);
        assert_eq!(second.hits(), 1);
    }

    #[tokio::test]
    async fn arguments_are_forwarded_unchanged() {
        let (platform, context, dispatcher) = setup();
        let chat = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        context.components().register_value("Chat", chat.clone());
        context.registry().add(
            ChannelType::OnClient,
            Some("say"),
            "Chat",
            EventMethod::sync("onSay", |log: &Arc<std::sync::Mutex<Vec<String>>>, payload| {
                let args = payload.args()?;
                let player = args
                    .source()
                    .ok_or_else(|| HandlerError::InvalidPayload("no sender".into()))?;
                let text: String = args.get(0)?;
                log.lock().unwrap().push(format!("{}: {}", player, text));
                Ok(())
            }),
            None,
        );
        dispatcher.start();

        let player = EntityRef::new(3, EntityKind::Player);
        platform
            .emit(
                TransportChannel::Client,
                "say",
                EventArgs::from_player(player, vec![json!("hello")]).into(),
            )
            .await;

        assert_eq!(*chat.lock().unwrap(), vec!["player#3: hello".to_string()]);
    }

    #[tokio::test]
    async fn unsubscribe_tears_down_unbound_pairs() {
        let (platform, context, dispatcher) = setup();
        let menu = counter(&context, "Menu");
        let hud = counter(&context, "Hud");
        let registry = context.registry();
        registry.add(ChannelType::OnGui, Some("close"), "Menu", count("onClose"), None);
        registry.add(ChannelType::OnGui, Some("close"), "Hud", count("onClose"), None);
        registry.add(ChannelType::OnGui, Some("open"), "Menu", count("onOpen"), None);
        dispatcher.start();

        assert_eq!(
            dispatcher.unsubscribe_method(ChannelType::OnGui, "close", "Menu", "onClose"),
            1
        );
        assert!(dispatcher.is_subscribed(ChannelType::OnGui, "close"));

        platform
            .emit(TransportChannel::Gui, "close", EventArgs::empty().into())
            .await;
        assert_eq!(menu.hits(), 0);
        assert_eq!(hud.hits(), 1);

        assert_eq!(
            dispatcher.unsubscribe_method(ChannelType::OnGui, "close", "Hud", "onClose"),
            1
        );
        assert!(!dispatcher.is_subscribed(ChannelType::OnGui, "close"));
        assert_eq!(platform.subscriber_count(TransportChannel::Gui, "close"), 0);

        assert_eq!(dispatcher.unsubscribe(ChannelType::OnGui, "open"), 1);
        assert_eq!(platform.total_subscriptions(), 0);
    }

    #[tokio::test]
    async fn runtime_bindings_and_stop() {
        let (platform, context, dispatcher) = setup();
        let late = counter(&context, "Late");
        dispatcher.start();

        dispatcher.bind(EventBinding::new(
            ChannelType::On,
            Some("lateEvent"),
            "Late",
            count("onLate"),
            None,
        ));
        context.events().emit("lateEvent", EventArgs::empty()).await;
        assert_eq!(late.hits(), 1);

        assert_eq!(dispatcher.stop(), 1);
        assert!(!dispatcher.is_active());
        assert_eq!(platform.total_subscriptions(), 0);

        // Bindings survive a stop
        assert_eq!(dispatcher.start(), 1);
    }
}
