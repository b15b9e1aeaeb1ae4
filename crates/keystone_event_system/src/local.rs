//! In-process implementation of the [`Platform`] boundary.
//!
//! `LocalPlatform` keeps subscription tables per transport channel, tracks
//! entities, col-shapes and meta stores, and raises the same raw runtime
//! events a host would: moving an entity across a col-shape boundary emits
//! enter/leave events, and writing synced meta emits a meta-change event.
//! Outbound emissions are recorded in an outbox instead of hitting a network.

use crate::payload::{EventArgs, EventPayload, MetaChange};
use crate::platform::{
    raw_events, Outbound, Platform, SubscriptionId, TransportCallback, TransportChannel,
};
use crate::types::{BoundingRegion, ColShapeRef, EntityKind, EntityRef, Vector3};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

type SubscriptionKey = (TransportChannel, String);

struct Subscriber {
    id: SubscriptionId,
    callback: TransportCallback,
    once: bool,
}

struct EntityState {
    position: Vector3,
    inside: HashSet<u32>,
}

/// A message that left the process through [`Platform::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub target: Outbound,
    pub event_name: String,
    pub args: EventArgs,
}

/// In-memory host runtime.
pub struct LocalPlatform {
    subscribers: DashMap<SubscriptionKey, Vec<Subscriber>>,
    entities: DashMap<u32, (EntityRef, EntityState)>,
    shapes: DashMap<u32, Arc<ColShapeRef>>,
    synced_meta: DashMap<(u32, String), Value>,
    stream_meta: DashMap<(u32, String), Value>,
    outbox: RwLock<Vec<OutboundMessage>>,
    next_entity_id: AtomicU32,
    next_shape_id: AtomicU32,
}

impl std::fmt::Debug for LocalPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPlatform")
            .field("subscriptions", &self.subscribers.len())
            .field("entities", &self.entities.len())
            .field("shapes", &self.shapes.len())
            .finish()
    }
}

impl Default for LocalPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPlatform {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            entities: DashMap::new(),
            shapes: DashMap::new(),
            synced_meta: DashMap::new(),
            stream_meta: DashMap::new(),
            outbox: RwLock::new(Vec::new()),
            next_entity_id: AtomicU32::new(1),
            next_shape_id: AtomicU32::new(1),
        }
    }

    fn insert_subscriber(
        &self,
        channel: TransportChannel,
        event_name: &str,
        callback: TransportCallback,
        once: bool,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscribers
            .entry((channel, event_name.to_string()))
            .or_default()
            .push(Subscriber { id, callback, once });
        trace!("Subscribed {} to {}:{}", id, channel, event_name);
        id
    }

    /// Number of live subscriptions for an event.
    pub fn subscriber_count(&self, channel: TransportChannel, event_name: &str) -> usize {
        self.subscribers
            .get(&(channel, event_name.to_string()))
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Number of live subscriptions across every event.
    pub fn total_subscriptions(&self) -> usize {
        self.subscribers.iter().map(|entry| entry.value().len()).sum()
    }

    // ------------------------------------------------------------------------
    // Entities and col-shapes
    // ------------------------------------------------------------------------

    /// Creates an entity at `position`, raising enter events for every shape
    /// that already contains it.
    pub async fn spawn_entity(&self, kind: EntityKind, position: Vector3) -> EntityRef {
        let entity = EntityRef::new(self.next_entity_id.fetch_add(1, Ordering::SeqCst), kind);
        self.entities.insert(
            entity.id,
            (
                entity,
                EntityState {
                    position,
                    inside: HashSet::new(),
                },
            ),
        );
        debug!("Spawned {} at {:?}", entity, position);
        self.set_position(entity, position).await;
        entity
    }

    /// Removes an entity, raising leave events for the shapes it occupied.
    pub async fn destroy_entity(&self, entity: EntityRef) -> bool {
        let Some((_, (_, state))) = self.entities.remove(&entity.id) else {
            return false;
        };

        self.synced_meta.retain(|(id, _), _| *id != entity.id);
        self.stream_meta.retain(|(id, _), _| *id != entity.id);

        let mut left: Vec<Arc<ColShapeRef>> = state
            .inside
            .iter()
            .filter_map(|id| self.shapes.get(id).map(|shape| shape.clone()))
            .collect();
        left.sort_by_key(|shape| shape.id);

        for shape in left {
            self.emit_region(raw_events::ENTITY_LEAVE_COLSHAPE, shape, entity)
                .await;
        }
        true
    }

    pub fn position(&self, entity: EntityRef) -> Option<Vector3> {
        self.entities
            .get(&entity.id)
            .map(|entry| entry.value().1.position)
    }

    /// Moves an entity and raises leave, then enter, events for every shape
    /// boundary it crossed.
    pub async fn set_position(&self, entity: EntityRef, position: Vector3) {
        let mut shapes: Vec<Arc<ColShapeRef>> =
            self.shapes.iter().map(|entry| entry.value().clone()).collect();
        shapes.sort_by_key(|shape| shape.id);

        let (entered, left) = {
            let Some(mut entry) = self.entities.get_mut(&entity.id) else {
                warn!("⚠️ Cannot move unknown entity {}", entity);
                return;
            };
            let state = &mut entry.value_mut().1;
            state.position = position;

            let mut entered = Vec::new();
            let mut left = Vec::new();
            for shape in shapes {
                let inside = shape.region.contains(position);
                let was_inside = state.inside.contains(&shape.id);
                if inside && !was_inside {
                    state.inside.insert(shape.id);
                    entered.push(shape);
                } else if !inside && was_inside {
                    state.inside.remove(&shape.id);
                    left.push(shape);
                }
            }
            (entered, left)
        };

        for shape in left {
            self.emit_region(raw_events::ENTITY_LEAVE_COLSHAPE, shape, entity)
                .await;
        }
        for shape in entered {
            self.emit_region(raw_events::ENTITY_ENTER_COLSHAPE, shape, entity)
                .await;
        }
    }

    /// Registers a col-shape. Entities are tested against it on their next
    /// movement.
    pub fn create_col_shape(
        &self,
        shape_type: &str,
        name: Option<&str>,
        region: BoundingRegion,
    ) -> Arc<ColShapeRef> {
        let shape = Arc::new(ColShapeRef {
            id: self.next_shape_id.fetch_add(1, Ordering::SeqCst),
            shape_type: shape_type.to_string(),
            name: name.map(str::to_string),
            region,
        });
        self.shapes.insert(shape.id, shape.clone());
        debug!(
            "Created col-shape {} ({}{})",
            shape.id,
            shape.shape_type,
            shape
                .name
                .as_deref()
                .map(|name| format!(" '{}'", name))
                .unwrap_or_default()
        );
        shape
    }

    pub fn remove_col_shape(&self, id: u32) -> bool {
        for mut entry in self.entities.iter_mut() {
            entry.value_mut().1.inside.remove(&id);
        }
        self.shapes.remove(&id).is_some()
    }

    async fn emit_region(&self, event_name: &str, shape: Arc<ColShapeRef>, entity: EntityRef) {
        self.emit(
            TransportChannel::Runtime,
            event_name,
            EventPayload::Region { shape, entity },
        )
        .await;
    }

    // ------------------------------------------------------------------------
    // Meta
    // ------------------------------------------------------------------------

    /// Writes a synced meta value and raises a meta-change event.
    pub async fn set_synced_meta(&self, entity: EntityRef, key: &str, value: Value) {
        let old_value = self
            .synced_meta
            .insert((entity.id, key.to_string()), value.clone())
            .unwrap_or(Value::Null);
        self.emit_meta(raw_events::SYNCED_META_CHANGE, entity, key, value, old_value)
            .await;
    }

    /// Writes a stream-synced meta value and raises a meta-change event.
    pub async fn set_stream_synced_meta(&self, entity: EntityRef, key: &str, value: Value) {
        let old_value = self
            .stream_meta
            .insert((entity.id, key.to_string()), value.clone())
            .unwrap_or(Value::Null);
        self.emit_meta(
            raw_events::STREAM_SYNCED_META_CHANGE,
            entity,
            key,
            value,
            old_value,
        )
        .await;
    }

    async fn emit_meta(
        &self,
        event_name: &str,
        entity: EntityRef,
        key: &str,
        value: Value,
        old_value: Value,
    ) {
        let change = MetaChange {
            entity,
            key: key.to_string(),
            value,
            old_value,
        };
        self.emit(
            TransportChannel::Runtime,
            event_name,
            EventPayload::MetaChange(Arc::new(change)),
        )
        .await;
    }

    // ------------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------------

    pub async fn outbox(&self) -> Vec<OutboundMessage> {
        self.outbox.read().await.clone()
    }

    pub async fn take_outbox(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.outbox.write().await)
    }
}

#[async_trait]
impl Platform for LocalPlatform {
    fn subscribe(
        &self,
        channel: TransportChannel,
        event_name: &str,
        callback: TransportCallback,
    ) -> SubscriptionId {
        self.insert_subscriber(channel, event_name, callback, false)
    }

    fn subscribe_once(
        &self,
        channel: TransportChannel,
        event_name: &str,
        callback: TransportCallback,
    ) -> SubscriptionId {
        self.insert_subscriber(channel, event_name, callback, true)
    }

    fn unsubscribe(
        &self,
        channel: TransportChannel,
        event_name: &str,
        id: SubscriptionId,
    ) -> bool {
        let key = (channel, event_name.to_string());
        let removed = match self.subscribers.get_mut(&key) {
            Some(mut subs) => {
                let before = subs.len();
                subs.retain(|sub| sub.id != id);
                subs.len() != before
            }
            None => false,
        };
        self.subscribers.remove_if(&key, |_, subs| subs.is_empty());
        removed
    }

    async fn emit(
        &self,
        channel: TransportChannel,
        event_name: &str,
        payload: EventPayload,
    ) -> usize {
        let key = (channel, event_name.to_string());

        // Callbacks are collected first so none of them runs under the table
        // guard; once-subscribers are dropped before delivery.
        let callbacks: Vec<TransportCallback> = match self.subscribers.get_mut(&key) {
            Some(mut subs) => {
                let callbacks = subs.iter().map(|sub| sub.callback.clone()).collect();
                subs.retain(|sub| !sub.once);
                callbacks
            }
            None => Vec::new(),
        };
        self.subscribers.remove_if(&key, |_, subs| subs.is_empty());

        if callbacks.is_empty() {
            trace!("No subscribers for {}:{}", channel, event_name);
            return 0;
        }

        for callback in &callbacks {
            callback(payload.clone()).await;
        }
        callbacks.len()
    }

    async fn send(&self, target: Outbound, event_name: &str, args: EventArgs) {
        debug!("📤 Sending {} to {:?}", event_name, target);
        self.outbox.write().await.push(OutboundMessage {
            target,
            event_name: event_name.to_string(),
            args,
        });
    }

    fn meta_get(&self, entity: EntityRef, key: &str) -> Option<Value> {
        self.synced_meta
            .get(&(entity.id, key.to_string()))
            .map(|value| value.clone())
    }

    fn stream_meta_get(&self, entity: EntityRef, key: &str) -> Option<Value> {
        self.stream_meta
            .get(&(entity.id, key.to_string()))
            .map(|value| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<EventPayload>>>, TransportCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: TransportCallback = Arc::new(move |payload| {
            sink.lock().unwrap().push(payload);
            Box::pin(async {})
        });
        (seen, callback)
    }

    #[tokio::test]
    async fn once_subscribers_fire_a_single_time() {
        let platform = LocalPlatform::new();
        let (seen, callback) = recorder();
        platform.subscribe_once(TransportChannel::Local, "ping", callback);

        assert_eq!(
            platform
                .emit(TransportChannel::Local, "ping", EventArgs::empty().into())
                .await,
            1
        );
        assert_eq!(
            platform
                .emit(TransportChannel::Local, "ping", EventArgs::empty().into())
                .await,
            0
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(platform.total_subscriptions(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_the_given_subscription() {
        let platform = LocalPlatform::new();
        let (seen, callback) = recorder();
        let first = platform.subscribe(TransportChannel::Client, "chat", callback.clone());
        platform.subscribe(TransportChannel::Client, "chat", callback);

        assert!(platform.unsubscribe(TransportChannel::Client, "chat", first));
        assert!(!platform.unsubscribe(TransportChannel::Client, "chat", first));
        assert_eq!(platform.subscriber_count(TransportChannel::Client, "chat"), 1);

        // Same name on another channel is a different event
        platform
            .emit(TransportChannel::Local, "chat", EventArgs::empty().into())
            .await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn movement_raises_enter_and_leave_events() {
        let platform = LocalPlatform::new();
        let (entered, on_enter) = recorder();
        let (left, on_leave) = recorder();
        platform.subscribe(
            TransportChannel::Runtime,
            raw_events::ENTITY_ENTER_COLSHAPE,
            on_enter,
        );
        platform.subscribe(
            TransportChannel::Runtime,
            raw_events::ENTITY_LEAVE_COLSHAPE,
            on_leave,
        );

        let zone = platform.create_col_shape(
            "spawn",
            Some("zoneA"),
            BoundingRegion::Sphere {
                center: Vector3::default(),
                radius: 10.0,
            },
        );
        let player = platform
            .spawn_entity(EntityKind::Player, Vector3::new(100.0, 0.0, 0.0))
            .await;
        assert!(entered.lock().unwrap().is_empty());

        platform.set_position(player, Vector3::new(1.0, 1.0, 0.0)).await;
        platform.set_position(player, Vector3::new(2.0, 1.0, 0.0)).await;
        assert_eq!(entered.lock().unwrap().len(), 1);

        platform.set_position(player, Vector3::new(50.0, 0.0, 0.0)).await;
        let left = left.lock().unwrap();
        assert_eq!(left.len(), 1);
        let (shape, entity) = left[0].region().unwrap();
        assert_eq!(shape.id, zone.id);
        assert_eq!(entity, player);
    }

    #[tokio::test]
    async fn destroying_an_entity_leaves_its_shapes() {
        let platform = LocalPlatform::new();
        let (left, on_leave) = recorder();
        platform.subscribe(
            TransportChannel::Runtime,
            raw_events::ENTITY_LEAVE_COLSHAPE,
            on_leave,
        );
        platform.create_col_shape(
            "garage",
            None,
            BoundingRegion::Circle {
                center: Vector3::default(),
                radius: 3.0,
            },
        );

        let car = platform.spawn_entity(EntityKind::Vehicle, Vector3::default()).await;
        platform.set_synced_meta(car, "fuel", json!(40)).await;

        assert!(platform.destroy_entity(car).await);
        assert!(!platform.destroy_entity(car).await);
        assert_eq!(left.lock().unwrap().len(), 1);
        assert_eq!(platform.meta_get(car, "fuel"), None);
    }

    #[tokio::test]
    async fn meta_writes_report_previous_values() {
        let platform = LocalPlatform::new();
        let (changes, callback) = recorder();
        platform.subscribe(
            TransportChannel::Runtime,
            raw_events::STREAM_SYNCED_META_CHANGE,
            callback,
        );

        let car = platform.spawn_entity(EntityKind::Vehicle, Vector3::default()).await;
        platform.set_stream_synced_meta(car, "siren", json!(false)).await;
        platform.set_stream_synced_meta(car, "siren", json!(true)).await;

        assert_eq!(platform.stream_meta_get(car, "siren"), Some(json!(true)));
        let changes = changes.lock().unwrap();
        let last = changes[1].meta_change().unwrap();
        assert_eq!(last.old_value, json!(false));
        assert_eq!(last.value, json!(true));
        assert_eq!(changes[0].meta_change().unwrap().old_value, Value::Null);
    }

    #[tokio::test]
    async fn sends_are_recorded_in_the_outbox() {
        let platform = LocalPlatform::new();
        platform
            .send(Outbound::AllClients, "weather", EventArgs::new(vec![json!("rain")]))
            .await;

        let sent = platform.take_outbox().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, Outbound::AllClients);
        assert_eq!(sent[0].event_name, "weather");
        assert!(platform.outbox().await.is_empty());
    }
}
