//! # Event Registry
//!
//! Declarative event bindings, accumulated by module registration functions
//! before the dispatcher starts. The registry holds data only: nothing here
//! subscribes to the transport or runs a handler.
//!
//! Bindings are kept per channel in registration order. Duplicate bindings are
//! accepted and fire independently.

use crate::components::Instance;
use crate::error::{HandlerError, ResolveError};
use crate::payload::EventPayload;
use crate::types::{ChannelType, MatchOptions};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::type_name;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Future returned by a bound component method.
pub type MethodFuture = BoxFuture<'static, Result<(), HandlerError>>;

type MethodFn = dyn Fn(Instance, EventPayload) -> MethodFuture + Send + Sync;

/// A named, typed method on a component.
///
/// Rust has no runtime method lookup, so the binding carries the callable
/// itself next to the method name. The callable downcasts the resolved
/// instance to the concrete component type it was built for.
#[derive(Clone)]
pub struct EventMethod {
    name: Arc<str>,
    call: Arc<MethodFn>,
}

impl std::fmt::Debug for EventMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventMethod").field(&self.name).finish()
    }
}

impl EventMethod {
    /// Binds an async method of component `C`.
    pub fn new<C, F, Fut>(name: &str, method: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(Arc<C>, EventPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let method_name: Arc<str> = Arc::from(name);
        let label = method_name.clone();
        Self {
            name: method_name,
            call: Arc::new(
                move |instance: Instance, payload: EventPayload| -> MethodFuture {
                    match downcast::<C>(instance, &label) {
                        Ok(component) => method(component, payload).boxed(),
                        Err(e) => futures::future::ready(Err(e)).boxed(),
                    }
                },
            ),
        }
    }

    /// Binds a synchronous method of component `C`.
    pub fn sync<C, F>(name: &str, method: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &EventPayload) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let method = Arc::new(method);
        Self::new(name, move |component: Arc<C>, payload| {
            let method = method.clone();
            async move { method(component.as_ref(), &payload) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the method against `instance`. Panics are caught and reported as
    /// [`HandlerError::Panicked`].
    pub async fn invoke(&self, instance: Instance, payload: EventPayload) -> Result<(), HandlerError> {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            (self.call)(instance, payload)
        })) {
            Ok(future) => future,
            Err(panic) => return Err(HandlerError::from_panic(panic)),
        };

        AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)))
    }
}

fn downcast<C: Send + Sync + 'static>(instance: Instance, method: &str) -> Result<Arc<C>, HandlerError> {
    instance.downcast::<C>().map_err(|_| {
        HandlerError::Resolve(ResolveError::TypeMismatch {
            name: method.to_string(),
            expected: type_name::<C>(),
        })
    })
}

// ============================================================================
// Bindings
// ============================================================================

/// One declared handler: "call `method` on every `owner` instance when
/// `event_name` fires on `channel`".
#[derive(Debug, Clone)]
pub struct EventBinding {
    channel: ChannelType,
    event_name: String,
    owner: String,
    method: EventMethod,
    options: Option<MatchOptions>,
}

impl EventBinding {
    /// Creates a binding. Without an explicit event name, specialized
    /// channels use their raw runtime event and generic channels use the
    /// method name.
    pub fn new(
        channel: ChannelType,
        event_name: Option<&str>,
        owner: &str,
        method: EventMethod,
        options: Option<MatchOptions>,
    ) -> Self {
        let event_name = event_name
            .or(channel.fixed_event_name())
            .unwrap_or(method.name())
            .to_string();

        let unmatched = match (&options, channel) {
            (_, c) if !c.is_region() && !c.is_meta() => false,
            (None, _) => true,
            (Some(o), c) if c.is_region() => o.shape_type.is_none(),
            (Some(o), _) => o.entity_kind.is_none(),
        };
        if unmatched {
            warn!(
                "⚠️ {}::{} on {} has no {}, it will never fire",
                owner,
                method.name(),
                channel,
                if channel.is_region() { "shape type" } else { "entity kind" }
            );
        }

        Self {
            channel,
            event_name,
            owner: owner.to_string(),
            method,
            options,
        }
    }

    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn method(&self) -> &EventMethod {
        &self.method
    }

    pub fn method_name(&self) -> &str {
        self.method.name()
    }

    pub fn options(&self) -> Option<&MatchOptions> {
        self.options.as_ref()
    }

    /// Applies the channel's filters to an inbound payload.
    ///
    /// Generic channels accept everything. Region and meta channels reject
    /// payloads of the wrong kind and anything their options exclude; without
    /// options (or without the shape type / entity kind they require) they
    /// accept nothing.
    pub fn accepts(&self, payload: &EventPayload) -> bool {
        if !self.channel.is_region() && !self.channel.is_meta() {
            return true;
        }

        let Some(options) = self.options.as_ref() else {
            return false;
        };

        match payload {
            EventPayload::Region { shape, entity } if self.channel.is_region() => {
                options.matches_region(shape, entity)
            }
            EventPayload::MetaChange(change) if self.channel.is_meta() => {
                options.matches_meta(&change.entity, &change.key)
            }
            _ => false,
        }
    }

    fn describes(&self, owner: &str, method: &str) -> bool {
        self.owner == owner && self.method.name() == method
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Accumulates [`EventBinding`]s per channel.
#[derive(Default)]
pub struct EventRegistry {
    bindings: DashMap<ChannelType, Vec<EventBinding>>,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("bindings", &self.len())
            .finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a binding. Duplicates are kept.
    pub fn add(
        &self,
        channel: ChannelType,
        event_name: Option<&str>,
        owner: &str,
        method: EventMethod,
        options: Option<MatchOptions>,
    ) {
        self.insert(EventBinding::new(channel, event_name, owner, method, options));
    }

    pub fn insert(&self, binding: EventBinding) {
        debug!(
            "📝 Bound {}:{} -> {}::{}",
            binding.channel,
            binding.event_name,
            binding.owner,
            binding.method_name()
        );
        self.bindings
            .entry(binding.channel)
            .or_default()
            .push(binding);
    }

    /// Snapshot of a channel's bindings in registration order.
    pub fn entries_for(&self, channel: ChannelType) -> Vec<EventBinding> {
        self.bindings
            .get(&channel)
            .map(|bindings| bindings.clone())
            .unwrap_or_default()
    }

    /// Bindings sharing one `(channel, event_name)` pair, in registration
    /// order.
    pub fn bindings_for(&self, channel: ChannelType, event_name: &str) -> Vec<EventBinding> {
        self.bindings
            .get(&channel)
            .map(|bindings| {
                bindings
                    .iter()
                    .filter(|binding| binding.event_name == event_name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Distinct event names bound on a channel, ordered by first
    /// registration.
    pub fn event_names(&self, channel: ChannelType) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if let Some(bindings) = self.bindings.get(&channel) {
            for binding in bindings.iter() {
                if !names.contains(&binding.event_name) {
                    names.push(binding.event_name.clone());
                }
            }
        }
        names
    }

    /// Removes every binding of a pair.
    pub fn remove_event(&self, channel: ChannelType, event_name: &str) -> usize {
        self.remove_where(channel, |binding| binding.event_name == event_name)
    }

    /// Removes the bindings of a pair that call `owner::method`.
    pub fn remove_method(
        &self,
        channel: ChannelType,
        event_name: &str,
        owner: &str,
        method: &str,
    ) -> usize {
        self.remove_where(channel, |binding| {
            binding.event_name == event_name && binding.describes(owner, method)
        })
    }

    fn remove_where<P>(&self, channel: ChannelType, predicate: P) -> usize
    where
        P: Fn(&EventBinding) -> bool,
    {
        let removed = match self.bindings.get_mut(&channel) {
            Some(mut bindings) => {
                let before = bindings.len();
                bindings.retain(|binding| !predicate(binding));
                before - bindings.len()
            }
            None => 0,
        };
        self.bindings.remove_if(&channel, |_, bindings| bindings.is_empty());
        removed
    }

    pub fn len(&self) -> usize {
        self.bindings.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.bindings.clear();
    }
}
