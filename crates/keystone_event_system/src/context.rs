//! Process-wide framework state.
//!
//! One [`FrameworkContext`] is created at process start and shared (behind an
//! `Arc`) by the dispatcher, the boot queue and every module. It replaces the
//! global container and registries a dynamic runtime would keep.

use crate::components::ComponentRegistrar;
use crate::platform::Platform;
use crate::registry::EventRegistry;
use crate::service::EventService;
use crate::timers::TimerService;
use std::sync::Arc;
use tracing::info;

pub struct FrameworkContext {
    platform: Arc<dyn Platform>,
    components: ComponentRegistrar,
    registry: EventRegistry,
    timers: TimerService,
    events: EventService,
}

impl std::fmt::Debug for FrameworkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameworkContext")
            .field("components", &self.components)
            .field("registry", &self.registry)
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

impl FrameworkContext {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            events: EventService::new(platform.clone()),
            platform,
            components: ComponentRegistrar::new(),
            registry: EventRegistry::new(),
            timers: TimerService::new(),
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn components(&self) -> &ComponentRegistrar {
        &self.components
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    pub fn events(&self) -> &EventService {
        &self.events
    }

    /// Releases everything the framework holds: pending timers, event
    /// bindings and component instances. Live transport subscriptions are
    /// owned by the dispatcher and must be stopped there first.
    pub fn teardown(&self) {
        let timers = self.timers.clear_all();
        let bindings = self.registry.len();
        let components = self.components.len();

        self.registry.clear();
        self.components.clear();

        info!(
            "🧹 Framework torn down: {} timers, {} bindings, {} components released",
            timers, bindings, components
        );
    }
}
