//! Module composition.
//!
//! A [`Module`] declares its components, event bindings and boot entries in a
//! single [`Module::configure`] call. [`AppBuilder`] walks the module import
//! graph depth first, configures every module exactly once (imports before
//! importers) and assembles an [`App`] ready to boot.

use crate::config::BootConfig;
use crate::loader::{BootReport, Loader};
use crate::queue::{BootMethod, BootQueue, Bucket};
use keystone_event_system::{
    ChannelType, ComponentRegistrar, EventDispatcher, EventMethod, EventService,
    FrameworkContext, MatchOptions, Platform, ResolveError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A unit of registration.
pub trait Module: Send + Sync {
    /// Unique name, used to configure shared imports once.
    fn name(&self) -> &str;

    /// Modules that must be configured before this one.
    fn imports(&self) -> Vec<Box<dyn Module>> {
        Vec::new()
    }

    fn configure(&self, binder: &mut ModuleBinder<'_>);
}

/// Registration surface handed to [`Module::configure`].
pub struct ModuleBinder<'a> {
    context: &'a Arc<FrameworkContext>,
    queue: &'a BootQueue,
    components: usize,
    bindings: usize,
    boot_entries: usize,
}

impl<'a> ModuleBinder<'a> {
    pub fn new(context: &'a Arc<FrameworkContext>, queue: &'a BootQueue) -> Self {
        Self {
            context,
            queue,
            components: 0,
            bindings: 0,
            boot_entries: 0,
        }
    }

    pub fn context(&self) -> &Arc<FrameworkContext> {
        self.context
    }

    /// The runtime event API, for factories that emit or listen.
    pub fn events(&self) -> EventService {
        self.context.events().clone()
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    /// Registers a lazily constructed singleton.
    pub fn singleton<C, F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        C: Send + Sync + 'static,
        F: Fn(&ComponentRegistrar) -> Result<C, ResolveError> + Send + Sync + 'static,
    {
        self.context.components().register_singleton(name, factory);
        self.components += 1;
        self
    }

    /// Registers an already constructed singleton.
    pub fn value<C: Send + Sync + 'static>(&mut self, name: &str, component: C) -> &mut Self {
        self.context.components().register_value(name, component);
        self.components += 1;
        self
    }

    /// Adds one more instance to the listener set of `name`.
    pub fn instance<C: Send + Sync + 'static>(
        &mut self,
        name: &str,
        component: Arc<C>,
    ) -> &mut Self {
        self.context.components().add_instance(name, component);
        self.components += 1;
        self
    }

    // ------------------------------------------------------------------------
    // Event bindings
    // ------------------------------------------------------------------------

    /// Records a binding with full control over every field.
    pub fn bind(
        &mut self,
        channel: ChannelType,
        event_name: Option<&str>,
        owner: &str,
        method: EventMethod,
        options: Option<MatchOptions>,
    ) -> &mut Self {
        self.context
            .registry()
            .add(channel, event_name, owner, method, options);
        self.bindings += 1;
        self
    }

    pub fn on(&mut self, owner: &str, event_name: &str, method: EventMethod) -> &mut Self {
        self.bind(ChannelType::On, Some(event_name), owner, method, None)
    }

    pub fn once(&mut self, owner: &str, event_name: &str, method: EventMethod) -> &mut Self {
        self.bind(ChannelType::Once, Some(event_name), owner, method, None)
    }

    pub fn on_client(&mut self, owner: &str, event_name: &str, method: EventMethod) -> &mut Self {
        self.bind(ChannelType::OnClient, Some(event_name), owner, method, None)
    }

    pub fn once_client(&mut self, owner: &str, event_name: &str, method: EventMethod) -> &mut Self {
        self.bind(ChannelType::OnceClient, Some(event_name), owner, method, None)
    }

    pub fn on_server(&mut self, owner: &str, event_name: &str, method: EventMethod) -> &mut Self {
        self.bind(ChannelType::OnServer, Some(event_name), owner, method, None)
    }

    pub fn once_server(&mut self, owner: &str, event_name: &str, method: EventMethod) -> &mut Self {
        self.bind(ChannelType::OnceServer, Some(event_name), owner, method, None)
    }

    pub fn on_gui(&mut self, owner: &str, event_name: &str, method: EventMethod) -> &mut Self {
        self.bind(ChannelType::OnGui, Some(event_name), owner, method, None)
    }

    pub fn on_enter_region(
        &mut self,
        owner: &str,
        options: MatchOptions,
        method: EventMethod,
    ) -> &mut Self {
        self.bind(ChannelType::EntityEnterRegion, None, owner, method, Some(options))
    }

    pub fn on_leave_region(
        &mut self,
        owner: &str,
        options: MatchOptions,
        method: EventMethod,
    ) -> &mut Self {
        self.bind(ChannelType::EntityLeaveRegion, None, owner, method, Some(options))
    }

    pub fn on_meta_change(
        &mut self,
        owner: &str,
        options: MatchOptions,
        method: EventMethod,
    ) -> &mut Self {
        self.bind(ChannelType::MetaChange, None, owner, method, Some(options))
    }

    pub fn on_stream_meta_change(
        &mut self,
        owner: &str,
        options: MatchOptions,
        method: EventMethod,
    ) -> &mut Self {
        self.bind(ChannelType::StreamedMetaChange, None, owner, method, Some(options))
    }

    // ------------------------------------------------------------------------
    // Boot entries
    // ------------------------------------------------------------------------

    pub fn boot(
        &mut self,
        bucket: Bucket,
        owner: &str,
        method: BootMethod,
        poll_interval: Option<Duration>,
    ) -> &mut Self {
        if self.queue.add(bucket, owner, method, poll_interval) {
            self.boot_entries += 1;
        }
        self
    }

    pub fn before(&mut self, owner: &str, method: BootMethod) -> &mut Self {
        self.boot(Bucket::Before, owner, method, None)
    }

    pub fn after(&mut self, owner: &str, method: BootMethod) -> &mut Self {
        self.boot(Bucket::After, owner, method, None)
    }

    pub fn after_bootstrap(&mut self, owner: &str, method: BootMethod) -> &mut Self {
        self.boot(Bucket::AfterBootstrap, owner, method, None)
    }
}

// ============================================================================
// Application assembly
// ============================================================================

pub struct AppBuilder {
    platform: Arc<dyn Platform>,
    config: BootConfig,
    modules: Vec<Box<dyn Module>>,
}

impl AppBuilder {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            config: BootConfig::default(),
            modules: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: BootConfig) -> Self {
        self.config = config;
        self
    }

    pub fn module<M: Module + 'static>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn build(self) -> App {
        let context = Arc::new(FrameworkContext::new(self.platform));
        let queue = Arc::new(BootQueue::with_config(self.config));
        let dispatcher = EventDispatcher::new(context.clone());

        let mut visited = Vec::new();
        let mut configured = Vec::new();
        for module in &self.modules {
            configure_tree(module.as_ref(), &context, &queue, &mut visited, &mut configured);
        }

        info!(
            "📦 Configured {} modules: {} components, {} event bindings, {} boot entries",
            configured.len(),
            context.components().len(),
            context.registry().len(),
            queue.len()
        );

        let loader = Loader::new(context.clone(), dispatcher.clone(), queue.clone());
        App {
            context,
            dispatcher,
            queue,
            loader,
            modules: configured,
        }
    }
}

fn configure_tree(
    module: &dyn Module,
    context: &Arc<FrameworkContext>,
    queue: &BootQueue,
    visited: &mut Vec<String>,
    configured: &mut Vec<String>,
) {
    let name = module.name().to_string();
    // Marked before recursing so import cycles terminate.
    if visited.contains(&name) {
        debug!("Module {} already configured", name);
        return;
    }
    visited.push(name.clone());

    for import in module.imports() {
        configure_tree(import.as_ref(), context, queue, visited, configured);
    }

    let mut binder = ModuleBinder::new(context, queue);
    module.configure(&mut binder);
    debug!(
        "Configured module {}: {} components, {} bindings, {} boot entries",
        name, binder.components, binder.bindings, binder.boot_entries
    );
    configured.push(name);
}

/// An assembled application: framework context, dispatcher, boot queue and
/// the loader that sequences them.
pub struct App {
    context: Arc<FrameworkContext>,
    dispatcher: EventDispatcher,
    queue: Arc<BootQueue>,
    loader: Loader,
    modules: Vec<String>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("modules", &self.modules)
            .field("loader", &self.loader)
            .finish()
    }
}

impl App {
    pub fn builder(platform: Arc<dyn Platform>) -> AppBuilder {
        AppBuilder::new(platform)
    }

    pub fn context(&self) -> &Arc<FrameworkContext> {
        &self.context
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn queue(&self) -> &Arc<BootQueue> {
        &self.queue
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Module names in configuration order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub async fn boot(&self) -> Option<BootReport> {
        self.loader.boot().await
    }

    /// Releases every subscription, timer, binding and component.
    pub fn shutdown(&self) {
        info!("Shutting down framework");
        self.dispatcher.stop();
        self.context.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_event_system::{EventArgs, LocalPlatform};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        hits: AtomicUsize,
    }

    struct Core;

    impl Module for Core {
        fn name(&self) -> &str {
            "core"
        }

        fn configure(&self, binder: &mut ModuleBinder<'_>) {
            binder.value("Counter", Counter::default()).on(
                "Counter",
                "tick",
                EventMethod::sync("onTick", |counter: &Counter, _| {
                    counter.hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
    }

    struct Feature {
        name: &'static str,
    }

    impl Module for Feature {
        fn name(&self) -> &str {
            self.name
        }

        fn imports(&self) -> Vec<Box<dyn Module>> {
            vec![Box::new(Core)]
        }

        fn configure(&self, binder: &mut ModuleBinder<'_>) {
            binder.after(
                "Counter",
                BootMethod::sync("bump", |counter: &Counter| {
                    counter.hits.fetch_add(10, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
    }

    struct Cyclic;

    impl Module for Cyclic {
        fn name(&self) -> &str {
            "cyclic"
        }

        fn imports(&self) -> Vec<Box<dyn Module>> {
            vec![Box::new(Cyclic)]
        }

        fn configure(&self, _: &mut ModuleBinder<'_>) {}
    }

    #[tokio::test]
    async fn shared_imports_are_configured_once() {
        let app = App::builder(Arc::new(LocalPlatform::new()))
            .module(Feature { name: "chat" })
            .module(Feature { name: "zones" })
            .module(Cyclic)
            .build();

        assert_eq!(app.modules(), ["core", "chat", "zones", "cyclic"]);
        assert_eq!(app.context().registry().len(), 1);
        assert_eq!(app.queue().pending(Bucket::After), 2);
    }

    #[tokio::test]
    async fn app_boots_and_shuts_down() {
        let app = App::builder(Arc::new(LocalPlatform::new()))
            .module(Feature { name: "chat" })
            .build();

        let report = app.boot().await.unwrap();
        assert_eq!(report.subscriptions, 1);

        app.context().events().emit("tick", EventArgs::empty()).await;
        let counter = app.context().components().resolve::<Counter>("Counter").unwrap();
        assert_eq!(counter.hits.load(Ordering::SeqCst), 11);

        app.shutdown();
        assert!(!app.dispatcher().is_active());
        assert!(app.context().components().is_empty());
        assert_eq!(app.context().events().emit("tick", EventArgs::empty()).await, 0);
    }
}
