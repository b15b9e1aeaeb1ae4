//! # Component Registrar
//!
//! Maps string identifiers to component resolution strategies. Two lookups
//! are supported:
//!
//! - [`ComponentRegistrar::resolve_one`]: the singleton registered under the
//!   name, constructed lazily on first use and cached afterwards;
//! - [`ComponentRegistrar::resolve_all`]: every instance registered under the
//!   name, used by multi-listener event dispatch.
//!
//! The registrar owns the cached instances for the life of the process; they
//! are dropped by [`ComponentRegistrar::clear`] at teardown.

use crate::error::{HandlerError, ResolveError};
use dashmap::DashMap;
use std::any::{type_name, Any};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// A type-erased component instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&ComponentRegistrar) -> Result<Instance, ResolveError> + Send + Sync>;

/// How instances are produced for an identifier.
pub enum Strategy {
    /// Built on first resolution, then cached
    Singleton(Factory),
    /// An already-constructed singleton
    Value(Instance),
    /// One more instance in the identifier's listener set
    Instance(Instance),
}

impl Strategy {
    /// Lazily constructed singleton. The factory may resolve other
    /// components through the registrar it is handed.
    pub fn singleton<C, F>(factory: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(&ComponentRegistrar) -> Result<C, ResolveError> + Send + Sync + 'static,
    {
        Strategy::Singleton(Arc::new(move |registrar| {
            factory(registrar).map(|component| Arc::new(component) as Instance)
        }))
    }

    pub fn value<C: Send + Sync + 'static>(component: C) -> Self {
        Strategy::Value(Arc::new(component))
    }

    pub fn instance<C: Send + Sync + 'static>(component: Arc<C>) -> Self {
        Strategy::Instance(component)
    }
}

struct Singleton {
    factory: Option<Factory>,
    cell: OnceLock<Instance>,
}

impl Singleton {
    fn lazy(factory: Factory) -> Self {
        Self {
            factory: Some(factory),
            cell: OnceLock::new(),
        }
    }

    fn eager(instance: Instance) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(instance);
        Self {
            factory: None,
            cell,
        }
    }
}

#[derive(Default)]
struct Registration {
    singleton: Option<Arc<Singleton>>,
    instances: Vec<Instance>,
}

/// Identifier to instance table shared by the dispatcher and the boot queue.
#[derive(Default)]
pub struct ComponentRegistrar {
    registrations: DashMap<String, Registration>,
}

impl std::fmt::Debug for ComponentRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistrar")
            .field("components", &self.registrations.len())
            .finish()
    }
}

impl ComponentRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a resolution strategy under `name`.
    ///
    /// Singleton strategies replace any previous singleton for the name;
    /// instance strategies append to its listener set.
    pub fn register(&self, name: &str, strategy: Strategy) {
        let mut registration = self.registrations.entry(name.to_string()).or_default();

        match strategy {
            Strategy::Singleton(factory) => {
                if registration.singleton.is_some() {
                    warn!("⚠️ Replacing singleton registration for component {}", name);
                }
                registration.singleton = Some(Arc::new(Singleton::lazy(factory)));
            }
            Strategy::Value(instance) => {
                if registration.singleton.is_some() {
                    warn!("⚠️ Replacing singleton registration for component {}", name);
                }
                registration.singleton = Some(Arc::new(Singleton::eager(instance)));
            }
            Strategy::Instance(instance) => registration.instances.push(instance),
        }

        debug!("🧩 Registered component {}", name);
    }

    pub fn register_singleton<C, F>(&self, name: &str, factory: F)
    where
        C: Send + Sync + 'static,
        F: Fn(&ComponentRegistrar) -> Result<C, ResolveError> + Send + Sync + 'static,
    {
        self.register(name, Strategy::singleton(factory));
    }

    pub fn register_value<C: Send + Sync + 'static>(&self, name: &str, component: C) {
        self.register(name, Strategy::value(component));
    }

    pub fn add_instance<C: Send + Sync + 'static>(&self, name: &str, component: Arc<C>) {
        self.register(name, Strategy::instance(component));
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registrations.contains_key(name)
    }

    /// Resolves the single instance for `name`.
    ///
    /// The singleton wins when present; otherwise the first instance of the
    /// listener set is returned.
    pub fn resolve_one(&self, name: &str) -> Result<Instance, ResolveError> {
        let (singleton, first) = {
            let registration = self
                .registrations
                .get(name)
                .ok_or_else(|| ResolveError::NotRegistered(name.to_string()))?;
            (
                registration.singleton.clone(),
                registration.instances.first().cloned(),
            )
        };

        match singleton {
            Some(singleton) => self.construct(name, &singleton),
            None => first.ok_or_else(|| ResolveError::NotRegistered(name.to_string())),
        }
    }

    /// Resolves every instance registered under `name`: the singleton first,
    /// then the listener set in registration order.
    pub fn resolve_all(&self, name: &str) -> Result<Vec<Instance>, ResolveError> {
        let (singleton, mut instances) = {
            let registration = self
                .registrations
                .get(name)
                .ok_or_else(|| ResolveError::NotRegistered(name.to_string()))?;
            (
                registration.singleton.clone(),
                registration.instances.clone(),
            )
        };

        if let Some(singleton) = singleton {
            instances.insert(0, self.construct(name, &singleton)?);
        }

        if instances.is_empty() {
            return Err(ResolveError::NotRegistered(name.to_string()));
        }

        Ok(instances)
    }

    /// Typed variant of [`resolve_one`](Self::resolve_one).
    pub fn resolve<C: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<C>, ResolveError> {
        self.resolve_one(name)?
            .downcast::<C>()
            .map_err(|_| ResolveError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<C>(),
            })
    }

    /// Registered identifiers, unordered.
    pub fn names(&self) -> Vec<String> {
        self.registrations
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.registrations.remove(name).is_some()
    }

    /// Drops every registration and cached instance.
    pub fn clear(&self) {
        self.registrations.clear();
    }

    // The registration guard is released before calling the factory so it
    // can resolve its own dependencies. Failed or panicking factories leave
    // the cell empty and are retried on the next resolution.
    fn construct(&self, name: &str, singleton: &Singleton) -> Result<Instance, ResolveError> {
        if let Some(instance) = singleton.cell.get() {
            return Ok(instance.clone());
        }

        let factory = singleton
            .factory
            .as_ref()
            .ok_or_else(|| ResolveError::NotRegistered(name.to_string()))?;

        debug!("🔨 Constructing component {}", name);
        let instance = match catch_unwind(AssertUnwindSafe(|| factory(self))) {
            Ok(Ok(instance)) => instance,
            Ok(Err(e @ ResolveError::Construction { .. })) => return Err(e),
            Ok(Err(e)) => {
                return Err(ResolveError::Construction {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(panic) => {
                return Err(ResolveError::Construction {
                    name: name.to_string(),
                    reason: HandlerError::from_panic(panic).to_string(),
                })
            }
        };
        Ok(singleton.cell.get_or_init(|| instance).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Database {
        url: String,
    }

    struct Garage {
        db: Arc<Database>,
    }

    #[test]
    fn singletons_are_lazy_and_cached() {
        let registrar = ComponentRegistrar::new();
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = constructed.clone();

        registrar.register_singleton("Database", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Database {
                url: "sqlite::memory:".into(),
            })
        });

        assert_eq!(constructed.load(Ordering::SeqCst), 0);

        let first = registrar.resolve::<Database>("Database").unwrap();
        let second = registrar.resolve::<Database>("Database").unwrap();

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.url, "sqlite::memory:");
    }

    #[test]
    fn factories_resolve_their_dependencies() {
        let registrar = ComponentRegistrar::new();
        registrar.register_value(
            "Database",
            Database {
                url: "postgres://".into(),
            },
        );
        registrar.register_singleton("Garage", |registrar| {
            Ok(Garage {
                db: registrar.resolve::<Database>("Database")?,
            })
        });

        let garage = registrar.resolve::<Garage>("Garage").unwrap();
        assert_eq!(garage.db.url, "postgres://");
    }

    #[test]
    fn failing_factories_are_retried_later() {
        let registrar = ComponentRegistrar::new();
        registrar.register_singleton("Garage", |registrar| {
            Ok(Garage {
                db: registrar.resolve::<Database>("Database")?,
            })
        });

        assert_eq!(
            registrar.resolve::<Garage>("Garage").err(),
            Some(ResolveError::Construction {
                name: "Garage".into(),
                reason: "Component not registered: Database".into(),
            })
        );

        registrar.register_value("Database", Database { url: "late".into() });
        assert_eq!(registrar.resolve::<Garage>("Garage").unwrap().db.url, "late");
    }

    #[test]
    fn panicking_factories_report_construction_failure() {
        let registrar = ComponentRegistrar::new();
        registrar.register_singleton::<Database, _>("Database", |_| panic!("no socket"));

        match registrar.resolve_one("Database") {
            Err(ResolveError::Construction { name, reason }) => {
                assert_eq!(name, "Database");
                assert!(reason.contains("no socket"));
            }
            other => panic!("expected a construction failure, got {:?}", other.err()),
        }
        assert!(registrar.resolve_all("Database").is_err());
    }

    #[test]
    fn resolve_all_returns_singleton_then_instances() {
        let registrar = ComponentRegistrar::new();
        registrar.add_instance("Listener", Arc::new(1u32));
        registrar.add_instance("Listener", Arc::new(2u32));
        registrar.register_value("Listener", 0u32);

        let values: Vec<u32> = registrar
            .resolve_all("Listener")
            .unwrap()
            .into_iter()
            .map(|instance| *instance.downcast::<u32>().unwrap())
            .collect();

        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn unknown_and_mistyped_components_fail() {
        let registrar = ComponentRegistrar::new();
        registrar.register_value("Number", 5u64);

        assert_eq!(
            registrar.resolve_all("Missing").err(),
            Some(ResolveError::NotRegistered("Missing".into()))
        );
        assert!(matches!(
            registrar.resolve::<String>("Number"),
            Err(ResolveError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn clear_drops_everything() {
        let registrar = ComponentRegistrar::new();
        registrar.register_value("A", 1u8);
        registrar.add_instance("B", Arc::new(2u8));
        assert_eq!(registrar.len(), 2);
        assert!(registrar.remove("A"));
        registrar.clear();
        assert!(registrar.is_empty());
        assert!(!registrar.is_registered("B"));
    }
}
