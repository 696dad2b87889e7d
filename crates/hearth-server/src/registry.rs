//! ServiceRegistry — per-worker bindings of instances, factories and singletons.
//!
//! Every worker builds exactly one registry at startup and hands it to the
//! worker-start callbacks. It is never shared with another worker, so a
//! callback can open connection pools or caches without coordinating.
//!
//! Values are stored type-erased and resolved as `Arc<T>`:
//!
//! ```ignore
//! registry.instance("config", Arc::new(settings));
//! registry.singleton("pool", |r| Pool::connect(&r.make::<Settings>("config")?));
//! registry.bind("request_log", |_| Ok(Vec::<String>::new()));
//!
//! let pool = registry.make::<Pool>("pool")?;
//! ```
//!
//! Uses parking_lot::RwLock for the maps. Factories run outside the locks so
//! they may resolve their own dependencies from the same registry.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::RegistryError;

type Shared = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceRegistry) -> anyhow::Result<Shared> + Send + Sync>;

#[derive(Clone)]
struct FactoryEntry {
    factory: Factory,
    /// Memoize the first result as an instance.
    shared: bool,
}

#[derive(Default)]
pub struct ServiceRegistry {
    /// Ready-made values, including memoized singleton results.
    instances: RwLock<HashMap<String, Shared>>,
    factories: RwLock<HashMap<String, FactoryEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a ready-made value, superseding any factory or instance under `id`.
    pub fn instance<T: Send + Sync + 'static>(&self, id: impl Into<String>, value: Arc<T>) {
        let id = id.into();
        self.factories.write().remove(&id);
        self.instances.write().insert(id, value);
    }

    /// Register a factory invoked on every resolution. Clears any cached value.
    pub fn bind<T, F>(&self, id: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceRegistry) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(id.into(), erase(factory), false);
    }

    /// Register a factory whose first result is memoized for the registry's lifetime.
    pub fn singleton<T, F>(&self, id: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceRegistry) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(id.into(), erase(factory), true);
    }

    /// Resolve `id` as an `Arc<T>`.
    ///
    /// Order: instance (or memoized singleton), then factory, else
    /// [`RegistryError::NotFound`].
    pub fn make<T: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<T>, RegistryError> {
        self.make_any(id)?
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                id: id.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Resolve `id` without naming its type.
    pub fn make_any(&self, id: &str) -> Result<Arc<dyn Any + Send + Sync>, RegistryError> {
        if let Some(value) = self.instances.read().get(id) {
            return Ok(value.clone());
        }

        let entry = self
            .factories
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;

        let value = (entry.factory)(self).map_err(|source| RegistryError::Factory {
            id: id.to_string(),
            source,
        })?;

        if !entry.shared {
            return Ok(value);
        }

        // Keep whichever value landed first so every caller sees the same object.
        let mut instances = self.instances.write();
        let stored = instances.entry(id.to_string()).or_insert(value);
        debug!("Singleton resolved: {id}");
        Ok(stored.clone())
    }

    /// Whether anything is registered under `id`. Never resolves.
    pub fn has(&self, id: &str) -> bool {
        self.instances.read().contains_key(id) || self.factories.read().contains_key(id)
    }

    /// Drop every binding under `id`. Returns whether one existed.
    pub fn forget(&self, id: &str) -> bool {
        let had_instance = self.instances.write().remove(id).is_some();
        let had_factory = self.factories.write().remove(id).is_some();
        had_instance || had_factory
    }

    /// All registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.read().keys().cloned().collect();
        for id in self.factories.read().keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();
        ids
    }

    fn register(&self, id: String, factory: Factory, shared: bool) {
        self.instances.write().remove(&id);
        self.factories
            .write()
            .insert(id, FactoryEntry { factory, shared });
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

fn erase<T, F>(factory: F) -> Factory
where
    T: Send + Sync + 'static,
    F: Fn(&ServiceRegistry) -> anyhow::Result<T> + Send + Sync + 'static,
{
    Arc::new(move |registry| factory(registry).map(|value| Arc::new(value) as Shared))
}
