//! Named-instance directory for throttlers.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::cache::CacheConfig;
use crate::error::{Result, ThrottlrError};
use crate::store::WindowStore;
use crate::throttler::{Throttler, ThrottlerConfig};

/// Construct-once-per-name registry of [`Throttler`] instances.
///
/// The subject type parameter on [`ThrottlerRegistry::get`] only serves the
/// caller's static typing; lookup is by name alone.
#[derive(Default)]
pub struct ThrottlerRegistry {
    instances: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

static GLOBAL: OnceLock<ThrottlerRegistry> = OnceLock::new();

impl ThrottlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry. A convenience facade over the
    /// same type; nothing in the core requires it.
    pub fn global() -> &'static ThrottlerRegistry {
        GLOBAL.get_or_init(ThrottlerRegistry::new)
    }

    /// Creates and registers a throttler under `config.name`.
    ///
    /// Duplicate names are a configuration error, never a silent overwrite:
    /// two instances of the same name would shadow each other's windows.
    pub fn create<T: Send + Sync + 'static>(
        &self,
        config: ThrottlerConfig<T>,
        store: Arc<dyn WindowStore>,
        cache_config: CacheConfig,
    ) -> Result<Arc<Throttler<T>>> {
        let name = config.name.clone();
        let mut instances = self.instances.write();
        if instances.contains_key(&name) {
            return Err(ThrottlrError::DuplicateThrottler(name));
        }

        let throttler = Arc::new(Throttler::new(config, store, cache_config));
        instances.insert(name, throttler.clone() as Arc<dyn Any + Send + Sync>);
        Ok(throttler)
    }

    /// Returns the throttler registered under `name`.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<Throttler<T>>> {
        let instances = self.instances.read();
        let entry = instances
            .get(name)
            .ok_or_else(|| ThrottlrError::UnknownThrottler(name.to_string()))?;
        entry.clone().downcast::<Throttler<T>>().map_err(|_| {
            ThrottlrError::Configuration(format!(
                "throttler '{name}' is registered for a different subject type"
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}
