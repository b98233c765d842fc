use std::collections::HashMap;
use std::sync::Arc;

use bus::CommandBus;

use crate::error::AdapterError;
use crate::generic_ws::GenericWsAdapter;
use crate::traits::DeviceAdapter;

/// Resolves a device config's `script` key to a compiled-in adapter instead
/// of a dynamically loaded script path.
///
/// Each kind maps to one shared instance, not a constructor called per
/// lookup — adapters like `GenericWsAdapter` cache a persistent connection
/// per device internally, so every device of a given kind needs to resolve
/// to the *same* instance across calls.
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn DeviceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// The registry preloaded with the adapters this crate ships. `bus` is
    /// handed to adapters that need to forward spontaneous replies onto the
    /// command bus themselves.
    pub fn builtin(bus: CommandBus) -> Self {
        let mut registry = Self::new();
        registry.register("generic_ws", Arc::new(GenericWsAdapter::new(bus)));
        registry
    }

    pub fn register(&mut self, kind: &'static str, adapter: Arc<dyn DeviceAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn DeviceAdapter>, AdapterError> {
        self.adapters
            .get(kind)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownKind {
                kind: kind.to_string(),
            })
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
