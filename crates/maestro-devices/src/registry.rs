/*!
 * Controller registry for Maestro.
 *
 * Maps each [`ConnectionType`] to the single adapter instance that serves it.
 * The registry is assembled once at startup with [`RegistryBuilder`] and is
 * read-only afterwards.
 */
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use maestro_core::config::AdapterConfig;
use maestro_core::event::Notifier;

use crate::adapter::ProtocolAdapter;
use crate::device::{ConnectionType, Device, DeviceError, Result};

/// Lookup from connection type to adapter
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    adapters: HashMap<ConnectionType, Arc<dyn ProtocolAdapter>>,
}

impl ControllerRegistry {
    /// Start building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The adapter serving `device`'s connection type
    pub fn resolve(&self, device: &Device) -> Result<Arc<dyn ProtocolAdapter>> {
        self.adapter(device.connection_type)
    }

    /// The adapter registered for `kind`
    pub fn adapter(&self, kind: ConnectionType) -> Result<Arc<dyn ProtocolAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or(DeviceError::NotSupported(kind))
    }

    /// Whether some registered adapter can drive `device`
    pub fn supports_device(&self, device: &Device) -> bool {
        self.adapters
            .get(&device.connection_type)
            .map(|adapter| adapter.supports_device(device))
            .unwrap_or(false)
    }

    /// Registered connection types, in declaration order
    pub fn connection_types(&self) -> Vec<ConnectionType> {
        ConnectionType::ALL
            .into_iter()
            .filter(|kind| self.adapters.contains_key(kind))
            .collect()
    }

    /// Close every adapter's session
    pub async fn disconnect_all(&self) {
        for adapter in self.adapters.values() {
            adapter.disconnect().await;
        }
    }
}

/// Builder for [`ControllerRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    adapters: HashMap<ConnectionType, Arc<dyn ProtocolAdapter>>,
}

impl RegistryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own connection type
    pub fn register(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Result<Self> {
        let kind = adapter.protocol();
        if self.adapters.contains_key(&kind) {
            return Err(DeviceError::Configuration(format!(
                "An adapter for {} is already registered",
                kind
            )));
        }
        debug!("Registered {} adapter", kind);
        self.adapters.insert(kind, adapter);
        Ok(self)
    }

    /// Finish the registry
    pub fn build(self) -> ControllerRegistry {
        ControllerRegistry {
            adapters: self.adapters,
        }
    }
}

/// A builder preloaded with every adapter compiled into this crate
#[allow(unused_variables, unused_mut)]
pub fn default_adapters(config: &AdapterConfig, notifier: Arc<dyn Notifier>) -> Result<RegistryBuilder> {
    let mut builder = RegistryBuilder::new();

    #[cfg(feature = "adb")]
    {
        let adb = crate::protocols::adb::AdbAdapter::new(config.clone(), notifier.clone())?;
        builder = builder.register(Arc::new(adb))?;
    }

    #[cfg(feature = "roku")]
    {
        let roku = crate::protocols::roku::RokuAdapter::new(config.clone(), notifier.clone())?;
        builder = builder.register(Arc::new(roku))?;
    }

    Ok(builder)
}
