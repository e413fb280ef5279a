/*!
 * Device discovery for Maestro.
 *
 * Discovery mechanisms (SSDP, mDNS, Bluetooth scans) live outside this crate
 * and plug in through [`DeviceDiscovery`]. [`DeviceDiscoverer`] fans a scan out
 * to every registered provider and merges what they find.
 */
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use maestro_core::types::Id;
use maestro_core::utils::with_timeout;

use crate::device::{ConnectionParams, ConnectionType, Device, DeviceType, Result};

/// A device found on the network but not yet part of the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Advertised name
    pub name: String,
    /// Best guess at the kind of device
    pub device_type: DeviceType,
    /// Protocol the device answered on
    pub connection_type: ConnectionType,
    /// How to reach it
    pub connection: ConnectionParams,
    /// Provider-specific attributes (model, serial, firmware)
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl DiscoveredDevice {
    /// Turn the finding into a catalog device with identity `id`
    pub fn into_device<I: Into<Id>>(self, id: I) -> Device {
        let mut device = Device::new(id, self.name, self.device_type, self.connection_type);
        device.connection = self.connection;
        device
    }

    fn dedup_key(&self) -> (ConnectionType, Option<String>, Option<u16>) {
        (
            self.connection_type,
            self.connection.host.clone(),
            self.connection.port,
        )
    }
}

/// A source of discovered devices
#[async_trait]
pub trait DeviceDiscovery: Send + Sync + Debug {
    /// Provider name, for logs
    fn name(&self) -> &'static str;

    /// Scan for up to `timeout`
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;
}

/// Runs every registered provider and merges the results
#[derive(Debug, Default, Clone)]
pub struct DeviceDiscoverer {
    providers: Vec<Arc<dyn DeviceDiscovery>>,
}

impl DeviceDiscoverer {
    /// Create a discoverer without providers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider
    pub fn register_provider(&mut self, provider: Arc<dyn DeviceDiscovery>) {
        self.providers.push(provider);
    }

    /// Number of registered providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Scan with every provider concurrently
    ///
    /// A provider that fails or overruns `timeout` is logged and skipped.
    /// Devices reported by more than one provider appear once.
    pub async fn discover(&self, timeout: Duration) -> Vec<DiscoveredDevice> {
        let scans = self.providers.iter().map(|provider| {
            let provider = provider.clone();
            async move {
                debug!("Starting discovery with provider {}", provider.name());
                match with_timeout(timeout, async { Ok(provider.discover(timeout).await) }).await {
                    Ok(Ok(found)) => {
                        debug!("Provider {} found {} device(s)", provider.name(), found.len());
                        found
                    }
                    Ok(Err(e)) => {
                        warn!("Discovery provider {} failed: {}", provider.name(), e);
                        Vec::new()
                    }
                    Err(_) => {
                        warn!("Discovery provider {} timed out", provider.name());
                        Vec::new()
                    }
                }
            }
        });

        let mut merged: Vec<DiscoveredDevice> = Vec::new();
        for found in join_all(scans).await {
            for device in found {
                if !merged.iter().any(|d| d.dedup_key() == device.dedup_key()) {
                    merged.push(device);
                }
            }
        }

        info!("Discovery finished with {} device(s)", merged.len());
        merged
    }
}

/// A provider that reports a fixed list, for manual setups and tests
#[derive(Debug, Default, Clone)]
pub struct StaticDiscovery {
    devices: Vec<DiscoveredDevice>,
}

impl StaticDiscovery {
    /// Create a provider reporting `devices`
    pub fn new(devices: Vec<DiscoveredDevice>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DeviceDiscovery for StaticDiscovery {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        Ok(self.devices.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;

    fn found(name: &str, kind: ConnectionType, host: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            name: name.to_string(),
            device_type: DeviceType::StreamingBox,
            connection_type: kind,
            connection: ConnectionParams {
                host: Some(host.to_string()),
                ..Default::default()
            },
            details: BTreeMap::new(),
        }
    }

    #[derive(Debug)]
    struct FailingDiscovery;

    #[async_trait]
    impl DeviceDiscovery for FailingDiscovery {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
            Err(DeviceError::Configuration("no interface".to_string()))
        }
    }

    #[derive(Debug)]
    struct SlowDiscovery;

    #[async_trait]
    impl DeviceDiscovery for SlowDiscovery {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![found("Late", ConnectionType::Roku, "10.0.0.99")])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_merges_and_skips_failures() {
        let mut discoverer = DeviceDiscoverer::new();
        discoverer.register_provider(Arc::new(StaticDiscovery::new(vec![
            found("Roku", ConnectionType::Roku, "10.0.0.2"),
            found("Shield", ConnectionType::Adb, "10.0.0.3"),
        ])));
        discoverer.register_provider(Arc::new(StaticDiscovery::new(vec![found(
            "Roku Ultra",
            ConnectionType::Roku,
            "10.0.0.2",
        )])));
        discoverer.register_provider(Arc::new(FailingDiscovery));
        discoverer.register_provider(Arc::new(SlowDiscovery));

        let devices = discoverer.discover(Duration::from_secs(2)).await;
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Roku", "Shield"]);
    }

    #[test]
    fn test_into_device_keeps_connection() {
        let device = found("Shield", ConnectionType::Adb, "10.0.0.3").into_device("shield");
        assert_eq!(device.id.as_str(), "shield");
        assert_eq!(device.socket_address().unwrap(), "10.0.0.3:5555");
    }
}
