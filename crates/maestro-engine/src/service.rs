/*!
 * Control service facade.
 *
 * The inbound surface used by front ends: run activities, send single
 * commands, query status and discover devices. A single command that was
 * refused or could not be delivered comes back as a [`CommandOutcome`]
 * carrying the classified reason; lookups and contract violations are errors.
 */
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use maestro_core::config::EngineConfig;
use maestro_core::event::Notifier;
use maestro_core::logging::operation_span;
use maestro_core::types::Id;
use maestro_devices::{
    ControllerRegistry, Device, DeviceCommand, DeviceDiscoverer, DeviceStatus, DiscoveredDevice,
    ProtocolAdapter,
};

use crate::activity::Activity;
use crate::error::{Error, Result};
use crate::execution::{CommandOutcome, ExecutionResult, StepError};
use crate::executor::{dispatch_command, ActivityExecutor};
use crate::store::{ActivityStore, DeviceStore};

/// How long a discovery scan may run by default
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Entry point for callers of the control layer
#[derive(Debug)]
pub struct ControlService {
    activities: Arc<dyn ActivityStore>,
    devices: Arc<dyn DeviceStore>,
    registry: Arc<ControllerRegistry>,
    executor: ActivityExecutor,
    discoverer: DeviceDiscoverer,
    discovery_timeout: Duration,
}

impl ControlService {
    /// Create a service over the given stores and adapters
    pub fn new(
        activities: Arc<dyn ActivityStore>,
        devices: Arc<dyn DeviceStore>,
        registry: Arc<ControllerRegistry>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let executor = ActivityExecutor::new(
            activities.clone(),
            devices.clone(),
            registry.clone(),
            notifier,
            config,
        );
        Self {
            activities,
            devices,
            registry,
            executor,
            discoverer: DeviceDiscoverer::new(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Use `discoverer` for [`discover_devices`](Self::discover_devices)
    pub fn with_discoverer(mut self, discoverer: DeviceDiscoverer, timeout: Duration) -> Self {
        self.discoverer = discoverer;
        self.discovery_timeout = timeout;
        self
    }

    /// The adapter registry
    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    /// Run an activity to completion, failure or cancellation
    pub async fn execute_activity(&self, activity_id: &Id, cancel: CancellationToken) -> Result<ExecutionResult> {
        self.executor.execute(activity_id, cancel).await
    }

    /// Send one command to one device
    ///
    /// A refusal, a busy adapter or an unreachable or unpaired device yields an
    /// outcome with `accepted == false` and the classified reason. Unknown
    /// devices, undeclared or untranslatable commands and missing adapters are
    /// errors.
    pub async fn send_device_command(
        &self,
        device_id: &Id,
        command: &DeviceCommand,
        cancel: CancellationToken,
    ) -> Result<CommandOutcome> {
        let device = self.device(device_id).await?;
        let command = command.clone();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(maestro_core::error::Error::cancelled(format!(
                    "{} on {} cancelled",
                    command, device_id
                ))
                .into());
            }
            outcome = dispatch_command(&self.registry, &device, &command)
                .instrument(operation_span("send_command", device.connection_type.as_str())) => outcome,
        };

        match outcome {
            Ok(true) => Ok(CommandOutcome::accepted()),
            Ok(false) => {
                warn!("'{}' refused {}", device.name, command);
                Ok(CommandOutcome::failed(StepError::rejected()))
            }
            Err(e) if e.is_transport() => {
                warn!("Could not deliver {} to '{}': {}", command, device.name, e);
                Ok(CommandOutcome::failed(StepError::from(&e)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current status of a device
    ///
    /// Attaches the device's adapter if needed. An unreachable device is
    /// reported offline rather than as an error.
    pub async fn device_status(&self, device_id: &Id) -> Result<DeviceStatus> {
        let device = self.device(device_id).await?;
        let adapter = self.registry.resolve(&device)?;

        if !adapter.is_connected_to(&device.id) {
            if let Err(e) = adapter.connect(&device).await {
                if e.is_transport() {
                    warn!("'{}' is unreachable: {}", device.name, e);
                    return Ok(DeviceStatus::default());
                }
                return Err(e.into());
            }
        }

        Ok(adapter.status().await.unwrap_or_default())
    }

    /// Scan for devices that some registered adapter can drive
    pub async fn discover_devices(&self) -> Vec<DiscoveredDevice> {
        let found = self.discoverer.discover(self.discovery_timeout).await;
        let total = found.len();
        let usable: Vec<_> = found
            .into_iter()
            .filter(|d| self.registry.supports_device(&d.clone().into_device(Id::new())))
            .collect();
        info!("{} of {} discovered devices are controllable", usable.len(), total);
        usable
    }

    /// Every activity in the store
    pub async fn list_activities(&self) -> Result<Vec<Activity>> {
        self.activities.list_activities().await
    }

    /// Every device in the store
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        self.devices.list_devices().await
    }

    /// Close every adapter session
    pub async fn shutdown(&self) {
        self.registry.disconnect_all().await;
    }

    async fn device(&self, device_id: &Id) -> Result<Device> {
        self.devices
            .get_device(device_id)
            .await?
            .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use maestro_core::event::NoopNotifier;
    use maestro_devices::discovery::StaticDiscovery;
    use maestro_devices::{CommandType, ConnectionType, DeviceError, DeviceType, ErrorKind, PowerState};
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::store::InMemoryStore;
    use crate::testing::{receiver, sends, shield, tv, CallLog, RecordingAdapter};

    async fn service(log: &CallLog) -> ControlService {
        let store = Arc::new(InMemoryStore::new());
        for device in [tv(), shield(), receiver()] {
            store.insert_device(device).await;
        }
        let registry = ControllerRegistry::builder()
            .register(Arc::new(RecordingAdapter::new(ConnectionType::WebOs, log.clone())))
            .unwrap()
            .register(Arc::new(
                RecordingAdapter::new(ConnectionType::Adb, log.clone())
                    .unreachable_on(CommandType::Home)
                    .busy_on(CommandType::Back)
                    .refusing(CommandType::Stop),
            ))
            .unwrap()
            .build();

        ControlService::new(
            store.clone(),
            store,
            Arc::new(registry),
            Arc::new(NoopNotifier),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_send_device_command() {
        let log = CallLog::default();
        let service = service(&log).await;

        let sent = service
            .send_device_command(&Id::from("tv"), &DeviceCommand::new(CommandType::PowerOn), CancellationToken::new())
            .await;
        let outcome = assert_ok!(sent);
        assert!(outcome.accepted);
        assert_eq!(outcome.error, None);
        assert_eq!(sends(&log), vec![("tv".to_string(), CommandType::PowerOn)]);
    }

    async fn send_to_shield(service: &ControlService, action: CommandType) -> CommandOutcome {
        service
            .send_device_command(&Id::from("shield"), &DeviceCommand::new(action), CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_delivery_is_classified() {
        let log = CallLog::default();
        let service = service(&log).await;

        let unreachable = send_to_shield(&service, CommandType::Home).await;
        assert!(!unreachable.accepted);
        assert_eq!(unreachable.error_kind(), Some(ErrorKind::Connection));

        let busy = send_to_shield(&service, CommandType::Back).await;
        assert!(!busy.accepted);
        assert_eq!(busy.error_kind(), Some(ErrorKind::Busy));

        let refused = send_to_shield(&service, CommandType::Stop).await;
        assert!(!refused.accepted);
        assert_eq!(refused.error_kind(), Some(ErrorKind::Rejected));
    }

    #[tokio::test]
    async fn test_contract_errors_propagate() {
        let log = CallLog::default();
        let service = service(&log).await;
        let cancel = CancellationToken::new();

        let unknown = service
            .send_device_command(&Id::from("ghost"), &DeviceCommand::new(CommandType::Home), cancel.clone())
            .await;
        assert!(matches!(assert_err!(unknown), Error::DeviceNotFound(_)));

        let no_adapter = service
            .send_device_command(&Id::from("avr"), &DeviceCommand::new(CommandType::PowerOn), cancel.clone())
            .await;
        assert!(matches!(
            assert_err!(no_adapter),
            Error::Device(DeviceError::NotSupported(ConnectionType::BluetoothHid))
        ));

        cancel.cancel();
        let cancelled = service
            .send_device_command(&Id::from("tv"), &DeviceCommand::new(CommandType::Home), cancel)
            .await;
        assert!(matches!(assert_err!(cancelled), Error::Core(_)));
        assert!(sends(&log).is_empty());
    }

    #[tokio::test]
    async fn test_device_status_connects_first() {
        let log = CallLog::default();
        let service = service(&log).await;

        let status = service.device_status(&Id::from("tv")).await.unwrap();
        assert!(status.is_online);
        assert_eq!(status.power, Some(PowerState::On));
        assert!(service.registry().adapter(ConnectionType::WebOs).unwrap().is_connected_to(&Id::from("tv")));

        service.shutdown().await;
        assert!(!service.registry().adapter(ConnectionType::WebOs).unwrap().is_connected_to(&Id::from("tv")));
    }

    #[tokio::test]
    async fn test_discovery_filters_unsupported() {
        let log = CallLog::default();
        let found = |name: &str, kind| DiscoveredDevice {
            name: name.to_string(),
            device_type: DeviceType::Tv,
            connection_type: kind,
            connection: Default::default(),
            details: Default::default(),
        };
        let mut discoverer = DeviceDiscoverer::new();
        discoverer.register_provider(Arc::new(StaticDiscovery::new(vec![
            found("Shield", ConnectionType::Adb),
            found("Apple TV", ConnectionType::AppleRemote),
        ])));

        let service = service(&log).await.with_discoverer(discoverer, Duration::from_secs(1));
        let usable = service.discover_devices().await;
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].name, "Shield");
    }
}
