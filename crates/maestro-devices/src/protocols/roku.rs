/*!
 * Roku External Control Protocol adapter.
 *
 * ECP is plain HTTP on port 8060: commands are POSTs to `/keypress/<Key>` and
 * `/launch/<channel>`, status comes from `/query/device-info` and
 * `/query/active-app`. There is no persistent socket; a "session" here is the
 * device the adapter last reached successfully.
 */
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn, Instrument};

use maestro_core::config::AdapterConfig;
use maestro_core::event::Notifier;
use maestro_core::logging::operation_span;
use maestro_core::types::Id;

use crate::adapter::{bounded, ConnectionMonitor, ProtocolAdapter};
use crate::device::{
    ConnectionErrorKind, ConnectionState, ConnectionType, Device, DeviceCommand, DeviceError,
    DeviceStatus, PowerState, Result,
};
use crate::translator::{CommandTranslator, ProtocolOperation};

#[derive(Debug, Clone)]
struct RokuSession {
    device: Device,
    base_url: String,
}

type SessionSlot = Option<RokuSession>;

/// Roku ECP adapter
#[derive(Debug)]
pub struct RokuAdapter {
    config: AdapterConfig,
    client: Client,
    monitor: ConnectionMonitor,
    session: Mutex<SessionSlot>,
    translator: CommandTranslator,
}

impl RokuAdapter {
    /// Create an adapter with its own HTTP client
    pub fn new(config: AdapterConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| DeviceError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            monitor: ConnectionMonitor::new(notifier),
            session: Mutex::new(None),
            translator: CommandTranslator::new(),
        })
    }

    fn base_url(device: &Device) -> Result<String> {
        Ok(format!("http://{}", device.socket_address()?))
    }

    async fn lock_session(&self) -> Result<MutexGuard<'_, SessionSlot>> {
        match tokio::time::timeout(self.config.busy_timeout(), self.session.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => Err(DeviceError::Busy(format!(
                "Roku adapter still in use after {} ms",
                self.config.busy_timeout_ms
            ))),
        }
    }

    async fn get(&self, url: &str, deadline: std::time::Duration) -> Result<(StatusCode, String)> {
        bounded(deadline, async {
            let response = self.client.get(url).send().await.map_err(transport_error)?;
            let status = response.status();
            let body = response.text().await.map_err(transport_error)?;
            Ok((status, body))
        })
        .await
    }

    async fn post(&self, url: &str) -> Result<StatusCode> {
        bounded(self.config.send_timeout(), async {
            let response = self.client.post(url).send().await.map_err(transport_error)?;
            Ok(response.status())
        })
        .await
    }

    async fn probe(&self, base_url: &str) -> Result<String> {
        let (status, body) = self
            .get(&format!("{}/query/device-info", base_url), self.config.connect_timeout())
            .await?;
        if !status.is_success() {
            return Err(DeviceError::Authentication(format!(
                "device-info answered {}; is network control enabled?",
                status
            )));
        }
        Ok(body)
    }

    fn serves(&self, slot: &SessionSlot, device_id: &Id) -> bool {
        slot.as_ref().is_some_and(|session| &session.device.id == device_id)
            && self.monitor.is_connected_to(device_id)
    }

    async fn attach(&self, slot: &mut SessionSlot, device: &Device) -> Result<()> {
        if !self.supports_device(device) {
            return Err(DeviceError::Configuration(format!(
                "Device {} uses {}, not roku",
                device.id, device.connection_type
            )));
        }
        if self.serves(slot, &device.id) {
            return Ok(());
        }
        if let Some(previous) = slot.take() {
            info!("Releasing Roku {}", previous.device.id);
            self.monitor.reset();
        }

        let base_url = Self::base_url(device)?;
        self.monitor.begin(&device.id);
        match self.probe(&base_url).await {
            Ok(info) => {
                if let Some(name) = element_text(&info, "user-device-name") {
                    debug!("Roku {} answers as '{}'", device.id, name);
                }
                self.monitor.transition(ConnectionState::Connected);
                *slot = Some(RokuSession {
                    device: device.clone(),
                    base_url,
                });
                info!("Roku {} reachable", device.id);
                Ok(())
            }
            Err(e) => {
                self.monitor.reset();
                Err(e)
            }
        }
    }

    /// Forget the session after a transport failure
    fn drop_session(&self, slot: &mut SessionSlot, error: &DeviceError) {
        if matches!(error, DeviceError::Connection { .. }) {
            if let Some(session) = slot.take() {
                warn!("Lost Roku {}: {}", session.device.id, error);
            }
            self.monitor.reset();
        }
    }

    /// POST every path of `command` to the locked session, attaching first when `attach` is set
    async fn deliver(&self, device: &Device, command: &DeviceCommand, attach: bool) -> Result<bool> {
        let paths = match self.translator.translate(ConnectionType::Roku, command)? {
            ProtocolOperation::HttpPost { paths } => paths,
            other => {
                return Err(DeviceError::Configuration(format!(
                    "Roku cannot perform {:?}",
                    other
                )))
            }
        };

        let mut guard = self.lock_session().await?;
        if attach {
            self.attach(&mut guard, device)
                .instrument(operation_span("connect", "roku"))
                .await?;
        } else if !self.serves(&guard, &device.id) {
            return Err(DeviceError::invalid_state(format!(
                "Roku adapter is not connected to {}",
                device.id
            )));
        }
        let base_url = guard
            .as_ref()
            .map(|s| s.base_url.clone())
            .ok_or_else(|| DeviceError::invalid_state("Roku adapter is not connected"))?;

        for path in paths {
            debug!("Roku {} -> POST {}", command, path);
            match self.post(&format!("{}{}", base_url, path)).await {
                Ok(status) if status.is_success() => {}
                Ok(status) => {
                    warn!("Roku refused {} with {}", path, status);
                    return Ok(false);
                }
                Err(e) => {
                    self.drop_session(&mut guard, &e);
                    return Err(e);
                }
            }
        }
        Ok(true)
    }
}

/// Classify a reqwest failure, preferring the underlying I/O error
fn transport_error(err: reqwest::Error) -> DeviceError {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return DeviceError::from(io::Error::new(io_err.kind(), err.to_string()));
        }
        source = cause.source();
    }

    let kind = if err.is_timeout() {
        ConnectionErrorKind::Timeout
    } else if err.is_connect() {
        ConnectionErrorKind::Unreachable
    } else {
        ConnectionErrorKind::Other
    };
    DeviceError::connection(kind, err.to_string())
}

/// Text of the first `<tag ...>text</tag>` element
fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut from = 0;

    while let Some(pos) = xml[from..].find(&open) {
        let after_name = from + pos + open.len();
        match xml[after_name..].chars().next() {
            Some('>') | Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                let body_start = after_name + xml[after_name..].find('>')? + 1;
                let body_end = body_start + xml[body_start..].find(&close)?;
                return Some(xml[body_start..body_end].trim());
            }
            _ => from = after_name,
        }
    }
    None
}

fn parse_device_info(info: &str) -> DeviceStatus {
    let mut status = DeviceStatus {
        is_online: true,
        ..Default::default()
    };

    if let Some(mode) = element_text(info, "power-mode") {
        status.power = match mode {
            "PowerOn" | "Headless" => Some(PowerState::On),
            "DisplayOff" | "Ready" => Some(PowerState::Standby),
            _ => None,
        };
        status.details.insert("power-mode".to_string(), mode.to_string());
    }
    for field in ["model-name", "software-version", "user-device-name", "serial-number"] {
        if let Some(value) = element_text(info, field) {
            status.details.insert(field.to_string(), value.to_string());
        }
    }
    status
}

#[async_trait]
impl ProtocolAdapter for RokuAdapter {
    fn protocol(&self) -> ConnectionType {
        ConnectionType::Roku
    }

    async fn connect(&self, device: &Device) -> Result<()> {
        let mut guard = self.lock_session().await?;
        self.attach(&mut guard, device)
            .instrument(operation_span("connect", "roku"))
            .await
    }

    async fn send_command(&self, device: &Device, command: &DeviceCommand) -> Result<bool> {
        self.deliver(device, command, false).await
    }

    async fn send_to(&self, device: &Device, command: &DeviceCommand) -> Result<bool> {
        self.deliver(device, command, true).await
    }

    async fn status(&self) -> Option<DeviceStatus> {
        let mut guard = self.lock_session().await.ok()?;
        let base_url = guard.as_ref()?.base_url.clone();

        let info = match self
            .get(&format!("{}/query/device-info", base_url), self.config.status_timeout())
            .await
        {
            Ok((status, body)) if status.is_success() => body,
            Ok((status, _)) => {
                debug!("Roku device-info answered {}", status);
                return None;
            }
            Err(e) => {
                debug!("Roku status query failed: {}", e);
                self.drop_session(&mut guard, &e);
                return None;
            }
        };

        let mut status = parse_device_info(&info);
        if let Ok((code, body)) = self
            .get(&format!("{}/query/active-app", base_url), self.config.status_timeout())
            .await
        {
            if code.is_success() {
                status.current_app = element_text(&body, "app").map(str::to_string);
            }
        }
        Some(status)
    }

    async fn disconnect(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            info!("Releasing Roku {}", session.device.id);
        }
        self.monitor.reset();
    }

    async fn test_connection(&self, device: &Device) -> bool {
        match Self::base_url(device) {
            Ok(base_url) => self.probe(&base_url).await.is_ok(),
            Err(_) => false,
        }
    }

    fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    fn connected_device(&self) -> Option<Id> {
        self.monitor.device()
    }
}
