/*!
 * Android debug bridge adapter.
 *
 * Drives Android TV style devices over the ADB TCP transport: banner and
 * pairing handshake, then one `shell:` stream per command. The adapter keeps a
 * single session; operations on it are serialised and wait at most
 * `busy_timeout` for their turn. A session whose socket the device drops is
 * reported offline as soon as the reader notices.
 */
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn, Instrument};

use maestro_core::config::AdapterConfig;
use maestro_core::event::Notifier;
use maestro_core::logging::operation_span;
use maestro_core::types::Id;

use crate::adapter::{bounded, ConnectionMonitor, ProtocolAdapter};
use crate::device::{
    ConnectionState, ConnectionType, Device, DeviceCommand, DeviceError, DeviceStatus, PowerState,
    Result,
};
use crate::translator::{CommandTranslator, ProtocolOperation};

pub mod auth;
pub mod connection;
pub mod message;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{ChallengeSigner, HmacSigner};
pub use connection::{AdbConnection, ShellOutcome};
pub use message::{AdbMessage, Command, FrameBuffer, FrameError};
pub use stream::StreamTable;

/// Shell output fragments that mean the device refused the command
const REFUSAL_MARKERS: &[&str] = &[
    "monkey aborted",
    "Error:",
    "Exception",
    "inaccessible or not found",
    "Unknown command",
];

#[derive(Debug)]
struct AdbSession {
    device: Device,
    connection: AdbConnection,
}

impl AdbSession {
    fn serves(&self, device_id: &Id) -> bool {
        &self.device.id == device_id && self.connection.is_alive()
    }
}

type SessionSlot = Option<AdbSession>;

/// ADB protocol adapter
#[derive(Debug)]
pub struct AdbAdapter {
    config: AdapterConfig,
    monitor: Arc<ConnectionMonitor>,
    session: Mutex<SessionSlot>,
    translator: CommandTranslator,
}

impl AdbAdapter {
    /// Create an adapter; a configured pairing key must be valid base64
    pub fn new(config: AdapterConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        if let Some(key) = config.adb_auth_key.as_deref() {
            HmacSigner::from_base64(key)?;
        }
        Ok(Self {
            config,
            monitor: Arc::new(ConnectionMonitor::new(notifier)),
            session: Mutex::new(None),
            translator: CommandTranslator::new(),
        })
    }

    async fn lock_session(&self) -> Result<MutexGuard<'_, SessionSlot>> {
        match tokio::time::timeout(self.config.busy_timeout(), self.session.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => Err(DeviceError::Busy(format!(
                "ADB session still in use after {} ms",
                self.config.busy_timeout_ms
            ))),
        }
    }

    async fn open_session(&self, device: &Device) -> Result<AdbSession> {
        let address = device.socket_address()?;
        let signer = HmacSigner::for_device(self.config.adb_auth_key.as_deref(), device)?;

        debug!("Opening ADB transport to {}", address);
        let stream = bounded(self.config.connect_timeout(), async {
            TcpStream::connect(&address).await.map_err(DeviceError::from)
        })
        .await?;
        stream.set_nodelay(true)?;

        let mut connection = AdbConnection::start(stream, self.config.adb_max_payload);
        let handshake = connection
            .handshake(
                &self.config.adb_system_identity,
                self.config.adb_max_payload,
                signer.as_ref().map(|s| s as &dyn ChallengeSigner),
                &self.monitor,
                self.config.connect_timeout(),
            )
            .await;

        match handshake {
            Ok(state) => {
                self.monitor.transition(state);
                self.watch(&connection, &device.id);
                Ok(AdbSession {
                    device: device.clone(),
                    connection,
                })
            }
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    /// Mark the device offline once the device drops the socket
    fn watch(&self, connection: &AdbConnection, device_id: &Id) {
        let lost = connection.lost();
        let monitor = self.monitor.clone();
        let device_id = device_id.clone();
        tokio::spawn(async move {
            if lost.await && monitor.reset_if(&device_id) {
                warn!("ADB device {} dropped the connection", device_id);
            }
        });
    }

    /// Reuse the session with `device` or replace whatever session is open
    async fn attach(&self, slot: &mut SessionSlot, device: &Device) -> Result<()> {
        if !self.supports_device(device) {
            return Err(DeviceError::Configuration(format!(
                "Device {} uses {}, not adb",
                device.id, device.connection_type
            )));
        }
        if slot.as_ref().is_some_and(|session| session.serves(&device.id)) {
            debug!("Reusing ADB session with {}", device.id);
            return Ok(());
        }
        if let Some(previous) = slot.take() {
            info!("Closing ADB session with {}", previous.device.id);
            previous.connection.close().await;
            self.monitor.reset();
        }

        self.monitor.begin(&device.id);
        match self.open_session(device).await {
            Ok(session) => {
                info!("ADB session with {} established ({:?})", device.id, self.monitor.state());
                *slot = Some(session);
                Ok(())
            }
            Err(e) => {
                self.monitor.reset();
                Err(e)
            }
        }
    }

    /// Run a shell command on the open session
    ///
    /// Transport failures, timeouts included, tear the session down.
    async fn run_shell(&self, slot: &mut SessionSlot, command: &str, deadline: Duration) -> Result<ShellOutcome> {
        let session = slot
            .as_mut()
            .ok_or_else(|| DeviceError::invalid_state("ADB adapter is not connected"))?;

        let outcome = bounded(deadline, session.connection.shell(command)).await;
        if let Err(e @ DeviceError::Connection { .. }) = &outcome {
            warn!("ADB session with {} lost: {}", session.device.id, e);
            if let Some(session) = slot.take() {
                session.connection.close().await;
            }
            self.monitor.reset();
        }
        outcome
    }

    fn shell_for(&self, command: &DeviceCommand) -> Result<String> {
        match self.translator.translate(ConnectionType::Adb, command)? {
            ProtocolOperation::AdbShell(shell) => Ok(shell),
            other => Err(DeviceError::Configuration(format!("ADB cannot perform {:?}", other))),
        }
    }

    /// Send over the locked session, attaching to `device` first when `attach` is set
    async fn deliver(&self, device: &Device, command: &DeviceCommand, attach: bool) -> Result<bool> {
        let shell = self.shell_for(command)?;
        let mut guard = self.lock_session().await?;

        if attach {
            self.attach(&mut guard, device)
                .instrument(operation_span("connect", "adb"))
                .await?;
        } else if !guard.as_ref().is_some_and(|session| session.serves(&device.id)) {
            return Err(DeviceError::invalid_state(format!(
                "ADB adapter is not connected to {}",
                device.id
            )));
        }

        debug!("ADB {} on {} -> {}", command, device.id, shell);
        match self.run_shell(&mut guard, &shell, self.config.send_timeout()).await? {
            ShellOutcome::Completed(output) => {
                let output = String::from_utf8_lossy(&output);
                if is_refusal(&output) {
                    warn!("Device refused {}: {}", command, output.trim());
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            ShellOutcome::Refused => {
                warn!("Device refused shell stream for {}", command);
                Ok(false)
            }
        }
    }
}

/// Interpret `dumpsys power` output
fn parse_power_status(output: &str) -> DeviceStatus {
    let mut status = DeviceStatus {
        is_online: true,
        ..Default::default()
    };

    let wakefulness = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("mWakefulness="))
        .next()
        .map(str::trim);

    if let Some(value) = wakefulness {
        status.power = match value {
            "Awake" => Some(PowerState::On),
            "Dozing" | "Dreaming" => Some(PowerState::Standby),
            "Asleep" => Some(PowerState::Off),
            _ => None,
        };
        status.details.insert("wakefulness".to_string(), value.to_string());
    }
    status
}

fn is_refusal(output: &str) -> bool {
    REFUSAL_MARKERS.iter().any(|marker| output.contains(marker))
}

#[async_trait]
impl ProtocolAdapter for AdbAdapter {
    fn protocol(&self) -> ConnectionType {
        ConnectionType::Adb
    }

    async fn connect(&self, device: &Device) -> Result<()> {
        let mut guard = self.lock_session().await?;
        self.attach(&mut guard, device)
            .instrument(operation_span("connect", "adb"))
            .await
    }

    async fn send_command(&self, device: &Device, command: &DeviceCommand) -> Result<bool> {
        self.deliver(device, command, false).await
    }

    async fn send_to(&self, device: &Device, command: &DeviceCommand) -> Result<bool> {
        self.deliver(device, command, true).await
    }

    async fn status(&self) -> Option<DeviceStatus> {
        if !self.monitor.state().is_connected() {
            return None;
        }
        let mut guard = self.lock_session().await.ok()?;
        match self
            .run_shell(&mut guard, "dumpsys power", self.config.status_timeout())
            .await
        {
            Ok(ShellOutcome::Completed(output)) => Some(parse_power_status(&String::from_utf8_lossy(&output))),
            Ok(ShellOutcome::Refused) => None,
            Err(e) => {
                debug!("ADB status query failed: {}", e);
                None
            }
        }
    }

    async fn disconnect(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            info!("Disconnecting ADB session with {}", session.device.id);
            session.connection.close().await;
        }
        self.monitor.reset();
    }

    async fn test_connection(&self, device: &Device) -> bool {
        let Ok(address) = device.socket_address() else {
            return false;
        };
        bounded(self.config.connect_timeout(), async {
            TcpStream::connect(&address).await.map_err(DeviceError::from)
        })
        .await
        .is_ok()
    }

    fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    fn connected_device(&self) -> Option<Id> {
        self.monitor.device()
    }
}
