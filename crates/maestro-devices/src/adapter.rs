/*!
 * Protocol adapter contract.
 *
 * Every wire protocol Maestro speaks is wrapped in a [`ProtocolAdapter`]. An
 * adapter owns at most one session at a time, reports its lifecycle through
 * [`ConnectionState`] and classifies every failure as a [`DeviceError`].
 */
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use maestro_core::event::{notify_quietly, ControlEvent, Notifier};
use maestro_core::types::Id;
use maestro_core::utils::with_timeout;

use crate::device::{ConnectionState, ConnectionType, Device, DeviceCommand, DeviceStatus, Result};

/// Contract implemented by every protocol adapter
#[async_trait]
pub trait ProtocolAdapter: Send + Sync + Debug {
    /// The connection type this adapter serves
    fn protocol(&self) -> ConnectionType;

    /// Whether this adapter can drive `device`
    fn supports_device(&self, device: &Device) -> bool {
        device.connection_type == self.protocol()
    }

    /// Open a session with `device`
    ///
    /// Idempotent for the device already connected. Connecting a different
    /// device closes the previous session first.
    async fn connect(&self, device: &Device) -> Result<()>;

    /// Translate and send a command to `device` over the open session
    ///
    /// The session must already belong to `device`, `InvalidState` otherwise.
    /// `Ok(false)` means the device answered but refused the command.
    async fn send_command(&self, device: &Device, command: &DeviceCommand) -> Result<bool>;

    /// Attach to `device` when needed, then send `command`
    ///
    /// Both steps happen under one hold of the session, so a concurrent
    /// caller targeting another device cannot switch the session in between.
    async fn send_to(&self, device: &Device, command: &DeviceCommand) -> Result<bool>;

    /// Best-effort status snapshot, `None` when unavailable
    async fn status(&self) -> Option<DeviceStatus>;

    /// Close the session; safe to call in any state
    async fn disconnect(&self);

    /// Reachability probe that does not keep a session
    async fn test_connection(&self, device: &Device) -> bool;

    /// Current session state
    fn connection_state(&self) -> ConnectionState;

    /// Device the session belongs to, if any
    fn connected_device(&self) -> Option<Id>;

    /// Whether a usable session with `device_id` is open
    fn is_connected_to(&self, device_id: &Id) -> bool {
        self.connection_state().is_connected() && self.connected_device().as_ref() == Some(device_id)
    }
}

/// Run an adapter operation under `deadline`
///
/// Expiry is reported as a connection timeout.
pub async fn bounded<F, T>(deadline: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(deadline, async { Ok(operation.await) }).await?
}

#[derive(Debug)]
struct MonitorInner {
    state: ConnectionState,
    device: Option<Id>,
}

/// Connection bookkeeping shared by adapter implementations
///
/// Tracks the state machine and the owning device, and reports online/offline
/// transitions to the notifier.
#[derive(Debug)]
pub struct ConnectionMonitor {
    inner: RwLock<MonitorInner>,
    notifier: Arc<dyn Notifier>,
}

impl ConnectionMonitor {
    /// Create a monitor in the `Disconnected` state
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            inner: RwLock::new(MonitorInner {
                state: ConnectionState::Disconnected,
                device: None,
            }),
            notifier,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.read(|inner| inner.state)
    }

    /// Owning device
    pub fn device(&self) -> Option<Id> {
        self.read(|inner| inner.device.clone())
    }

    /// Whether the session is usable and belongs to `device_id`
    pub fn is_connected_to(&self, device_id: &Id) -> bool {
        self.read(|inner| inner.state.is_connected() && inner.device.as_ref() == Some(device_id))
    }

    /// Start a session attempt for `device_id`
    pub fn begin(&self, device_id: &Id) {
        self.update(Some(device_id.clone()), ConnectionState::Connecting);
    }

    /// Move to `state`, keeping the owning device
    pub fn transition(&self, state: ConnectionState) {
        let device = self.device();
        self.update(device, state);
    }

    /// Drop back to `Disconnected` and forget the device
    pub fn reset(&self) {
        self.update(None, ConnectionState::Disconnected);
    }

    /// Like [`reset`](Self::reset), but only while the session belongs to `device_id`
    ///
    /// Returns whether the monitor was reset.
    pub fn reset_if(&self, device_id: &Id) -> bool {
        self.update_when(
            |inner| inner.device.as_ref() == Some(device_id),
            None,
            ConnectionState::Disconnected,
        )
    }

    fn update(&self, device: Option<Id>, state: ConnectionState) {
        self.update_when(|_| true, device, state);
    }

    fn update_when(
        &self,
        applies: impl FnOnce(&MonitorInner) -> bool,
        device: Option<Id>,
        state: ConnectionState,
    ) -> bool {
        let (was_online, previous_device) = {
            let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if !applies(&inner) {
                return false;
            }
            let was_online = inner.state.is_connected();
            let previous_device = inner.device.clone();
            debug!("Connection state {:?} -> {:?}", inner.state, state);
            inner.state = state;
            inner.device = device.clone();
            (was_online, previous_device)
        };

        let is_online = state.is_connected();
        if was_online && (!is_online || previous_device != device) {
            if let Some(id) = previous_device {
                notify_quietly(
                    self.notifier.as_ref(),
                    ControlEvent::DeviceStatusChanged {
                        device_id: id,
                        is_online: false,
                    },
                );
            }
        }
        if is_online && !was_online {
            if let Some(id) = device {
                notify_quietly(
                    self.notifier.as_ref(),
                    ControlEvent::DeviceStatusChanged {
                        device_id: id,
                        is_online: true,
                    },
                );
            }
        }
        true
    }

    fn read<T>(&self, f: impl FnOnce(&MonitorInner) -> T) -> T {
        let inner = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<ControlEvent>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: ControlEvent) -> maestro_core::error::Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn online_flags(notifier: &RecordingNotifier) -> Vec<(String, bool)> {
        notifier
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ControlEvent::DeviceStatusChanged { device_id, is_online } => {
                    Some((device_id.to_string(), *is_online))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_monitor_reports_online_transitions() {
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = ConnectionMonitor::new(notifier.clone());
        let tv = Id::from("tv");

        monitor.begin(&tv);
        assert_eq!(monitor.state(), ConnectionState::Connecting);
        assert!(!monitor.is_connected_to(&tv));

        monitor.transition(ConnectionState::Authenticating);
        monitor.transition(ConnectionState::Authenticated);
        assert!(monitor.is_connected_to(&tv));

        monitor.reset();
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(monitor.device(), None);

        assert_eq!(
            online_flags(&notifier),
            vec![("tv".to_string(), true), ("tv".to_string(), false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_reports_connection_timeout() {
        let err = bounded(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), crate::device::ErrorKind::Timeout);

        let value = bounded(Duration::from_millis(50), async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_reset_if_ignores_other_devices() {
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = ConnectionMonitor::new(notifier.clone());
        let tv = Id::from("tv");

        monitor.begin(&tv);
        monitor.transition(ConnectionState::Connected);
        assert!(!monitor.reset_if(&Id::from("shield")));
        assert!(monitor.is_connected_to(&tv));

        assert!(monitor.reset_if(&tv));
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(
            online_flags(&notifier),
            vec![("tv".to_string(), true), ("tv".to_string(), false)]
        );
    }

    #[test]
    fn test_reset_when_idle_is_silent() {
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = ConnectionMonitor::new(notifier.clone());
        monitor.reset();
        monitor.reset();
        assert!(online_flags(&notifier).is_empty());
    }
}
