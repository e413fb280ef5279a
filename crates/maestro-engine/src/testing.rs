//! In-memory adapters and catalog helpers shared by the engine tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use maestro_core::types::Id;
use maestro_devices::device::{ConnectionErrorKind, Result};
use maestro_devices::{
    CommandType, ConnectionState, ConnectionType, Device, DeviceCommand, DeviceError, DeviceStatus,
    DeviceType, PowerState, ProtocolAdapter,
};

/// One observed adapter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect(String),
    Send(String, CommandType),
}

/// Call log shared by every adapter of a test
pub(crate) type CallLog = Arc<Mutex<Vec<Call>>>;

/// Adapter that records calls and answers from a script
#[derive(Debug)]
pub(crate) struct RecordingAdapter {
    kind: ConnectionType,
    log: CallLog,
    connected: Mutex<Option<Id>>,
    refused: HashSet<CommandType>,
    unreachable: HashSet<CommandType>,
    busy: HashSet<CommandType>,
}

impl RecordingAdapter {
    pub(crate) fn new(kind: ConnectionType, log: CallLog) -> Self {
        Self {
            kind,
            log,
            connected: Mutex::new(None),
            refused: HashSet::new(),
            unreachable: HashSet::new(),
            busy: HashSet::new(),
        }
    }

    /// Answer `Ok(false)` to `action`
    pub(crate) fn refusing(mut self, action: CommandType) -> Self {
        self.refused.insert(action);
        self
    }

    /// Fail `action` with a connection reset
    pub(crate) fn unreachable_on(mut self, action: CommandType) -> Self {
        self.unreachable.insert(action);
        self
    }

    /// Fail `action` as if another caller held the session
    pub(crate) fn busy_on(mut self, action: CommandType) -> Self {
        self.busy.insert(action);
        self
    }

    fn record(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }

    fn deliver(&self, device: &Device, command: &DeviceCommand) -> Result<bool> {
        self.record(Call::Send(device.id.to_string(), command.action));
        if self.unreachable.contains(&command.action) {
            return Err(DeviceError::connection(ConnectionErrorKind::Reset, "connection reset by peer"));
        }
        if self.busy.contains(&command.action) {
            return Err(DeviceError::Busy("adapter still in use".to_string()));
        }
        Ok(!self.refused.contains(&command.action))
    }
}

#[async_trait]
impl ProtocolAdapter for RecordingAdapter {
    fn protocol(&self) -> ConnectionType {
        self.kind
    }

    async fn connect(&self, device: &Device) -> Result<()> {
        self.record(Call::Connect(device.id.to_string()));
        *self.connected.lock().unwrap() = Some(device.id.clone());
        Ok(())
    }

    async fn send_command(&self, device: &Device, command: &DeviceCommand) -> Result<bool> {
        if self.connected.lock().unwrap().as_ref() != Some(&device.id) {
            return Err(DeviceError::invalid_state(format!("not connected to {}", device.id)));
        }
        self.deliver(device, command)
    }

    async fn send_to(&self, device: &Device, command: &DeviceCommand) -> Result<bool> {
        {
            let mut connected = self.connected.lock().unwrap();
            if connected.as_ref() != Some(&device.id) {
                self.record(Call::Connect(device.id.to_string()));
                *connected = Some(device.id.clone());
            }
        }
        self.deliver(device, command)
    }

    async fn status(&self) -> Option<DeviceStatus> {
        self.connected.lock().unwrap().as_ref().map(|_| DeviceStatus {
            is_online: true,
            power: Some(PowerState::On),
            ..Default::default()
        })
    }

    async fn disconnect(&self) {
        *self.connected.lock().unwrap() = None;
    }

    async fn test_connection(&self, _device: &Device) -> bool {
        true
    }

    fn connection_state(&self) -> ConnectionState {
        match *self.connected.lock().unwrap() {
            Some(_) => ConnectionState::Connected,
            None => ConnectionState::Disconnected,
        }
    }

    fn connected_device(&self) -> Option<Id> {
        self.connected.lock().unwrap().clone()
    }
}

pub(crate) fn tv() -> Device {
    Device::new("tv", "Living Room TV", DeviceType::Tv, ConnectionType::WebOs)
        .with_address("192.168.1.20", None)
}

pub(crate) fn shield() -> Device {
    Device::new("shield", "Shield", DeviceType::StreamingBox, ConnectionType::Adb)
        .with_address("192.168.1.21", None)
}

pub(crate) fn receiver() -> Device {
    Device::new("avr", "Receiver", DeviceType::Receiver, ConnectionType::BluetoothHid)
        .with_commands([CommandType::PowerOn, CommandType::PowerOff, CommandType::Input])
}

pub(crate) fn sends(log: &CallLog) -> Vec<(String, CommandType)> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|call| match call {
            Call::Send(device, action) => Some((device.clone(), *action)),
            Call::Connect(_) => None,
        })
        .collect()
}
