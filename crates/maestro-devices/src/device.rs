/*!
 * Device model and error taxonomy.
 *
 * This module defines the devices Maestro controls, the logical commands sent
 * to them, the per-adapter connection state and the error classification every
 * adapter reports through.
 */
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use maestro_core::{error::Error as CoreError, types::Id};

/// Why a transport-level operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    /// The operation exceeded its deadline
    Timeout,
    /// The remote end refused the connection
    Refused,
    /// The connection was reset or aborted mid-operation
    Reset,
    /// The remote end cannot be reached or the address is unusable
    Unreachable,
    /// The remote end closed the connection
    Closed,
    /// Any other I/O failure
    Other,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timed out",
            Self::Refused => "refused",
            Self::Reset => "reset",
            Self::Unreachable => "unreachable",
            Self::Closed => "closed",
            Self::Other => "failed",
        };
        f.write_str(s)
    }
}

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The transport is unreachable, timed out or was reset
    #[error("Connection {kind}: {message}")]
    Connection {
        /// Classification of the failure
        kind: ConnectionErrorKind,
        /// Human readable detail
        message: String,
    },

    /// Pairing or handshake was rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An operation was invoked out of protocol sequence
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No translation exists for the command on this adapter kind
    #[error("Command {command} is not supported by {kind} adapters")]
    UnsupportedCommand {
        /// The logical command
        command: CommandType,
        /// The adapter kind that has no mapping
        kind: ConnectionType,
    },

    /// A decoded frame failed its header or checksum validation
    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    /// The adapter is already executing an operation
    #[error("Adapter busy: {0}")]
    Busy(String),

    /// No adapter is registered for the connection type
    #[error("No adapter registered for connection type {0}")]
    NotSupported(ConnectionType),

    /// The device or adapter configuration is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(kind: ConnectionErrorKind, message: S) -> Self {
        DeviceError::Connection {
            kind,
            message: message.into(),
        }
    }

    /// Create a connection timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::connection(ConnectionErrorKind::Timeout, message)
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        DeviceError::InvalidState(message.into())
    }

    /// Caller-facing classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Connection {
                kind: ConnectionErrorKind::Timeout,
                ..
            } => ErrorKind::Timeout,
            DeviceError::Connection { .. } => ErrorKind::Connection,
            DeviceError::Authentication(_) => ErrorKind::Authentication,
            DeviceError::InvalidState(_) => ErrorKind::InvalidState,
            DeviceError::UnsupportedCommand { .. } => ErrorKind::UnsupportedCommand,
            DeviceError::CorruptFrame(_) => ErrorKind::CorruptFrame,
            DeviceError::Busy(_) => ErrorKind::Busy,
            DeviceError::NotSupported(_) => ErrorKind::NotSupported,
            DeviceError::Configuration(_) => ErrorKind::Configuration,
            DeviceError::Core(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failure came from the transport rather than from a contract violation
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DeviceError::Connection { .. }
                | DeviceError::Authentication(_)
                | DeviceError::CorruptFrame(_)
                | DeviceError::Busy(_)
        )
    }
}

impl From<io::Error> for DeviceError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut => ConnectionErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ConnectionErrorKind::Reset,
            io::ErrorKind::UnexpectedEof => ConnectionErrorKind::Closed,
            io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::InvalidInput => ConnectionErrorKind::Unreachable,
            _ => ConnectionErrorKind::Other,
        };
        DeviceError::connection(kind, err.to_string())
    }
}

impl From<CoreError> for DeviceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Timeout(msg) => DeviceError::timeout(msg),
            other => DeviceError::Core(other),
        }
    }
}

/// Caller-facing error classification, rendered by API and UI layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Device unreachable, refused or reset
    Connection,
    /// An operation exceeded its deadline
    Timeout,
    /// Pairing was rejected
    Authentication,
    /// Protocol sequence violation
    InvalidState,
    /// The command has no mapping for the device's protocol
    UnsupportedCommand,
    /// A malformed frame was received
    CorruptFrame,
    /// The adapter was occupied by another operation
    Busy,
    /// No adapter serves the device's connection type
    NotSupported,
    /// Broken configuration
    Configuration,
    /// The device answered but refused the command
    Rejected,
    /// A referenced device does not exist
    NotFound,
    /// Anything else
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "device unreachable",
            Self::Timeout => "device timed out",
            Self::Authentication => "pairing rejected",
            Self::InvalidState => "protocol sequence violation",
            Self::UnsupportedCommand => "command not supported",
            Self::CorruptFrame => "corrupt response",
            Self::Busy => "device busy",
            Self::NotSupported => "no controller for device",
            Self::Configuration => "configuration error",
            Self::Rejected => "command rejected by device",
            Self::NotFound => "device not found",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Kind of consumer electronics device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Television
    Tv,
    /// AV receiver
    Receiver,
    /// Streaming box or stick
    StreamingBox,
    /// Game console
    Console,
    /// Soundbar
    Soundbar,
    /// Projector
    Projector,
    /// Anything else
    Other,
}

/// Wire protocol family used to reach a device; selects the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Android debug bridge over TCP
    Adb,
    /// Roku External Control Protocol over HTTP
    Roku,
    /// LG webOS SSAP over WebSocket
    WebOs,
    /// Bluetooth HID remote
    BluetoothHid,
    /// Apple Companion / media remote protocol
    AppleRemote,
}

impl ConnectionType {
    /// Every connection type
    pub const ALL: [ConnectionType; 5] = [
        ConnectionType::Adb,
        ConnectionType::Roku,
        ConnectionType::WebOs,
        ConnectionType::BluetoothHid,
        ConnectionType::AppleRemote,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Adb => "adb",
            ConnectionType::Roku => "roku",
            ConnectionType::WebOs => "web_os",
            ConnectionType::BluetoothHid => "bluetooth_hid",
            ConnectionType::AppleRemote => "apple_remote",
        }
    }

    /// Port used when the device does not configure one
    pub fn default_port(&self) -> Option<u16> {
        match self {
            ConnectionType::Adb => Some(5555),
            ConnectionType::Roku => Some(8060),
            ConnectionType::WebOs => Some(3000),
            ConnectionType::AppleRemote => Some(49153),
            ConnectionType::BluetoothHid => None,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters; only the subset relevant to the connection type is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// IP address or hostname
    #[serde(default)]
    pub host: Option<String>,
    /// TCP port, defaulted per connection type
    #[serde(default)]
    pub port: Option<u16>,
    /// Hardware address, for Bluetooth and wake-on-LAN
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Pairing token or key material obtained earlier
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Logical, protocol-independent action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Toggle power
    Power,
    /// Wake the device
    PowerOn,
    /// Put the device to sleep
    PowerOff,
    /// Raise volume one step
    VolumeUp,
    /// Lower volume one step
    VolumeDown,
    /// Toggle mute
    Mute,
    /// Next channel
    ChannelUp,
    /// Previous channel
    ChannelDown,
    /// D-pad up
    Up,
    /// D-pad down
    Down,
    /// D-pad left
    Left,
    /// D-pad right
    Right,
    /// D-pad select
    Select,
    /// Back
    Back,
    /// Home screen
    Home,
    /// Menu or options
    Menu,
    /// Play
    Play,
    /// Pause
    Pause,
    /// Toggle play/pause
    PlayPause,
    /// Stop playback
    Stop,
    /// Switch input; payload names the input ("HDMI1")
    Input,
    /// Launch an application; payload names the app
    AppLaunch,
    /// Type text; payload is the text
    Text,
    /// Touch at coordinates
    Tap,
    /// Raw protocol-specific code carried in the payload
    Custom,
}

impl CommandType {
    /// Every command type
    pub const ALL: [CommandType; 25] = [
        CommandType::Power,
        CommandType::PowerOn,
        CommandType::PowerOff,
        CommandType::VolumeUp,
        CommandType::VolumeDown,
        CommandType::Mute,
        CommandType::ChannelUp,
        CommandType::ChannelDown,
        CommandType::Up,
        CommandType::Down,
        CommandType::Left,
        CommandType::Right,
        CommandType::Select,
        CommandType::Back,
        CommandType::Home,
        CommandType::Menu,
        CommandType::Play,
        CommandType::Pause,
        CommandType::PlayPause,
        CommandType::Stop,
        CommandType::Input,
        CommandType::AppLaunch,
        CommandType::Text,
        CommandType::Tap,
        CommandType::Custom,
    ];

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Power => "power",
            CommandType::PowerOn => "power_on",
            CommandType::PowerOff => "power_off",
            CommandType::VolumeUp => "volume_up",
            CommandType::VolumeDown => "volume_down",
            CommandType::Mute => "mute",
            CommandType::ChannelUp => "channel_up",
            CommandType::ChannelDown => "channel_down",
            CommandType::Up => "up",
            CommandType::Down => "down",
            CommandType::Left => "left",
            CommandType::Right => "right",
            CommandType::Select => "select",
            CommandType::Back => "back",
            CommandType::Home => "home",
            CommandType::Menu => "menu",
            CommandType::Play => "play",
            CommandType::Pause => "pause",
            CommandType::PlayPause => "play_pause",
            CommandType::Stop => "stop",
            CommandType::Input => "input",
            CommandType::AppLaunch => "app_launch",
            CommandType::Text => "text",
            CommandType::Tap => "tap",
            CommandType::Custom => "custom",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        CommandType::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| DeviceError::Configuration(format!("Unknown command '{}'", s)))
    }
}

/// Adapter-specific argument of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPayload {
    /// Raw protocol code (key name, shell line, HID usage)
    Code(String),
    /// Free text: app name, input name, text to type
    Text(String),
    /// Screen coordinates
    Coordinates {
        /// Horizontal position
        x: i32,
        /// Vertical position
        y: i32,
    },
}

impl CommandPayload {
    /// Textual content of `Code` and `Text` payloads
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CommandPayload::Code(s) | CommandPayload::Text(s) => Some(s),
            CommandPayload::Coordinates { .. } => None,
        }
    }
}

/// A logical command with optional payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// The action to perform
    pub action: CommandType,
    /// Adapter-specific argument
    #[serde(default)]
    pub payload: Option<CommandPayload>,
    /// Settle time after the command is sent, in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
}

impl DeviceCommand {
    /// A command without payload
    pub fn new(action: CommandType) -> Self {
        Self {
            action,
            payload: None,
            delay_ms: 0,
        }
    }

    /// A command carrying free text
    pub fn with_text<S: Into<String>>(action: CommandType, text: S) -> Self {
        Self::new(action).payload(CommandPayload::Text(text.into()))
    }

    /// A `Custom` command carrying a raw code
    pub fn custom<S: Into<String>>(code: S) -> Self {
        Self::new(CommandType::Custom).payload(CommandPayload::Code(code.into()))
    }

    /// Set the payload
    pub fn payload(mut self, payload: CommandPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the settle delay
    pub fn delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Textual payload, if any
    pub fn text(&self) -> Option<&str> {
        self.payload.as_ref().and_then(CommandPayload::as_text)
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(CommandPayload::Coordinates { x, y }) => write!(f, "{}({}, {})", self.action, x, y),
            Some(p) => write!(f, "{}({})", self.action, p.as_text().unwrap_or_default()),
            None => write!(f, "{}", self.action),
        }
    }
}

/// A controllable device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Opaque identity
    pub id: Id,
    /// Display name
    pub name: String,
    /// Kind of device
    pub device_type: DeviceType,
    /// Protocol family, selects the adapter
    pub connection_type: ConnectionType,
    /// Connection-type specific parameters
    #[serde(default)]
    pub connection: ConnectionParams,
    /// Declared command set; empty means undeclared
    #[serde(default)]
    pub supported_commands: BTreeSet<CommandType>,
}

impl Device {
    /// Create a device with empty connection parameters
    pub fn new<I: Into<Id>, S: Into<String>>(
        id: I,
        name: S,
        device_type: DeviceType,
        connection_type: ConnectionType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            device_type,
            connection_type,
            connection: ConnectionParams::default(),
            supported_commands: BTreeSet::new(),
        }
    }

    /// Set host and optional port
    pub fn with_address<S: Into<String>>(mut self, host: S, port: Option<u16>) -> Self {
        self.connection.host = Some(host.into());
        self.connection.port = port;
        self
    }

    /// Set the pairing token
    pub fn with_auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.connection.auth_token = Some(token.into());
        self
    }

    /// Declare the supported command set
    pub fn with_commands<I: IntoIterator<Item = CommandType>>(mut self, commands: I) -> Self {
        self.supported_commands = commands.into_iter().collect();
        self
    }

    /// Whether the device accepts `command`; undeclared sets accept everything
    pub fn supports_command(&self, command: CommandType) -> bool {
        self.supported_commands.is_empty() || self.supported_commands.contains(&command)
    }

    /// `host:port` for socket-based connection types
    pub fn socket_address(&self) -> Result<String> {
        let host = self.connection.host.as_deref().ok_or_else(|| {
            DeviceError::Configuration(format!("Device {} has no host configured", self.id))
        })?;
        let port = self
            .connection
            .port
            .or_else(|| self.connection_type.default_port())
            .ok_or_else(|| {
                DeviceError::Configuration(format!("Device {} has no port configured", self.id))
            })?;
        Ok(format!("{}:{}", host, port))
    }
}

/// Lifecycle of an adapter's session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session
    Disconnected,
    /// Transport being opened
    Connecting,
    /// Transport open and usable
    Connected,
    /// Pairing challenge in progress
    Authenticating,
    /// Paired session established
    Authenticated,
}

impl ConnectionState {
    /// Whether commands may be sent in this state
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Authenticated)
    }
}

/// Power state reported by a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Fully on
    On,
    /// Standby with the display off
    Standby,
    /// Off or asleep
    Off,
}

/// Best-effort snapshot returned by a status query
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Whether the device answered
    pub is_online: bool,
    /// Power state, when the protocol exposes it
    pub power: Option<PowerState>,
    /// Foreground application, when known
    pub current_app: Option<String>,
    /// Protocol-specific extra fields
    pub details: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let refused: DeviceError = io::Error::from(io::ErrorKind::ConnectionRefused).into();
        assert!(matches!(
            refused,
            DeviceError::Connection {
                kind: ConnectionErrorKind::Refused,
                ..
            }
        ));
        assert_eq!(refused.kind(), ErrorKind::Connection);

        let timed_out: DeviceError = io::Error::from(io::ErrorKind::TimedOut).into();
        assert_eq!(timed_out.kind(), ErrorKind::Timeout);

        let eof: DeviceError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(
            eof,
            DeviceError::Connection {
                kind: ConnectionErrorKind::Closed,
                ..
            }
        ));
    }

    #[test]
    fn test_core_timeout_becomes_connection_timeout() {
        let err: DeviceError = CoreError::timeout("connect").into();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_transport());

        let err: DeviceError = CoreError::other("boom").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_command_type_parsing() {
        assert_eq!("app-launch".parse::<CommandType>().unwrap(), CommandType::AppLaunch);
        assert_eq!("VOLUME_UP".parse::<CommandType>().unwrap(), CommandType::VolumeUp);
        assert!("teleport".parse::<CommandType>().is_err());

        for command in CommandType::ALL {
            assert_eq!(command.as_str().parse::<CommandType>().unwrap(), command);
        }
    }

    #[test]
    fn test_device_socket_address_defaults_port() {
        let tv = Device::new("tv", "TV", DeviceType::Tv, ConnectionType::Adb)
            .with_address("10.0.0.5", None);
        assert_eq!(tv.socket_address().unwrap(), "10.0.0.5:5555");

        let roku = Device::new("roku", "Roku", DeviceType::StreamingBox, ConnectionType::Roku)
            .with_address("10.0.0.6", Some(9000));
        assert_eq!(roku.socket_address().unwrap(), "10.0.0.6:9000");

        let bare = Device::new("hid", "Remote", DeviceType::Other, ConnectionType::BluetoothHid);
        assert!(matches!(bare.socket_address(), Err(DeviceError::Configuration(_))));
    }

    #[test]
    fn test_supported_commands() {
        let open = Device::new("a", "A", DeviceType::Tv, ConnectionType::Adb);
        assert!(open.supports_command(CommandType::Tap));

        let declared = open.with_commands([CommandType::Power, CommandType::VolumeUp]);
        assert!(declared.supports_command(CommandType::Power));
        assert!(!declared.supports_command(CommandType::Tap));
    }

    #[test]
    fn test_device_deserializes_from_toml_shape() {
        let json = serde_json::json!({
            "id": "shield",
            "name": "Shield",
            "device_type": "streaming_box",
            "connection_type": "adb",
            "connection": { "host": "192.168.1.30" },
            "supported_commands": ["power", "app_launch"]
        });
        let device: Device = serde_json::from_value(json).unwrap();
        assert_eq!(device.connection_type, ConnectionType::Adb);
        assert_eq!(device.connection.port, None);
        assert!(device.supports_command(CommandType::AppLaunch));

        let command: DeviceCommand =
            serde_json::from_value(serde_json::json!({"action": "app_launch", "payload": {"text": "Netflix"}}))
                .unwrap();
        assert_eq!(command.text(), Some("Netflix"));
        assert_eq!(command.to_string(), "app_launch(Netflix)");
    }

    #[test]
    fn test_connection_state_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Authenticated.is_connected());
        assert!(!ConnectionState::Authenticating.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
    }
}
