/*!
 * Maestro Devices
 *
 * Device model, protocol adapters, command translation and the controller
 * registry that maps a connection type to its adapter.
 */

#![warn(missing_docs)]

pub mod adapter;
pub mod device;
pub mod discovery;
pub mod protocols;
pub mod registry;
pub mod translator;

pub use adapter::ProtocolAdapter;
pub use device::{
    CommandPayload, CommandType, ConnectionState, ConnectionType, Device, DeviceCommand, DeviceError,
    DeviceStatus, DeviceType, ErrorKind, PowerState,
};
pub use discovery::{DeviceDiscoverer, DeviceDiscovery, DiscoveredDevice};
pub use registry::{default_adapters, ControllerRegistry, RegistryBuilder};
pub use translator::{CommandTranslator, ProtocolOperation};

/// Maestro devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocols compiled into this build
pub fn available_protocols() -> Vec<ConnectionType> {
    let mut protocols = Vec::new();

    #[cfg(feature = "adb")]
    protocols.push(ConnectionType::Adb);

    #[cfg(feature = "roku")]
    protocols.push(ConnectionType::Roku);

    protocols
}
