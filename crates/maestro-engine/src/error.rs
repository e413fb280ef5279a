/*!
 * Error types for the Maestro engine crate.
 */
use thiserror::Error;

use maestro_core::types::Id;
use maestro_devices::DeviceError;

/// Error type for Maestro engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// No activity with this id
    #[error("Activity not found: {0}")]
    ActivityNotFound(Id),

    /// No device with this id
    #[error("Device not found: {0}")]
    DeviceNotFound(Id),

    /// The activity is already being executed
    #[error("Activity {0} is already running")]
    AlreadyRunning(Id),

    /// Invalid activity or catalog definition
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backing store failed
    #[error("Store error: {0}")]
    Store(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] maestro_core::error::Error),
}

/// Result type for Maestro engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new validation error
    pub fn validation<S: AsRef<str>>(msg: S) -> Self {
        Error::Validation(msg.as_ref().to_string())
    }

    /// Create a new store error
    pub fn store<S: AsRef<str>>(msg: S) -> Self {
        Error::Store(msg.as_ref().to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Store(format!("Invalid catalog: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Store(err.to_string())
    }
}
