/*!
 * Protocol adapters.
 *
 * Each adapter is behind a cargo feature of the same name.
 */

#[cfg(feature = "adb")]
pub mod adb;

#[cfg(feature = "roku")]
pub mod roku;

#[cfg(feature = "adb")]
pub use adb::AdbAdapter;

#[cfg(feature = "roku")]
pub use roku::RokuAdapter;
