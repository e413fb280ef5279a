/*!
 * Maestro Core
 *
 * This crate provides the shared foundation for the Maestro system:
 * identifiers, errors, configuration, logging, the event bus and notifier
 * sink, and bounded/cancellable async helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Maestro core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
