/*!
 * Maestro Engine
 *
 * Activity definitions, the stores they are read from, the activity executor
 * and the [`ControlService`] facade used by front ends.
 */

#![warn(missing_docs)]

pub mod activity;
pub mod error;
pub mod execution;
pub mod executor;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use activity::{Activity, ActivityBuilder, ActivityStep};
pub use error::{Error, Result};
pub use execution::{CommandOutcome, ExecutionResult, ExecutionState, StepError, StepResult};
pub use executor::{dispatch_command, ActivityExecutor};
pub use service::ControlService;
pub use store::{ActivityStore, Catalog, DeviceStore, InMemoryStore};

/// Maestro engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
