/*!
 * Prelude module for Maestro Core.
 *
 * Re-exports the types most crates in the workspace reach for.
 */

pub use crate::error::{Error, Result};

pub use crate::types::{millis, Id, Millis};

pub use crate::event::{
    notify_quietly, ControlEvent, EventBus, EventBusNotifier, NoopNotifier, Notifier,
    SharedEventBus,
};

pub use crate::config::{AdapterConfig, Config, ConfigBuilder, EngineConfig};

pub use crate::utils::{duration_to_millis, sleep_cancellable, with_timeout};

pub use tokio_util::sync::CancellationToken;
pub use tracing::{debug, error, info, trace, warn};
