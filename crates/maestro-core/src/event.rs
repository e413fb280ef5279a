/*!
 * Event system for Maestro.
 *
 * This module provides the typed broadcast event bus and the outbound
 * notifier sink. The engine and the adapters report progress through a
 * [`Notifier`]; delivery is fire-and-forget and a failing notifier never fails
 * the operation that produced the event.
 */
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::types::Id;

/// Maximum number of events that can be buffered in a channel
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the control layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    /// One activity step finished, successfully or not
    StepCompleted {
        /// Activity the step belongs to
        activity_id: Id,
        /// The step's sort order within the activity
        step_order: i32,
        /// Target device of the step
        device_id: Id,
        /// Whether the step succeeded
        success: bool,
        /// When the step finished
        timestamp: DateTime<Utc>,
    },
    /// An activity run reached a terminal state
    ActivityCompleted {
        /// The activity that ran
        activity_id: Id,
        /// Overall outcome of the run
        success: bool,
        /// Wall-clock duration of the run
        elapsed: Duration,
    },
    /// An adapter gained or lost its session with a device
    DeviceStatusChanged {
        /// The device whose reachability changed
        device_id: Id,
        /// Whether the device is now online
        is_online: bool,
    },
}

impl ControlEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ControlEvent::StepCompleted { .. } => "step_completed",
            ControlEvent::ActivityCompleted { .. } => "activity_completed",
            ControlEvent::DeviceStatusChanged { .. } => "device_status_changed",
        }
    }
}

/// Outbound sink for [`ControlEvent`]s
///
/// Implementations must not block; anything slow belongs on the other side
/// of a channel.
pub trait Notifier: Send + Sync + Debug {
    /// Deliver an event
    fn notify(&self, event: ControlEvent) -> Result<()>;
}

/// Deliver an event, logging and swallowing any failure
pub fn notify_quietly(notifier: &dyn Notifier, event: ControlEvent) {
    let kind = event.kind();
    if let Err(e) = notifier.notify(event) {
        warn!("Failed to deliver {} event: {}", kind, e);
    }
}

/// A notifier that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, event: ControlEvent) -> Result<()> {
        trace!("Dropping {} event", event.kind());
        Ok(())
    }
}

/// A notifier that publishes onto a [`SharedEventBus`]
#[derive(Debug, Clone)]
pub struct EventBusNotifier {
    bus: SharedEventBus,
}

impl EventBusNotifier {
    /// Create a notifier publishing to `bus`
    pub fn new(bus: SharedEventBus) -> Self {
        Self { bus }
    }

    /// Subscribe to the events published through this notifier
    pub fn subscribe(&self) -> Result<broadcast::Receiver<ControlEvent>> {
        self.bus.subscribe::<ControlEvent>()
    }
}

impl Notifier for EventBusNotifier {
    fn notify(&self, event: ControlEvent) -> Result<()> {
        self.bus.publish(event).map(|_| ())
    }
}

type EventSender<T> = broadcast::Sender<T>;
type EventReceiver<T> = broadcast::Receiver<T>;

/// Event bus for publishing and subscribing to events, one channel per event type
#[derive(Debug)]
pub struct EventBus {
    channels: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    channel_capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            channel_capacity: capacity,
        }
    }

    fn sender<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventSender<T>> {
        let type_id = TypeId::of::<T>();
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::event("Failed to lock channels"))?;

        if let Some(sender) = channels.get(&type_id) {
            return sender
                .downcast_ref::<EventSender<T>>()
                .cloned()
                .ok_or_else(|| Error::event("Failed to downcast sender"));
        }

        let (sender, _) = broadcast::channel(self.channel_capacity);
        channels.insert(type_id, Box::new(sender.clone()));
        Ok(sender)
    }

    /// Publish an event, returning the number of receivers it reached
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        let sender = self.sender::<T>()?;

        if sender.receiver_count() == 0 {
            trace!("No receivers for event");
            return Ok(0);
        }

        sender
            .send(event)
            .map_err(|e| Error::event(format!("Failed to publish event: {}", e)))
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        Ok(self.sender::<T>()?.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared event bus that can be cloned
#[derive(Debug, Clone, Default)]
pub struct SharedEventBus(Arc<EventBus>);

impl SharedEventBus {
    /// Create a new shared event bus
    pub fn new() -> Self {
        Self(Arc::new(EventBus::new()))
    }

    /// Publish an event
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        self.0.publish(event)
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        self.0.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _event: ControlEvent) -> Result<()> {
            Err(Error::event("sink offline"))
        }
    }

    fn status_event(online: bool) -> ControlEvent {
        ControlEvent::DeviceStatusChanged {
            device_id: Id::from_string("tv"),
            is_online: online,
        }
    }

    #[tokio::test]
    async fn test_bus_notifier_delivers_in_order() -> Result<()> {
        let notifier = EventBusNotifier::new(SharedEventBus::new());
        let mut rx = notifier.subscribe()?;

        notifier.notify(status_event(true))?;
        notifier.notify(status_event(false))?;

        assert_eq!(rx.recv().await.map_err(|e| Error::event(e.to_string()))?, status_event(true));
        assert_eq!(rx.recv().await.map_err(|e| Error::event(e.to_string()))?, status_event(false));
        Ok(())
    }

    #[test]
    fn test_publish_without_receivers() -> Result<()> {
        let bus = EventBus::new();
        assert_eq!(bus.publish(status_event(true))?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_channels_are_per_type() -> Result<()> {
        #[derive(Debug, Clone, PartialEq)]
        struct Other(u32);

        let bus = SharedEventBus::new();
        let mut control_rx = bus.subscribe::<ControlEvent>()?;
        let mut other_rx = bus.subscribe::<Other>()?;

        bus.publish(Other(7))?;
        bus.publish(status_event(true))?;

        assert_eq!(other_rx.recv().await.map_err(|e| Error::event(e.to_string()))?, Other(7));
        assert_eq!(
            control_rx.recv().await.map_err(|e| Error::event(e.to_string()))?.kind(),
            "device_status_changed"
        );
        Ok(())
    }

    #[test]
    fn test_notify_quietly_swallows_failures() {
        notify_quietly(&FailingNotifier, status_event(true));
        notify_quietly(&NoopNotifier, status_event(false));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(status_event(true)).unwrap();
        assert_eq!(json["type"], "device_status_changed");
        assert_eq!(json["is_online"], true);
    }
}
