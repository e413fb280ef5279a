/*!
 * Activity definitions.
 *
 * An activity is a named, ordered list of device-command steps executed as a
 * unit ("Watch Movie" = TV on, receiver to HDMI 1, launch Netflix). Sort
 * orders are unique within an activity; this is checked whenever an activity
 * is built or deserialized, so every `Activity` value is valid.
 */
use std::collections::HashSet;
use std::convert::TryFrom;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use maestro_core::types::{millis, Id, Millis};
use maestro_devices::DeviceCommand;

use crate::error::{Error, Result};

fn default_required() -> bool {
    true
}

/// One step of an activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStep {
    /// Step id
    #[serde(default)]
    pub id: Id,
    /// Target device
    pub device_id: Id,
    /// Command sent to the device
    pub command: DeviceCommand,
    /// Wait before the command is sent
    #[serde(default)]
    pub delay_before_ms: Millis,
    /// Wait after the command (and its settle time)
    #[serde(default)]
    pub delay_after_ms: Millis,
    /// Position within the activity; unique per activity
    pub sort_order: i32,
    /// Whether a failure aborts the rest of the activity
    #[serde(default = "default_required")]
    pub is_required: bool,
}

impl ActivityStep {
    /// Create a required step without delays
    pub fn new<I: Into<Id>>(device_id: I, command: DeviceCommand, sort_order: i32) -> Self {
        Self {
            id: Id::new(),
            device_id: device_id.into(),
            command,
            delay_before_ms: 0,
            delay_after_ms: 0,
            sort_order,
            is_required: true,
        }
    }

    /// Set the step id
    pub fn with_id<I: Into<Id>>(mut self, id: I) -> Self {
        self.id = id.into();
        self
    }

    /// Wait `ms` before sending
    pub fn delay_before(mut self, ms: Millis) -> Self {
        self.delay_before_ms = ms;
        self
    }

    /// Wait `ms` after sending
    pub fn delay_after(mut self, ms: Millis) -> Self {
        self.delay_after_ms = ms;
        self
    }

    /// Mark the step optional: its failure is recorded but does not abort
    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }

    /// Delay before as a [`Duration`]
    pub fn before_delay(&self) -> Duration {
        millis(self.delay_before_ms)
    }

    /// Delay after as a [`Duration`]
    pub fn after_delay(&self) -> Duration {
        millis(self.delay_after_ms)
    }
}

/// Serialized form, validated into [`Activity`]
#[derive(Debug, Deserialize)]
struct ActivityDefinition {
    #[serde(default)]
    id: Id,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    steps: Vec<ActivityStep>,
}

/// A named, ordered sequence of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ActivityDefinition")]
pub struct Activity {
    id: Id,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    steps: Vec<ActivityStep>,
}

impl TryFrom<ActivityDefinition> for Activity {
    type Error = Error;

    fn try_from(def: ActivityDefinition) -> Result<Self> {
        Activity::new(def.id, def.name, def.description, def.steps)
    }
}

impl Activity {
    /// Create an activity, rejecting duplicate sort orders
    pub fn new<I: Into<Id>, S: Into<String>>(
        id: I,
        name: S,
        description: Option<String>,
        steps: Vec<ActivityStep>,
    ) -> Result<Self> {
        let id = id.into();
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::validation(format!("Activity {} has no name", id)));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.sort_order) {
                return Err(Error::validation(format!(
                    "Activity '{}' has two steps with sort order {}",
                    name, step.sort_order
                )));
            }
        }

        Ok(Self {
            id,
            name,
            description,
            steps,
        })
    }

    /// Start building an activity
    pub fn builder<S: Into<String>>(name: S) -> ActivityBuilder {
        ActivityBuilder::new(name)
    }

    /// Activity id
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Steps in definition order
    pub fn steps(&self) -> &[ActivityStep] {
        &self.steps
    }

    /// A copy of the steps in ascending sort order
    pub fn sorted_steps(&self) -> Vec<ActivityStep> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.sort_order);
        steps
    }
}

/// Builder for [`Activity`]
#[derive(Debug)]
pub struct ActivityBuilder {
    id: Id,
    name: String,
    description: Option<String>,
    steps: Vec<ActivityStep>,
}

impl ActivityBuilder {
    /// Create a builder with a fresh id
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            id: Id::new(),
            name: name.into(),
            description: None,
            steps: Vec::new(),
        }
    }

    /// Set the activity id
    pub fn id<I: Into<Id>>(mut self, id: I) -> Self {
        self.id = id.into();
        self
    }

    /// Set the description
    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a step
    pub fn step(mut self, step: ActivityStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a required step ordered after the existing ones
    pub fn then<I: Into<Id>>(self, device_id: I, command: DeviceCommand) -> Self {
        let order = self.steps.iter().map(|s| s.sort_order).max().map_or(1, |o| o + 1);
        self.step(ActivityStep::new(device_id, command, order))
    }

    /// Validate and build
    pub fn build(self) -> Result<Activity> {
        Activity::new(self.id, self.name, self.description, self.steps)
    }
}

#[cfg(test)]
mod tests {
    use maestro_devices::CommandType;

    use super::*;

    #[test]
    fn test_duplicate_sort_order_rejected() {
        let err = Activity::builder("Broken")
            .step(ActivityStep::new("tv", DeviceCommand::new(CommandType::PowerOn), 1))
            .step(ActivityStep::new("avr", DeviceCommand::new(CommandType::PowerOn), 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_sorted_snapshot() {
        let activity = Activity::builder("Watch Movie")
            .step(ActivityStep::new("c", DeviceCommand::new(CommandType::Home), 30))
            .step(ActivityStep::new("a", DeviceCommand::new(CommandType::PowerOn), 10))
            .step(ActivityStep::new("b", DeviceCommand::new(CommandType::Input), 20))
            .build()
            .unwrap();

        let order: Vec<_> = activity.sorted_steps().iter().map(|s| s.sort_order).collect();
        assert_eq!(order, vec![10, 20, 30]);
        assert_eq!(activity.steps()[0].sort_order, 30);
    }

    #[test]
    fn test_then_appends_in_order() {
        let activity = Activity::builder("Quick")
            .then("tv", DeviceCommand::new(CommandType::PowerOn))
            .then("tv", DeviceCommand::new(CommandType::Home))
            .build()
            .unwrap();
        let order: Vec<_> = activity.steps().iter().map(|s| s.sort_order).collect();
        assert_eq!(order, vec![1, 2]);
        assert!(activity.steps().iter().all(|s| s.is_required));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Activity = toml::from_str(
            r#"
            id = "movie"
            name = "Watch Movie"

            [[steps]]
            device_id = "tv"
            sort_order = 1
            delay_after_ms = 2000
            command = { action = "power_on" }

            [[steps]]
            device_id = "shield"
            sort_order = 2
            is_required = false
            command = { action = "app_launch", payload = { text = "netflix" } }
            "#,
        )
        .unwrap();
        assert_eq!(ok.id().as_str(), "movie");
        assert_eq!(ok.steps()[0].delay_after_ms, 2000);
        assert!(!ok.steps()[1].is_required);
        assert_eq!(ok.steps()[1].command.text(), Some("netflix"));

        let duplicate = toml::from_str::<Activity>(
            r#"
            name = "Broken"
            [[steps]]
            device_id = "tv"
            sort_order = 1
            command = { action = "power_on" }
            [[steps]]
            device_id = "tv"
            sort_order = 1
            command = { action = "home" }
            "#,
        );
        assert!(duplicate.is_err());
    }
}
