//! Outcome records of an activity run.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use maestro_core::types::Id;
use maestro_devices::{DeviceError, ErrorKind};

use crate::activity::ActivityStep;
use crate::error::Error;

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Every required step succeeded
    Completed,
    /// A required step failed and the remaining steps were skipped
    Failed,
    /// The caller cancelled the run
    Cancelled,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Caller-facing classification
    pub kind: ErrorKind,
    /// Human readable detail
    pub message: String,
}

impl StepError {
    /// The device answered but refused the command
    pub fn rejected() -> Self {
        Self {
            kind: ErrorKind::Rejected,
            message: "device rejected the command".to_string(),
        }
    }
}

impl From<&DeviceError> for StepError {
    fn from(err: &DeviceError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<&Error> for StepError {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::Device(e) => e.kind(),
            Error::DeviceNotFound(_) => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Configuration,
            _ => ErrorKind::Internal,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of a single command sent outside an activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Whether the device accepted the command
    pub accepted: bool,
    /// Classified reason when it did not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl CommandOutcome {
    pub(crate) fn accepted() -> Self {
        Self {
            accepted: true,
            error: None,
        }
    }

    pub(crate) fn failed(error: StepError) -> Self {
        Self {
            accepted: false,
            error: Some(error),
        }
    }

    /// Classification of the failure, if any
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// The step
    pub step_id: Id,
    /// Its target device
    pub device_id: Id,
    /// Its sort order
    pub sort_order: i32,
    /// Whether the command was sent and accepted
    pub success: bool,
    /// Failure detail when `success` is false
    pub error: Option<StepError>,
    /// Time spent on the step, delays included
    pub elapsed: Duration,
}

impl StepResult {
    pub(crate) fn succeeded(step: &ActivityStep, elapsed: Duration) -> Self {
        Self {
            step_id: step.id.clone(),
            device_id: step.device_id.clone(),
            sort_order: step.sort_order,
            success: true,
            error: None,
            elapsed,
        }
    }

    pub(crate) fn failed(step: &ActivityStep, error: StepError, elapsed: Duration) -> Self {
        Self {
            step_id: step.id.clone(),
            device_id: step.device_id.clone(),
            sort_order: step.sort_order,
            success: false,
            error: Some(error),
            elapsed,
        }
    }
}

/// Outcome of an activity run; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Unique id of this run
    pub execution_id: Id,
    /// The activity that ran
    pub activity_id: Id,
    /// Terminal state
    pub state: ExecutionState,
    /// True only when the state is `Completed`
    pub success: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration
    pub elapsed: Duration,
    /// The required step that aborted the run
    pub failed_step: Option<Id>,
    /// Step outcomes in execution order
    pub steps: Vec<StepResult>,
}

impl ExecutionResult {
    /// Results of steps that failed, required or not
    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.success)
    }
}
