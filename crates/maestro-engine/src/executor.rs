/*!
 * Activity execution.
 *
 * [`ActivityExecutor`] runs one activity at a time per activity id. Steps run
 * strictly in ascending sort order, one after another:
 *
 * 1. wait `delay_before_ms` (cancellable)
 * 2. resolve the device and its adapter, connecting if needed
 * 3. send the command and wait its settle time `delay_ms`
 * 4. record the step result and emit `StepCompleted`
 * 5. wait `delay_after_ms` (cancellable)
 *
 * A failed required step aborts the run; a failed optional step is recorded
 * and the run continues. Cancellation is observed before each step and
 * during every delay. No step is retried.
 */
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use maestro_core::config::EngineConfig;
use maestro_core::event::{notify_quietly, ControlEvent, Notifier};
use maestro_core::logging::component_span;
use maestro_core::types::{millis, Id};
use maestro_core::utils::sleep_cancellable;
use maestro_devices::device::Result as DeviceResult;
use maestro_devices::{ControllerRegistry, Device, DeviceCommand, DeviceError, ProtocolAdapter};

use crate::activity::{Activity, ActivityStep};
use crate::error::{Error, Result};
use crate::execution::{ExecutionResult, ExecutionState, StepError, StepResult};
use crate::store::{ActivityStore, DeviceStore};

/// Send one command to a device through its adapter
///
/// Checks the device's declared command set, then lets the adapter attach to
/// the device and send in one exclusive operation. `Ok(false)` means the
/// device refused the command.
pub async fn dispatch_command(
    registry: &ControllerRegistry,
    device: &Device,
    command: &DeviceCommand,
) -> DeviceResult<bool> {
    let adapter = registry.resolve(device)?;
    if !device.supports_command(command.action) {
        return Err(DeviceError::UnsupportedCommand {
            command: command.action,
            kind: device.connection_type,
        });
    }
    adapter.send_to(device, command).await
}

/// Ids of activities currently executing
#[derive(Debug, Default)]
struct RunningSet(Mutex<HashSet<Id>>);

impl RunningSet {
    fn claim(self: &Arc<Self>, id: &Id) -> Option<RunningGuard> {
        let mut running = self.0.lock().unwrap_or_else(|p| p.into_inner());
        if running.insert(id.clone()) {
            Some(RunningGuard {
                set: self.clone(),
                id: id.clone(),
            })
        } else {
            None
        }
    }

    fn contains(&self, id: &Id) -> bool {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).contains(id)
    }
}

/// Releases an activity id when the run ends, however it ends
struct RunningGuard {
    set: Arc<RunningSet>,
    id: Id,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.set
            .0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.id);
    }
}

/// Runs activities against the registered adapters
#[derive(Debug)]
pub struct ActivityExecutor {
    activities: Arc<dyn ActivityStore>,
    devices: Arc<dyn DeviceStore>,
    registry: Arc<ControllerRegistry>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    running: Arc<RunningSet>,
}

impl ActivityExecutor {
    /// Create an executor
    pub fn new(
        activities: Arc<dyn ActivityStore>,
        devices: Arc<dyn DeviceStore>,
        registry: Arc<ControllerRegistry>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            activities,
            devices,
            registry,
            notifier,
            config,
            running: Arc::default(),
        }
    }

    /// Whether `activity_id` is executing right now
    pub fn is_running(&self, activity_id: &Id) -> bool {
        self.running.contains(activity_id)
    }

    /// Execute an activity until it completes, fails or is cancelled
    pub async fn execute(&self, activity_id: &Id, cancel: CancellationToken) -> Result<ExecutionResult> {
        let _guard = self
            .running
            .claim(activity_id)
            .ok_or_else(|| Error::AlreadyRunning(activity_id.clone()))?;

        let activity = self
            .activities
            .get_activity(activity_id)
            .await?
            .ok_or_else(|| Error::ActivityNotFound(activity_id.clone()))?;

        let result = self
            .run(&activity, cancel)
            .instrument(component_span("activity", Some(activity_id.as_str())))
            .await;
        Ok(result)
    }

    async fn run(&self, activity: &Activity, cancel: CancellationToken) -> ExecutionResult {
        let steps = activity.sorted_steps();
        let started_at = Utc::now();
        let start = Instant::now();
        info!("Starting activity '{}' with {} steps", activity.name(), steps.len());

        let mut results = Vec::with_capacity(steps.len());
        let mut state = ExecutionState::Completed;
        let mut failed_step = None;

        for step in &steps {
            if cancel.is_cancelled() {
                state = ExecutionState::Cancelled;
                break;
            }

            let step_start = Instant::now();
            let before = self.clamp_delay(step.before_delay(), "delay_before_ms", step);
            if !sleep_cancellable(before, &cancel).await {
                state = ExecutionState::Cancelled;
                break;
            }

            let outcome = self.run_step(step).await;

            let mut interrupted = false;
            if outcome.is_ok() {
                let settle = self.clamp_delay(millis(step.command.delay_ms), "delay_ms", step);
                interrupted = !sleep_cancellable(settle, &cancel).await;
            }

            let elapsed = step_start.elapsed();
            let result = match outcome {
                Ok(()) => StepResult::succeeded(step, elapsed),
                Err(error) => {
                    warn!(
                        "Step {} ({} on {}) failed: {}",
                        step.sort_order, step.command, step.device_id, error
                    );
                    StepResult::failed(step, error, elapsed)
                }
            };
            let success = result.success;
            results.push(result);
            notify_quietly(
                self.notifier.as_ref(),
                ControlEvent::StepCompleted {
                    activity_id: activity.id().clone(),
                    step_order: step.sort_order,
                    device_id: step.device_id.clone(),
                    success,
                    timestamp: Utc::now(),
                },
            );

            if !success && step.is_required {
                state = ExecutionState::Failed;
                failed_step = Some(step.id.clone());
                break;
            }

            let after = self.clamp_delay(step.after_delay(), "delay_after_ms", step);
            if interrupted || !sleep_cancellable(after, &cancel).await {
                state = ExecutionState::Cancelled;
                break;
            }
        }

        let elapsed = start.elapsed();
        let success = state == ExecutionState::Completed;
        info!(
            "Activity '{}' {} after {} of {} steps in {:?}",
            activity.name(),
            state,
            results.len(),
            steps.len(),
            elapsed
        );
        notify_quietly(
            self.notifier.as_ref(),
            ControlEvent::ActivityCompleted {
                activity_id: activity.id().clone(),
                success,
                elapsed,
            },
        );

        ExecutionResult {
            execution_id: Id::new(),
            activity_id: activity.id().clone(),
            state,
            success,
            started_at,
            elapsed,
            failed_step,
            steps: results,
        }
    }

    async fn run_step(&self, step: &ActivityStep) -> std::result::Result<(), StepError> {
        let device = match self.devices.get_device(&step.device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => return Err(StepError::from(&Error::DeviceNotFound(step.device_id.clone()))),
            Err(e) => return Err(StepError::from(&e)),
        };

        debug!("Step {}: {} on '{}'", step.sort_order, step.command, device.name);
        let command = step.command.clone();
        match dispatch_command(&self.registry, &device, &command).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(StepError::rejected()),
            Err(e) => Err(StepError::from(&e)),
        }
    }

    fn clamp_delay(&self, requested: Duration, what: &str, step: &ActivityStep) -> Duration {
        let max = millis(self.config.max_step_delay_ms);
        if requested > max {
            warn!(
                "Step {} asks for {} = {:?}; clamping to {:?}",
                step.sort_order, what, requested, max
            );
            max
        } else {
            requested
        }
    }
}
