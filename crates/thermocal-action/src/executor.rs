//! Executes due action records against the device gateway.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use thermocal_core::config::{DeviceConfig, ThermocalConfig};
use thermocal_core::types::{Action, ActionRecord};
use thermocal_core::{Clock, ThermocalError};
use thermocal_device::DeviceGateway;
use thermocal_storage::ActionRecordRepository;

use crate::error::ActionError;
use crate::plan::{check, plan, TargetState, Verification};

/// What `execute_action` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Devices were already in the target state.
    NoChange,
    /// This many commands were sent and the result verified.
    Applied(usize),
}

#[derive(Debug)]
pub struct RecordFailure {
    pub record: ActionRecord,
    pub error: String,
}

/// Outcome of one executor pass.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Records completed in this pass.
    pub processed: Vec<ActionRecord>,
    /// Records that failed; they remain waiting.
    pub failures: Vec<RecordFailure>,
    /// Set when an infrastructure failure cut the pass short.
    pub aborted: bool,
    /// Failure that happened outside any single record.
    pub error: Option<String>,
}

impl ExecutionReport {
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty() && self.failures.is_empty() && self.error.is_none()
    }
}

pub struct ActionExecutor {
    gateway: Arc<dyn DeviceGateway>,
    records: ActionRecordRepository,
    clock: Arc<dyn Clock>,
    device: DeviceConfig,
    timezone: Tz,
    lookback: chrono::Duration,
}

impl ActionExecutor {
    pub fn new(
        config: &ThermocalConfig,
        gateway: Arc<dyn DeviceGateway>,
        records: ActionRecordRepository,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ThermocalError> {
        Ok(Self {
            gateway,
            records,
            clock,
            device: config.device.clone(),
            timezone: config.calendar.timezone()?,
            lookback: chrono::Duration::hours(config.service.execution_lookback_hours),
        })
    }

    fn target(&self, action: Action) -> TargetState {
        let month = self.clock.now().with_timezone(&self.timezone).month();
        TargetState::for_action(action, month, &self.device)
    }

    /// Whether the configured structure differs from the target for `action`.
    pub async fn change_needed(&self, action: Action) -> Result<bool, ActionError> {
        let snapshot = self.gateway.snapshot(&self.device.structure).await?;
        Ok(!check(&self.target(action), &snapshot).is_match())
    }

    /// Bring the structure to the target state for `action` and verify it.
    pub async fn execute_action(&self, action: Action) -> Result<ActionOutcome, ActionError> {
        let target = self.target(action);
        let snapshot = self.gateway.snapshot(&self.device.structure).await?;

        let commands = plan(&target, &snapshot);
        if commands.is_empty() {
            info!(%action, structure = %snapshot.structure.label, "No change needed");
            return Ok(ActionOutcome::NoChange);
        }

        self.gateway.apply(&commands).await?;

        let wait = Duration::from_secs(self.device.verification_wait_secs);
        info!(%action, commands = commands.len(), ?wait, "Waiting before verification");
        self.clock.sleep(wait).await;

        let after = self.gateway.snapshot(&self.device.structure).await?;
        match check(&target, &after) {
            Verification::Matches => Ok(ActionOutcome::Applied(commands.len())),
            Verification::Mismatch(reasons) => Err(ActionError::Verification { action, reasons }),
        }
    }

    /// Execute every waiting record scheduled within the lookback window
    /// ending at `now`, oldest first.
    pub async fn run(&self, now: DateTime<Utc>) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        let due = match self.records.due(now, self.lookback) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to load due records");
                report.aborted = true;
                report.error = Some(e.to_string());
                return report;
            }
        };
        if !due.is_empty() {
            info!(count = due.len(), "Executing due records");
        }

        for record in due {
            let result = match self.execute_action(record.action).await {
                Ok(outcome) => self
                    .records
                    .mark_complete(record.id, self.clock.now())
                    .map(|done| (outcome, done))
                    .map_err(ActionError::from),
                Err(e) => Err(e),
            };

            match result {
                Ok((outcome, done)) => {
                    info!(record = %done, ?outcome, "Action complete");
                    report.processed.push(done);
                }
                Err(e) => {
                    let fatal = e.is_fatal();
                    if fatal {
                        error!(record = %record, error = %e, "Aborting execution pass");
                    } else {
                        warn!(record = %record, error = %e, "Action failed, record stays waiting");
                    }
                    report.failures.push(RecordFailure {
                        record,
                        error: e.to_string(),
                    });
                    if fatal {
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        report
    }
}
