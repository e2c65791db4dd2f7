//! Service loop: reconcile the calendar, then execute due records.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use thermocal_action::{ActionExecutor, ExecutionReport};
use thermocal_calendar::{CalendarError, ReconcileReport, Reconciler};
use thermocal_core::Clock;

use crate::notifier::Notifier;

/// Which halves of the cycle run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ServiceMode {
    #[default]
    Both,
    /// Reconcile only.
    Calendar,
    /// Execute only.
    Device,
}

impl ServiceMode {
    fn reconciles(self) -> bool {
        matches!(self, ServiceMode::Both | ServiceMode::Calendar)
    }

    fn executes(self) -> bool {
        matches!(self, ServiceMode::Both | ServiceMode::Device)
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceMode::Both => write!(f, "both"),
            ServiceMode::Calendar => write!(f, "calendar"),
            ServiceMode::Device => write!(f, "device"),
        }
    }
}

/// Human-readable account of one cycle, sent as a single notification.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub lines: Vec<String>,
}

impl CycleSummary {
    pub fn add_reconcile(&mut self, result: &Result<ReconcileReport, CalendarError>) {
        match result {
            Ok(report) => {
                for record in &report.cached {
                    self.lines.push(format!("CALENDAR: cached new event {}", record));
                }
                for record in &report.removed {
                    self.lines.push(format!("CALENDAR: marked missing event {}", record));
                }
            }
            Err(e) => self.lines.push(format!("CALENDAR: reconcile failed: {}", e)),
        }
    }

    pub fn add_execution(&mut self, report: &ExecutionReport) {
        for record in &report.processed {
            self.lines.push(format!("DEVICE: done {}", record));
        }
        for failure in &report.failures {
            self.lines
                .push(format!("DEVICE: failed {}: {}", failure.record, failure.error));
        }
        if let Some(e) = &report.error {
            self.lines.push(format!("DEVICE: {}", e));
        }
        if report.aborted {
            self.lines.push("DEVICE: execution aborted".to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn subject(&self) -> String {
        let n = self.lines.len();
        format!("{} {} processed", n, if n == 1 { "event" } else { "events" })
    }

    pub fn body(&self) -> String {
        self.lines.join("\n")
    }
}

pub struct ServiceLoop {
    mode: ServiceMode,
    reconciler: Reconciler,
    executor: ActionExecutor,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    poll: Duration,
    shutdown: Arc<Notify>,
}

impl ServiceLoop {
    pub fn new(
        mode: ServiceMode,
        reconciler: Reconciler,
        executor: ActionExecutor,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        poll: Duration,
    ) -> Self {
        Self {
            mode,
            reconciler,
            executor,
            notifier,
            clock,
            poll,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle for requesting shutdown. Honored between cycles only.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// One reconcile-then-execute pass. A fatal reconcile error ends the
    /// cycle before any device is touched; other reconcile failures leave
    /// the executor running on the existing cache.
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        if self.mode.reconciles() {
            let result = self.reconciler.reconcile(self.clock.now()).await;
            match &result {
                Ok(report) => info!(
                    cached = report.cached.len(),
                    removed = report.removed.len(),
                    skipped = report.skipped_unparseable.len(),
                    "Calendar reconciled"
                ),
                Err(e) => error!(error = %e, "Calendar reconcile failed"),
            }
            summary.add_reconcile(&result);

            if let Err(e) = &result {
                if e.is_fatal() {
                    warn!("Skipping device execution for this cycle");
                    self.notify(&summary).await;
                    return summary;
                }
            }
        }

        if self.mode.executes() {
            let report = self.executor.run(self.clock.now()).await;
            summary.add_execution(&report);
        }

        self.notify(&summary).await;
        summary
    }

    async fn notify(&self, summary: &CycleSummary) {
        if summary.is_empty() {
            return;
        }
        if let Err(e) = self.notifier.notify(&summary.subject(), &summary.body()).await {
            warn!(error = %e, "Failed to send cycle notification");
        }
    }

    /// Run cycles every poll interval until shutdown, or once.
    pub async fn run(&self, once: bool) {
        info!(mode = %self.mode, poll = ?self.poll, "Service started");
        loop {
            self.run_cycle().await;
            if once {
                return;
            }

            info!(poll = ?self.poll, "Waiting for next cycle");
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("Shutdown requested, stopping service");
                    return;
                }
                _ = self.clock.sleep(self.poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use thermocal_action::RecordFailure;
    use thermocal_core::types::{Action, ActionRecord, RecordState};

    fn record(source_id: &str) -> ActionRecord {
        ActionRecord {
            id: Default::default(),
            source_id: source_id.to_string(),
            calendar_id: "primary".into(),
            scheduled_at: DateTime::parse_from_rfc3339("2024-01-10T18:00:00-07:00").unwrap(),
            action: Action::Away,
            description: None,
            title: "thermo:away".into(),
            state: RecordState::Waiting,
            actioned_at: None,
            created_at: Default::default(),
        }
    }

    #[test]
    fn test_summary_subject_pluralizes() {
        let mut summary = CycleSummary::default();
        summary.lines.push("one".into());
        assert_eq!(summary.subject(), "1 event processed");
        summary.lines.push("two".into());
        assert_eq!(summary.subject(), "2 events processed");
        assert_eq!(summary.body(), "one\ntwo");
    }

    #[test]
    fn test_summary_lines() {
        let mut summary = CycleSummary::default();
        summary.add_reconcile(&Ok(ReconcileReport {
            cached: vec![record("a")],
            removed: vec![record("b")],
            skipped_unparseable: vec![],
        }));
        summary.add_execution(&ExecutionReport {
            processed: vec![record("a")],
            failures: vec![RecordFailure {
                record: record("c"),
                error: "Verification failed".into(),
            }],
            aborted: false,
            error: None,
        });

        assert_eq!(summary.lines.len(), 4);
        assert!(summary.lines[0].starts_with("CALENDAR: cached new event <a away/waiting"));
        assert!(summary.lines[3].ends_with(": Verification failed"));
    }

    #[test]
    fn test_summary_reconcile_failure() {
        let mut summary = CycleSummary::default();
        summary.add_reconcile(&Err(CalendarError::CalendarNotFound("work".into())));
        assert_eq!(
            summary.lines,
            vec!["CALENDAR: reconcile failed: Could not find calendar 'work'"]
        );
    }

    #[test]
    fn test_mode_flags() {
        assert!(ServiceMode::Both.reconciles() && ServiceMode::Both.executes());
        assert!(ServiceMode::Calendar.reconciles() && !ServiceMode::Calendar.executes());
        assert!(!ServiceMode::Device.reconciles() && ServiceMode::Device.executes());
    }
}
