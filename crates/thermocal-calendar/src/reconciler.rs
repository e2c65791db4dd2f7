//! Calendar reconciliation: mirror upstream entries into the record cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Days, FixedOffset, TimeZone, Utc};
use tracing::{info, warn};

use thermocal_core::config::CalendarConfig;
use thermocal_core::error::ThermocalError;
use thermocal_core::types::{ActionRecord, NewActionRecord};
use thermocal_storage::{ActionRecordRepository, InsertOutcome};

use crate::diff::diff;
use crate::error::{CalendarError, ParseError};
use crate::parse::{to_candidate, ScheduleDefaults};
use crate::source::{CalendarSource, EntryStart};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Records inserted by this pass.
    pub cached: Vec<ActionRecord>,
    /// Records marked removed by this pass.
    pub removed: Vec<ActionRecord>,
    /// Entries skipped because their title or start could not be parsed.
    pub skipped_unparseable: Vec<(String, ParseError)>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.cached.is_empty() && self.removed.is_empty() && self.skipped_unparseable.is_empty()
    }
}

pub struct Reconciler {
    source: Arc<dyn CalendarSource>,
    records: ActionRecordRepository,
    config: CalendarConfig,
    defaults: ScheduleDefaults,
}

impl Reconciler {
    pub fn new(
        config: &CalendarConfig,
        source: Arc<dyn CalendarSource>,
        records: ActionRecordRepository,
    ) -> Result<Self, ThermocalError> {
        Ok(Self {
            source,
            records,
            defaults: ScheduleDefaults::from_config(config)?,
            config: config.clone(),
        })
    }

    /// Start of the calendar day `lookback_days` before `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        let tz = self.defaults.timezone;
        let today = now.with_timezone(&tz).date_naive();
        let day = today
            .checked_sub_days(Days::new(u64::from(self.config.lookback_days)))
            .unwrap_or(today);
        day.and_hms_opt(0, 0, 0)
            .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
            .map(|at| at.fixed_offset())
            .unwrap_or_else(|| now.fixed_offset())
    }

    /// Fetch, cache new entries, and mark vanished ones removed.
    ///
    /// A fetch failure propagates before anything is written.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport, CalendarError> {
        let calendar_id = self.config.calendar_id.as_str();
        let since = self.window_start(now);

        let entries = self
            .source
            .list_entries(
                calendar_id,
                since,
                &self.config.filter_tag,
                self.config.max_results,
            )
            .await?;
        let truncated = entries.len() >= self.config.max_results as usize;

        let mut report = ReconcileReport::default();
        let mut candidates: Vec<NewActionRecord> = Vec::new();
        // Every fetched entry keeps its records alive, parseable or not. An
        // all-day entry with a bad title has no instant, so it holds by id.
        let mut upstream_keys: HashSet<(String, DateTime<Utc>)> = HashSet::new();
        let mut held_ids: HashSet<&str> = HashSet::new();
        for entry in &entries {
            match to_candidate(entry, calendar_id, &self.defaults) {
                Ok(candidate) => {
                    upstream_keys.insert(candidate.schedule_key());
                    candidates.push(candidate);
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, title = %entry.title, error = %e, "Skipping calendar entry");
                    match entry.start {
                        EntryStart::DateTime(at) => {
                            upstream_keys.insert((entry.id.clone(), at.with_timezone(&Utc)));
                        }
                        EntryStart::Date(_) => {
                            held_ids.insert(entry.id.as_str());
                        }
                    }
                    report.skipped_unparseable.push((entry.title.clone(), e));
                }
            }
        }

        for candidate in &candidates {
            let existing = self.records.find_by_key(
                &candidate.source_id,
                &candidate.scheduled_at,
                &candidate.calendar_id,
            )?;
            if existing.is_some() {
                continue;
            }
            match self.records.insert(candidate)? {
                InsertOutcome::Inserted(record) => {
                    info!(record = %record, "Cached calendar entry");
                    report.cached.push(record);
                }
                InsertOutcome::Duplicate => {}
            }
        }

        // A truncated fetch says nothing about records after its last entry.
        let horizon = match (truncated, upstream_keys.iter().map(|(_, at)| *at).max()) {
            (true, Some(last)) => Some(last),
            _ => None,
        };
        let waiting: HashMap<_, ActionRecord> = self
            .records
            .waiting(Some(calendar_id))?
            .into_iter()
            .filter(|r| horizon.map_or(true, |h| r.scheduled_at <= h))
            .filter(|r| !held_ids.contains(r.source_id.as_str()))
            .map(|r| (r.schedule_key(), r))
            .collect();

        let cached_keys: HashSet<_> = waiting.keys().cloned().collect();

        for key in diff(&cached_keys, &upstream_keys).missing {
            if let Some(record) = waiting.get(&key) {
                let removed = self.records.mark_removed(record.id)?;
                info!(record = %removed, "Calendar entry gone, marked removed");
                report.removed.push(removed);
            }
        }

        Ok(report)
    }
}
