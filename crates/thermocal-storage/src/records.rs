//! Repository for cached action records (`events` table).

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use thermocal_core::error::ThermocalError;
use thermocal_core::state_machine::validate_transition;
use thermocal_core::types::{Action, ActionRecord, NewActionRecord, RecordState};

use crate::db::Database;

const RECORD_COLUMNS: &str = "id, event_id, calendar_id, title, action, description, state,
     scheduled_date, scheduled_offset, actioned_date, created_at";

/// Result of inserting a candidate record.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(ActionRecord),
    /// A record with the same (source id, scheduled instant, calendar) exists.
    Duplicate,
}

pub struct ActionRecordRepository {
    db: Arc<Database>,
}

impl ActionRecordRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Look up a record by its uniqueness triple.
    pub fn find_by_key(
        &self,
        source_id: &str,
        scheduled_at: &DateTime<FixedOffset>,
        calendar_id: &str,
    ) -> Result<Option<ActionRecord>, ThermocalError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM events
                 WHERE event_id = ?1 AND scheduled_date = ?2 AND calendar_id = ?3",
                RECORD_COLUMNS
            );
            let mut records = query_records(
                conn,
                &sql,
                rusqlite::params![source_id, scheduled_at.timestamp(), calendar_id],
            )?;
            Ok(records.pop())
        })
    }

    /// Insert a candidate in the `waiting` state. A uniqueness violation is
    /// reported as [`InsertOutcome::Duplicate`], not as an error.
    pub fn insert(&self, candidate: &NewActionRecord) -> Result<InsertOutcome, ThermocalError> {
        let now = Utc::now();
        let record = ActionRecord {
            id: Uuid::new_v4(),
            source_id: candidate.source_id.clone(),
            calendar_id: candidate.calendar_id.clone(),
            scheduled_at: candidate.scheduled_at,
            action: candidate.action,
            description: candidate.description.clone(),
            title: candidate.title.clone(),
            state: RecordState::Waiting,
            actioned_at: None,
            created_at: Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now),
        };

        self.db.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO events (id, event_id, calendar_id, title, action, description, state,
                                     scheduled_date, scheduled_offset, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    record.id.to_string(),
                    record.source_id,
                    record.calendar_id,
                    record.title,
                    record.action.to_string(),
                    record.description,
                    record.state.to_string(),
                    record.scheduled_at.timestamp(),
                    record.scheduled_at.offset().local_minus_utc(),
                    record.created_at.timestamp(),
                ],
            );

            match result {
                Ok(_) => Ok(InsertOutcome::Inserted(record.clone())),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    debug!(source_id = %record.source_id, "Duplicate action record skipped");
                    Ok(InsertOutcome::Duplicate)
                }
                Err(e) => Err(ThermocalError::Storage(format!(
                    "Failed to insert action record: {}",
                    e
                ))),
            }
        })
    }

    /// Waiting records ordered by scheduled time, optionally for one calendar.
    pub fn waiting(&self, calendar_id: Option<&str>) -> Result<Vec<ActionRecord>, ThermocalError> {
        self.db.with_conn(|conn| match calendar_id {
            Some(calendar_id) => query_records(
                conn,
                &format!(
                    "SELECT {} FROM events WHERE state = 'waiting' AND calendar_id = ?1
                     ORDER BY scheduled_date ASC",
                    RECORD_COLUMNS
                ),
                rusqlite::params![calendar_id],
            ),
            None => query_records(
                conn,
                &format!(
                    "SELECT {} FROM events WHERE state = 'waiting' ORDER BY scheduled_date ASC",
                    RECORD_COLUMNS
                ),
                [],
            ),
        })
    }

    /// Waiting records scheduled within `[now - lookback, now]`, oldest first.
    pub fn due(
        &self,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Vec<ActionRecord>, ThermocalError> {
        let start = now - lookback;
        self.db.with_conn(|conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {} FROM events
                     WHERE state = 'waiting' AND scheduled_date >= ?1 AND scheduled_date <= ?2
                     ORDER BY scheduled_date ASC",
                    RECORD_COLUMNS
                ),
                rusqlite::params![start.timestamp(), now.timestamp()],
            )
        })
    }

    /// Transition a waiting record to `removed`.
    pub fn mark_removed(&self, id: Uuid) -> Result<ActionRecord, ThermocalError> {
        self.transition(id, RecordState::Removed, None)
    }

    /// Transition a waiting record to `complete`, stamping `actioned_at`.
    pub fn mark_complete(
        &self,
        id: Uuid,
        actioned_at: DateTime<Utc>,
    ) -> Result<ActionRecord, ThermocalError> {
        self.transition(id, RecordState::Complete, Some(actioned_at))
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ActionRecord>, ThermocalError> {
        self.db.with_conn(|conn| get_record(conn, id))
    }

    /// Records scheduled at or after `since`, oldest first.
    pub fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<ActionRecord>, ThermocalError> {
        self.db.with_conn(|conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {} FROM events WHERE scheduled_date >= ?1 ORDER BY scheduled_date ASC",
                    RECORD_COLUMNS
                ),
                rusqlite::params![since.timestamp()],
            )
        })
    }

    pub fn list_all(&self) -> Result<Vec<ActionRecord>, ThermocalError> {
        self.db.with_conn(|conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {} FROM events ORDER BY scheduled_date ASC",
                    RECORD_COLUMNS
                ),
                [],
            )
        })
    }

    fn transition(
        &self,
        id: Uuid,
        to: RecordState,
        actioned_at: Option<DateTime<Utc>>,
    ) -> Result<ActionRecord, ThermocalError> {
        self.db.with_conn(|conn| {
            let current = get_record(conn, id)?.ok_or_else(|| {
                ThermocalError::Storage(format!("Action record not found: {}", id))
            })?;
            validate_transition(current.state, to)?;

            let changed = conn
                .execute(
                    "UPDATE events SET state = ?1, actioned_date = ?2
                     WHERE id = ?3 AND state = 'waiting'",
                    rusqlite::params![
                        to.to_string(),
                        actioned_at.map(|t| t.timestamp()),
                        id.to_string(),
                    ],
                )
                .map_err(|e| {
                    ThermocalError::Storage(format!("Failed to update action record: {}", e))
                })?;

            if changed == 0 {
                return Err(ThermocalError::InvalidTransition {
                    from: current.state.to_string(),
                    to: to.to_string(),
                });
            }

            debug!(record = %current, to = %to, "Action record transitioned");
            get_record(conn, id)?.ok_or_else(|| {
                ThermocalError::Storage(format!("Action record vanished: {}", id))
            })
        })
    }
}

fn get_record(conn: &Connection, id: Uuid) -> Result<Option<ActionRecord>, ThermocalError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM events WHERE id = ?1", RECORD_COLUMNS))
        .map_err(|e| ThermocalError::Storage(e.to_string()))?;

    let result = stmt
        .query_row(rusqlite::params![id.to_string()], |row| Ok(row_to_record(row)))
        .optional()
        .map_err(|e| ThermocalError::Storage(e.to_string()))?;

    match result {
        Some(record) => Ok(Some(record?)),
        None => Ok(None),
    }
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ActionRecord>, ThermocalError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ThermocalError::Storage(e.to_string()))?;

    let rows = stmt
        .query_map(params, |row| Ok(row_to_record(row)))
        .map_err(|e| ThermocalError::Storage(e.to_string()))?;

    let mut records = Vec::new();
    for row in rows {
        let record = row.map_err(|e| ThermocalError::Storage(e.to_string()))??;
        records.push(record);
    }
    Ok(records)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ActionRecord, ThermocalError> {
    let storage = |e: rusqlite::Error| ThermocalError::Storage(e.to_string());

    let id_str: String = row.get(0).map_err(storage)?;
    let source_id: String = row.get(1).map_err(storage)?;
    let calendar_id: String = row.get(2).map_err(storage)?;
    let title: String = row.get(3).map_err(storage)?;
    let action_str: String = row.get(4).map_err(storage)?;
    let description: Option<String> = row.get(5).map_err(storage)?;
    let state_str: String = row.get(6).map_err(storage)?;
    let scheduled_secs: i64 = row.get(7).map_err(storage)?;
    let scheduled_offset: i32 = row.get(8).map_err(storage)?;
    let actioned_secs: Option<i64> = row.get(9).map_err(storage)?;
    let created_secs: i64 = row.get(10).map_err(storage)?;

    let action: Action = action_str
        .parse()
        .map_err(|e: String| ThermocalError::DataIntegrity(format!("{} (record {})", e, id_str)))?;
    let state: RecordState = state_str
        .parse()
        .map_err(|e: String| ThermocalError::DataIntegrity(format!("{} (record {})", e, id_str)))?;

    let offset = FixedOffset::east_opt(scheduled_offset).ok_or_else(|| {
        ThermocalError::DataIntegrity(format!(
            "Invalid UTC offset {} (record {})",
            scheduled_offset, id_str
        ))
    })?;
    let scheduled_at = offset
        .timestamp_opt(scheduled_secs, 0)
        .single()
        .ok_or_else(|| {
            ThermocalError::DataIntegrity(format!(
                "Invalid scheduled time {} (record {})",
                scheduled_secs, id_str
            ))
        })?;

    Ok(ActionRecord {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| ThermocalError::DataIntegrity(format!("Invalid UUID: {}", e)))?,
        source_id,
        calendar_id,
        scheduled_at,
        action,
        description,
        title,
        state,
        actioned_at: actioned_secs.and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        created_at: Utc.timestamp_opt(created_secs, 0).single().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_repo() -> ActionRecordRepository {
        ActionRecordRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn candidate(source_id: &str, at: &str) -> NewActionRecord {
        NewActionRecord {
            source_id: source_id.to_string(),
            calendar_id: "primary".to_string(),
            scheduled_at: DateTime::parse_from_rfc3339(at).unwrap(),
            action: Action::Away,
            description: None,
            title: "thermo:away".to_string(),
        }
    }

    fn inserted(outcome: InsertOutcome) -> ActionRecord {
        match outcome {
            InsertOutcome::Inserted(record) => record,
            InsertOutcome::Duplicate => panic!("expected insert"),
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    // =====================================================================
    // Insert and lookup
    // =====================================================================

    #[test]
    fn test_insert_and_find_by_key() {
        let repo = make_repo();
        let new = candidate("abc", "2024-01-10T18:00:00-07:00");
        let record = inserted(repo.insert(&new).unwrap());

        assert_eq!(record.state, RecordState::Waiting);
        assert!(record.actioned_at.is_none());

        let found = repo
            .find_by_key("abc", &new.scheduled_at, "primary")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(found.scheduled_at, new.scheduled_at);
        assert_eq!(found.scheduled_at.offset().local_minus_utc(), -7 * 3600);
        assert_eq!(found.title, "thermo:away");
    }

    #[test]
    fn test_duplicate_insert_is_not_an_error() {
        let repo = make_repo();
        let new = candidate("abc", "2024-01-10T18:00:00-07:00");
        inserted(repo.insert(&new).unwrap());

        assert_eq!(repo.insert(&new).unwrap(), InsertOutcome::Duplicate);

        // Same instant written with another offset is still the same key.
        let same_instant = candidate("abc", "2024-01-11T01:00:00+00:00");
        assert_eq!(repo.insert(&same_instant).unwrap(), InsertOutcome::Duplicate);

        assert_eq!(repo.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_rescheduled_entry_is_new_record() {
        let repo = make_repo();
        inserted(repo.insert(&candidate("abc", "2024-01-10T18:00:00-07:00")).unwrap());
        inserted(repo.insert(&candidate("abc", "2024-01-10T19:00:00-07:00")).unwrap());
        assert_eq!(repo.list_all().unwrap().len(), 2);
    }

    // =====================================================================
    // Queries
    // =====================================================================

    #[test]
    fn test_due_window() {
        let repo = make_repo();
        inserted(repo.insert(&candidate("old", "2024-01-07T12:00:00Z")).unwrap());
        let in_window = inserted(repo.insert(&candidate("due", "2024-01-10T11:00:00Z")).unwrap());
        inserted(repo.insert(&candidate("future", "2024-01-10T13:00:00Z")).unwrap());

        let due = repo
            .due(utc("2024-01-10T12:00:00Z"), Duration::hours(48))
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, in_window.id);
    }

    #[test]
    fn test_due_excludes_terminal_records() {
        let repo = make_repo();
        let record = inserted(repo.insert(&candidate("due", "2024-01-10T11:00:00Z")).unwrap());
        repo.mark_removed(record.id).unwrap();

        let due = repo
            .due(utc("2024-01-10T12:00:00Z"), Duration::hours(48))
            .unwrap();
        assert!(due.is_empty());
    }

    // =====================================================================
    // Transitions
    // =====================================================================

    #[test]
    fn test_mark_complete_is_single_shot() {
        let repo = make_repo();
        let record = inserted(repo.insert(&candidate("abc", "2024-01-10T11:00:00Z")).unwrap());
        let at = utc("2024-01-10T12:00:00Z");

        let done = repo.mark_complete(record.id, at).unwrap();
        assert_eq!(done.state, RecordState::Complete);
        assert_eq!(done.actioned_at, Some(at));

        let err = repo.mark_complete(record.id, at).unwrap_err();
        assert!(matches!(err, ThermocalError::InvalidTransition { .. }));
        let err = repo.mark_removed(record.id).unwrap_err();
        assert!(matches!(err, ThermocalError::InvalidTransition { .. }));
    }

    #[test]
    fn test_mark_removed_keeps_actioned_at_null() {
        let repo = make_repo();
        let record = inserted(repo.insert(&candidate("abc", "2024-01-10T11:00:00Z")).unwrap());

        let removed = repo.mark_removed(record.id).unwrap();
        assert_eq!(removed.state, RecordState::Removed);
        assert!(removed.actioned_at.is_none());
        assert!(repo.waiting(None).unwrap().is_empty());
    }

    #[test]
    fn test_mark_unknown_record() {
        let repo = make_repo();
        assert!(repo.mark_removed(Uuid::new_v4()).is_err());
    }

    // =====================================================================
    // Calendar views
    // =====================================================================

    #[test]
    fn test_waiting_filters_by_calendar() {
        let repo = make_repo();
        inserted(repo.insert(&candidate("a", "2024-01-10T11:00:00Z")).unwrap());
        let mut other = candidate("b", "2024-01-10T11:00:00Z");
        other.calendar_id = "work".to_string();
        inserted(repo.insert(&other).unwrap());

        assert_eq!(repo.waiting(None).unwrap().len(), 2);
        let primary = repo.waiting(Some("primary")).unwrap();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].source_id, "a");
    }

    #[test]
    fn test_list_since() {
        let repo = make_repo();
        inserted(repo.insert(&candidate("old", "2024-01-01T00:00:00Z")).unwrap());
        inserted(repo.insert(&candidate("new", "2024-01-10T00:00:00Z")).unwrap());

        let recent = repo.list_since(utc("2024-01-05T00:00:00Z")).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].source_id, "new");
    }

    // =====================================================================
    // Data integrity
    // =====================================================================

    #[test]
    fn test_unknown_persisted_action_is_data_integrity_error() {
        let db = Arc::new(Database::in_memory().unwrap());
        db.with_conn(|conn| {
            conn.execute_batch(
                "PRAGMA ignore_check_constraints = ON;
                 INSERT INTO events (id, event_id, calendar_id, action, scheduled_date)
                 VALUES ('00000000-0000-0000-0000-000000000001', 'evt', 'primary', 'eco', 0);",
            )
            .map_err(|e| ThermocalError::Storage(e.to_string()))
        })
        .unwrap();

        let repo = ActionRecordRepository::new(db);
        let err = repo.list_all().unwrap_err();
        assert!(matches!(err, ThermocalError::DataIntegrity(_)));
    }
}
