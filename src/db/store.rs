//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::repository::{EvaluationStore, TargetLookup};

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not found")]
    NotFound,
    #[error("snapshot chain for target {target_id} moved: expected head {expected:?}, found {actual:?}")]
    ChainConflict {
        target_id: i64,
        expected: Option<i64>,
        actual: Option<i64>,
    },
    #[error("connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const SNAPSHOT_COLUMNS: &str = "id, target_id, sequence, previous_snapshot_id, body, body_size, \
     status_code, headers, diff_summary, change_level, created_at";

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let report = embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        for migration in report.applied_migrations() {
            tracing::info!(
                "Applied migration V{}__{}",
                migration.version(),
                migration.name()
            );
        }
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Targets ---

    /// Register a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        if target.probe_interval <= 0.0 {
            target.probe_interval = 60.0;
        }
        if target.timeout <= 0.0 {
            target.timeout = 10.0;
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (name, url, confirmation_threshold, enabled, probe_interval, timeout) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                target.name,
                target.url,
                target.confirmation_threshold,
                target.enabled,
                target.probe_interval,
                target.timeout,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update an existing target.
    pub fn update_target(&self, target: &Target) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE targets SET name=?1, url=?2, confirmation_threshold=?3, enabled=?4, probe_interval=?5, timeout=?6 WHERE id=?7",
            params![
                target.name,
                target.url,
                target.confirmation_threshold,
                target.enabled,
                target.probe_interval,
                target.timeout,
                target.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, url, confirmation_threshold, enabled, probe_interval, timeout FROM targets ORDER BY id",
        )?;

        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, url, confirmation_threshold, enabled, probe_interval, timeout FROM targets WHERE id = ?1",
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    // --- Transition events ---

    /// All transition events for a target, oldest first.
    pub fn get_transition_events(&self, target_id: i64) -> Result<Vec<TransitionEvent>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_id, from_state, to_state, outcome, status_code, observed_at
             FROM transition_events WHERE target_id = ?1 ORDER BY id ASC",
        )?;

        let events = stmt
            .query_map(params![target_id], |row| {
                Ok(TransitionEvent {
                    id: row.get(0)?,
                    target_id: row.get(1)?,
                    from_state: availability_column(row, 2)?,
                    to_state: availability_column(row, 3)?,
                    outcome: outcome_column(row, 4)?,
                    status_code: row.get(5)?,
                    observed_at: time_column(row, 6)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(events)
    }

    // --- Snapshots ---

    /// Get a snapshot by ID.
    pub fn get_snapshot(&self, id: i64) -> Result<Option<ContentSnapshot>, DbError> {
        let conn = self.conn()?;
        let snapshot = conn
            .query_row(
                &format!("SELECT {SNAPSHOT_COLUMNS} FROM content_snapshots WHERE id = ?1"),
                params![id],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// All snapshots for a target in chain order, oldest first.
    pub fn get_snapshots(&self, target_id: i64) -> Result<Vec<ContentSnapshot>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM content_snapshots WHERE target_id = ?1 ORDER BY sequence ASC"
        ))?;

        let snapshots = stmt
            .query_map(params![target_id], snapshot_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(snapshots)
    }
}

impl TargetLookup for Store {
    fn lookup_target(&self, target_id: i64) -> Result<Option<TargetSettings>, DbError> {
        let conn = self.conn()?;
        let settings = conn
            .query_row(
                "SELECT confirmation_threshold, enabled FROM targets WHERE id = ?1",
                params![target_id],
                |row| {
                    Ok(TargetSettings {
                        confirmation_threshold: row.get(0)?,
                        enabled: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(settings)
    }
}

impl EvaluationStore for Store {
    fn get_availability(&self, target_id: i64) -> Result<Option<AvailabilityState>, DbError> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT target_id, state, consecutive_failures, consecutive_successes, last_observed_at,
                        last_outcome, last_status_code, last_latency_ms, last_final_url
                 FROM availability_states WHERE target_id = ?1",
                params![target_id],
                |row| {
                    Ok(AvailabilityState {
                        target_id: row.get(0)?,
                        state: availability_column(row, 1)?,
                        consecutive_failures: row.get(2)?,
                        consecutive_successes: row.get(3)?,
                        last_observed_at: time_column(row, 4)?,
                        last_outcome: outcome_column(row, 5)?,
                        last_status_code: row.get(6)?,
                        last_latency_ms: row.get(7)?,
                        last_final_url: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn save_availability(
        &self,
        state: &AvailabilityState,
        event: Option<&TransitionEvent>,
    ) -> Result<Option<i64>, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO availability_states (target_id, state, consecutive_failures, consecutive_successes,
                 last_observed_at, last_outcome, last_status_code, last_latency_ms, last_final_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(target_id) DO UPDATE SET
             state=excluded.state,
             consecutive_failures=excluded.consecutive_failures,
             consecutive_successes=excluded.consecutive_successes,
             last_observed_at=excluded.last_observed_at,
             last_outcome=excluded.last_outcome,
             last_status_code=excluded.last_status_code,
             last_latency_ms=excluded.last_latency_ms,
             last_final_url=excluded.last_final_url",
            params![
                state.target_id,
                state.state.as_str(),
                state.consecutive_failures,
                state.consecutive_successes,
                format_db_time(&state.last_observed_at),
                state.last_outcome.as_str(),
                state.last_status_code,
                state.last_latency_ms,
                state.last_final_url,
            ],
        )?;

        let event_id = match event {
            Some(e) => {
                tx.execute(
                    "INSERT INTO transition_events (target_id, from_state, to_state, outcome, status_code, observed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        e.target_id,
                        e.from_state.as_str(),
                        e.to_state.as_str(),
                        e.outcome.as_str(),
                        e.status_code,
                        format_db_time(&e.observed_at),
                    ],
                )?;
                Some(tx.last_insert_rowid())
            }
            None => None,
        };

        tx.commit()?;
        Ok(event_id)
    }

    fn get_latest_snapshot(&self, target_id: i64) -> Result<Option<ContentSnapshot>, DbError> {
        let conn = self.conn()?;
        let snapshot = conn
            .query_row(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM content_snapshots
                     WHERE target_id = ?1 ORDER BY sequence DESC LIMIT 1"
                ),
                params![target_id],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    fn append_snapshot(&self, snapshot: &NewSnapshot) -> Result<ContentSnapshot, DbError> {
        let headers_json = serde_json::to_string(&snapshot.headers)?;
        let diff_json = serde_json::to_string(&snapshot.diff_summary)?;
        let body_size = snapshot.body.len() as i64;

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let head: Option<(i64, i64)> = tx
            .query_row(
                "SELECT id, sequence FROM content_snapshots WHERE target_id = ?1 ORDER BY sequence DESC LIMIT 1",
                params![snapshot.target_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let head_id = head.map(|(id, _)| id);
        if head_id != snapshot.previous_snapshot_id {
            return Err(DbError::ChainConflict {
                target_id: snapshot.target_id,
                expected: snapshot.previous_snapshot_id,
                actual: head_id,
            });
        }
        let sequence = head.map(|(_, seq)| seq + 1).unwrap_or(1);

        tx.execute(
            "INSERT INTO content_snapshots (target_id, sequence, previous_snapshot_id, body, body_size,
                 status_code, headers, diff_summary, change_level, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                snapshot.target_id,
                sequence,
                snapshot.previous_snapshot_id,
                snapshot.body,
                body_size,
                snapshot.status_code,
                headers_json,
                diff_json,
                snapshot.change_level.as_str(),
                format_db_time(&snapshot.created_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(ContentSnapshot {
            id,
            target_id: snapshot.target_id,
            sequence,
            previous_snapshot_id: snapshot.previous_snapshot_id,
            body: snapshot.body.clone(),
            body_size,
            status_code: snapshot.status_code,
            headers: snapshot.headers.clone(),
            diff_summary: snapshot.diff_summary.clone(),
            change_level: snapshot.change_level,
            created_at: snapshot.created_at,
        })
    }
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        confirmation_threshold: row.get(3)?,
        enabled: row.get(4)?,
        probe_interval: row.get(5)?,
        timeout: row.get(6)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> SqlResult<ContentSnapshot> {
    let headers: String = row.get(7)?;
    let diff_summary: String = row.get(8)?;
    let change_level: String = row.get(9)?;

    Ok(ContentSnapshot {
        id: row.get(0)?,
        target_id: row.get(1)?,
        sequence: row.get(2)?,
        previous_snapshot_id: row.get(3)?,
        body: row.get(4)?,
        body_size: row.get(5)?,
        status_code: row.get(6)?,
        headers: serde_json::from_str(&headers)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        diff_summary: serde_json::from_str(&diff_summary)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?,
        change_level: ChangeLevel::parse(&change_level)
            .ok_or_else(|| invalid_column(9, format!("unknown change level {change_level:?}")))?,
        created_at: time_column(row, 10)?,
    })
}

fn availability_column(row: &Row<'_>, idx: usize) -> SqlResult<Availability> {
    let value: String = row.get(idx)?;
    Availability::parse(&value)
        .ok_or_else(|| invalid_column(idx, format!("unknown availability {value:?}")))
}

fn outcome_column(row: &Row<'_>, idx: usize) -> SqlResult<ProbeOutcome> {
    let value: String = row.get(idx)?;
    ProbeOutcome::parse(&value)
        .ok_or_else(|| invalid_column(idx, format!("unknown probe outcome {value:?}")))
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_db_time(&value).ok_or_else(|| invalid_column(idx, format!("bad timestamp {value:?}")))
}

fn invalid_column(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn format_db_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    fn open() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn new_snapshot(target_id: i64, previous: Option<i64>, body: &str) -> NewSnapshot {
        NewSnapshot {
            target_id,
            previous_snapshot_id: previous,
            body: body.as_bytes().to_vec(),
            status_code: Some(200),
            headers: BTreeMap::from([("content-type".to_string(), "text/html".to_string())]),
            diff_summary: DiffSummary::default(),
            change_level: ChangeLevel::None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_target_registration() {
        let (_tmp, store) = open();

        let mut target = Target {
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            confirmation_threshold: 3,
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();
        assert!(id > 0);

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.name, "Example");
        assert_eq!(fetched.confirmation_threshold, 3);
        assert!(fetched.enabled);

        let mut updated = fetched;
        updated.enabled = false;
        store.update_target(&updated).unwrap();

        let settings = store.lookup_target(id).unwrap().unwrap();
        assert_eq!(
            settings,
            TargetSettings {
                confirmation_threshold: 3,
                enabled: false
            }
        );

        assert!(store.lookup_target(id + 100).unwrap().is_none());
        assert!(matches!(store.get_target(id + 100), Err(DbError::NotFound)));
    }

    #[test]
    fn test_availability_upsert_and_events() {
        let (_tmp, store) = open();
        assert!(store.get_availability(7).unwrap().is_none());

        let mut state = AvailabilityState {
            target_id: 7,
            state: Availability::Up,
            consecutive_failures: 1,
            consecutive_successes: 0,
            last_observed_at: Utc::now(),
            last_outcome: ProbeOutcome::Timeout,
            last_status_code: None,
            last_latency_ms: 5000.0,
            last_final_url: None,
        };
        assert_eq!(store.save_availability(&state, None).unwrap(), None);

        state.state = Availability::Down;
        state.consecutive_failures = 0;
        state.last_outcome = ProbeOutcome::Error;
        state.last_status_code = Some(503);
        state.last_final_url = Some("https://example.com/".to_string());
        let event = TransitionEvent {
            id: 0,
            target_id: 7,
            from_state: Availability::Up,
            to_state: Availability::Down,
            outcome: ProbeOutcome::Error,
            status_code: Some(503),
            observed_at: state.last_observed_at,
        };
        let event_id = store.save_availability(&state, Some(&event)).unwrap();
        assert!(event_id.is_some());

        let fetched = store.get_availability(7).unwrap().unwrap();
        assert_eq!(fetched.state, Availability::Down);
        assert_eq!(fetched.consecutive_failures, 0);
        assert_eq!(fetched.last_status_code, Some(503));
        assert_eq!(fetched.last_outcome, ProbeOutcome::Error);
        assert_eq!(fetched.last_observed_at, state.last_observed_at);

        let events = store.get_transition_events(7).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(Some(events[0].id), event_id);
        assert_eq!(events[0].to_state, Availability::Down);
    }

    #[test]
    fn test_snapshot_chain_appends_in_sequence() {
        let (_tmp, store) = open();

        let first = store.append_snapshot(&new_snapshot(1, None, "<html>a</html>")).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.previous_snapshot_id, None);
        assert_eq!(first.body_size, 14);

        let second = store
            .append_snapshot(&new_snapshot(1, Some(first.id), "<html>ab</html>"))
            .unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.previous_snapshot_id, Some(first.id));

        // Other targets keep their own chain.
        let other = store.append_snapshot(&new_snapshot(2, None, "x")).unwrap();
        assert_eq!(other.sequence, 1);

        let latest = store.get_latest_snapshot(1).unwrap().unwrap();
        assert_eq!(latest, second);
        assert_eq!(latest.headers.get("content-type").map(String::as_str), Some("text/html"));
        assert_eq!(store.get_snapshots(1).unwrap().len(), 2);
        assert_eq!(store.get_snapshot(first.id).unwrap().unwrap().body, b"<html>a</html>");
    }

    #[test]
    fn test_snapshot_append_rejects_stale_head() {
        let (_tmp, store) = open();

        let first = store.append_snapshot(&new_snapshot(1, None, "a")).unwrap();
        store
            .append_snapshot(&new_snapshot(1, Some(first.id), "b"))
            .unwrap();

        let err = store
            .append_snapshot(&new_snapshot(1, Some(first.id), "c"))
            .unwrap_err();
        assert!(matches!(err, DbError::ChainConflict { target_id: 1, .. }));

        let err = store.append_snapshot(&new_snapshot(1, None, "d")).unwrap_err();
        assert!(matches!(err, DbError::ChainConflict { .. }));
        assert_eq!(store.get_snapshots(1).unwrap().len(), 2);
    }

    #[test]
    fn test_lookup_keeps_out_of_range_thresholds() {
        let (_tmp, store) = open();
        let mut target = Target {
            name: "Legacy".to_string(),
            url: "https://legacy.example.com".to_string(),
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();

        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE targets SET confirmation_threshold = -1 WHERE id = ?1",
                params![id],
            )
            .unwrap();

        let settings = store.lookup_target(id).unwrap().unwrap();
        assert_eq!(settings.confirmation_threshold, -1);
        assert_eq!(store.get_target(id).unwrap().confirmation_threshold, -1);
    }

    #[test]
    fn test_snapshot_body_is_stored_as_raw_bytes() {
        let (_tmp, store) = open();

        // Latin-1 encoded page: not valid UTF-8.
        let raw = b"<html><p>caf\xe9</p></html>".to_vec();
        let mut snapshot = new_snapshot(1, None, "");
        snapshot.body = raw.clone();

        let stored = store.append_snapshot(&snapshot).unwrap();
        assert_eq!(stored.body_size, raw.len() as i64);

        let fetched = store.get_latest_snapshot(1).unwrap().unwrap();
        assert_eq!(fetched.body, raw);
        assert_eq!(fetched.body_size, 24);
        assert!(fetched.body_text().contains("caf\u{fffd}"));
    }

    #[test]
    fn test_parse_db_time_formats() {
        assert!(parse_db_time("2024-01-02 03:04:05.123456789").is_some());
        assert!(parse_db_time("2024-01-02 03:04:05").is_some());
        assert!(parse_db_time("2024-01-02T03:04:05Z").is_some());
        assert!(parse_db_time("yesterday").is_none());
    }
}
