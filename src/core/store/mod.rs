//! SQLite-backed timer store
//!
//! Holds timers, their append-only event log, workflow step instances and
//! business-calendar overrides. Every mutation runs inside a [`StoreTx`]
//! (`BEGIN IMMEDIATE`), so a load-validate-write sequence is serialized against
//! other writers. Timer updates are additionally guarded by the row version.

mod serialize;


use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::core::calendar::CalendarEntry;
use crate::core::error::ErrorKind;
use crate::core::identity::{EntityRef, EventId, StepInstanceId, TimerId, TimerKey};
use crate::core::timer::{EventDraft, Timer, TimerEvent, TimerEventType, TimerStatus};
use crate::core::workflow::StepInstance;

use serialize::{date, json, millis, opt_json, opt_millis, opt_timestamp, timestamp};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot encode JSON column: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::Sqlite(_) | StoreError::Io(_) | StoreError::Json(_) => {
                ErrorKind::Storage
            }
        }
    }

    fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound { what: what.into() }
    }

    /// Turn a constraint violation into a conflict with `message`
    fn on_constraint(err: rusqlite::Error, message: impl FnOnce() -> String) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
                StoreError::Conflict(message())
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS timers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    stage TEXT NOT NULL,
    status TEXT NOT NULL,
    allocated_ms INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER,
    ended_at INTEGER,
    paused_at INTEGER,
    deadline_at INTEGER,
    total_paused_ms INTEGER NOT NULL DEFAULT 0,
    total_extension_ms INTEGER NOT NULL DEFAULT 0,
    assigned_user INTEGER,
    created_by INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    version INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- At most one non-cancelled timer per key
CREATE UNIQUE INDEX IF NOT EXISTS idx_timers_active_key
    ON timers(entity_type, entity_id, stage) WHERE status != 'cancelled';
CREATE INDEX IF NOT EXISTS idx_timers_status_deadline ON timers(status, deadline_at);

CREATE TABLE IF NOT EXISTS timer_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timer_id INTEGER NOT NULL REFERENCES timers(id),
    event_type TEXT NOT NULL,
    previous_status TEXT,
    new_status TEXT NOT NULL,
    performed_by INTEGER,
    reason TEXT,
    duration_change_ms INTEGER,
    snapshot TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_timer ON timer_events(timer_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_events_type ON timer_events(event_type, created_at);

-- Event log is append-only
CREATE TRIGGER IF NOT EXISTS timer_events_no_update
    BEFORE UPDATE ON timer_events
    BEGIN SELECT RAISE(ABORT, 'timer events are immutable'); END;
CREATE TRIGGER IF NOT EXISTS timer_events_no_delete
    BEFORE DELETE ON timer_events
    BEGIN SELECT RAISE(ABORT, 'timer events are immutable'); END;

CREATE TABLE IF NOT EXISTS step_instances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_code TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    step_key TEXT NOT NULL,
    step_name TEXT NOT NULL,
    position INTEGER NOT NULL,
    allocated_ms INTEGER,
    business_hours_only INTEGER NOT NULL DEFAULT 0,
    optional INTEGER NOT NULL DEFAULT 0,
    assigned_user INTEGER,
    outcome TEXT NOT NULL,
    timer_id INTEGER REFERENCES timers(id),
    rejection_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deadline_offset_ms INTEGER,
    due_at INTEGER,
    UNIQUE (workflow_code, entity_type, entity_id, step_key)
);
CREATE INDEX IF NOT EXISTS idx_steps_entity ON step_instances(entity_type, entity_id, position);

CREATE TABLE IF NOT EXISTS calendar_entries (
    date TEXT PRIMARY KEY,
    is_holiday INTEGER NOT NULL DEFAULT 0,
    is_weekend INTEGER NOT NULL DEFAULT 0,
    name TEXT
);
"#;

const TIMER_COLUMNS: &str = "id, entity_type, entity_id, stage, status, allocated_ms, \
     started_at, ended_at, paused_at, deadline_at, total_paused_ms, total_extension_ms, \
     assigned_user, created_by, metadata, version, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, timer_id, event_type, previous_status, new_status, \
     performed_by, reason, duration_change_ms, snapshot, created_at";

const STEP_COLUMNS: &str = "id, workflow_code, entity_type, entity_id, step_key, step_name, \
     position, allocated_ms, business_hours_only, optional, assigned_user, outcome, timer_id, \
     rejection_count, created_at, updated_at, deadline_offset_ms, due_at";

fn timer_from_row(row: &Row<'_>) -> rusqlite::Result<Timer> {
    let entity = EntityRef::new(row.get(1)?, row.get(2)?);
    Ok(Timer {
        id: row.get(0)?,
        key: entity.stage(row.get::<_, String>(3)?),
        status: row.get(4)?,
        allocated_ms: row.get(5)?,
        started_at: opt_timestamp(row, 6)?,
        ended_at: opt_timestamp(row, 7)?,
        paused_at: opt_timestamp(row, 8)?,
        deadline_at: opt_timestamp(row, 9)?,
        total_paused_ms: row.get(10)?,
        total_extension_ms: row.get(11)?,
        assigned_user: row.get(12)?,
        created_by: row.get(13)?,
        metadata: json(row, 14)?,
        version: row.get(15)?,
        created_at: timestamp(row, 16)?,
        updated_at: timestamp(row, 17)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<TimerEvent> {
    Ok(TimerEvent {
        id: row.get(0)?,
        timer_id: row.get(1)?,
        event_type: row.get(2)?,
        previous_status: row.get(3)?,
        new_status: row.get(4)?,
        performed_by: row.get(5)?,
        reason: row.get(6)?,
        duration_change_ms: row.get(7)?,
        snapshot: opt_json(row, 8)?,
        created_at: timestamp(row, 9)?,
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<StepInstance> {
    Ok(StepInstance {
        id: row.get(0)?,
        workflow_code: row.get(1)?,
        entity: EntityRef::new(row.get(2)?, row.get(3)?),
        step_key: row.get(4)?,
        step_name: row.get(5)?,
        position: row.get(6)?,
        allocated_ms: row.get(7)?,
        business_hours_only: row.get(8)?,
        optional: row.get(9)?,
        assigned_user: row.get(10)?,
        outcome: row.get(11)?,
        timer_id: row.get(12)?,
        rejection_count: row.get(13)?,
        created_at: timestamp(row, 14)?,
        updated_at: timestamp(row, 15)?,
        deadline_offset_ms: row.get(16)?,
        due_at: opt_timestamp(row, 17)?,
    })
}

fn calendar_from_row(row: &Row<'_>) -> rusqlite::Result<CalendarEntry> {
    Ok(CalendarEntry {
        date: date(row, 0)?,
        is_holiday: row.get(1)?,
        is_weekend: row.get(2)?,
        name: row.get(3)?,
    })
}

/// Filter for [`TimerQueries::list_timers`]
#[derive(Debug, Clone, Default)]
pub struct TimerFilter {
    pub entity: Option<EntityRef>,
    pub status: Option<TimerStatus>,
    /// Include cancelled timers
    pub include_cancelled: bool,
}

/// Read queries shared by the store and open transactions
pub trait TimerQueries {
    fn conn(&self) -> &Connection;

    /// Load a timer by id
    fn get_timer(&self, id: TimerId) -> Result<Timer> {
        self.conn()
            .query_row(
                &format!("SELECT {TIMER_COLUMNS} FROM timers WHERE id = ?1"),
                [id],
                timer_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("Timer {}", id)))
    }

    /// The non-cancelled timer for a key, if any
    fn active_timer(&self, key: &TimerKey) -> Result<Option<Timer>> {
        let timer = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {TIMER_COLUMNS} FROM timers
                     WHERE entity_type = ?1 AND entity_id = ?2 AND stage = ?3
                       AND status != 'cancelled'"
                ),
                params![key.entity.entity_type, key.entity.entity_id, key.stage],
                timer_from_row,
            )
            .optional()?;
        Ok(timer)
    }

    /// The non-cancelled timer for a key, else the most recent cancelled one
    fn find_timer(&self, key: &TimerKey) -> Result<Option<Timer>> {
        let timer = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {TIMER_COLUMNS} FROM timers
                     WHERE entity_type = ?1 AND entity_id = ?2 AND stage = ?3
                     ORDER BY (status = 'cancelled') ASC, id DESC
                     LIMIT 1"
                ),
                params![key.entity.entity_type, key.entity.entity_id, key.stage],
                timer_from_row,
            )
            .optional()?;
        Ok(timer)
    }

    fn list_timers(&self, filter: &TimerFilter) -> Result<Vec<Timer>> {
        let mut sql = format!("SELECT {TIMER_COLUMNS} FROM timers WHERE 1 = 1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(entity) = &filter.entity {
            args.push(Box::new(entity.entity_type));
            sql.push_str(&format!(" AND entity_type = ?{}", args.len()));
            args.push(Box::new(entity.entity_id));
            sql.push_str(&format!(" AND entity_id = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(Box::new(status));
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        } else if !filter.include_cancelled {
            sql.push_str(" AND status != 'cancelled'");
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            timer_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Running timers whose deadline lies strictly before `now`
    fn overdue_candidates(&self, now: DateTime<Utc>) -> Result<Vec<Timer>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {TIMER_COLUMNS} FROM timers
             WHERE status = 'running' AND deadline_at IS NOT NULL AND deadline_at < ?1
             ORDER BY deadline_at, id"
        ))?;
        let rows = stmt.query_map([millis(now)], timer_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Event log of one timer in log order
    fn events_for_timer(&self, timer_id: TimerId) -> Result<Vec<TimerEvent>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM timer_events
             WHERE timer_id = ?1
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([timer_id], event_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Events of one type, optionally limited to `[from, to)`, in log order
    fn events_by_type(
        &self,
        event_type: TimerEventType,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimerEvent>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM timer_events
             WHERE event_type = ?1
               AND (?2 IS NULL OR created_at >= ?2)
               AND (?3 IS NULL OR created_at < ?3)
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(
            params![event_type, opt_millis(from), opt_millis(to)],
            event_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_step(&self, id: StepInstanceId) -> Result<StepInstance> {
        self.conn()
            .query_row(
                &format!("SELECT {STEP_COLUMNS} FROM step_instances WHERE id = ?1"),
                [id],
                step_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("Step instance {}", id)))
    }

    /// All step instances of an entity, grouped by workflow, in position order
    fn steps_for_entity(&self, entity: &EntityRef) -> Result<Vec<StepInstance>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STEP_COLUMNS} FROM step_instances
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY workflow_code, position"
        ))?;
        let rows = stmt.query_map(params![entity.entity_type, entity.entity_id], step_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Step instances of one workflow run, in position order
    fn workflow_steps(&self, workflow_code: &str, entity: &EntityRef) -> Result<Vec<StepInstance>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STEP_COLUMNS} FROM step_instances
             WHERE workflow_code = ?1 AND entity_type = ?2 AND entity_id = ?3
             ORDER BY position"
        ))?;
        let rows = stmt.query_map(
            params![workflow_code, entity.entity_type, entity.entity_id],
            step_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The step instance bound to a timer
    fn step_for_timer(&self, timer_id: TimerId) -> Result<Option<StepInstance>> {
        let step = self
            .conn()
            .query_row(
                &format!("SELECT {STEP_COLUMNS} FROM step_instances WHERE timer_id = ?1"),
                [timer_id],
                step_from_row,
            )
            .optional()?;
        Ok(step)
    }

    /// Calendar overrides, optionally limited to `[from, to]`
    fn calendar_entries(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CalendarEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT date, is_holiday, is_weekend, name FROM calendar_entries
             WHERE (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2)
             ORDER BY date",
        )?;
        let from = from.map(|d| d.format("%Y-%m-%d").to_string());
        let to = to.map(|d| d.format("%Y-%m-%d").to_string());
        let rows = stmt.query_map(params![from, to], calendar_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Connection to the timer database
pub struct TimerStore {
    conn: Connection,
}

impl TimerQueries for TimerStore {
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl TimerStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), "opened timer store");
        Self::init(conn, busy_timeout)
    }

    /// A private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, Duration::from_millis(0))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Begin a write transaction; it takes the database write lock immediately
    pub fn transaction(&mut self) -> Result<StoreTx<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(StoreTx { tx })
    }
}

/// An open write transaction
///
/// Dropping without [`StoreTx::commit`] rolls back.
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

impl TimerQueries for StoreTx<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }
}

impl StoreTx<'_> {
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Insert a new timer and assign its id
    ///
    /// Fails with `Conflict` if a non-cancelled timer already exists for the key.
    pub fn insert_timer(&self, timer: &mut Timer) -> Result<TimerId> {
        let metadata = serde_json::to_string(&timer.metadata)?;
        self.tx
            .execute(
                "INSERT INTO timers (entity_type, entity_id, stage, status, allocated_ms,
                    started_at, ended_at, paused_at, deadline_at, total_paused_ms,
                    total_extension_ms, assigned_user, created_by, metadata, version,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    timer.key.entity.entity_type,
                    timer.key.entity.entity_id,
                    timer.key.stage,
                    timer.status,
                    timer.allocated_ms,
                    opt_millis(timer.started_at),
                    opt_millis(timer.ended_at),
                    opt_millis(timer.paused_at),
                    opt_millis(timer.deadline_at),
                    timer.total_paused_ms,
                    timer.total_extension_ms,
                    timer.assigned_user,
                    timer.created_by,
                    metadata,
                    timer.version,
                    millis(timer.created_at),
                    millis(timer.updated_at),
                ],
            )
            .map_err(|e| {
                StoreError::on_constraint(e, || {
                    format!("an active timer already exists for {}", timer.key)
                })
            })?;

        timer.id = TimerId(self.tx.last_insert_rowid());
        tracing::debug!(timer = %timer.id, key = %timer.key, "inserted timer");
        Ok(timer.id)
    }

    /// Write back a mutated timer
    ///
    /// Each transition bumps `version`; the row is only overwritten if it still
    /// holds the version the timer was loaded at. Otherwise `Conflict`.
    pub fn update_timer(&self, timer: &Timer) -> Result<()> {
        let metadata = serde_json::to_string(&timer.metadata)?;
        let changed = self
            .tx
            .execute(
                "UPDATE timers SET status = ?1, allocated_ms = ?2, started_at = ?3,
                    ended_at = ?4, paused_at = ?5, deadline_at = ?6, total_paused_ms = ?7,
                    total_extension_ms = ?8, assigned_user = ?9, metadata = ?10,
                    version = ?11, updated_at = ?12
                 WHERE id = ?13 AND version = ?14",
                params![
                    timer.status,
                    timer.allocated_ms,
                    opt_millis(timer.started_at),
                    opt_millis(timer.ended_at),
                    opt_millis(timer.paused_at),
                    opt_millis(timer.deadline_at),
                    timer.total_paused_ms,
                    timer.total_extension_ms,
                    timer.assigned_user,
                    metadata,
                    timer.version,
                    millis(timer.updated_at),
                    timer.id,
                    timer.version - 1,
                ],
            )
            .map_err(|e| {
                StoreError::on_constraint(e, || {
                    format!("an active timer already exists for {}", timer.key)
                })
            })?;

        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "timer {} ({}) was modified concurrently",
                timer.id, timer.key
            )));
        }
        Ok(())
    }

    /// Append one event to a timer's log
    pub fn append_event(&self, timer_id: TimerId, draft: &EventDraft) -> Result<TimerEvent> {
        let snapshot = serde_json::to_value(&draft.snapshot)?;
        self.tx.execute(
            "INSERT INTO timer_events (timer_id, event_type, previous_status, new_status,
                performed_by, reason, duration_change_ms, snapshot, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                timer_id,
                draft.event_type,
                draft.previous_status,
                draft.new_status,
                draft.performed_by,
                draft.reason,
                draft.duration_change_ms,
                snapshot.to_string(),
                millis(draft.created_at),
            ],
        )?;

        Ok(TimerEvent {
            id: EventId(self.tx.last_insert_rowid()),
            timer_id,
            event_type: draft.event_type,
            previous_status: draft.previous_status,
            new_status: draft.new_status,
            performed_by: draft.performed_by,
            reason: draft.reason.clone(),
            duration_change_ms: draft.duration_change_ms,
            snapshot: Some(snapshot),
            created_at: draft.created_at,
        })
    }

    /// Insert a step instance and assign its id
    pub fn insert_step(&self, step: &mut StepInstance) -> Result<StepInstanceId> {
        self.tx
            .execute(
                "INSERT INTO step_instances (workflow_code, entity_type, entity_id, step_key,
                    step_name, position, allocated_ms, business_hours_only, optional,
                    assigned_user, outcome, timer_id, rejection_count, created_at, updated_at,
                    deadline_offset_ms, due_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    step.workflow_code,
                    step.entity.entity_type,
                    step.entity.entity_id,
                    step.step_key,
                    step.step_name,
                    step.position,
                    step.allocated_ms,
                    step.business_hours_only,
                    step.optional,
                    step.assigned_user,
                    step.outcome,
                    step.timer_id,
                    step.rejection_count,
                    millis(step.created_at),
                    millis(step.updated_at),
                    step.deadline_offset_ms,
                    opt_millis(step.due_at),
                ],
            )
            .map_err(|e| {
                StoreError::on_constraint(e, || {
                    format!(
                        "workflow {} already has step {} for {}",
                        step.workflow_code, step.step_key, step.entity
                    )
                })
            })?;

        step.id = StepInstanceId(self.tx.last_insert_rowid());
        Ok(step.id)
    }

    /// Write back the mutable fields of a step instance
    pub fn update_step(&self, step: &StepInstance) -> Result<()> {
        let changed = self.tx.execute(
            "UPDATE step_instances SET allocated_ms = ?1, assigned_user = ?2, outcome = ?3,
                timer_id = ?4, rejection_count = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                step.allocated_ms,
                step.assigned_user,
                step.outcome,
                step.timer_id,
                step.rejection_count,
                millis(step.updated_at),
                step.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(format!("Step instance {}", step.id)));
        }
        Ok(())
    }

    /// Insert or replace the override for a date
    pub fn upsert_calendar_entry(&self, entry: &CalendarEntry) -> Result<()> {
        self.tx.execute(
            "INSERT INTO calendar_entries (date, is_holiday, is_weekend, name)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(date) DO UPDATE SET
                is_holiday = excluded.is_holiday,
                is_weekend = excluded.is_weekend,
                name = excluded.name",
            params![
                entry.date.format("%Y-%m-%d").to_string(),
                entry.is_holiday,
                entry.is_weekend,
                entry.name,
            ],
        )?;
        Ok(())
    }

    /// Remove the override for a date; returns whether one existed
    pub fn remove_calendar_entry(&self, date: NaiveDate) -> Result<bool> {
        let removed = self.tx.execute(
            "DELETE FROM calendar_entries WHERE date = ?1",
            [date.format("%Y-%m-%d").to_string()],
        )?;
        Ok(removed > 0)
    }
}
