//! Timer aggregate and its state machine
//!
//! A [`Timer`] tracks the deadline of one stage of one business entity. Every
//! operation validates the current status, mutates the timer and returns the
//! [`EventDraft`] that records the transition. Each transition bumps `version`;
//! persisting timer and event atomically, over the prior version, is the store's
//! job.
//!
//! The deadline is always recomputed from stored fields:
//! `deadline_at = started_at + allocated + total_extension + total_paused`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core::clock::format_duration;
use crate::core::error::ErrorKind;
use crate::core::identity::{EventId, TimerId, TimerKey, UserId};

/// Persisted timer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    #[default]
    NotStarted,
    Running,
    Paused,
    Completed,
    Overdue,
    Cancelled,
}

impl TimerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::NotStarted => "not_started",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
            TimerStatus::Completed => "completed",
            TimerStatus::Overdue => "overdue",
            TimerStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled timers never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TimerStatus::Completed | TimerStatus::Cancelled)
    }
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(TimerStatus::NotStarted),
            "running" => Ok(TimerStatus::Running),
            "paused" => Ok(TimerStatus::Paused),
            "completed" => Ok(TimerStatus::Completed),
            "overdue" => Ok(TimerStatus::Overdue),
            "cancelled" => Ok(TimerStatus::Cancelled),
            _ => Err(format!("Unknown timer status: {}", s)),
        }
    }
}

/// Transition recorded in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerEventType {
    Start,
    Pause,
    Resume,
    Complete,
    Extend,
    Reject,
    Skip,
    Cancel,
    /// Written only by the overdue sweep
    Overdue,
}

impl TimerEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerEventType::Start => "start",
            TimerEventType::Pause => "pause",
            TimerEventType::Resume => "resume",
            TimerEventType::Complete => "complete",
            TimerEventType::Extend => "extend",
            TimerEventType::Reject => "reject",
            TimerEventType::Skip => "skip",
            TimerEventType::Cancel => "cancel",
            TimerEventType::Overdue => "overdue",
        }
    }
}

impl fmt::Display for TimerEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimerEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(TimerEventType::Start),
            "pause" => Ok(TimerEventType::Pause),
            "resume" => Ok(TimerEventType::Resume),
            "complete" => Ok(TimerEventType::Complete),
            "extend" => Ok(TimerEventType::Extend),
            "reject" => Ok(TimerEventType::Reject),
            "skip" => Ok(TimerEventType::Skip),
            "cancel" => Ok(TimerEventType::Cancel),
            "overdue" => Ok(TimerEventType::Overdue),
            _ => Err(format!("Unknown timer event type: {}", s)),
        }
    }
}

/// Errors raised by the state machine itself
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("Cannot {operation} timer {key}: status is {status}")]
    InvalidState {
        operation: TimerEventType,
        status: TimerStatus,
        key: String,
    },

    #[error("Timer {key} is not past its deadline")]
    NotOverdue { key: String },

    #[error(
        "Invalid duration for {operation}: {ms} ms (must be greater than zero and at most ten years)"
    )]
    InvalidDuration { operation: TimerEventType, ms: i64 },
}

impl TimerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TimerError::InvalidState { .. } | TimerError::NotOverdue { .. } => {
                ErrorKind::InvalidState
            }
            TimerError::InvalidDuration { .. } => ErrorKind::Validation,
        }
    }
}

/// Longest allocation or single extension a timer accepts (ten years)
pub const MAX_DURATION_MS: i64 = 10 * 366 * 86_400_000;

/// `started + allocated + extension + paused`, or `None` if it leaves chrono's range
fn deadline_from(
    started: DateTime<Utc>,
    allocated_ms: i64,
    extension_ms: i64,
    paused_ms: i64,
) -> Option<DateTime<Utc>> {
    let total = allocated_ms.checked_add(extension_ms)?.checked_add(paused_ms)?;
    started.checked_add_signed(Duration::try_milliseconds(total)?)
}

/// Warning/critical thresholds, in percent of the allocation used
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 80.0,
            critical: 100.0,
        }
    }
}

/// The timer aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub id: TimerId,
    #[serde(flatten)]
    pub key: TimerKey,
    pub status: TimerStatus,
    pub allocated_ms: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub total_paused_ms: i64,
    pub total_extension_ms: i64,
    pub assigned_user: Option<UserId>,
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A transition waiting to be appended to the event log
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: TimerEventType,
    pub previous_status: Option<TimerStatus>,
    pub new_status: TimerStatus,
    pub performed_by: Option<UserId>,
    pub reason: Option<String>,
    pub duration_change_ms: Option<i64>,
    /// The timer as it stands after the transition
    pub snapshot: Timer,
    pub created_at: DateTime<Utc>,
}

/// A persisted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEvent {
    pub id: EventId,
    pub timer_id: TimerId,
    pub event_type: TimerEventType,
    pub previous_status: Option<TimerStatus>,
    pub new_status: TimerStatus,
    pub performed_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_change_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TimerEvent {
    /// Decode the timer snapshot carried by this event
    pub fn snapshot_timer(&self) -> Option<Timer> {
        self.snapshot
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl Timer {
    /// A fresh, not-started timer for `key`
    pub fn new(id: TimerId, key: TimerKey, created_by: Option<UserId>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            key,
            status: TimerStatus::NotStarted,
            allocated_ms: 0,
            started_at: None,
            ended_at: None,
            paused_at: None,
            deadline_at: None,
            total_paused_ms: 0,
            total_extension_ms: 0,
            assigned_user: None,
            created_by,
            metadata: serde_json::Map::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn allocated(&self) -> Duration {
        Duration::milliseconds(self.allocated_ms)
    }

    pub fn total_paused(&self) -> Duration {
        Duration::milliseconds(self.total_paused_ms)
    }

    pub fn total_extension(&self) -> Duration {
        Duration::milliseconds(self.total_extension_ms)
    }

    /// Allocation plus granted extensions
    pub fn effective_allocation_ms(&self) -> i64 {
        self.allocated_ms.saturating_add(self.total_extension_ms)
    }

    /// The deadline implied by the stored fields
    pub fn expected_deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at.and_then(|started| {
            deadline_from(
                started,
                self.allocated_ms,
                self.total_extension_ms,
                self.total_paused_ms,
            )
        })
    }

    fn recompute_deadline(&mut self) {
        self.deadline_at = self.expected_deadline();
    }

    /// Status as observed at `now`: a running timer past its deadline reads as overdue
    pub fn effective_status(&self, now: DateTime<Utc>) -> TimerStatus {
        match (self.status, self.deadline_at) {
            (TimerStatus::Running, Some(deadline)) if now > deadline => TimerStatus::Overdue,
            (status, _) => status,
        }
    }

    fn require(&self, operation: TimerEventType, allowed: &[TimerStatus]) -> Result<(), TimerError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TimerError::InvalidState {
                operation,
                status: self.status,
                key: self.key.to_string(),
            })
        }
    }

    fn record(
        &mut self,
        event_type: TimerEventType,
        previous: TimerStatus,
        actor: Option<UserId>,
        reason: Option<String>,
        duration_change_ms: Option<i64>,
        now: DateTime<Utc>,
    ) -> EventDraft {
        self.version += 1;
        self.updated_at = now;
        EventDraft {
            event_type,
            previous_status: Some(previous),
            new_status: self.status,
            performed_by: actor,
            reason,
            duration_change_ms,
            snapshot: self.clone(),
            created_at: now,
        }
    }

    /// NotStarted -> Running
    pub fn start(
        &mut self,
        allocated: Duration,
        assigned_user: Option<UserId>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<EventDraft, TimerError> {
        self.require(TimerEventType::Start, &[TimerStatus::NotStarted])?;
        let allocated_ms = allocated.num_milliseconds();
        if allocated_ms <= 0
            || allocated_ms > MAX_DURATION_MS
            || deadline_from(now, allocated_ms, 0, 0).is_none()
        {
            return Err(TimerError::InvalidDuration {
                operation: TimerEventType::Start,
                ms: allocated_ms,
            });
        }

        let previous = self.status;
        self.status = TimerStatus::Running;
        self.allocated_ms = allocated_ms;
        self.started_at = Some(now);
        self.ended_at = None;
        self.paused_at = None;
        if assigned_user.is_some() {
            self.assigned_user = assigned_user;
        }
        self.recompute_deadline();

        Ok(self.record(
            TimerEventType::Start,
            previous,
            Some(actor),
            None,
            Some(allocated_ms),
            now,
        ))
    }

    /// Running -> Paused
    pub fn pause(
        &mut self,
        reason: Option<String>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<EventDraft, TimerError> {
        self.require(
            TimerEventType::Pause,
            &[TimerStatus::Running, TimerStatus::Overdue],
        )?;

        let previous = self.status;
        self.status = TimerStatus::Paused;
        self.paused_at = Some(now);

        Ok(self.record(TimerEventType::Pause, previous, Some(actor), reason, None, now))
    }

    /// Paused -> Running, pushing the deadline out by the pause interval
    pub fn resume(&mut self, actor: UserId, now: DateTime<Utc>) -> Result<EventDraft, TimerError> {
        self.require(TimerEventType::Resume, &[TimerStatus::Paused])?;

        let paused_for = self
            .paused_at
            .map(|paused| (now - paused).num_milliseconds().max(0))
            .unwrap_or(0);

        let previous = self.status;
        self.status = TimerStatus::Running;
        self.total_paused_ms = self.total_paused_ms.saturating_add(paused_for);
        self.paused_at = None;
        self.recompute_deadline();

        Ok(self.record(
            TimerEventType::Resume,
            previous,
            Some(actor),
            None,
            Some(paused_for),
            now,
        ))
    }

    /// Running/Paused/Overdue -> Completed
    ///
    /// The deadline is left as it was. A timer completed while paused keeps its
    /// `paused_at` so the open pause can be excluded from the actual duration.
    pub fn complete(
        &mut self,
        notes: Option<String>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<EventDraft, TimerError> {
        self.require(
            TimerEventType::Complete,
            &[TimerStatus::Running, TimerStatus::Paused, TimerStatus::Overdue],
        )?;

        let previous = self.status;
        self.status = TimerStatus::Completed;
        self.ended_at = Some(now);

        Ok(self.record(TimerEventType::Complete, previous, Some(actor), notes, None, now))
    }

    /// Grant extra time; an overdue timer whose new deadline lies ahead runs again
    pub fn extend(
        &mut self,
        by: Duration,
        reason: Option<String>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<EventDraft, TimerError> {
        self.require(
            TimerEventType::Extend,
            &[TimerStatus::Running, TimerStatus::Paused, TimerStatus::Overdue],
        )?;
        let by_ms = by.num_milliseconds();
        let extension_ms = self.total_extension_ms.checked_add(by_ms);
        let fits = match (self.started_at, extension_ms) {
            (Some(started), Some(extension_ms)) => {
                deadline_from(started, self.allocated_ms, extension_ms, self.total_paused_ms)
                    .is_some()
            }
            _ => false,
        };
        if by_ms <= 0 || by_ms > MAX_DURATION_MS || !fits {
            return Err(TimerError::InvalidDuration {
                operation: TimerEventType::Extend,
                ms: by_ms,
            });
        }

        let previous = self.status;
        self.total_extension_ms += by_ms;
        self.recompute_deadline();
        if self.status == TimerStatus::Overdue && self.deadline_at.is_some_and(|d| d > now) {
            self.status = TimerStatus::Running;
        }

        Ok(self.record(
            TimerEventType::Extend,
            previous,
            Some(actor),
            reason,
            Some(by_ms),
            now,
        ))
    }

    /// Send the stage back for rework
    ///
    /// With `reset` the timer returns to NotStarted and every accumulated
    /// duration is cleared so the stage restarts from scratch. Without it the
    /// timer keeps running and only the event is recorded.
    pub fn reject(
        &mut self,
        reason: Option<String>,
        reset: bool,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<EventDraft, TimerError> {
        self.require(
            TimerEventType::Reject,
            &[TimerStatus::Running, TimerStatus::Paused, TimerStatus::Overdue],
        )?;

        let previous = self.status;
        if reset {
            self.status = TimerStatus::NotStarted;
            self.started_at = None;
            self.ended_at = None;
            self.paused_at = None;
            self.deadline_at = None;
            self.total_paused_ms = 0;
            self.total_extension_ms = 0;
        }

        Ok(self.record(TimerEventType::Reject, previous, Some(actor), reason, None, now))
    }

    /// Any non-terminal status -> Cancelled, recorded as a skip
    pub fn skip(
        &mut self,
        reason: Option<String>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<EventDraft, TimerError> {
        self.close(TimerEventType::Skip, reason, actor, now)
    }

    /// Any non-terminal status -> Cancelled
    pub fn cancel(
        &mut self,
        reason: Option<String>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<EventDraft, TimerError> {
        self.close(TimerEventType::Cancel, reason, actor, now)
    }

    fn close(
        &mut self,
        event_type: TimerEventType,
        reason: Option<String>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<EventDraft, TimerError> {
        self.require(
            event_type,
            &[
                TimerStatus::NotStarted,
                TimerStatus::Running,
                TimerStatus::Paused,
                TimerStatus::Overdue,
            ],
        )?;

        let previous = self.status;
        self.status = TimerStatus::Cancelled;
        self.ended_at = Some(now);

        Ok(self.record(event_type, previous, Some(actor), reason, None, now))
    }

    /// Running -> Overdue once the deadline has passed (sweep only)
    pub fn mark_overdue(&mut self, now: DateTime<Utc>) -> Result<EventDraft, TimerError> {
        self.require(TimerEventType::Overdue, &[TimerStatus::Running])?;
        if self.effective_status(now) != TimerStatus::Overdue {
            return Err(TimerError::NotOverdue {
                key: self.key.to_string(),
            });
        }

        let previous = self.status;
        self.status = TimerStatus::Overdue;

        Ok(self.record(TimerEventType::Overdue, previous, None, None, None, now))
    }

    /// Time spent working on the stage, excluding pauses (including an open one)
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let end = self.ended_at.unwrap_or(now);
        let open_pause = self
            .paused_at
            .map(|paused| (end - paused).num_milliseconds().max(0))
            .unwrap_or(0);
        ((end - started).num_milliseconds() - self.total_paused_ms - open_pause).max(0)
    }

    /// Signed time left before the deadline; frozen while paused or once finished
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        let deadline = self.deadline_at?;
        let reference = match (self.ended_at, self.paused_at) {
            (Some(ended), _) => ended,
            (None, Some(paused)) => paused,
            (None, None) => now,
        };
        Some((deadline - reference).num_milliseconds())
    }

    /// Read model with derived status and progress figures
    pub fn view(&self, now: DateTime<Utc>, thresholds: &Thresholds) -> TimerView {
        let effective_status = self.effective_status(now);
        let elapsed_ms = self.elapsed_ms(now);
        let remaining_ms = self.remaining_ms(now);
        let allocation = self.effective_allocation_ms();
        let percent_used = if allocation > 0 {
            elapsed_ms as f64 / allocation as f64 * 100.0
        } else {
            0.0
        };

        let indicator = match effective_status {
            TimerStatus::NotStarted | TimerStatus::Completed | TimerStatus::Cancelled => {
                Indicator::Grey
            }
            TimerStatus::Overdue => Indicator::Red,
            _ if percent_used >= thresholds.critical => Indicator::Red,
            _ if percent_used >= thresholds.warning => Indicator::Yellow,
            _ => Indicator::Green,
        };

        let display = match (effective_status, remaining_ms) {
            (TimerStatus::NotStarted, _) => "Not started".to_string(),
            (TimerStatus::Cancelled, _) => "Cancelled".to_string(),
            (TimerStatus::Completed, Some(r)) if r < 0 => {
                format!("Completed ({} late)", format_duration(r))
            }
            (TimerStatus::Completed, _) => "Completed".to_string(),
            (TimerStatus::Paused, Some(r)) => format!("Paused, {} remaining", format_duration(r)),
            (_, Some(r)) if r < 0 => format!("{} overdue", format_duration(r)),
            (_, Some(r)) => format!("{} remaining", format_duration(r)),
            (status, None) => status.to_string(),
        };

        TimerView {
            timer: self.clone(),
            effective_status,
            elapsed_ms,
            remaining_ms,
            percent_used,
            indicator,
            display,
        }
    }
}

/// Traffic-light progress indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Green,
    Yellow,
    Red,
    Grey,
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indicator::Green => write!(f, "green"),
            Indicator::Yellow => write!(f, "yellow"),
            Indicator::Red => write!(f, "red"),
            Indicator::Grey => write!(f, "grey"),
        }
    }
}

/// A timer as seen by readers at a given instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerView {
    #[serde(flatten)]
    pub timer: Timer,
    pub effective_status: TimerStatus,
    pub elapsed_ms: i64,
    pub remaining_ms: Option<i64>,
    pub percent_used: f64,
    pub indicator: Indicator,
    pub display: String,
}
