//! Workflow engine: step sequencing on top of the timer state machine
//!
//! A workflow run is one [`StepInstance`] per stage of a [`WorkflowDefinition`]
//! for one entity. Finishing a step (complete, skip, cancel) activates the next
//! pending one; activating a step with a budget starts its timer. Every
//! operation is a single store transaction.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::analytics::{self, Completion, EntityPerformance, StepPerformance, TrendBucket, UserPerformance};
use crate::core::calendar::{BusinessCalendar, BusinessHours, CalendarEntry};
use crate::core::catalog::{WorkflowCatalog, WorkflowDefinition};
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::{Config, ConfigError};
use crate::core::error::ErrorKind;
use crate::core::identity::{EntityRef, EntityType, StepInstanceId, TimerId, TimerKey, UserId};
use crate::core::store::{StoreError, StoreTx, TimerFilter, TimerQueries, TimerStore};
use crate::core::timer::{
    EventDraft, Thresholds, Timer, TimerError, TimerEvent, TimerEventType, TimerStatus, TimerView,
    MAX_DURATION_MS,
};

/// Outcome of a step instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Pending,
    Active,
    Completed,
    Skipped,
    Cancelled,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Pending => "pending",
            StepOutcome::Active => "active",
            StepOutcome::Completed => "completed",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Cancelled => "cancelled",
        }
    }

    /// The step no longer blocks the ones after it
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            StepOutcome::Completed | StepOutcome::Skipped | StepOutcome::Cancelled
        )
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StepOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepOutcome::Pending),
            "active" => Ok(StepOutcome::Active),
            "completed" => Ok(StepOutcome::Completed),
            "skipped" => Ok(StepOutcome::Skipped),
            "cancelled" => Ok(StepOutcome::Cancelled),
            _ => Err(format!("Unknown step outcome: {}", s)),
        }
    }
}

/// One stage of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInstance {
    pub id: StepInstanceId,
    pub workflow_code: String,
    pub entity: EntityRef,
    pub step_key: String,
    pub step_name: String,
    pub position: u32,
    /// Nominal budget in ms (business time for business-hours steps)
    pub allocated_ms: Option<i64>,
    pub business_hours_only: bool,
    pub optional: bool,
    pub assigned_user: Option<UserId>,
    pub outcome: StepOutcome,
    pub timer_id: Option<TimerId>,
    pub rejection_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Offset of the step's deadline from `due_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_offset_ms: Option<i64>,
    /// Due date of the run (e.g. the tender submission deadline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
}

impl StepInstance {
    /// Timer key of this step
    pub fn key(&self) -> TimerKey {
        self.entity.stage(self.step_key.clone())
    }

    /// Deadline fixed by the run's due date, if the step is anchored to it
    pub fn anchored_deadline(&self) -> Option<DateTime<Utc>> {
        let offset = Duration::try_milliseconds(self.deadline_offset_ms?)?;
        self.due_at?.checked_add_signed(offset)
    }
}

/// Options for starting a workflow run
#[derive(Debug, Clone, Default)]
pub struct StartWorkflow {
    /// Due date that anchored steps count down to
    pub due_at: Option<DateTime<Utc>>,
}

/// Options for starting a step
#[derive(Debug, Clone, Default)]
pub struct StartStep {
    /// Overrides the step's default budget
    pub allocated: Option<Duration>,
    pub assigned_user: Option<UserId>,
}

/// Errors that can occur during workflow operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Workflow {code} applies to {expected} entities, not {actual}")]
    EntityMismatch {
        code: String,
        expected: EntityType,
        actual: EntityType,
    },

    #[error("Workflow {code} is already started for {entity}")]
    AlreadyStarted { code: String, entity: EntityRef },

    #[error("No workflow steps found for {0}")]
    NoWorkflow(EntityRef),

    #[error("No timer found for {0}")]
    NoTimer(String),

    #[error("Step {step} ({key}) cannot start: step '{blocking}' is not finished")]
    StepBlocked {
        step: StepInstanceId,
        key: String,
        blocking: String,
    },

    #[error("Step {step} ({key}) is {outcome}")]
    StepState {
        step: StepInstanceId,
        key: String,
        outcome: StepOutcome,
    },

    #[error("Step {step} ({key}) has no timer")]
    StepUntimed { step: StepInstanceId, key: String },

    #[error("Step {step} ({key}) has no default allocation; pass one explicitly")]
    MissingAllocation { step: StepInstanceId, key: String },

    #[error("Step {step} ({key}) is not optional and cannot be skipped")]
    NotOptional { step: StepInstanceId, key: String },

    #[error("Deadline of {key} ({deadline}) has already passed; pass an explicit allocation")]
    DeadlinePassed {
        key: String,
        deadline: DateTime<Utc>,
    },

    #[error("Timer {key} belongs to workflow step {step}; use the step operations")]
    StepBound { step: StepInstanceId, key: String },

    #[error("Invalid allocation for {key}: must be greater than zero and at most ten years")]
    InvalidAllocation { key: String },
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Timer(e) => e.kind(),
            WorkflowError::Store(e) => e.kind(),
            WorkflowError::Config(e) => e.kind(),
            WorkflowError::UnknownWorkflow(_)
            | WorkflowError::NoWorkflow(_)
            | WorkflowError::NoTimer(_) => ErrorKind::NotFound,
            WorkflowError::AlreadyStarted { .. } => ErrorKind::Conflict,
            WorkflowError::StepBlocked { .. }
            | WorkflowError::StepState { .. }
            | WorkflowError::StepUntimed { .. }
            | WorkflowError::StepBound { .. } => ErrorKind::InvalidState,
            WorkflowError::EntityMismatch { .. }
            | WorkflowError::MissingAllocation { .. }
            | WorkflowError::InvalidAllocation { .. }
            | WorkflowError::NotOptional { .. }
            | WorkflowError::DeadlinePassed { .. } => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// A step with its timer as seen now
#[derive(Debug, Clone, Serialize)]
pub struct StepStatus {
    #[serde(flatten)]
    pub step: StepInstance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerView>,
}

/// Step counters for a workflow status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowProgress {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub active: usize,
    pub pending: usize,
    pub overdue: usize,
    /// Finished steps as a percentage of all steps
    pub percent_complete: f64,
}

impl WorkflowProgress {
    fn from_steps(steps: &[StepStatus]) -> Self {
        let mut progress = WorkflowProgress {
            total: steps.len(),
            ..Default::default()
        };
        for s in steps {
            match s.step.outcome {
                StepOutcome::Completed => progress.completed += 1,
                StepOutcome::Skipped => progress.skipped += 1,
                StepOutcome::Cancelled => progress.cancelled += 1,
                StepOutcome::Active => progress.active += 1,
                StepOutcome::Pending => progress.pending += 1,
            }
            if s
                .timer
                .as_ref()
                .is_some_and(|t| t.effective_status == TimerStatus::Overdue)
            {
                progress.overdue += 1;
            }
        }
        if progress.total > 0 {
            let finished = progress.completed + progress.skipped + progress.cancelled;
            progress.percent_complete = finished as f64 / progress.total as f64 * 100.0;
        }
        progress
    }
}

/// Ordered steps of an entity's workflows
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    pub entity: EntityRef,
    pub steps: Vec<StepStatus>,
    pub progress: WorkflowProgress,
}

impl WorkflowStatus {
    /// The first step that is currently active
    pub fn current_step(&self) -> Option<&StepStatus> {
        self.steps
            .iter()
            .find(|s| s.step.outcome == StepOutcome::Active)
    }
}

// =========================================================================
// Transaction helpers
// =========================================================================

/// Run one state-machine transition and persist timer and event
fn apply<F>(tx: &StoreTx<'_>, timer: &mut Timer, op: F) -> Result<TimerEvent>
where
    F: FnOnce(&mut Timer) -> std::result::Result<EventDraft, TimerError>,
{
    let draft = op(timer).map_err(|e| {
        warn!(timer = %timer.id, key = %timer.key, error = %e, "transition rejected");
        e
    })?;
    tx.update_timer(timer)?;
    let event = tx.append_event(timer.id, &draft)?;
    info!(
        timer = %timer.id,
        key = %timer.key,
        event = %event.event_type,
        status = %timer.status,
        "timer transition"
    );
    Ok(event)
}

/// Start the timer for `key`, creating it unless a not-started one exists
fn start_on(
    tx: &StoreTx<'_>,
    key: &TimerKey,
    allocated: Duration,
    assigned_user: Option<UserId>,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<Timer> {
    let mut timer = match tx.active_timer(key)? {
        Some(existing) if existing.status == TimerStatus::NotStarted => existing,
        Some(existing) => {
            return Err(StoreError::Conflict(format!(
                "timer for {} is already {}",
                key, existing.status
            ))
            .into());
        }
        None => {
            let mut timer = Timer::new(TimerId(0), key.clone(), Some(actor), now);
            tx.insert_timer(&mut timer)?;
            timer
        }
    };
    apply(tx, &mut timer, |t| t.start(allocated, assigned_user, actor, now))?;
    Ok(timer)
}

fn load_calendar(tx: &StoreTx<'_>, hours: &BusinessHours) -> Result<BusinessCalendar> {
    Ok(BusinessCalendar::new(
        hours.clone(),
        tx.calendar_entries(None, None)?,
    ))
}

/// Wall-clock allocation for a step starting at `now`
fn wall_allocation(
    tx: &StoreTx<'_>,
    hours: &BusinessHours,
    step: &StepInstance,
    nominal: Duration,
    now: DateTime<Utc>,
) -> Result<Duration> {
    if !step.business_hours_only {
        return Ok(nominal);
    }
    let calendar = load_calendar(tx, hours)?;
    let deadline = calendar.add_business_duration(now, nominal);
    debug!(step = %step.id, %deadline, "business-hours allocation");
    Ok(deadline - now)
}

fn invalid_allocation(step: &StepInstance) -> WorkflowError {
    WorkflowError::InvalidAllocation {
        key: step.key().to_string(),
    }
}

/// Wall-clock budget for a step starting at `now`; `None` leaves it untimed
///
/// An explicit allocation wins, then the deadline anchored to the run's due
/// date, then the step's nominal budget.
fn step_budget(
    tx: &StoreTx<'_>,
    hours: &BusinessHours,
    step: &mut StepInstance,
    explicit: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<Option<Duration>> {
    if explicit.is_none() && step.deadline_offset_ms.is_some() && step.due_at.is_some() {
        let deadline = step
            .anchored_deadline()
            .ok_or_else(|| invalid_allocation(step))?;
        if deadline <= now {
            return Err(WorkflowError::DeadlinePassed {
                key: step.key().to_string(),
                deadline,
            });
        }
        let allocated = deadline - now;
        if allocated.num_milliseconds() > MAX_DURATION_MS {
            return Err(invalid_allocation(step));
        }
        step.allocated_ms = Some(allocated.num_milliseconds());
        debug!(step = %step.id, %deadline, "anchored allocation");
        return Ok(Some(allocated));
    }

    let Some(nominal) = explicit.or_else(|| step.allocated_ms.map(Duration::milliseconds)) else {
        return Ok(None);
    };
    if nominal <= Duration::zero() || nominal.num_milliseconds() > MAX_DURATION_MS {
        return Err(invalid_allocation(step));
    }
    step.allocated_ms = Some(nominal.num_milliseconds());
    Ok(Some(wall_allocation(tx, hours, step, nominal, now)?))
}

/// Make a step active, starting its timer when a budget is known
fn activate_step(
    tx: &StoreTx<'_>,
    hours: &BusinessHours,
    step: &mut StepInstance,
    start: &StartStep,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(user) = start.assigned_user {
        step.assigned_user = Some(user);
    }
    if let Some(allocated) = step_budget(tx, hours, step, start.allocated, now)? {
        let timer = start_on(tx, &step.key(), allocated, step.assigned_user, actor, now)?;
        step.timer_id = Some(timer.id);
    }

    step.outcome = StepOutcome::Active;
    step.updated_at = now;
    tx.update_step(step)?;
    info!(step = %step.id, key = %step.key(), timed = step.timer_id.is_some(), "step active");
    Ok(())
}

/// Activate the first unfinished step of a run if it is still pending
fn advance(
    tx: &StoreTx<'_>,
    hours: &BusinessHours,
    workflow_code: &str,
    entity: &EntityRef,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<Option<StepInstance>> {
    let steps = tx.workflow_steps(workflow_code, entity)?;
    let Some(mut next) = steps.into_iter().find(|s| !s.outcome.is_finished()) else {
        info!(workflow = workflow_code, %entity, "workflow finished");
        return Ok(None);
    };
    if next.outcome != StepOutcome::Pending {
        return Ok(None);
    }
    match activate_step(tx, hours, &mut next, &StartStep::default(), actor, now) {
        Ok(()) => {}
        Err(WorkflowError::DeadlinePassed { key, deadline }) => {
            // Late runs still move on; the step waits for an explicit allocation
            warn!(%key, %deadline, "anchored deadline already passed, step left untimed");
            next.outcome = StepOutcome::Active;
            next.updated_at = now;
            tx.update_step(&next)?;
        }
        Err(e) => return Err(e),
    }
    Ok(Some(next))
}

fn require_open(step: &StepInstance) -> Result<()> {
    if step.outcome.is_finished() {
        return Err(WorkflowError::StepState {
            step: step.id,
            key: step.key().to_string(),
            outcome: step.outcome,
        });
    }
    Ok(())
}

fn require_active(step: &StepInstance) -> Result<()> {
    if step.outcome != StepOutcome::Active {
        return Err(WorkflowError::StepState {
            step: step.id,
            key: step.key().to_string(),
            outcome: step.outcome,
        });
    }
    Ok(())
}

fn require_timer(step: &StepInstance) -> Result<TimerId> {
    step.timer_id.ok_or_else(|| WorkflowError::StepUntimed {
        step: step.id,
        key: step.key().to_string(),
    })
}

// =========================================================================
// Engine
// =========================================================================

/// Workflow engine over a timer store
pub struct WorkflowEngine<C: Clock = SystemClock> {
    store: TimerStore,
    catalog: WorkflowCatalog,
    hours: BusinessHours,
    thresholds: Thresholds,
    clock: C,
}

impl WorkflowEngine<SystemClock> {
    /// Open the configured database with the wall clock
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.database_path().ok_or_else(|| {
            ConfigError::Invalid("no database path configured and no data directory".to_string())
        })?;
        let store = TimerStore::open(
            &path,
            std::time::Duration::from_millis(config.storage.busy_timeout_ms),
        )?;
        Self::new(store, config, SystemClock)
    }
}

impl<C: Clock> WorkflowEngine<C> {
    pub fn new(store: TimerStore, config: &Config, clock: C) -> Result<Self> {
        Ok(Self {
            store,
            catalog: WorkflowCatalog::new(&config.workflows),
            hours: config.business_hours()?,
            thresholds: config.timers.thresholds,
            clock,
        })
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn store(&self) -> &TimerStore {
        &self.store
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn view(&self, timer: &Timer) -> TimerView {
        timer.view(self.clock.now(), &self.thresholds)
    }

    fn step_status(&self, id: StepInstanceId) -> Result<StepStatus> {
        let step = self.store.get_step(id)?;
        let timer = match step.timer_id {
            Some(timer_id) => Some(self.view(&self.store.get_timer(timer_id)?)),
            None => None,
        };
        Ok(StepStatus { step, timer })
    }

    // ---------------------------------------------------------------------
    // Workflows
    // ---------------------------------------------------------------------

    /// Create the step instances of a workflow for an entity and activate the first
    pub fn start_workflow(
        &mut self,
        code: &str,
        entity: EntityRef,
        actor: UserId,
    ) -> Result<WorkflowStatus> {
        self.start_workflow_with(code, entity, StartWorkflow::default(), actor)
    }

    /// [`WorkflowEngine::start_workflow`] with a due date for anchored steps
    pub fn start_workflow_with(
        &mut self,
        code: &str,
        entity: EntityRef,
        options: StartWorkflow,
        actor: UserId,
    ) -> Result<WorkflowStatus> {
        let definition: WorkflowDefinition = self
            .catalog
            .get(code)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownWorkflow(code.to_string()))?;
        if definition.entity_type != entity.entity_type {
            return Err(WorkflowError::EntityMismatch {
                code: definition.code,
                expected: definition.entity_type,
                actual: entity.entity_type,
            });
        }

        let now = self.clock.now();
        let tx = self.store.transaction()?;
        if !tx.workflow_steps(&definition.code, &entity)?.is_empty() {
            return Err(WorkflowError::AlreadyStarted {
                code: definition.code,
                entity,
            });
        }

        for (position, def) in definition.steps.iter().enumerate() {
            let mut step = StepInstance {
                id: StepInstanceId(0),
                workflow_code: definition.code.clone(),
                entity,
                step_key: def.key.clone(),
                step_name: def.name.clone(),
                position: position as u32 + 1,
                allocated_ms: def.allocated_ms(),
                business_hours_only: def.business_hours_only,
                optional: def.optional,
                assigned_user: None,
                outcome: StepOutcome::Pending,
                timer_id: None,
                rejection_count: 0,
                created_at: now,
                updated_at: now,
                deadline_offset_ms: def.deadline_offset_ms(),
                due_at: options.due_at,
            };
            tx.insert_step(&mut step)?;
        }

        advance(&tx, &self.hours, &definition.code, &entity, actor, now)?;
        tx.commit()?;
        info!(workflow = %definition.code, %entity, due = ?options.due_at, "workflow started");

        self.workflow_status(&entity)
    }

    /// All steps of an entity with their timers
    pub fn workflow_status(&self, entity: &EntityRef) -> Result<WorkflowStatus> {
        let steps = self.store.steps_for_entity(entity)?;
        if steps.is_empty() {
            return Err(WorkflowError::NoWorkflow(*entity));
        }

        let mut statuses = Vec::with_capacity(steps.len());
        for step in steps {
            let timer = match step.timer_id {
                Some(timer_id) => Some(self.view(&self.store.get_timer(timer_id)?)),
                None => None,
            };
            statuses.push(StepStatus { step, timer });
        }

        Ok(WorkflowStatus {
            entity: *entity,
            progress: WorkflowProgress::from_steps(&statuses),
            steps: statuses,
        })
    }

    /// Locate a step instance by entity and stage key
    pub fn find_step(&self, entity: &EntityRef, step_key: &str) -> Result<StepInstance> {
        self.store
            .steps_for_entity(entity)?
            .into_iter()
            .find(|s| s.step_key == step_key)
            .ok_or_else(|| {
                StoreError::NotFound {
                    what: format!("Step '{}' for {}", step_key, entity),
                }
                .into()
            })
    }

    // ---------------------------------------------------------------------
    // Steps
    // ---------------------------------------------------------------------

    /// Start a step's timer; every earlier step must be finished
    pub fn start_step(
        &mut self,
        id: StepInstanceId,
        start: StartStep,
        actor: UserId,
    ) -> Result<StepStatus> {
        let now = self.clock.now();
        let tx = self.store.transaction()?;
        let mut step = tx.get_step(id)?;

        let restartable = match (step.outcome, step.timer_id) {
            (StepOutcome::Pending, _) | (StepOutcome::Active, None) => true,
            (StepOutcome::Active, Some(timer_id)) => {
                tx.get_timer(timer_id)?.status == TimerStatus::NotStarted
            }
            _ => false,
        };
        if !restartable {
            return Err(WorkflowError::StepState {
                step: step.id,
                key: step.key().to_string(),
                outcome: step.outcome,
            });
        }

        let siblings = tx.workflow_steps(&step.workflow_code, &step.entity)?;
        if let Some(blocking) = siblings
            .iter()
            .find(|s| s.position < step.position && !s.outcome.is_finished())
        {
            return Err(WorkflowError::StepBlocked {
                step: step.id,
                key: step.key().to_string(),
                blocking: blocking.step_key.clone(),
            });
        }

        if start.allocated.is_none()
            && step.allocated_ms.is_none()
            && step.anchored_deadline().is_none()
        {
            return Err(WorkflowError::MissingAllocation {
                step: step.id,
                key: step.key().to_string(),
            });
        }

        activate_step(&tx, &self.hours, &mut step, &start, actor, now)?;
        tx.commit()?;
        self.step_status(id)
    }

    /// Complete a step and activate the next one
    pub fn complete_step(
        &mut self,
        id: StepInstanceId,
        notes: Option<String>,
        actor: UserId,
    ) -> Result<StepStatus> {
        let now = self.clock.now();
        let tx = self.store.transaction()?;
        let mut step = tx.get_step(id)?;
        require_active(&step)?;

        if let Some(timer_id) = step.timer_id {
            let mut timer = tx.get_timer(timer_id)?;
            apply(&tx, &mut timer, |t| t.complete(notes, actor, now))?;
        }

        step.outcome = StepOutcome::Completed;
        step.updated_at = now;
        tx.update_step(&step)?;
        advance(&tx, &self.hours, &step.workflow_code, &step.entity, actor, now)?;
        tx.commit()?;
        self.step_status(id)
    }

    pub fn pause_step(
        &mut self,
        id: StepInstanceId,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<StepStatus> {
        self.timed_step_op(id, move |t, now| t.pause(reason, actor, now))
    }

    pub fn resume_step(&mut self, id: StepInstanceId, actor: UserId) -> Result<StepStatus> {
        self.timed_step_op(id, move |t, now| t.resume(actor, now))
    }

    pub fn extend_step(
        &mut self,
        id: StepInstanceId,
        by: Duration,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<StepStatus> {
        self.timed_step_op(id, move |t, now| t.extend(by, reason, actor, now))
    }

    /// Transition the timer of an active step without changing the step
    fn timed_step_op<F>(&mut self, id: StepInstanceId, op: F) -> Result<StepStatus>
    where
        F: FnOnce(&mut Timer, DateTime<Utc>) -> std::result::Result<EventDraft, TimerError>,
    {
        let now = self.clock.now();
        let tx = self.store.transaction()?;
        let mut step = tx.get_step(id)?;
        require_active(&step)?;
        let mut timer = tx.get_timer(require_timer(&step)?)?;

        apply(&tx, &mut timer, |t| op(t, now))?;
        step.updated_at = now;
        tx.update_step(&step)?;
        tx.commit()?;
        self.step_status(id)
    }

    /// Send a step back for rework
    ///
    /// With `reset` the step's timer is cleared and immediately restarted with
    /// the step's budget; without it the timer keeps running. Either way the
    /// step stays active and its rejection count goes up.
    pub fn reject_step(
        &mut self,
        id: StepInstanceId,
        reason: Option<String>,
        reset: bool,
        actor: UserId,
    ) -> Result<StepStatus> {
        let now = self.clock.now();
        let tx = self.store.transaction()?;
        let mut step = tx.get_step(id)?;
        require_active(&step)?;

        if let Some(timer_id) = step.timer_id {
            let mut timer = tx.get_timer(timer_id)?;
            apply(&tx, &mut timer, |t| t.reject(reason, reset, actor, now))?;

            if reset {
                if step.allocated_ms.is_none() {
                    step.allocated_ms = Some(timer.allocated_ms);
                }
                match step_budget(&tx, &self.hours, &mut step, None, now) {
                    Ok(Some(allocated)) => {
                        let assigned = step.assigned_user;
                        apply(&tx, &mut timer, |t| t.start(allocated, assigned, actor, now))?;
                    }
                    Ok(None) => {}
                    Err(WorkflowError::DeadlinePassed { key, deadline }) => {
                        warn!(%key, %deadline, "anchored deadline already passed, timer left not started");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        step.rejection_count += 1;
        step.updated_at = now;
        tx.update_step(&step)?;
        tx.commit()?;
        self.step_status(id)
    }

    /// Skip an optional step and move on; mandatory steps can only be cancelled
    pub fn skip_step(
        &mut self,
        id: StepInstanceId,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<StepStatus> {
        self.close_step(id, StepOutcome::Skipped, reason, actor)
    }

    pub fn cancel_step(
        &mut self,
        id: StepInstanceId,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<StepStatus> {
        self.close_step(id, StepOutcome::Cancelled, reason, actor)
    }

    fn close_step(
        &mut self,
        id: StepInstanceId,
        outcome: StepOutcome,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<StepStatus> {
        let now = self.clock.now();
        let tx = self.store.transaction()?;
        let mut step = tx.get_step(id)?;
        require_open(&step)?;
        if outcome == StepOutcome::Skipped && !step.optional {
            return Err(WorkflowError::NotOptional {
                step: step.id,
                key: step.key().to_string(),
            });
        }

        if let Some(timer_id) = step.timer_id {
            let mut timer = tx.get_timer(timer_id)?;
            if !timer.status.is_terminal() {
                apply(&tx, &mut timer, |t| match outcome {
                    StepOutcome::Skipped => t.skip(reason, actor, now),
                    _ => t.cancel(reason, actor, now),
                })?;
            }
        }

        step.outcome = outcome;
        step.updated_at = now;
        tx.update_step(&step)?;
        advance(&tx, &self.hours, &step.workflow_code, &step.entity, actor, now)?;
        tx.commit()?;
        self.step_status(id)
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Start a standalone timer for `key`
    ///
    /// Fails with a conflict if an active timer already exists for the key, and
    /// with `StepBound` if an unfinished workflow step owns the key.
    pub fn start_timer(
        &mut self,
        key: &TimerKey,
        allocated: Duration,
        assigned_user: Option<UserId>,
        actor: UserId,
    ) -> Result<TimerView> {
        let now = self.clock.now();
        let tx = self.store.transaction()?;
        if let Some(step) = tx
            .steps_for_entity(&key.entity)?
            .into_iter()
            .find(|s| s.step_key == key.stage && !s.outcome.is_finished())
        {
            return Err(WorkflowError::StepBound {
                step: step.id,
                key: key.to_string(),
            });
        }
        let timer = start_on(&tx, key, allocated, assigned_user, actor, now)?;
        tx.commit()?;
        Ok(self.view(&timer))
    }

    pub fn pause_timer(
        &mut self,
        id: TimerId,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<TimerView> {
        self.timer_op(id, move |t, now| t.pause(reason, actor, now))
    }

    pub fn resume_timer(&mut self, id: TimerId, actor: UserId) -> Result<TimerView> {
        self.timer_op(id, move |t, now| t.resume(actor, now))
    }

    pub fn complete_timer(
        &mut self,
        id: TimerId,
        notes: Option<String>,
        actor: UserId,
    ) -> Result<TimerView> {
        self.timer_op(id, move |t, now| t.complete(notes, actor, now))
    }

    pub fn extend_timer(
        &mut self,
        id: TimerId,
        by: Duration,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<TimerView> {
        self.timer_op(id, move |t, now| t.extend(by, reason, actor, now))
    }

    pub fn cancel_timer(
        &mut self,
        id: TimerId,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<TimerView> {
        self.timer_op(id, move |t, now| t.cancel(reason, actor, now))
    }

    /// Transition a standalone timer; timers owned by a step go through the step
    fn timer_op<F>(&mut self, id: TimerId, op: F) -> Result<TimerView>
    where
        F: FnOnce(&mut Timer, DateTime<Utc>) -> std::result::Result<EventDraft, TimerError>,
    {
        let now = self.clock.now();
        let tx = self.store.transaction()?;
        let mut timer = tx.get_timer(id)?;
        if let Some(step) = tx.step_for_timer(id)? {
            return Err(WorkflowError::StepBound {
                step: step.id,
                key: timer.key.to_string(),
            });
        }
        apply(&tx, &mut timer, |t| op(t, now))?;
        tx.commit()?;
        Ok(self.view(&timer))
    }

    pub fn timer(&self, id: TimerId) -> Result<TimerView> {
        Ok(self.view(&self.store.get_timer(id)?))
    }

    /// The active timer for a key, else the latest cancelled one
    pub fn timer_for_step(&self, key: &TimerKey) -> Result<Option<TimerView>> {
        Ok(self.store.find_timer(key)?.map(|t| self.view(&t)))
    }

    /// Event log of the key's current timer
    pub fn timer_events(&self, key: &TimerKey) -> Result<Vec<TimerEvent>> {
        let timer = self
            .store
            .find_timer(key)?
            .ok_or_else(|| WorkflowError::NoTimer(key.to_string()))?;
        Ok(self.store.events_for_timer(timer.id)?)
    }

    pub fn list_timers(&self, filter: &TimerFilter) -> Result<Vec<TimerView>> {
        Ok(self
            .store
            .list_timers(filter)?
            .iter()
            .map(|t| self.view(t))
            .collect())
    }

    /// Persist Running -> Overdue for every timer past its deadline
    ///
    /// Idempotent: timers already marked, paused or finished are not candidates.
    pub fn sweep_overdue(&mut self) -> Result<Vec<Timer>> {
        let now = self.clock.now();
        let tx = self.store.transaction()?;
        let mut swept = Vec::new();

        for mut timer in tx.overdue_candidates(now)? {
            match apply(&tx, &mut timer, |t| t.mark_overdue(now)) {
                Ok(_) => swept.push(timer),
                Err(WorkflowError::Store(StoreError::Conflict(message))) => {
                    debug!(timer = %timer.id, %message, "sweep skipped changed timer");
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit()?;
        info!(count = swept.len(), "overdue sweep");
        Ok(swept)
    }

    // ---------------------------------------------------------------------
    // Calendar
    // ---------------------------------------------------------------------

    /// Business calendar with the stored overrides
    pub fn calendar(&self) -> Result<BusinessCalendar> {
        Ok(BusinessCalendar::new(
            self.hours.clone(),
            self.store.calendar_entries(None, None)?,
        ))
    }

    pub fn calendar_entries(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CalendarEntry>> {
        Ok(self.store.calendar_entries(from, to)?)
    }

    pub fn add_calendar_entry(&mut self, entry: &CalendarEntry) -> Result<()> {
        let tx = self.store.transaction()?;
        tx.upsert_calendar_entry(entry)?;
        tx.commit()?;
        info!(date = %entry.date, holiday = entry.is_holiday, "calendar entry saved");
        Ok(())
    }

    pub fn remove_calendar_entry(&mut self, date: NaiveDate) -> Result<bool> {
        let tx = self.store.transaction()?;
        let removed = tx.remove_calendar_entry(date)?;
        tx.commit()?;
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Analytics
    // ---------------------------------------------------------------------

    /// Completions recorded in `[from, to)`, tagged with their workflow
    pub fn completions(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Completion>> {
        let events = self
            .store
            .events_by_type(TimerEventType::Complete, from, to)?;
        let mut completions = Vec::with_capacity(events.len());
        for event in &events {
            let Some(mut completion) = Completion::from_event(event) else {
                debug!(event = %event.id, "complete event without usable snapshot");
                continue;
            };
            completion.workflow_code = self
                .store
                .step_for_timer(event.timer_id)?
                .map(|s| s.workflow_code);
            completions.push(completion);
        }
        Ok(completions)
    }

    pub fn step_performance(
        &self,
        stage: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Option<StepPerformance>> {
        Ok(analytics::step_performance(&self.completions(from, to)?, stage))
    }

    pub fn workflow_step_performance(
        &self,
        workflow_code: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StepPerformance>> {
        Ok(analytics::workflow_step_performance(
            &self.completions(from, to)?,
            workflow_code,
        ))
    }

    pub fn user_performance(
        &self,
        user: Option<UserId>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<UserPerformance>> {
        Ok(analytics::user_performance(&self.completions(from, to)?, user))
    }

    pub fn entity_performance(&self, entity: &EntityRef) -> Result<EntityPerformance> {
        Ok(analytics::entity_performance(
            &self.completions(None, None)?,
            entity,
        ))
    }

    pub fn trends(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TrendBucket>> {
        Ok(analytics::trends(
            &self.completions(Some(from), Some(to))?,
            from,
            to,
        ))
    }
}
