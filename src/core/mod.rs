//! Core module - timers, workflows, storage and configuration

pub mod analytics;
pub mod calendar;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod store;
pub mod timer;
pub mod workflow;

pub use calendar::{BusinessCalendar, BusinessHours, CalendarEntry};
pub use catalog::{StepDefinition, WorkflowCatalog, WorkflowDefinition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use error::ErrorKind;
pub use identity::{EntityRef, EntityType, EventId, IdParseError, StepInstanceId, TimerId, TimerKey, UserId};
pub use store::{StoreError, TimerFilter, TimerQueries, TimerStore};
pub use timer::{
    Indicator, Thresholds, Timer, TimerError, TimerEvent, TimerEventType, TimerStatus, TimerView,
    MAX_DURATION_MS,
};
pub use workflow::{
    StartStep, StartWorkflow, StepInstance, StepOutcome, StepStatus, WorkflowEngine,
    WorkflowError, WorkflowProgress, WorkflowStatus,
};
