//! TWT: Tender Workflow Timers
//!
//! Deadline tracking for tender-management workflows. Each stage of a workflow
//! gets a timer with a budget, optionally counted in business hours, and every
//! transition is recorded in an append-only event log that analytics read from.

pub mod cli;
pub mod core;
