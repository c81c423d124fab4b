//! CLI command implementations

pub mod analytics;
pub mod calendar;
pub mod completions;
pub mod init;
pub mod step;
pub mod sweep;
pub mod timer;
pub mod workflow;
