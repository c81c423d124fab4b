//! Shared test helpers for integration tests
//!
//! This module provides common utilities used across all test files.

#![allow(dead_code)]

use assert_cmd::cargo;
use assert_cmd::Command;
use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use tempfile::TempDir;
use twt::core::{Config, ManualClock, TimerStore, WorkflowEngine};

/// Helper to get a twt command isolated from the caller's environment
pub fn twt() -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("twt"));
    cmd.env_remove("TWT_DB")
        .env_remove("TWT_CONFIG")
        .env_remove("TWT_USER")
        .env_remove("TWT_LOG");
    cmd
}

/// Helper to get a twt command running in `tmp` as `user`
pub fn twt_as(tmp: &TempDir, user: u32) -> Command {
    let mut cmd = twt();
    cmd.current_dir(tmp.path()).env("TWT_USER", user.to_string());
    cmd
}

/// Helper to create a test project in a temp directory
pub fn setup_test_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    twt().current_dir(tmp.path()).arg("init").assert().success();
    tmp
}

/// Monday 2025-03-03 09:00 UTC
pub fn monday_9am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

/// Engine over a file database with a manual clock
pub fn file_engine(path: &Path, config: &Config, start: DateTime<Utc>) -> WorkflowEngine<ManualClock> {
    let store = TimerStore::open(path, std::time::Duration::from_secs(5)).unwrap();
    WorkflowEngine::new(store, config, ManualClock::new(start)).unwrap()
}

/// Engine over an in-memory database with a manual clock
pub fn memory_engine(config: &Config, start: DateTime<Utc>) -> WorkflowEngine<ManualClock> {
    WorkflowEngine::new(
        TimerStore::open_in_memory().unwrap(),
        config,
        ManualClock::new(start),
    )
    .unwrap()
}
