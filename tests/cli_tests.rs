//! CLI and basic command tests

mod common;

use common::{setup_test_project, twt, twt_as};
use predicates::prelude::*;
use tempfile::TempDir;

fn json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("valid JSON output")
}

// ============================================================================
// CLI Basic Tests
// ============================================================================

#[test]
fn test_help_displays() {
    twt()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tender workflow timers"));
}

#[test]
fn test_version_displays() {
    twt()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("twt"));
}

#[test]
fn test_unknown_command_fails() {
    twt().arg("frobnicate").assert().failure();
}

#[test]
fn test_completions_bash() {
    twt()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("twt"));
}

// ============================================================================
// Init Tests
// ============================================================================

#[test]
fn test_init_creates_project() {
    let tmp = TempDir::new().unwrap();
    twt()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized twt project"));

    assert!(tmp.path().join(".twt/config.yaml").exists());
    assert!(tmp.path().join(".twt/timers.db").exists());
}

#[test]
fn test_init_keeps_existing_config() {
    let tmp = setup_test_project();
    std::fs::write(tmp.path().join(".twt/config.yaml"), "timers:\n  thresholds:\n    warning: 50\n").unwrap();

    twt()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));

    let content = std::fs::read_to_string(tmp.path().join(".twt/config.yaml")).unwrap();
    assert!(content.contains("warning: 50"));
}

// ============================================================================
// Workflow Tests
// ============================================================================

#[test]
fn test_workflow_list_shows_builtins() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "list", "--steps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("TENDERING_WF"))
        .stdout(predicate::str::contains("COURIER_WF"))
        .stdout(predicate::str::contains("tender_info"));
}

#[test]
fn test_workflow_list_filters_by_entity_type() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "list", "-t", "COURIER"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COURIER_WF"))
        .stdout(predicate::str::contains("TENDERING_WF").not());
}

#[test]
fn test_workflow_start_and_status() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Started TENDERING_WF for TENDER:42"))
        .stdout(predicate::str::contains("tender_info"));

    let output = twt_as(&tmp, 1)
        .args(["workflow", "status", "TENDER:42", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let status = json(&output.stdout);
    assert_eq!(status["progress"]["total"], 13);
    assert_eq!(status["steps"][0]["step_key"], "tender_info");
    assert_eq!(status["steps"][0]["outcome"], "active");
    assert_eq!(status["steps"][0]["timer"]["status"], "running");
    assert_eq!(status["steps"][1]["outcome"], "pending");
}

#[test]
fn test_workflow_start_with_due_date() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42", "--due", "2030-01-10 12:00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Due 2030-01-10 12:00"));

    let output = twt_as(&tmp, 1)
        .args(["workflow", "status", "TENDER:42", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let status = json(&output.stdout);
    let checklist = status["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["step_key"] == "document_checklist")
        .unwrap();
    assert_eq!(checklist["deadline_offset_ms"], -72 * 3_600_000i64);
    assert_eq!(checklist["due_at"], "2030-01-10T12:00:00Z");

    twt_as(&tmp, 1)
        .args(["workflow", "start", "COURIER_WF", "COURIER:1", "--due", "soon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid time"));
}

#[test]
fn test_workflow_start_requires_user() {
    let tmp = setup_test_project();
    twt()
        .current_dir(tmp.path())
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No acting user"));
}

#[test]
fn test_workflow_start_twice_is_conflict() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .success();
    twt_as(&tmp, 2)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already started"));
}

#[test]
fn test_workflow_start_rejects_bad_entity_ref() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER-42"])
        .assert()
        .failure();
}

#[test]
fn test_workflow_status_unknown_entity() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "status", "TENDER:999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No workflow steps found"));
}

// ============================================================================
// Step Tests
// ============================================================================

#[test]
fn test_step_complete_activates_next() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .success();

    twt_as(&tmp, 1)
        .args(["step", "complete", "TENDER:42", "tender_info", "-n", "captured"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed TENDER:42:tender_info"));

    let output = twt_as(&tmp, 1)
        .args(["workflow", "status", "TENDER:42", "-f", "json"])
        .output()
        .unwrap();
    let status = json(&output.stdout);
    assert_eq!(status["steps"][0]["outcome"], "completed");
    assert_eq!(status["steps"][1]["outcome"], "active");
    assert_eq!(status["progress"]["completed"], 1);
}

#[test]
fn test_step_pause_resume_extend() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .success();

    twt_as(&tmp, 1)
        .args(["step", "pause", "TENDER:42", "tender_info", "-r", "waiting"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Paused"));
    twt_as(&tmp, 1)
        .args(["step", "pause", "TENDER:42", "tender_info"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("paused"));
    twt_as(&tmp, 1)
        .args(["step", "resume", "TENDER:42", "tender_info"])
        .assert()
        .success();
    twt_as(&tmp, 1)
        .args(["step", "extend", "TENDER:42", "tender_info", "4h", "-r", "scope"])
        .assert()
        .success();

    let output = twt_as(&tmp, 1)
        .args(["timer", "show", "TENDER:42", "tender_info", "-f", "json"])
        .output()
        .unwrap();
    let timer = json(&output.stdout);
    assert_eq!(timer["status"], "running");
    assert_eq!(timer["total_extension_ms"], 4 * 3_600_000);
    assert_eq!(timer["version"], 4);
}

#[test]
fn test_step_extend_out_of_range_is_rejected() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .success();

    for by in ["3e9", "inf"] {
        twt_as(&tmp, 1)
            .args(["step", "extend", "TENDER:42", "tender_info", by])
            .assert()
            .failure()
            .stderr(predicate::str::contains("out of range"));
    }

    let output = twt_as(&tmp, 1)
        .args(["timer", "show", "TENDER:42", "tender_info", "-f", "json"])
        .output()
        .unwrap();
    let timer = json(&output.stdout);
    assert_eq!(timer["total_extension_ms"], 0);
    assert_eq!(timer["version"], 1);
}

#[test]
fn test_step_reject_with_reset_counts_rejection() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .success();

    twt_as(&tmp, 2)
        .args([
            "step", "reject", "TENDER:42", "tender_info", "-r", "wrong value", "--reset", "-y",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rejections: 1"));

    let output = twt_as(&tmp, 1)
        .args(["timer", "events", "TENDER:42", "tender_info", "-f", "json"])
        .output()
        .unwrap();
    let events = json(&output.stdout);
    let types: Vec<_> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(types, ["start", "reject", "start"]);
    assert_eq!(events[1]["reason"], "wrong value");
    assert_eq!(events[1]["performed_by"], 2);
}

#[test]
fn test_step_reject_requires_reason() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["step", "reject", "TENDER:42", "tender_info", "-y"])
        .assert()
        .failure();
}

#[test]
fn test_step_skip_requires_optional_step() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "COURIER_WF", "COURIER:7"])
        .assert()
        .success();

    twt_as(&tmp, 1)
        .args(["step", "skip", "COURIER:7", "courier_created", "-y"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not optional"));

    twt_as(&tmp, 1)
        .args(["step", "cancel", "COURIER:7", "courier_created", "-y"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled"));

    twt_as(&tmp, 1)
        .args(["timer", "show", "COURIER:7", "courier_dispatched"])
        .assert()
        .success()
        .stdout(predicate::str::contains("remaining"));
}

#[test]
fn test_step_start_blocked_by_earlier_step() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .success();
    twt_as(&tmp, 1)
        .args(["step", "start", "TENDER:42", "costing_sheets"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tender_info"));
}

#[test]
fn test_step_unknown_key() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "COURIER_WF", "COURIER:7"])
        .assert()
        .success();
    twt_as(&tmp, 1)
        .args(["step", "complete", "COURIER:7", "no_such_step"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no_such_step"));
}

// ============================================================================
// Timer Tests
// ============================================================================

#[test]
fn test_timer_list_and_filter() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:1"])
        .assert()
        .success();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:2"])
        .assert()
        .success();

    twt_as(&tmp, 1)
        .args(["timer", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("TENDER:1:tender_info"))
        .stdout(predicate::str::contains("2 timer(s)"));

    twt_as(&tmp, 1)
        .args(["timer", "list", "-e", "TENDER:2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 timer(s)"));

    twt_as(&tmp, 1)
        .args(["timer", "list", "-s", "paused"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No timers found"));
}

#[test]
fn test_timer_events_without_timer() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["timer", "events", "TENDER:5", "tender_info"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No timer found"));
}

// ============================================================================
// Calendar Tests
// ============================================================================

#[test]
fn test_calendar_holiday_round_trip() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["calendar", "add", "2025-03-04", "-n", "Founders Day"])
        .assert()
        .success()
        .stdout(predicate::str::contains("holiday"));

    twt_as(&tmp, 1)
        .args(["calendar", "check", "2025-03-04"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not a business day"))
        .stdout(predicate::str::contains("Founders Day"));

    twt_as(&tmp, 1)
        .args(["calendar", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 override(s)"));

    twt_as(&tmp, 1)
        .args(["calendar", "remove", "2025-03-04"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));

    twt_as(&tmp, 1)
        .args(["calendar", "check", "2025-03-04"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is a business day"));
}

#[test]
fn test_calendar_weekend_is_not_business_day() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["calendar", "check", "2025-03-08"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not a business day"));
}

#[test]
fn test_calendar_add_duration_rolls_over_weekend() {
    let tmp = setup_test_project();
    let output = twt_as(&tmp, 1)
        .args(["calendar", "add-duration", "2025-03-07 16:30", "2h", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let result = json(&output.stdout);
    assert_eq!(result["deadline"], "2025-03-10T10:30:00Z");
    assert_eq!(result["business_ms"], 2 * 3_600_000);
}

#[test]
fn test_calendar_saturday_half_day_from_config() {
    let tmp = setup_test_project();
    std::fs::write(
        tmp.path().join(".twt/config.yaml"),
        r#"
calendar:
  day_start: "10:00"
  day_end: "18:30"
  weekend: [sun]
  days:
    sat: { start: "10:00", end: "17:30" }
"#,
    )
    .unwrap();

    let output = twt_as(&tmp, 1)
        .args(["calendar", "check", "2025-03-08", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let check = json(&output.stdout);
    assert_eq!(check["business_day"], true);
    assert_eq!(check["opens_at"], "2025-03-08T10:00:00Z");
    assert_eq!(check["closes_at"], "2025-03-08T17:30:00Z");

    // Friday 17:30-18:30, Saturday 10:00-17:30, then Monday
    let output = twt_as(&tmp, 1)
        .args(["calendar", "add-duration", "2025-03-07 17:30", "10h", "-f", "json"])
        .output()
        .unwrap();
    assert_eq!(json(&output.stdout)["deadline"], "2025-03-10T11:30:00Z");
}

#[test]
fn test_calendar_rejects_bad_date() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["calendar", "add", "2025-13-40"])
        .assert()
        .failure();
}

// ============================================================================
// Sweep & Analytics Tests
// ============================================================================

#[test]
fn test_sweep_with_nothing_overdue() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .success();
    twt_as(&tmp, 1)
        .args(["sweep", "-q"])
        .assert()
        .success()
        .stdout(predicate::str::diff("0\n"));
}

#[test]
fn test_analytics_after_completion() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["workflow", "start", "TENDERING_WF", "TENDER:42"])
        .assert()
        .success();
    twt_as(&tmp, 3)
        .args(["step", "complete", "TENDER:42", "tender_info"])
        .assert()
        .success();

    let output = twt_as(&tmp, 1)
        .args(["analytics", "step", "tender_info", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let perf = json(&output.stdout);
    assert_eq!(perf["stage"], "tender_info");
    assert_eq!(perf["completions"], 1);
    assert_eq!(perf["on_time"], 1);
    assert_eq!(perf["is_bottleneck"], false);

    twt_as(&tmp, 1)
        .args(["analytics", "workflow", "TENDERING_WF"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tender_info"));

    twt_as(&tmp, 1)
        .args(["analytics", "user"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));

    twt_as(&tmp, 1)
        .args(["analytics", "entity", "TENDER:42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 completed"));

    let output = twt_as(&tmp, 1)
        .args(["analytics", "trends", "-w", "2", "-f", "json"])
        .output()
        .unwrap();
    let buckets = json(&output.stdout);
    let total: u64 = buckets
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["completions"].as_u64().unwrap())
        .sum();
    assert_eq!(total, 1);
}

#[test]
fn test_analytics_step_without_data() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["analytics", "step", "costing_sheets"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No completions"));
}

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn test_db_flag_overrides_project_database() {
    let tmp = setup_test_project();
    twt_as(&tmp, 1)
        .args(["--db", "other.db", "workflow", "start", "COURIER_WF", "COURIER:1"])
        .assert()
        .success();
    assert!(tmp.path().join("other.db").exists());

    twt_as(&tmp, 1)
        .args(["workflow", "status", "COURIER:1"])
        .assert()
        .failure();
}

#[test]
fn test_custom_workflow_from_config() {
    let tmp = setup_test_project();
    std::fs::write(
        tmp.path().join(".twt/config.yaml"),
        r#"
workflows:
  - code: AMC_WF
    name: AMC Visits
    entity_type: SERVICE_AMC
    steps:
      - key: visit_scheduled
        name: Visit Scheduled
        allocated_hours: 16
      - key: report_filed
        name: Report Filed
"#,
    )
    .unwrap();

    twt_as(&tmp, 1)
        .args(["workflow", "start", "AMC_WF", "SERVICE_AMC:3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("visit_scheduled"));
}
