//! Shared helper functions for CLI commands
//!
//! Config and engine setup, the acting user, and the value parsers used by
//! clap for durations, dates and instants.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use dialoguer::{theme::ColorfulTheme, Confirm};
use miette::{miette, IntoDiagnostic, Result};
use std::io::IsTerminal;
use std::path::Path;

use crate::cli::GlobalOpts;
use crate::core::identity::{EntityRef, UserId};
use crate::core::workflow::{StepInstance, WorkflowEngine, WorkflowError};
use crate::core::{Config, MAX_DURATION_MS};

/// Load the config named by `--config`, else discover one from the working directory
pub fn load_config(global: &GlobalOpts) -> Result<Config> {
    let mut config = match &global.config {
        Some(path) => Config::load(path).into_diagnostic()?,
        None => {
            let cwd = std::env::current_dir().into_diagnostic()?;
            Config::discover(&cwd).into_diagnostic()?
        }
    };

    if let Some(db) = &global.db {
        let db = if db.is_relative() {
            std::env::current_dir().into_diagnostic()?.join(db)
        } else {
            db.clone()
        };
        config.storage.database = Some(db);
    }
    Ok(config)
}

/// Open the engine against the configured database
pub fn open_engine(global: &GlobalOpts) -> Result<WorkflowEngine> {
    let config = load_config(global)?;
    WorkflowEngine::open(&config).map_err(report)
}

/// The acting user; every change needs one
pub fn actor(global: &GlobalOpts) -> Result<UserId> {
    global
        .user
        .ok_or_else(|| miette!(help = "pass --user <ID> or set TWT_USER", "No acting user"))
}

/// Convert an engine error into a diagnostic carrying its kind as the code
pub fn report(err: WorkflowError) -> miette::Report {
    let code = format!("twt::{}", err.kind().to_string().replace(' ', "_"));
    miette!(code = code, "{}", err)
}

/// Locate a step by entity and key
pub fn find_step(engine: &WorkflowEngine, entity: &EntityRef, key: &str) -> Result<StepInstance> {
    engine.find_step(entity, key).map_err(report)
}

/// Ask before a destructive change; `yes` or a non-interactive stdin skips the prompt
pub fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes || !std::io::stdin().is_terminal() {
        return Ok(true);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .into_diagnostic()
}

/// Parse "2h", "90m", "1d 4h", "1.5h" or a bare number of hours
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("invalid duration '{}' (examples: 2h, 90m, 1d 4h, 1.5)", s);

    let total_ms = if let Ok(hours) = s.parse::<f64>() {
        hours * 3_600_000.0
    } else {
        let mut total = 0.0;
        let mut number = String::new();
        let mut saw_unit = false;
        for c in s.chars() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                continue;
            }
            let unit_ms = match c {
                'd' => 86_400_000.0,
                'h' => 3_600_000.0,
                'm' => 60_000.0,
                's' => 1_000.0,
                ' ' if number.is_empty() => continue,
                _ => return Err(invalid()),
            };
            let value: f64 = number.parse().map_err(|_| invalid())?;
            total += value * unit_ms;
            number.clear();
            saw_unit = true;
        }
        if !number.is_empty() || !saw_unit {
            return Err(invalid());
        }
        total
    };

    // `as i64` saturates, so bound the float first
    if !total_ms.is_finite() || total_ms > MAX_DURATION_MS as f64 {
        return Err(format!("duration '{}' is out of range (at most ten years)", s));
    }
    let total_ms = total_ms.round() as i64;
    if total_ms <= 0 {
        return Err(format!("duration '{}' must be greater than zero", s));
    }
    Ok(Duration::milliseconds(total_ms))
}

/// Parse a YYYY-MM-DD date
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{}' (expected YYYY-MM-DD)", s))
}

/// Parse an RFC 3339 instant, "YYYY-MM-DD HH:MM" (UTC) or a date (UTC midnight)
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    parse_date(s)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid time '{}' (expected RFC 3339, YYYY-MM-DD HH:MM or YYYY-MM-DD)", s))
}

/// Truncate a string to max_len, adding "..." if truncated
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Display a path relative to `base` when possible
pub fn display_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}
