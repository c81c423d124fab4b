//! Engine configuration
//!
//! Loaded once from `.twt/config.yaml` (or an explicit path) and passed by
//! reference to whatever needs it. Every field has a default, so an empty or
//! missing file yields a working configuration.

use chrono::{FixedOffset, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::calendar::{BusinessHours, DayWindow};
use crate::core::catalog::WorkflowDefinition;
use crate::core::error::ErrorKind;
use crate::core::timer::Thresholds;

/// Directory holding the project configuration and database
pub const PROJECT_DIR: &str = ".twt";

/// Config file name inside [`PROJECT_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

/// Default database file name
pub const DATABASE_FILE: &str = "timers.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

/// Business-hours section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Window start, "HH:MM" local time
    pub day_start: String,
    /// Window end, "HH:MM" local time
    pub day_end: String,
    /// Non-business weekdays ("sat", "sunday", ...)
    pub weekend: Vec<String>,
    /// Windows for individual weekdays, keyed by weekday name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub days: BTreeMap<String, DayHoursConfig>,
    /// Fixed local offset, "+05:30"
    pub utc_offset: String,
}

/// Window of one weekday, "HH:MM" local time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayHoursConfig {
    pub start: String,
    pub end: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            day_start: "09:00".to_string(),
            day_end: "17:00".to_string(),
            weekend: vec!["sat".to_string(), "sun".to_string()],
            days: BTreeMap::new(),
            utc_offset: "+00:00".to_string(),
        }
    }
}

impl CalendarConfig {
    /// Parse the section into typed business hours
    pub fn business_hours(&self) -> Result<BusinessHours, ConfigError> {
        let (day_start, day_end) =
            parse_window("calendar.day_start", &self.day_start, "calendar.day_end", &self.day_end)?;

        let mut weekend = Vec::new();
        for day in &self.weekend {
            let weekday = parse_weekday("calendar.weekend", day)?;
            if !weekend.contains(&weekday) {
                weekend.push(weekday);
            }
        }
        if weekend.len() >= 7 {
            return Err(ConfigError::Invalid(
                "calendar.weekend must leave at least one business weekday".to_string(),
            ));
        }

        let mut day_windows: Vec<DayWindow> = Vec::new();
        for (day, hours) in &self.days {
            let weekday = parse_weekday("calendar.days", day)?;
            if weekend.contains(&weekday) {
                return Err(ConfigError::Invalid(format!(
                    "calendar.days.{}: {} is listed as a weekend day",
                    day, weekday
                )));
            }
            if day_windows.iter().any(|w| w.weekday == weekday) {
                return Err(ConfigError::Invalid(format!(
                    "calendar.days: {} is given more than once",
                    weekday
                )));
            }
            let start_field = format!("calendar.days.{}.start", day);
            let end_field = format!("calendar.days.{}.end", day);
            let (start, end) = parse_window(&start_field, &hours.start, &end_field, &hours.end)?;
            day_windows.push(DayWindow { weekday, start, end });
        }

        Ok(BusinessHours {
            day_start,
            day_end,
            weekend,
            day_windows,
            offset: parse_offset(&self.utc_offset)?,
        })
    }
}

/// Timer display section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub thresholds: Thresholds,
}

/// Storage section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database path; relative paths resolve against the project root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// How long a writer waits for the SQLite lock
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: None,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub calendar: CalendarConfig,
    pub timers: TimerConfig,
    pub storage: StorageConfig,
    /// Workflow definitions; an entry with a built-in code replaces the built-in
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workflows: Vec<WorkflowDefinition>,

    /// Project root this config was discovered in
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        // .twt/config.yaml -> project root is the parent of .twt
        config.root = path
            .parent()
            .filter(|dir| dir.file_name().is_some_and(|n| n == PROJECT_DIR))
            .and_then(Path::parent)
            .map(Path::to_path_buf);

        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yml::from_str(content).map_err(|e| ConfigError::Parse {
                path: PathBuf::new(),
                message: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Walk up from `start` looking for `.twt/config.yaml`
    ///
    /// Falls back to defaults when no project is found. A `.twt` directory
    /// without a config file still marks the project root.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        for dir in start.ancestors() {
            let project_dir = dir.join(PROJECT_DIR);
            if !project_dir.is_dir() {
                continue;
            }
            let file = project_dir.join(CONFIG_FILE);
            if file.is_file() {
                return Self::load(&file);
            }
            return Ok(Self {
                root: Some(dir.to_path_buf()),
                ..Self::default()
            });
        }
        Ok(Self::default())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calendar.business_hours()?;

        let t = &self.timers.thresholds;
        if !(t.warning > 0.0 && t.warning <= t.critical) {
            return Err(ConfigError::Invalid(format!(
                "timers.thresholds: warning ({}) must be positive and not above critical ({})",
                t.warning, t.critical
            )));
        }

        for wf in &self.workflows {
            wf.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    pub fn business_hours(&self) -> Result<BusinessHours, ConfigError> {
        self.calendar.business_hours()
    }

    /// Resolve the database file
    ///
    /// Order: explicit `storage.database` (relative to the project root), the
    /// project's `.twt/timers.db`, then the per-user data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        if let Some(db) = &self.storage.database {
            return Some(match (&self.root, db.is_relative()) {
                (Some(root), true) => root.join(db),
                _ => db.clone(),
            });
        }
        if let Some(root) = &self.root {
            return Some(root.join(PROJECT_DIR).join(DATABASE_FILE));
        }
        directories::ProjectDirs::from("", "", "twt")
            .map(|dirs| dirs.data_dir().join(DATABASE_FILE))
    }

    /// Starter file written by `twt init`
    pub fn template() -> String {
        r#"# Tender workflow timers configuration

calendar:
  day_start: "09:00"
  day_end: "17:00"
  weekend: [sat, sun]
  utc_offset: "+00:00"
  # Weekdays with their own window, e.g. a Saturday half-day:
  # weekend: [sun]
  # days:
  #   sat: { start: "10:00", end: "17:30" }

timers:
  thresholds:
    warning: 80
    critical: 100

storage:
  busy_timeout_ms: 5000

# Override or add workflow definitions:
# workflows:
#   - code: COURIER_WF
#     name: Courier Workflow
#     entity_type: COURIER
#     steps:
#       - key: courier_dispatched
#         name: Courier Dispatched
#         allocated_hours: 4
#         business_hours_only: true
"#
        .to_string()
    }
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ConfigError::Invalid(format!("{}: expected HH:MM, got '{}'", field, value)))
}

/// Parse an opening and closing time; closing must come after opening
fn parse_window(
    start_field: &str,
    start: &str,
    end_field: &str,
    end: &str,
) -> Result<(NaiveTime, NaiveTime), ConfigError> {
    let open = parse_time(start_field, start)?;
    let close = parse_time(end_field, end)?;
    if close <= open {
        return Err(ConfigError::Invalid(format!(
            "{} ({}) must be after {} ({})",
            end_field, end, start_field, start
        )));
    }
    Ok((open, close))
}

fn parse_weekday(field: &str, value: &str) -> Result<Weekday, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}: unknown weekday '{}'", field, value)))
}

/// Parse "+05:30", "-04:00" or "Z"
fn parse_offset(value: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "calendar.utc_offset: expected +HH:MM, got '{}'",
            value
        ))
    };

    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = if let Some(rest) = value.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = value.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
