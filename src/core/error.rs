//! Error classification shared by the engine's error enums

use serde::Serialize;
use std::fmt;

/// Caller-facing category of a failure
///
/// Each module keeps its own error enum; `kind()` maps every variant onto one of
/// these so callers can tell "not found" from "already completed" from "someone
/// else just changed it".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Conflict,
    Validation,
    Storage,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::InvalidState => write!(f, "invalid state"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Storage => write!(f, "storage"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}
