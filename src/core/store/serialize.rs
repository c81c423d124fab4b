//! SQLite serialization for typed values
//!
//! Implements ToSql and FromSql for the status enums and surrogate ids so rows
//! can be bound and read without stringly-typed glue. Timestamps are stored as
//! epoch milliseconds.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::Row;
use serde::de::DeserializeOwned;

use crate::core::identity::{EntityType, EventId, StepInstanceId, TimerId, UserId};
use crate::core::timer::{TimerEventType, TimerStatus};
use crate::core::workflow::StepOutcome;

fn invalid_data(message: String) -> FromSqlError {
    FromSqlError::Other(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}

// =========================================================================
// Text enums
// =========================================================================

macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                s.parse().map_err(|e| invalid_data(format!("{}", e)))
            }
        }
    };
}

text_enum_sql!(TimerStatus);
text_enum_sql!(TimerEventType);
text_enum_sql!(EntityType);
text_enum_sql!(StepOutcome);

// =========================================================================
// Surrogate ids
// =========================================================================

macro_rules! integer_id_sql {
    ($ty:ident) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value.as_i64().map($ty)
            }
        }
    };
}

integer_id_sql!(TimerId);
integer_id_sql!(EventId);
integer_id_sql!(StepInstanceId);
integer_id_sql!(UserId);

// =========================================================================
// Column helpers
// =========================================================================

pub(crate) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(millis)
}

/// Read an epoch-millisecond column as an instant
pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

/// Read a nullable epoch-millisecond column
pub(crate) fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    ms.map(|ms| {
        DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
    })
    .transpose()
}

/// Read a JSON text column
pub(crate) fn json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a nullable JSON text column
pub(crate) fn opt_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read an ISO date column
pub(crate) fn date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_timer_status_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE test (status TEXT)", []).unwrap();

        for status in [
            TimerStatus::NotStarted,
            TimerStatus::Running,
            TimerStatus::Paused,
            TimerStatus::Completed,
            TimerStatus::Overdue,
            TimerStatus::Cancelled,
        ] {
            conn.execute("DELETE FROM test", []).unwrap();
            conn.execute("INSERT INTO test VALUES (?1)", [&status])
                .unwrap();

            let retrieved: TimerStatus = conn
                .query_row("SELECT status FROM test", [], |row| row.get(0))
                .unwrap();

            assert_eq!(status, retrieved);
        }
    }

    #[test]
    fn test_entity_type_stored_as_screaming_snake() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE test (entity_type TEXT)", [])
            .unwrap();
        conn.execute("INSERT INTO test VALUES (?1)", [&EntityType::ServiceAmc])
            .unwrap();

        let raw: String = conn
            .query_row("SELECT entity_type FROM test", [], |row| row.get(0))
            .unwrap();
        assert_eq!(raw, "SERVICE_AMC");
    }

    #[test]
    fn test_unknown_status_fails_to_load() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE test (status TEXT)", []).unwrap();
        conn.execute("INSERT INTO test VALUES ('archived')", [])
            .unwrap();

        let result: rusqlite::Result<TimerStatus> =
            conn.query_row("SELECT status FROM test", [], |row| row.get(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_timestamp_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE test (at INTEGER, maybe INTEGER)", [])
            .unwrap();
        let at = DateTime::from_timestamp_millis(1_741_337_400_123).unwrap();
        conn.execute(
            "INSERT INTO test VALUES (?1, ?2)",
            rusqlite::params![millis(at), opt_millis(None)],
        )
        .unwrap();

        let (read, maybe) = conn
            .query_row("SELECT at, maybe FROM test", [], |row| {
                Ok((timestamp(row, 0)?, opt_timestamp(row, 1)?))
            })
            .unwrap();
        assert_eq!(read, at);
        assert_eq!(maybe, None);
    }
}
