//! Daily attendance deduplication.
//!
//! At most one mark per person per calendar day is written. Uniqueness is
//! enforced here, not by the log's storage.

use crate::types::AttendanceMark;
use chrono::{DateTime, Local, NaiveDate};
use std::convert::Infallible;

/// Read/append access to the attendance log.
pub trait AttendanceLog {
    type Error;

    /// All marks recorded on `date`.
    fn marks_on(&self, date: NaiveDate) -> Result<Vec<AttendanceMark>, Self::Error>;

    fn append(&mut self, mark: AttendanceMark) -> Result<(), Self::Error>;
}

impl AttendanceLog for Vec<AttendanceMark> {
    type Error = Infallible;

    fn marks_on(&self, date: NaiveDate) -> Result<Vec<AttendanceMark>, Infallible> {
        Ok(self.iter().filter(|m| m.date == date).cloned().collect())
    }

    fn append(&mut self, mark: AttendanceMark) -> Result<(), Infallible> {
        self.push(mark);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceOutcome {
    Recorded(AttendanceMark),
    /// Already marked today; the log was not touched.
    Duplicate,
}

/// Append a mark for `name` on `today` unless one already exists.
///
/// `today` is the calendar day of the match and `now` its timestamp; the
/// caller derives both once per match.
pub fn record_attendance<L: AttendanceLog>(
    name: &str,
    today: NaiveDate,
    now: DateTime<Local>,
    log: &mut L,
) -> Result<AttendanceOutcome, L::Error> {
    if log.marks_on(today)?.iter().any(|m| m.name == name) {
        tracing::debug!(name, %today, "attendance already recorded today");
        return Ok(AttendanceOutcome::Duplicate);
    }

    let mark = AttendanceMark {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        date: today,
        timestamp: now,
    };
    log.append(mark.clone())?;
    tracing::info!(name, %today, "attendance recorded");
    Ok(AttendanceOutcome::Recorded(mark))
}
