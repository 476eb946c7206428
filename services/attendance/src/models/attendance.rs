//! Attendance model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{StudentSummary, UnknownVariant};

/// Attendance outcome recorded for a student in a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    /// Get the stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Present" => Ok(AttendanceStatus::Present),
            "Absent" => Ok(AttendanceStatus::Absent),
            other => Err(UnknownVariant {
                kind: "attendance status",
                value: other.to_string(),
            }),
        }
    }
}

/// Optional geo-coordinates reported by the scanning device
///
/// Stored as metadata only; it never gates acceptance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Attendance entity, at most one per (session, student)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attendance {
    pub id: Uuid,
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub status: AttendanceStatus,
    pub marked_at: DateTime<Utc>,
    pub location: Option<Location>,
}

/// New present-mark payload
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub marked_at: DateTime<Utc>,
    pub location: Option<Location>,
}

/// Result of a present-mark insert
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Attendance),
    /// A row for (session, student) already existed; nothing was written
    Duplicate,
}

/// Attendance row with the student's display fields attached
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendanceEntry {
    #[serde(flatten)]
    pub attendance: Attendance,
    pub student: StudentSummary,
}

/// Attendance row as shown in a student's own history
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceHistoryEntry {
    #[serde(flatten)]
    pub attendance: Attendance,
    pub course_code: String,
    pub course_name: String,
    pub session_issued_at: DateTime<Utc>,
    pub session_expires_at: DateTime<Utc>,
}
