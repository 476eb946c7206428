//! Attendance service models

pub mod attendance;
pub mod course;
pub mod enrollment;
pub mod session;
pub mod student;

use thiserror::Error;

// Re-export for convenience
pub use attendance::{
    Attendance, AttendanceEntry, AttendanceHistoryEntry, AttendanceStatus, InsertOutcome,
    Location, NewAttendance,
};
pub use course::{Course, NewCourse};
pub use enrollment::{Enrollment, EnrollmentStatus, NewEnrollment};
pub use session::{Session, SessionState};
pub use student::{Student, StudentSummary};

/// A stored enum column held a value this build does not know
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
