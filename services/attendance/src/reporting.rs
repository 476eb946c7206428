//! Read-side attendance aggregation

use serde::Serialize;

use crate::models::AttendanceStatus;

/// Outcome of one session from a single student's point of view
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum SessionOutcome {
    Present,
    Absent,
    /// No record yet; the session is still open or has not been backfilled
    Pending,
}

impl From<AttendanceStatus> for SessionOutcome {
    fn from(status: AttendanceStatus) -> Self {
        match status {
            AttendanceStatus::Present => SessionOutcome::Present,
            AttendanceStatus::Absent => SessionOutcome::Absent,
        }
    }
}

/// Aggregate attendance of one student in one course
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CourseAttendanceStats {
    pub total_sessions: u64,
    pub present_count: u64,
    pub absent_count: u64,
    pub pending_count: u64,
    pub attendance_percentage: u64,
}

impl CourseAttendanceStats {
    /// Tally one outcome per session held for the course
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = SessionOutcome>,
    {
        let mut stats = Self {
            total_sessions: 0,
            present_count: 0,
            absent_count: 0,
            pending_count: 0,
            attendance_percentage: 0,
        };
        for outcome in outcomes {
            stats.total_sessions += 1;
            match outcome {
                SessionOutcome::Present => stats.present_count += 1,
                SessionOutcome::Absent => stats.absent_count += 1,
                SessionOutcome::Pending => stats.pending_count += 1,
            }
        }
        stats.attendance_percentage =
            attendance_percentage(stats.present_count, stats.total_sessions);
        stats
    }
}

/// Counters shown on the admin dashboard
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SystemStats {
    pub students: i64,
    pub teachers: i64,
    pub courses: i64,
    pub total_attendance_logs: i64,
}

/// `100 * present / total` rounded half up; 0 when no session was held
pub fn attendance_percentage(present: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (200 * present + total) / (2 * total)
}
