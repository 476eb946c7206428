//! Repositories for database operations
//!
//! Each aggregate gets its own trait; [`Store`] bundles them so services can
//! hold a single `Arc<dyn Store>`. The PostgreSQL implementation is used in
//! production, the in-memory one backs tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use uuid::Uuid;

use crate::models::{
    Attendance, AttendanceEntry, AttendanceHistoryEntry, Course, Enrollment, EnrollmentStatus,
    InsertOutcome, NewAttendance, NewCourse, NewEnrollment, Session, Student,
};
use crate::reporting::SystemStats;

#[cfg(test)]
pub mod memory;
pub mod postgres;

#[cfg(test)]
pub use memory::MemoryRepository;
pub use postgres::PgRepository;

/// Course repository
#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn create_course(&self, new_course: &NewCourse) -> DatabaseResult<Course>;

    async fn find_course(&self, id: Uuid) -> DatabaseResult<Option<Course>>;

    async fn list_courses_for_teacher(&self, teacher_id: Uuid) -> DatabaseResult<Vec<Course>>;

    /// Delete a course together with its enrollments, sessions and attendance
    async fn delete_course(&self, id: Uuid) -> DatabaseResult<bool>;

    /// Whether `user_id` names a user holding the teacher role
    async fn is_teacher(&self, user_id: Uuid) -> DatabaseResult<bool>;
}

/// Student profile repository
#[async_trait]
pub trait StudentRepository: Send + Sync {
    async fn find_student(&self, id: Uuid) -> DatabaseResult<Option<Student>>;

    async fn find_student_by_user(&self, user_id: Uuid) -> DatabaseResult<Option<Student>>;
}

/// Enrollment repository
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Find the enrollment for (student, course, semester) in any status
    async fn find_enrollment(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        semester: &str,
    ) -> DatabaseResult<Option<Enrollment>>;

    async fn find_active_enrollment(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DatabaseResult<Option<Enrollment>>;

    /// Fails with `DatabaseError::UniqueViolation` when the student already
    /// holds an active enrollment for the course semester
    async fn create_enrollment(&self, new_enrollment: &NewEnrollment)
    -> DatabaseResult<Enrollment>;

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
    ) -> DatabaseResult<Option<Enrollment>>;

    /// Mark a Dropped enrollment Active again, replacing its academic year
    /// when one is given. Same uniqueness rule as `create_enrollment`.
    async fn reactivate_enrollment(
        &self,
        id: Uuid,
        academic_year: Option<&str>,
    ) -> DatabaseResult<Option<Enrollment>>;

    async fn list_active_enrollments_for_course(
        &self,
        course_id: Uuid,
    ) -> DatabaseResult<Vec<Enrollment>>;

    async fn list_active_enrollments_for_student(
        &self,
        student_id: Uuid,
    ) -> DatabaseResult<Vec<Enrollment>>;
}

/// Class session repository
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert_session(&self, session: &Session) -> DatabaseResult<()>;

    async fn find_session(&self, id: Uuid) -> DatabaseResult<Option<Session>>;

    /// Set `active = false` and pull `expires_at` back to `now`, never forward
    async fn cancel_session(&self, id: Uuid, now: DateTime<Utc>)
    -> DatabaseResult<Option<Session>>;

    /// All sessions ever held for a course, newest first
    async fn list_sessions_for_course(&self, course_id: Uuid) -> DatabaseResult<Vec<Session>>;

    /// Most recently issued session of a course still usable at `now`
    async fn find_usable_session_for_course(
        &self,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<Session>>;

    /// Sessions no longer usable at `now` that still have an active enrollment
    /// without an attendance row, oldest expiry first
    async fn list_sessions_pending_backfill(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DatabaseResult<Vec<Session>>;
}

/// Attendance repository
#[async_trait]
pub trait AttendanceRepository: Send + Sync {
    async fn find_attendance(
        &self,
        session_id: Uuid,
        student_id: Uuid,
    ) -> DatabaseResult<Option<Attendance>>;

    /// Insert a Present row unless one already exists for (session, student)
    async fn insert_present(&self, new_attendance: &NewAttendance)
    -> DatabaseResult<InsertOutcome>;

    /// Insert Absent rows stamped at the session's expiry for the given
    /// students, skipping any that already have a row. Returns the number of
    /// rows written.
    async fn upsert_absent(&self, session: &Session, student_ids: &[Uuid])
    -> DatabaseResult<u64>;

    /// Turn an Absent row into Present for a scan made at or before the
    /// row's absence timestamp. Returns `None` if no such row exists.
    async fn claim_absent(&self, new_attendance: &NewAttendance)
    -> DatabaseResult<Option<Attendance>>;

    async fn list_attendance_for_session(
        &self,
        session_id: Uuid,
    ) -> DatabaseResult<Vec<AttendanceEntry>>;

    async fn list_attendance_for_student_course(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DatabaseResult<Vec<Attendance>>;

    /// A student's full history, newest first
    async fn list_attendance_for_student(
        &self,
        student_id: Uuid,
    ) -> DatabaseResult<Vec<AttendanceHistoryEntry>>;
}

/// Admin-facing counters
#[async_trait]
pub trait StatsRepository: Send + Sync {
    async fn system_stats(&self) -> DatabaseResult<SystemStats>;
}

/// Every repository the service needs, behind one object
pub trait Store:
    CourseRepository
    + StudentRepository
    + EnrollmentRepository
    + SessionRepository
    + AttendanceRepository
    + StatsRepository
{
}

impl<T> Store for T where
    T: CourseRepository
        + StudentRepository
        + EnrollmentRepository
        + SessionRepository
        + AttendanceRepository
        + StatsRepository
{
}
