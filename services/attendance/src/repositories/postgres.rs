//! PostgreSQL-backed repositories

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    AttendanceRepository, CourseRepository, EnrollmentRepository, SessionRepository,
    StatsRepository, StudentRepository,
};
use crate::models::{
    Attendance, AttendanceEntry, AttendanceHistoryEntry, AttendanceStatus, Course, Enrollment,
    EnrollmentStatus, InsertOutcome, Location, NewAttendance, NewCourse, NewEnrollment, Session,
    Student, StudentSummary,
};
use crate::reporting::SystemStats;

const COURSE_COLUMNS: &str =
    "id, name, code, department, credits, semester, teacher_id, created_at";
const ENROLLMENT_COLUMNS: &str =
    "id, student_id, course_id, semester, academic_year, status, enrolled_at";
const SESSION_COLUMNS: &str = "id, course_id, creator_id, qr_token, active, issued_at, expires_at";
const ATTENDANCE_COLUMNS: &str =
    "id, session_id, student_id, course_id, status, marked_at, location";

/// Repository over a shared PostgreSQL pool
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Create a new repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> DatabaseResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))
    }
}

fn course_from_row(row: &PgRow) -> DatabaseResult<Course> {
    Ok(Course {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        department: row.try_get("department")?,
        credits: row.try_get("credits")?,
        semester: row.try_get("semester")?,
        teacher_id: row.try_get("teacher_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn student_from_row(row: &PgRow) -> DatabaseResult<Student> {
    Ok(Student {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        roll_number: row.try_get("roll_number")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
    })
}

fn enrollment_from_row(row: &PgRow) -> DatabaseResult<Enrollment> {
    let status: String = row.try_get("status")?;
    Ok(Enrollment {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        course_id: row.try_get("course_id")?,
        semester: row.try_get("semester")?,
        academic_year: row.try_get("academic_year")?,
        status: status.parse().map_err(|e| corrupt("enrollments", e))?,
        enrolled_at: row.try_get("enrolled_at")?,
    })
}

fn session_from_row(row: &PgRow) -> DatabaseResult<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        course_id: row.try_get("course_id")?,
        creator_id: row.try_get("creator_id")?,
        qr_token: row.try_get("qr_token")?,
        active: row.try_get("active")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn attendance_from_row(row: &PgRow) -> DatabaseResult<Attendance> {
    let status: String = row.try_get("status")?;
    let location: Option<Json<Location>> = row.try_get("location")?;
    Ok(Attendance {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        student_id: row.try_get("student_id")?,
        course_id: row.try_get("course_id")?,
        status: status.parse().map_err(|e| corrupt("attendance", e))?,
        marked_at: row.try_get("marked_at")?,
        location: location.map(|Json(location)| location),
    })
}

fn corrupt(table: &'static str, err: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::CorruptRow {
        table,
        message: err.to_string(),
    }
}

#[async_trait]
impl CourseRepository for PgRepository {
    async fn create_course(&self, new_course: &NewCourse) -> DatabaseResult<Course> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO courses (name, code, department, credits, semester, teacher_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COURSE_COLUMNS}
            "#
        ))
        .bind(&new_course.name)
        .bind(&new_course.code)
        .bind(&new_course.department)
        .bind(new_course.credits)
        .bind(&new_course.semester)
        .bind(new_course.teacher_id)
        .fetch_one(&self.pool)
        .await?;

        course_from_row(&row)
    }

    async fn find_course(&self, id: Uuid) -> DatabaseResult<Option<Course>> {
        let row = sqlx::query(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(course_from_row).transpose()
    }

    async fn list_courses_for_teacher(&self, teacher_id: Uuid) -> DatabaseResult<Vec<Course>> {
        let rows = sqlx::query(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE teacher_id = $1 ORDER BY code, created_at"
        ))
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(course_from_row).collect()
    }

    async fn delete_course(&self, id: Uuid) -> DatabaseResult<bool> {
        // Enrollments, sessions and attendance cascade from the foreign keys
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_teacher(&self, user_id: Uuid) -> DatabaseResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE id = $1 AND role = 'teacher')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}

#[async_trait]
impl StudentRepository for PgRepository {
    async fn find_student(&self, id: Uuid) -> DatabaseResult<Option<Student>> {
        let row = sqlx::query(
            r#"
            SELECT s.id, s.user_id, s.roll_number, u.name, u.email
            FROM students s
            JOIN users u ON u.id = s.user_id
            WHERE s.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(student_from_row).transpose()
    }

    async fn find_student_by_user(&self, user_id: Uuid) -> DatabaseResult<Option<Student>> {
        let row = sqlx::query(
            r#"
            SELECT s.id, s.user_id, s.roll_number, u.name, u.email
            FROM students s
            JOIN users u ON u.id = s.user_id
            WHERE s.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(student_from_row).transpose()
    }
}

#[async_trait]
impl EnrollmentRepository for PgRepository {
    async fn find_enrollment(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        semester: &str,
    ) -> DatabaseResult<Option<Enrollment>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ENROLLMENT_COLUMNS}
            FROM enrollments
            WHERE student_id = $1 AND course_id = $2 AND semester = $3
            ORDER BY (status = 'Active') DESC, enrolled_at DESC
            LIMIT 1
            "#
        ))
        .bind(student_id)
        .bind(course_id)
        .bind(semester)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn find_active_enrollment(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DatabaseResult<Option<Enrollment>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ENROLLMENT_COLUMNS}
            FROM enrollments
            WHERE student_id = $1 AND course_id = $2 AND status = 'Active'
            ORDER BY enrolled_at DESC
            LIMIT 1
            "#
        ))
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn create_enrollment(
        &self,
        new_enrollment: &NewEnrollment,
    ) -> DatabaseResult<Enrollment> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO enrollments (student_id, course_id, semester, academic_year, status, enrolled_at)
            VALUES ($1, $2, $3, $4, 'Active', $5)
            RETURNING {ENROLLMENT_COLUMNS}
            "#
        ))
        .bind(new_enrollment.student_id)
        .bind(new_enrollment.course_id)
        .bind(&new_enrollment.semester)
        .bind(&new_enrollment.academic_year)
        .bind(new_enrollment.enrolled_at)
        .fetch_one(&self.pool)
        .await?;

        enrollment_from_row(&row)
    }

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
    ) -> DatabaseResult<Option<Enrollment>> {
        let row = sqlx::query(&format!(
            "UPDATE enrollments SET status = $2 WHERE id = $1 RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn reactivate_enrollment(
        &self,
        id: Uuid,
        academic_year: Option<&str>,
    ) -> DatabaseResult<Option<Enrollment>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE enrollments
            SET status = 'Active',
                academic_year = COALESCE($2, academic_year)
            WHERE id = $1
            RETURNING {ENROLLMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(academic_year)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn list_active_enrollments_for_course(
        &self,
        course_id: Uuid,
    ) -> DatabaseResult<Vec<Enrollment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENROLLMENT_COLUMNS}
            FROM enrollments
            WHERE course_id = $1 AND status = 'Active'
            ORDER BY enrolled_at
            "#
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(enrollment_from_row).collect()
    }

    async fn list_active_enrollments_for_student(
        &self,
        student_id: Uuid,
    ) -> DatabaseResult<Vec<Enrollment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENROLLMENT_COLUMNS}
            FROM enrollments
            WHERE student_id = $1 AND status = 'Active'
            ORDER BY enrolled_at
            "#
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(enrollment_from_row).collect()
    }
}

#[async_trait]
impl SessionRepository for PgRepository {
    async fn insert_session(&self, session: &Session) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, course_id, creator_id, qr_token, active, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id)
        .bind(session.course_id)
        .bind(session.creator_id)
        .bind(&session.qr_token)
        .bind(session.active)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> DatabaseResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn cancel_session(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<Session>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE sessions
            SET active = FALSE,
                expires_at = LEAST(expires_at, GREATEST($2, issued_at))
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions_for_course(&self, course_id: Uuid) -> DatabaseResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE course_id = $1 ORDER BY issued_at DESC"
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn find_usable_session_for_course(
        &self,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<Session>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE course_id = $1 AND active AND expires_at >= $2
            ORDER BY issued_at DESC
            LIMIT 1
            "#
        ))
        .bind(course_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions_pending_backfill(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DatabaseResult<Vec<Session>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.course_id, s.creator_id, s.qr_token, s.active, s.issued_at, s.expires_at
            FROM sessions s
            WHERE (NOT s.active OR s.expires_at < $1)
              AND EXISTS (
                  SELECT 1
                  FROM enrollments e
                  WHERE e.course_id = s.course_id
                    AND e.status = 'Active'
                    AND NOT EXISTS (
                        SELECT 1 FROM attendance a
                        WHERE a.session_id = s.id AND a.student_id = e.student_id
                    )
              )
            ORDER BY s.expires_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }
}

#[async_trait]
impl AttendanceRepository for PgRepository {
    async fn find_attendance(
        &self,
        session_id: Uuid,
        student_id: Uuid,
    ) -> DatabaseResult<Option<Attendance>> {
        let row = sqlx::query(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE session_id = $1 AND student_id = $2"
        ))
        .bind(session_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(attendance_from_row).transpose()
    }

    async fn insert_present(
        &self,
        new_attendance: &NewAttendance,
    ) -> DatabaseResult<InsertOutcome> {
        // The unique index decides the race; the loser gets no row back
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO attendance (session_id, student_id, course_id, status, marked_at, location)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (session_id, student_id) DO NOTHING
            RETURNING {ATTENDANCE_COLUMNS}
            "#
        ))
        .bind(new_attendance.session_id)
        .bind(new_attendance.student_id)
        .bind(new_attendance.course_id)
        .bind(AttendanceStatus::Present.as_str())
        .bind(new_attendance.marked_at)
        .bind(new_attendance.location.as_ref().map(Json))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(InsertOutcome::Inserted(attendance_from_row(&row)?)),
            None => Ok(InsertOutcome::Duplicate),
        }
    }

    async fn upsert_absent(
        &self,
        session: &Session,
        student_ids: &[Uuid],
    ) -> DatabaseResult<u64> {
        if student_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO attendance (session_id, student_id, course_id, status, marked_at)
            SELECT $1, student_id, $2, $3, $4
            FROM UNNEST($5::uuid[]) AS student_id
            ON CONFLICT (session_id, student_id) DO NOTHING
            "#,
        )
        .bind(session.id)
        .bind(session.course_id)
        .bind(AttendanceStatus::Absent.as_str())
        .bind(session.expires_at)
        .bind(student_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn claim_absent(
        &self,
        new_attendance: &NewAttendance,
    ) -> DatabaseResult<Option<Attendance>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE attendance
            SET status = $3, marked_at = $4, location = $5
            WHERE session_id = $1
              AND student_id = $2
              AND status = $6
              AND marked_at >= $4
            RETURNING {ATTENDANCE_COLUMNS}
            "#
        ))
        .bind(new_attendance.session_id)
        .bind(new_attendance.student_id)
        .bind(AttendanceStatus::Present.as_str())
        .bind(new_attendance.marked_at)
        .bind(new_attendance.location.as_ref().map(Json))
        .bind(AttendanceStatus::Absent.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(attendance_from_row).transpose()
    }

    async fn list_attendance_for_session(
        &self,
        session_id: Uuid,
    ) -> DatabaseResult<Vec<AttendanceEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.session_id, a.student_id, a.course_id, a.status, a.marked_at,
                   a.location, s.roll_number, u.name, u.email
            FROM attendance a
            JOIN students s ON s.id = a.student_id
            JOIN users u ON u.id = s.user_id
            WHERE a.session_id = $1
            ORDER BY a.marked_at, s.roll_number
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> DatabaseResult<AttendanceEntry> {
                let attendance = attendance_from_row(row)?;
                Ok(AttendanceEntry {
                    student: StudentSummary {
                        id: attendance.student_id,
                        roll_number: row.try_get("roll_number")?,
                        name: row.try_get("name")?,
                        email: row.try_get("email")?,
                    },
                    attendance,
                })
            })
            .collect()
    }

    async fn list_attendance_for_student_course(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DatabaseResult<Vec<Attendance>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ATTENDANCE_COLUMNS}
            FROM attendance
            WHERE student_id = $1 AND course_id = $2
            ORDER BY marked_at DESC
            "#
        ))
        .bind(student_id)
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attendance_from_row).collect()
    }

    async fn list_attendance_for_student(
        &self,
        student_id: Uuid,
    ) -> DatabaseResult<Vec<AttendanceHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.session_id, a.student_id, a.course_id, a.status, a.marked_at,
                   a.location, c.code AS course_code, c.name AS course_name,
                   s.issued_at AS session_issued_at, s.expires_at AS session_expires_at
            FROM attendance a
            JOIN courses c ON c.id = a.course_id
            JOIN sessions s ON s.id = a.session_id
            WHERE a.student_id = $1
            ORDER BY a.marked_at DESC
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> DatabaseResult<AttendanceHistoryEntry> {
                Ok(AttendanceHistoryEntry {
                    attendance: attendance_from_row(row)?,
                    course_code: row.try_get("course_code")?,
                    course_name: row.try_get("course_name")?,
                    session_issued_at: row.try_get("session_issued_at")?,
                    session_expires_at: row.try_get("session_expires_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl StatsRepository for PgRepository {
    async fn system_stats(&self) -> DatabaseResult<SystemStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM students) AS students,
                (SELECT COUNT(*) FROM users WHERE role = 'teacher') AS teachers,
                (SELECT COUNT(*) FROM courses) AS courses,
                (SELECT COUNT(*) FROM attendance) AS total_attendance_logs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStats {
            students: row.try_get("students")?,
            teachers: row.try_get("teachers")?,
            courses: row.try_get("courses")?,
            total_attendance_logs: row.try_get("total_attendance_logs")?,
        })
    }
}
