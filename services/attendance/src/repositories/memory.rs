//! In-memory repositories used by unit and route tests
//!
//! All tables sit behind one async mutex, so every operation is atomic with
//! respect to every other one, standing in for the unique indexes and
//! foreign-key cascades of the PostgreSQL schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AttendanceRepository, CourseRepository, EnrollmentRepository, SessionRepository,
    StatsRepository, StudentRepository,
};
use crate::models::{
    Attendance, AttendanceEntry, AttendanceHistoryEntry, AttendanceStatus, Course, Enrollment,
    EnrollmentStatus, InsertOutcome, NewAttendance, NewCourse, NewEnrollment, Session, Student,
    StudentSummary,
};
use crate::reporting::SystemStats;

#[derive(Debug, Clone)]
struct UserRow {
    name: String,
    email: String,
    role: &'static str,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRow>,
    students: HashMap<Uuid, Student>,
    courses: HashMap<Uuid, Course>,
    enrollments: Vec<Enrollment>,
    sessions: HashMap<Uuid, Session>,
    attendance: Vec<Attendance>,
}

#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
    fail_absent_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `upsert_absent` call fail as if the pool were down
    pub fn fail_absent_writes(&self) {
        self.fail_absent_writes.store(true, Ordering::SeqCst);
    }

    pub async fn add_teacher(&self, name: &str, email: &str) -> Uuid {
        self.add_user(name, email, "teacher").await
    }

    pub async fn add_admin(&self, name: &str, email: &str) -> Uuid {
        self.add_user(name, email, "admin").await
    }

    /// Create a user with the student role plus its student profile
    pub async fn add_student(&self, name: &str, email: &str, roll_number: &str) -> Student {
        let user_id = self.add_user(name, email, "student").await;
        let student = Student {
            id: Uuid::new_v4(),
            user_id,
            roll_number: roll_number.to_string(),
            name: name.to_string(),
            email: email.to_string(),
        };
        self.tables
            .lock()
            .await
            .students
            .insert(student.id, student.clone());
        student
    }

    async fn add_user(&self, name: &str, email: &str, role: &'static str) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().await.users.insert(
            id,
            UserRow {
                name: name.to_string(),
                email: email.to_string(),
                role,
            },
        );
        id
    }
}

fn has_active_enrollment(
    tables: &Tables,
    student_id: Uuid,
    course_id: Uuid,
    semester: &str,
) -> bool {
    tables.enrollments.iter().any(|e| {
        e.student_id == student_id
            && e.course_id == course_id
            && e.semester == semester
            && e.is_active()
    })
}

fn active_enrollment_violation() -> DatabaseError {
    DatabaseError::UniqueViolation("uq_enrollments_active".to_string())
}

#[async_trait]
impl CourseRepository for MemoryRepository {
    async fn create_course(&self, new_course: &NewCourse) -> DatabaseResult<Course> {
        let course = Course {
            id: Uuid::new_v4(),
            name: new_course.name.clone(),
            code: new_course.code.clone(),
            department: new_course.department.clone(),
            credits: new_course.credits,
            semester: new_course.semester.clone(),
            teacher_id: new_course.teacher_id,
            created_at: Utc::now(),
        };
        self.tables
            .lock()
            .await
            .courses
            .insert(course.id, course.clone());
        Ok(course)
    }

    async fn find_course(&self, id: Uuid) -> DatabaseResult<Option<Course>> {
        Ok(self.tables.lock().await.courses.get(&id).cloned())
    }

    async fn list_courses_for_teacher(&self, teacher_id: Uuid) -> DatabaseResult<Vec<Course>> {
        let tables = self.tables.lock().await;
        let mut courses: Vec<Course> = tables
            .courses
            .values()
            .filter(|c| c.teacher_id == teacher_id)
            .cloned()
            .collect();
        courses.sort_by(|a, b| a.code.cmp(&b.code).then(a.created_at.cmp(&b.created_at)));
        Ok(courses)
    }

    async fn delete_course(&self, id: Uuid) -> DatabaseResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables.courses.remove(&id).is_none() {
            return Ok(false);
        }
        tables.enrollments.retain(|e| e.course_id != id);
        tables.sessions.retain(|_, s| s.course_id != id);
        tables.attendance.retain(|a| a.course_id != id);
        Ok(true)
    }

    async fn is_teacher(&self, user_id: Uuid) -> DatabaseResult<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .get(&user_id)
            .is_some_and(|u| u.role == "teacher"))
    }
}

#[async_trait]
impl StudentRepository for MemoryRepository {
    async fn find_student(&self, id: Uuid) -> DatabaseResult<Option<Student>> {
        Ok(self.tables.lock().await.students.get(&id).cloned())
    }

    async fn find_student_by_user(&self, user_id: Uuid) -> DatabaseResult<Option<Student>> {
        Ok(self
            .tables
            .lock()
            .await
            .students
            .values()
            .find(|s| s.user_id == user_id)
            .cloned())
    }
}

#[async_trait]
impl EnrollmentRepository for MemoryRepository {
    async fn find_enrollment(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        semester: &str,
    ) -> DatabaseResult<Option<Enrollment>> {
        let tables = self.tables.lock().await;
        let mut matching: Vec<&Enrollment> = tables
            .enrollments
            .iter()
            .filter(|e| {
                e.student_id == student_id && e.course_id == course_id && e.semester == semester
            })
            .collect();
        matching.sort_by(|a, b| {
            b.is_active()
                .cmp(&a.is_active())
                .then(b.enrolled_at.cmp(&a.enrolled_at))
        });
        Ok(matching.first().map(|e| (*e).clone()))
    }

    async fn find_active_enrollment(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DatabaseResult<Option<Enrollment>> {
        Ok(self
            .tables
            .lock()
            .await
            .enrollments
            .iter()
            .find(|e| e.student_id == student_id && e.course_id == course_id && e.is_active())
            .cloned())
    }

    async fn create_enrollment(
        &self,
        new_enrollment: &NewEnrollment,
    ) -> DatabaseResult<Enrollment> {
        let mut tables = self.tables.lock().await;
        if has_active_enrollment(
            &tables,
            new_enrollment.student_id,
            new_enrollment.course_id,
            &new_enrollment.semester,
        ) {
            return Err(active_enrollment_violation());
        }

        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            student_id: new_enrollment.student_id,
            course_id: new_enrollment.course_id,
            semester: new_enrollment.semester.clone(),
            academic_year: new_enrollment.academic_year.clone(),
            status: EnrollmentStatus::Active,
            enrolled_at: new_enrollment.enrolled_at,
        };
        tables.enrollments.push(enrollment.clone());
        Ok(enrollment)
    }

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
    ) -> DatabaseResult<Option<Enrollment>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.enrollments.iter_mut().find(|e| e.id == id).map(|e| {
            e.status = status;
            e.clone()
        }))
    }

    async fn reactivate_enrollment(
        &self,
        id: Uuid,
        academic_year: Option<&str>,
    ) -> DatabaseResult<Option<Enrollment>> {
        let mut tables = self.tables.lock().await;
        let Some(index) = tables.enrollments.iter().position(|e| e.id == id) else {
            return Ok(None);
        };

        let current = &tables.enrollments[index];
        if !current.is_active()
            && has_active_enrollment(
                &tables,
                current.student_id,
                current.course_id,
                &current.semester,
            )
        {
            return Err(active_enrollment_violation());
        }

        let enrollment = &mut tables.enrollments[index];
        enrollment.status = EnrollmentStatus::Active;
        if let Some(year) = academic_year {
            enrollment.academic_year = year.to_string();
        }
        Ok(Some(enrollment.clone()))
    }

    async fn list_active_enrollments_for_course(
        &self,
        course_id: Uuid,
    ) -> DatabaseResult<Vec<Enrollment>> {
        Ok(self
            .tables
            .lock()
            .await
            .enrollments
            .iter()
            .filter(|e| e.course_id == course_id && e.is_active())
            .cloned()
            .collect())
    }

    async fn list_active_enrollments_for_student(
        &self,
        student_id: Uuid,
    ) -> DatabaseResult<Vec<Enrollment>> {
        Ok(self
            .tables
            .lock()
            .await
            .enrollments
            .iter()
            .filter(|e| e.student_id == student_id && e.is_active())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn insert_session(&self, session: &Session) -> DatabaseResult<()> {
        self.tables
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> DatabaseResult<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(&id).cloned())
    }

    async fn cancel_session(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<Session>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.sessions.get_mut(&id).map(|session| {
            session.active = false;
            session.expires_at = session.expires_at.min(now.max(session.issued_at));
            session.clone()
        }))
    }

    async fn list_sessions_for_course(&self, course_id: Uuid) -> DatabaseResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| s.course_id == course_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(sessions)
    }

    async fn find_usable_session_for_course(
        &self,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<Session>> {
        Ok(self
            .tables
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| s.course_id == course_id && s.is_usable(now))
            .max_by_key(|s| s.issued_at)
            .cloned())
    }

    async fn list_sessions_pending_backfill(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DatabaseResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut pending: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| !s.is_usable(now))
            .filter(|s| {
                tables.enrollments.iter().any(|e| {
                    e.course_id == s.course_id
                        && e.is_active()
                        && !tables
                            .attendance
                            .iter()
                            .any(|a| a.session_id == s.id && a.student_id == e.student_id)
                })
            })
            .cloned()
            .collect();
        pending.sort_by_key(|s| s.expires_at);
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }
}

#[async_trait]
impl AttendanceRepository for MemoryRepository {
    async fn find_attendance(
        &self,
        session_id: Uuid,
        student_id: Uuid,
    ) -> DatabaseResult<Option<Attendance>> {
        Ok(self
            .tables
            .lock()
            .await
            .attendance
            .iter()
            .find(|a| a.session_id == session_id && a.student_id == student_id)
            .cloned())
    }

    async fn insert_present(
        &self,
        new_attendance: &NewAttendance,
    ) -> DatabaseResult<InsertOutcome> {
        let mut tables = self.tables.lock().await;
        let exists = tables.attendance.iter().any(|a| {
            a.session_id == new_attendance.session_id && a.student_id == new_attendance.student_id
        });
        if exists {
            return Ok(InsertOutcome::Duplicate);
        }

        let attendance = Attendance {
            id: Uuid::new_v4(),
            session_id: new_attendance.session_id,
            student_id: new_attendance.student_id,
            course_id: new_attendance.course_id,
            status: AttendanceStatus::Present,
            marked_at: new_attendance.marked_at,
            location: new_attendance.location.clone(),
        };
        tables.attendance.push(attendance.clone());
        Ok(InsertOutcome::Inserted(attendance))
    }

    async fn upsert_absent(
        &self,
        session: &Session,
        student_ids: &[Uuid],
    ) -> DatabaseResult<u64> {
        if self.fail_absent_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query(sqlx::Error::PoolTimedOut));
        }

        let mut tables = self.tables.lock().await;
        let mut written = 0;
        for &student_id in student_ids {
            let exists = tables
                .attendance
                .iter()
                .any(|a| a.session_id == session.id && a.student_id == student_id);
            if exists {
                continue;
            }
            tables.attendance.push(Attendance {
                id: Uuid::new_v4(),
                session_id: session.id,
                student_id,
                course_id: session.course_id,
                status: AttendanceStatus::Absent,
                marked_at: session.expires_at,
                location: None,
            });
            written += 1;
        }
        Ok(written)
    }

    async fn claim_absent(
        &self,
        new_attendance: &NewAttendance,
    ) -> DatabaseResult<Option<Attendance>> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .attendance
            .iter_mut()
            .find(|a| {
                a.session_id == new_attendance.session_id
                    && a.student_id == new_attendance.student_id
                    && a.status == AttendanceStatus::Absent
                    && a.marked_at >= new_attendance.marked_at
            })
            .map(|a| {
                a.status = AttendanceStatus::Present;
                a.marked_at = new_attendance.marked_at;
                a.location = new_attendance.location.clone();
                a.clone()
            }))
    }

    async fn list_attendance_for_session(
        &self,
        session_id: Uuid,
    ) -> DatabaseResult<Vec<AttendanceEntry>> {
        let tables = self.tables.lock().await;
        let mut entries: Vec<AttendanceEntry> = tables
            .attendance
            .iter()
            .filter(|a| a.session_id == session_id)
            .filter_map(|a| {
                tables.students.get(&a.student_id).map(|s| AttendanceEntry {
                    attendance: a.clone(),
                    student: StudentSummary::from(s),
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            a.attendance
                .marked_at
                .cmp(&b.attendance.marked_at)
                .then(a.student.roll_number.cmp(&b.student.roll_number))
        });
        Ok(entries)
    }

    async fn list_attendance_for_student_course(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DatabaseResult<Vec<Attendance>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Attendance> = tables
            .attendance
            .iter()
            .filter(|a| a.student_id == student_id && a.course_id == course_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.marked_at.cmp(&a.marked_at));
        Ok(rows)
    }

    async fn list_attendance_for_student(
        &self,
        student_id: Uuid,
    ) -> DatabaseResult<Vec<AttendanceHistoryEntry>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<AttendanceHistoryEntry> = tables
            .attendance
            .iter()
            .filter(|a| a.student_id == student_id)
            .filter_map(|a| {
                let course = tables.courses.get(&a.course_id)?;
                let session = tables.sessions.get(&a.session_id)?;
                Some(AttendanceHistoryEntry {
                    attendance: a.clone(),
                    course_code: course.code.clone(),
                    course_name: course.name.clone(),
                    session_issued_at: session.issued_at,
                    session_expires_at: session.expires_at,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.attendance.marked_at.cmp(&a.attendance.marked_at));
        Ok(rows)
    }
}

#[async_trait]
impl StatsRepository for MemoryRepository {
    async fn system_stats(&self) -> DatabaseResult<SystemStats> {
        let tables = self.tables.lock().await;
        Ok(SystemStats {
            students: tables.students.len() as i64,
            teachers: tables.users.values().filter(|u| u.role == "teacher").count() as i64,
            courses: tables.courses.len() as i64,
            total_attendance_logs: tables.attendance.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    async fn course_with_session(
        repo: &MemoryRepository,
        issued_at: DateTime<Utc>,
    ) -> (Course, Session) {
        let teacher = repo.add_teacher("Ada", "ada@example.edu").await;
        let course = repo
            .create_course(&NewCourse {
                name: "Compilers".to_string(),
                code: "CS401".to_string(),
                department: None,
                credits: 4,
                semester: "Fall".to_string(),
                teacher_id: teacher,
            })
            .await
            .unwrap();
        let session = Session {
            id: Uuid::new_v4(),
            course_id: course.id,
            creator_id: teacher,
            qr_token: String::new(),
            active: true,
            issued_at,
            expires_at: issued_at + Duration::minutes(1),
        };
        repo.insert_session(&session).await.unwrap();
        (course, session)
    }

    #[tokio::test]
    async fn test_concurrent_present_marks_write_one_row() {
        let repo = Arc::new(MemoryRepository::new());
        let now = Utc::now();
        let (course, session) = course_with_session(&repo, now).await;
        let student = repo.add_student("Grace", "grace@example.edu", "R-001").await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                let mark = NewAttendance {
                    session_id: session.id,
                    student_id: student.id,
                    course_id: course.id,
                    marked_at: now,
                    location: None,
                };
                tokio::spawn(async move { repo.insert_present(&mark).await.unwrap() })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if let InsertOutcome::Inserted(_) = handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(repo.list_attendance_for_session(session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_absent_upsert_keeps_existing_rows() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let (course, session) = course_with_session(&repo, now).await;
        let present = repo.add_student("Grace", "grace@example.edu", "R-001").await;
        let absent = repo.add_student("Alan", "alan@example.edu", "R-002").await;

        repo.insert_present(&NewAttendance {
            session_id: session.id,
            student_id: present.id,
            course_id: course.id,
            marked_at: now,
            location: None,
        })
        .await
        .unwrap();

        let ids = [present.id, absent.id];
        assert_eq!(repo.upsert_absent(&session, &ids).await.unwrap(), 1);
        assert_eq!(repo.upsert_absent(&session, &ids).await.unwrap(), 0);

        let kept = repo.find_attendance(session.id, present.id).await.unwrap().unwrap();
        assert_eq!(kept.status, AttendanceStatus::Present);
        let filled = repo.find_attendance(session.id, absent.id).await.unwrap().unwrap();
        assert_eq!(filled.status, AttendanceStatus::Absent);
        assert_eq!(filled.marked_at, session.expires_at);
    }

    #[tokio::test]
    async fn test_cancel_never_extends_expiry() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let (_, session) = course_with_session(&repo, now).await;

        let cancelled = repo
            .cancel_session(session.id, now + Duration::seconds(10))
            .await
            .unwrap()
            .unwrap();
        assert!(!cancelled.active);
        assert_eq!(cancelled.expires_at, now + Duration::seconds(10));

        let again = repo
            .cancel_session(session.id, now + Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.expires_at, now + Duration::seconds(10));
    }

    #[tokio::test]
    async fn test_pending_backfill_lists_only_finished_sessions_with_gaps() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let (course, session) = course_with_session(&repo, now).await;
        let student = repo.add_student("Grace", "grace@example.edu", "R-001").await;
        repo.create_enrollment(&NewEnrollment {
            student_id: student.id,
            course_id: course.id,
            semester: "Fall".to_string(),
            academic_year: "2025-2026".to_string(),
            enrolled_at: now,
        })
        .await
        .unwrap();

        assert!(repo.list_sessions_pending_backfill(now, 10).await.unwrap().is_empty());

        let later = now + Duration::minutes(2);
        let pending = repo.list_sessions_pending_backfill(later, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, session.id);

        repo.upsert_absent(&session, &[student.id]).await.unwrap();
        assert!(repo.list_sessions_pending_backfill(later, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_active_enrollment_is_a_unique_violation() {
        let repo = MemoryRepository::new();
        let (course, _) = course_with_session(&repo, Utc::now()).await;
        let student = repo.add_student("Grace", "grace@example.edu", "R-001").await;
        let enrollment = NewEnrollment {
            student_id: student.id,
            course_id: course.id,
            semester: "Fall".to_string(),
            academic_year: "2025-2026".to_string(),
            enrolled_at: Utc::now(),
        };

        let first = repo.create_enrollment(&enrollment).await.unwrap();
        assert!(matches!(
            repo.create_enrollment(&enrollment).await,
            Err(DatabaseError::UniqueViolation(_))
        ));

        repo.set_enrollment_status(first.id, EnrollmentStatus::Dropped)
            .await
            .unwrap();
        let second = repo.create_enrollment(&enrollment).await.unwrap();
        assert!(matches!(
            repo.reactivate_enrollment(first.id, None).await,
            Err(DatabaseError::UniqueViolation(_))
        ));
        assert!(second.is_active());
    }

    #[tokio::test]
    async fn test_claim_absent_only_takes_rows_stamped_after_the_scan() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let (course, session) = course_with_session(&repo, now).await;
        let student = repo.add_student("Grace", "grace@example.edu", "R-001").await;
        repo.upsert_absent(&session, &[student.id]).await.unwrap();

        let mut scan = NewAttendance {
            session_id: session.id,
            student_id: student.id,
            course_id: course.id,
            marked_at: session.expires_at + Duration::seconds(1),
            location: None,
        };
        assert!(repo.claim_absent(&scan).await.unwrap().is_none());

        scan.marked_at = now + Duration::seconds(5);
        let claimed = repo.claim_absent(&scan).await.unwrap().unwrap();
        assert_eq!(claimed.status, AttendanceStatus::Present);
        assert_eq!(claimed.marked_at, scan.marked_at);

        assert!(repo.claim_absent(&scan).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_course_cascades() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let (course, session) = course_with_session(&repo, now).await;
        let student = repo.add_student("Grace", "grace@example.edu", "R-001").await;
        repo.upsert_absent(&session, &[student.id]).await.unwrap();

        assert!(repo.delete_course(course.id).await.unwrap());
        assert!(repo.find_session(session.id).await.unwrap().is_none());
        assert_eq!(repo.system_stats().await.unwrap().total_attendance_logs, 0);
        assert!(!repo.delete_course(course.id).await.unwrap());
    }
}
