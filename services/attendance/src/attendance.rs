//! Attendance recording, absence backfill and the student-facing views

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Attendance, AttendanceEntry, AttendanceHistoryEntry, AttendanceStatus, Course, InsertOutcome,
    Location, NewAttendance, Session, Student, StudentSummary,
};
use crate::notifications::{EventPublisher, SessionEvent};
use crate::qr::{QrCodec, RawToken};
use crate::reporting::{CourseAttendanceStats, SessionOutcome};
use crate::repositories::Store;

/// One session of a course from a student's point of view
#[derive(Debug, Clone, Serialize)]
pub struct SessionAttendance {
    pub attendance_id: Option<Uuid>,
    pub session_id: Uuid,
    pub session_issued_at: DateTime<Utc>,
    pub session_expires_at: DateTime<Utc>,
    pub status: SessionOutcome,
    pub marked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseAttendanceView {
    pub course: Course,
    pub attendance: Vec<SessionAttendance>,
    pub stats: CourseAttendanceStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrolledCourse {
    pub enrollment_id: Uuid,
    pub enrolled_at: DateTime<Utc>,
    pub course: Course,
    #[serde(flatten)]
    pub stats: CourseAttendanceStats,
}

pub struct AttendanceRecorder {
    store: Arc<dyn Store>,
    codec: Arc<QrCodec>,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn EventPublisher>,
}

impl AttendanceRecorder {
    pub fn new(
        store: Arc<dyn Store>,
        codec: Arc<QrCodec>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            publisher,
        }
    }

    /// Record a student's scan of a session QR code
    ///
    /// Checks run in a fixed order so each rejection names the first rule
    /// the scan broke: token, session, profile, enrollment, duplicate.
    pub async fn mark_attendance(
        &self,
        token: RawToken,
        user_id: Uuid,
        location: Option<Location>,
    ) -> ApiResult<AttendanceEntry> {
        let payload = self.codec.decode(token).map_err(|e| {
            debug!("Rejected QR token from {}: {}", user_id, e);
            ApiError::InvalidToken
        })?;

        let now = self.clock.now();
        let session = self
            .store
            .find_session(payload.session_id)
            .await?
            .ok_or(ApiError::SessionInvalidOrExpired)?;
        if !session.is_usable(now) {
            return Err(ApiError::SessionInvalidOrExpired);
        }
        if session.course_id != payload.course_id {
            warn!(
                "Token for session {} names course {} but the session belongs to {}",
                session.id, payload.course_id, session.course_id
            );
            return Err(ApiError::InvalidToken);
        }

        let student = self.student_for_user(user_id).await?;

        self.store
            .find_active_enrollment(student.id, payload.course_id)
            .await?
            .ok_or(ApiError::NotEnrolled)?;

        let mark = NewAttendance {
            session_id: session.id,
            student_id: student.id,
            course_id: payload.course_id,
            marked_at: now,
            location,
        };
        let attendance = match self.store.find_attendance(session.id, student.id).await? {
            Some(existing) if existing.status == AttendanceStatus::Present => {
                return Err(ApiError::DuplicateAttendance);
            }
            Some(_) => self.claim_backfilled_absence(&mark).await?,
            None => match self.store.insert_present(&mark).await? {
                InsertOutcome::Inserted(attendance) => attendance,
                InsertOutcome::Duplicate => self.claim_backfilled_absence(&mark).await?,
            },
        };

        info!(
            "Student {} marked present in session {}",
            student.roll_number, session.id
        );

        let entry = AttendanceEntry {
            attendance,
            student: StudentSummary::from(&student),
        };
        if let Err(e) = self
            .publisher
            .publish(SessionEvent::attendance_marked(entry.clone()))
            .await
        {
            warn!("Failed to publish attendance for session {}: {}", session.id, e);
        }

        Ok(entry)
    }

    /// A backfill on a replica whose clock runs ahead can write Absent while
    /// the session is still open here. The in-window scan takes the row over.
    async fn claim_backfilled_absence(&self, mark: &NewAttendance) -> ApiResult<Attendance> {
        match self.store.claim_absent(mark).await? {
            Some(attendance) => {
                warn!(
                    "Replaced early absence of student {} in session {} with a scan",
                    mark.student_id, mark.session_id
                );
                Ok(attendance)
            }
            None => Err(ApiError::DuplicateAttendance),
        }
    }

    /// Mark every actively enrolled student without a record Absent,
    /// stamped at the session's expiry. Usable sessions are left alone.
    pub async fn backfill_absences(&self, session_id: Uuid) -> ApiResult<u64> {
        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Session".to_string()))?;
        self.backfill_session(&session).await
    }

    pub(crate) async fn backfill_session(&self, session: &Session) -> ApiResult<u64> {
        if session.is_usable(self.clock.now()) {
            return Ok(0);
        }

        let student_ids: Vec<Uuid> = self
            .store
            .list_active_enrollments_for_course(session.course_id)
            .await?
            .into_iter()
            .map(|e| e.student_id)
            .collect();
        let written = self.store.upsert_absent(session, &student_ids).await?;

        if written > 0 {
            info!("Backfilled {} absences for session {}", written, session.id);
        }
        Ok(written)
    }

    /// Per-session outcomes of one student in one course
    ///
    /// Finished sessions missing this student's record are backfilled first.
    /// A failed backfill is logged and the session shown as Absent.
    pub async fn course_attendance_view(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> ApiResult<CourseAttendanceView> {
        self.store
            .find_active_enrollment(student_id, course_id)
            .await?
            .ok_or_else(|| ApiError::Forbidden("Not enrolled in this course".to_string()))?;
        let course = self
            .store
            .find_course(course_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Course".to_string()))?;

        let sessions = self.store.list_sessions_for_course(course_id).await?;
        let mut records = self.records_by_session(student_id, course_id).await?;

        let now = self.clock.now();
        let mut backfilled = false;
        for session in &sessions {
            if session.is_usable(now) || records.contains_key(&session.id) {
                continue;
            }
            match self.backfill_session(session).await {
                Ok(_) => backfilled = true,
                Err(e) => warn!(
                    "Absence backfill failed for session {}: {}",
                    session.id, e
                ),
            }
        }
        if backfilled {
            records = self.records_by_session(student_id, course_id).await?;
        }

        let attendance: Vec<SessionAttendance> = sessions
            .iter()
            .map(|session| match records.get(&session.id) {
                Some(record) => SessionAttendance {
                    attendance_id: Some(record.id),
                    session_id: session.id,
                    session_issued_at: session.issued_at,
                    session_expires_at: session.expires_at,
                    status: record.status.into(),
                    marked_at: Some(record.marked_at),
                },
                None if session.is_usable(now) => SessionAttendance {
                    attendance_id: None,
                    session_id: session.id,
                    session_issued_at: session.issued_at,
                    session_expires_at: session.expires_at,
                    status: SessionOutcome::Pending,
                    marked_at: None,
                },
                None => SessionAttendance {
                    attendance_id: None,
                    session_id: session.id,
                    session_issued_at: session.issued_at,
                    session_expires_at: session.expires_at,
                    status: SessionOutcome::Absent,
                    marked_at: Some(session.expires_at),
                },
            })
            .collect();
        let stats = CourseAttendanceStats::from_outcomes(attendance.iter().map(|a| a.status));

        Ok(CourseAttendanceView {
            course,
            attendance,
            stats,
        })
    }

    /// Every record of the calling student, newest first
    pub async fn attendance_history(&self, user_id: Uuid) -> ApiResult<Vec<AttendanceHistoryEntry>> {
        let student = self.student_for_user(user_id).await?;
        Ok(self.store.list_attendance_for_student(student.id).await?)
    }

    /// Active enrollments of the calling student with their statistics
    ///
    /// Sessions without a record count as pending; no backfill runs here.
    pub async fn enrolled_courses(&self, user_id: Uuid) -> ApiResult<Vec<EnrolledCourse>> {
        let student = self.student_for_user(user_id).await?;
        let enrollments = self
            .store
            .list_active_enrollments_for_student(student.id)
            .await?;

        let mut courses = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            let Some(course) = self.store.find_course(enrollment.course_id).await? else {
                continue;
            };
            let sessions = self.store.list_sessions_for_course(course.id).await?;
            let records = self.records_by_session(student.id, course.id).await?;
            let stats = CourseAttendanceStats::from_outcomes(sessions.iter().map(|s| {
                records
                    .get(&s.id)
                    .map(|r| SessionOutcome::from(r.status))
                    .unwrap_or(SessionOutcome::Pending)
            }));

            courses.push(EnrolledCourse {
                enrollment_id: enrollment.id,
                enrolled_at: enrollment.enrolled_at,
                course,
                stats,
            });
        }
        Ok(courses)
    }

    pub async fn student_for_user(&self, user_id: Uuid) -> ApiResult<Student> {
        self.store
            .find_student_by_user(user_id)
            .await?
            .ok_or(ApiError::ProfileNotFound)
    }

    async fn records_by_session(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> ApiResult<HashMap<Uuid, Attendance>> {
        Ok(self
            .store
            .list_attendance_for_student_course(student_id, course_id)
            .await?
            .into_iter()
            .map(|a| (a.session_id, a))
            .collect())
    }
}
