//! Class session lifecycle: issue, cancel and inspect QR sessions

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};
use crate::models::{AttendanceEntry, Course, Session, SessionState};
use crate::qr::{EncodedToken, QrCodec};
use crate::repositories::Store;

/// Session as reported to its teacher, with the derived lifecycle state
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub state: SessionState,
}

/// Response to a session creation
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
    pub session_id: Uuid,
    pub qr_code: EncodedToken,
    /// `qr_code` in compact `iv:content` form, for rendering as plain text
    pub qr_text: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Full session detail, including the QR code originally issued
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    #[serde(flatten)]
    pub session: SessionView,
    pub qr_code: EncodedToken,
    pub qr_text: String,
    pub course: Course,
    pub attendance_count: usize,
}

/// Validity bounds applied to new sessions
#[derive(Debug, Clone, Copy)]
pub struct ValidityPolicy {
    pub default_minutes: i64,
    pub max_minutes: i64,
}

pub struct SessionManager {
    store: Arc<dyn Store>,
    codec: Arc<QrCodec>,
    clock: Arc<dyn Clock>,
    validity: ValidityPolicy,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        codec: Arc<QrCodec>,
        clock: Arc<dyn Clock>,
        validity: ValidityPolicy,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            validity,
        }
    }

    /// Open a session for a course owned by `teacher_id` and mint its QR code
    ///
    /// The encoded token is persisted with the session so every later read
    /// shows the same code.
    pub async fn create_session(
        &self,
        teacher_id: Uuid,
        course_id: Uuid,
        validity_minutes: Option<i64>,
    ) -> ApiResult<CreatedSession> {
        let minutes = validity_minutes.unwrap_or(self.validity.default_minutes);
        if minutes < 1 || minutes > self.validity.max_minutes {
            return Err(ApiError::BadRequest(format!(
                "validity must be between 1 and {} minutes",
                self.validity.max_minutes
            )));
        }

        let course = self.owned_course(course_id, teacher_id).await?;

        let validity = Duration::minutes(minutes);
        let issued_at = self.clock.now();
        let session_id = Uuid::new_v4();
        let qr_code = self
            .codec
            .encode_at(
                session_id,
                course.id,
                issued_at,
                validity.num_milliseconds(),
            )
            .map_err(|e| {
                error!("Failed to seal QR token for session {}: {}", session_id, e);
                ApiError::InternalServerError
            })?;
        let qr_token = serde_json::to_string(&qr_code).map_err(|e| {
            error!("Failed to serialize QR token: {}", e);
            ApiError::InternalServerError
        })?;

        let session = Session {
            id: session_id,
            course_id: course.id,
            creator_id: teacher_id,
            qr_token,
            active: true,
            issued_at,
            expires_at: issued_at + validity,
        };
        self.store.insert_session(&session).await?;

        info!(
            "Session {} opened for course {} until {}",
            session.id, course.code, session.expires_at
        );

        Ok(CreatedSession {
            qr_text: qr_code.to_compact(),
            session_id: session.id,
            qr_code,
            expires_at: session.expires_at,
        })
    }

    /// End a session early; repeating the call is harmless
    pub async fn cancel_session(&self, session_id: Uuid, teacher_id: Uuid) -> ApiResult<SessionView> {
        self.owned_session(session_id, teacher_id).await?;

        let now = self.clock.now();
        let session = self
            .store
            .cancel_session(session_id, now)
            .await?
            .ok_or_else(|| ApiError::NotFound("Session".to_string()))?;

        info!("Session {} cancelled by {}", session.id, teacher_id);
        Ok(self.view(session))
    }

    pub async fn get_active_session_for_course(
        &self,
        course_id: Uuid,
        teacher_id: Uuid,
    ) -> ApiResult<Option<SessionView>> {
        self.owned_course(course_id, teacher_id).await?;

        let session = self
            .store
            .find_usable_session_for_course(course_id, self.clock.now())
            .await?;
        Ok(session.map(|s| self.view(s)))
    }

    pub async fn list_sessions_for_course(
        &self,
        course_id: Uuid,
        teacher_id: Uuid,
    ) -> ApiResult<Vec<SessionView>> {
        self.owned_course(course_id, teacher_id).await?;

        let sessions = self.store.list_sessions_for_course(course_id).await?;
        Ok(sessions.into_iter().map(|s| self.view(s)).collect())
    }

    pub async fn get_session_details(
        &self,
        session_id: Uuid,
        teacher_id: Uuid,
    ) -> ApiResult<SessionDetails> {
        let session = self.owned_session(session_id, teacher_id).await?;
        let course = self
            .store
            .find_course(session.course_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Course".to_string()))?;
        let qr_code: EncodedToken = serde_json::from_str(&session.qr_token).map_err(|e| {
            error!("Stored QR token for session {} is unreadable: {}", session.id, e);
            ApiError::InternalServerError
        })?;
        let attendance_count = self
            .store
            .list_attendance_for_session(session.id)
            .await?
            .len();

        Ok(SessionDetails {
            qr_text: qr_code.to_compact(),
            session: self.view(session),
            qr_code,
            course,
            attendance_count,
        })
    }

    pub async fn list_session_attendance(
        &self,
        session_id: Uuid,
        teacher_id: Uuid,
    ) -> ApiResult<Vec<AttendanceEntry>> {
        self.owned_session(session_id, teacher_id).await?;
        Ok(self.store.list_attendance_for_session(session_id).await?)
    }

    pub async fn list_teacher_courses(&self, teacher_id: Uuid) -> ApiResult<Vec<Course>> {
        Ok(self.store.list_courses_for_teacher(teacher_id).await?)
    }

    /// Load a session, failing unless `teacher_id` created it
    pub async fn owned_session(&self, session_id: Uuid, teacher_id: Uuid) -> ApiResult<Session> {
        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Session".to_string()))?;

        if session.creator_id != teacher_id {
            return Err(ApiError::Forbidden(
                "Not authorized for this session".to_string(),
            ));
        }
        Ok(session)
    }

    async fn owned_course(&self, course_id: Uuid, teacher_id: Uuid) -> ApiResult<Course> {
        let course = self
            .store
            .find_course(course_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Course".to_string()))?;

        if course.teacher_id != teacher_id {
            return Err(ApiError::Forbidden(
                "Not authorized for this course".to_string(),
            ));
        }
        Ok(course)
    }

    fn view(&self, session: Session) -> SessionView {
        let state = session.state(self.clock.now());
        SessionView { session, state }
    }
}
