//! Attendance service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::{AuthUser, auth_middleware, require_admin, require_student, require_teacher},
    models::{Location, NewCourse},
    qr::RawToken,
    state::AppState,
    ws::ws_handler,
};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(alias = "courseId")]
    pub course_id: Uuid,
    #[serde(default, alias = "validityMinutes")]
    pub validity_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MarkAttendanceRequest {
    #[serde(default, alias = "qrCodeData", alias = "qrResult")]
    pub token: Option<RawToken>,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    #[serde(alias = "studentId")]
    pub student_id: Uuid,
    #[serde(default, alias = "academicYear")]
    pub academic_year: Option<String>,
}

/// Create the router for the attendance service
pub fn create_router(state: AppState) -> Router {
    let auth = || middleware::from_fn_with_state(state.clone(), auth_middleware);

    let teacher_routes = Router::new()
        .route("/teacher/courses", get(list_teacher_courses))
        .route("/teacher/courses/:id/sessions", get(list_course_sessions))
        .route("/teacher/courses/:id/sessions/active", get(get_active_session))
        .route("/teacher/sessions", post(create_session))
        .route("/teacher/sessions/:id/cancel", put(cancel_session))
        .route("/teacher/sessions/:id/details", get(get_session_details))
        .route("/teacher/sessions/:id/attendance", get(get_session_attendance))
        .route("/ws", get(ws_handler))
        .route_layer(middleware::from_fn(require_teacher))
        .route_layer(auth());

    let student_routes = Router::new()
        .route("/student/attendance/mark", post(mark_attendance))
        .route("/student/attendance", get(get_attendance_history))
        .route("/student/courses", get(get_enrolled_courses))
        .route(
            "/student/courses/:course_id/attendance",
            get(get_own_course_attendance),
        )
        .route(
            "/students/:id/courses/:course_id/attendance",
            get(get_student_course_attendance),
        )
        .route_layer(middleware::from_fn(require_student))
        .route_layer(auth());

    let admin_routes = Router::new()
        .route("/admin/stats", get(get_system_stats))
        .route("/admin/courses", post(create_course))
        .route(
            "/admin/courses/:id",
            get(get_course_details).delete(delete_course),
        )
        .route("/admin/courses/:id/enroll", post(enroll_student))
        .route(
            "/admin/courses/:id/enroll/:student_id",
            axum::routing::delete(drop_enrollment),
        )
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(auth());

    Router::new()
        .route("/health", get(health_check))
        .merge(teacher_routes)
        .merge(student_routes)
        .merge(admin_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db_pool {
        Some(pool) => match common::database::health_check(pool).await {
            Ok(true) => "ok",
            _ => "unavailable",
        },
        None => "not configured",
    };
    let (status, summary) = if database == "unavailable" {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        status,
        Json(json!({
            "status": summary,
            "service": "attendance-service",
            "database": database,
        })),
    )
}

pub async fn list_teacher_courses(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.sessions.list_teacher_courses(user.id).await?))
}

pub async fn list_course_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .sessions
            .list_sessions_for_course(course_id, user.id)
            .await?,
    ))
}

pub async fn get_active_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .sessions
            .get_active_session_for_course(course_id, user.id)
            .await?,
    ))
}

/// Open a session and return its QR code
pub async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .sessions
        .create_session(user.id, payload.course_id, payload.validity_minutes)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.sessions.cancel_session(session_id, user.id).await?))
}

pub async fn get_session_details(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .sessions
            .get_session_details(session_id, user.id)
            .await?,
    ))
}

pub async fn get_session_attendance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .sessions
            .list_session_attendance(session_id, user.id)
            .await?,
    ))
}

/// Mark the caller present from a scanned QR code
pub async fn mark_attendance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<MarkAttendanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = payload.token.ok_or(ApiError::InvalidToken)?;
    let entry = state
        .recorder
        .mark_attendance(token, user.id, payload.location)
        .await?;

    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn get_attendance_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.recorder.attendance_history(user.id).await?))
}

pub async fn get_enrolled_courses(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.recorder.enrolled_courses(user.id).await?))
}

pub async fn get_own_course_attendance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let student = state.recorder.student_for_user(user.id).await?;
    Ok(Json(
        state
            .recorder
            .course_attendance_view(student.id, course_id)
            .await?,
    ))
}

/// Per-session view for a student; `:id` is the caller's profile or user id
pub async fn get_student_course_attendance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, course_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let student = state.recorder.student_for_user(user.id).await?;
    if id != student.id && id != user.id {
        return Err(ApiError::Forbidden(
            "Students may only view their own attendance".to_string(),
        ));
    }

    Ok(Json(
        state
            .recorder
            .course_attendance_view(student.id, course_id)
            .await?,
    ))
}

pub async fn get_system_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.admin.system_stats().await?))
}

pub async fn create_course(
    State(state): State<AppState>,
    Json(payload): Json<NewCourse>,
) -> Result<impl IntoResponse, ApiError> {
    let course = state.admin.create_course(payload).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

pub async fn get_course_details(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.admin.course_details(course_id).await?))
}

pub async fn delete_course(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.admin.delete_course(course_id).await?;
    Ok(Json(json!({"message": "Course deleted successfully"})))
}

pub async fn enroll_student(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    Json(payload): Json<EnrollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let enrollment = state
        .admin
        .enroll_student(course_id, payload.student_id, payload.academic_year)
        .await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

pub async fn drop_enrollment(
    State(state): State<AppState>,
    Path((course_id, student_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.admin.drop_enrollment(course_id, student_id).await?))
}
