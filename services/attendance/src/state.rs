//! Application state shared across handlers

use sqlx::PgPool;
use std::sync::Arc;

use crate::{
    admin::AdminService, attendance::AttendanceRecorder, middleware::JwtVerifier,
    notifications::NotificationHub, sessions::SessionManager,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Pool checked by the health endpoint; absent when running on the in-memory store
    pub db_pool: Option<PgPool>,
    pub sessions: Arc<SessionManager>,
    pub recorder: Arc<AttendanceRecorder>,
    pub admin: Arc<AdminService>,
    pub hub: Arc<NotificationHub>,
    pub verifier: Arc<JwtVerifier>,
}
