//! Class session model and lifecycle state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived lifecycle state of a class session
///
/// Only cancellation is stored (`active = false`); expiry is computed from the
/// wall clock on every read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Expired,
    Cancelled,
}

/// Class session entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub course_id: Uuid,
    pub creator_id: Uuid,
    /// JSON-encoded QR token, persisted so every re-display shows the same code
    #[serde(skip_serializing)]
    pub qr_token: String,
    pub active: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether a scan at `now` may still mark attendance
    ///
    /// Both flags are checked: cancellation clears `active`, while clock-based
    /// expiry only moves `now` past `expires_at`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && now <= self.expires_at
    }

    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if !self.active {
            SessionState::Cancelled
        } else if now > self.expires_at {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }
}
