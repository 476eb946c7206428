//! Course model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Course entity, owned by exactly one teacher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub department: Option<String>,
    pub credits: i32,
    pub semester: String,
    pub teacher_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// New course creation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCourse {
    pub name: String,
    pub code: String,
    pub department: Option<String>,
    #[serde(default)]
    pub credits: i32,
    pub semester: String,
    pub teacher_id: Uuid,
}
