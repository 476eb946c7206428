//! Enrollment model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Enrollment status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnrollmentStatus {
    Active,
    Dropped,
}

impl EnrollmentStatus {
    /// Get the stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "Active",
            EnrollmentStatus::Dropped => "Dropped",
        }
    }
}

impl FromStr for EnrollmentStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Active" => Ok(EnrollmentStatus::Active),
            "Dropped" => Ok(EnrollmentStatus::Dropped),
            other => Err(UnknownVariant {
                kind: "enrollment status",
                value: other.to_string(),
            }),
        }
    }
}

/// Enrollment entity linking a student to a course for one semester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub semester: String,
    pub academic_year: String,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }
}

/// New enrollment creation payload
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub semester: String,
    pub academic_year: String,
    pub enrolled_at: DateTime<Utc>,
}
