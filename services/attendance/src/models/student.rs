//! Student profile model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Student profile joined with the owning user's display fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub user_id: Uuid,
    pub roll_number: String,
    pub name: String,
    pub email: String,
}

/// Display fields attached to attendance rows shown to teachers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentSummary {
    pub id: Uuid,
    pub roll_number: String,
    pub name: String,
    pub email: String,
}

impl From<&Student> for StudentSummary {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id,
            roll_number: student.roll_number.clone(),
            name: student.name.clone(),
            email: student.email.clone(),
        }
    }
}
