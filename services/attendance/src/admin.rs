//! Course and enrollment administration

use chrono::Datelike;
use common::error::DatabaseError;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Course, Enrollment, EnrollmentStatus, NewCourse, NewEnrollment, StudentSummary,
};
use crate::reporting::SystemStats;
use crate::repositories::Store;

#[derive(Debug, Clone, Serialize)]
pub struct EnrolledStudent {
    pub enrollment: Enrollment,
    pub student: StudentSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseDetails {
    #[serde(flatten)]
    pub course: Course,
    pub enrollments: Vec<EnrolledStudent>,
}

pub struct AdminService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl AdminService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create_course(&self, new_course: NewCourse) -> ApiResult<Course> {
        for (field, value) in [
            ("name", &new_course.name),
            ("code", &new_course.code),
            ("semester", &new_course.semester),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::BadRequest(format!("{} is required", field)));
            }
        }
        if new_course.credits < 0 {
            return Err(ApiError::BadRequest("credits must not be negative".to_string()));
        }
        if !self.store.is_teacher(new_course.teacher_id).await? {
            return Err(ApiError::NotFound("Teacher".to_string()));
        }

        let course = self.store.create_course(&new_course).await?;
        info!("Course {} created for teacher {}", course.code, course.teacher_id);
        Ok(course)
    }

    pub async fn course_details(&self, course_id: Uuid) -> ApiResult<CourseDetails> {
        let course = self.course(course_id).await?;
        let mut enrollments = Vec::new();
        for enrollment in self
            .store
            .list_active_enrollments_for_course(course_id)
            .await?
        {
            if let Some(student) = self.store.find_student(enrollment.student_id).await? {
                enrollments.push(EnrolledStudent {
                    student: StudentSummary::from(&student),
                    enrollment,
                });
            }
        }

        Ok(CourseDetails {
            course,
            enrollments,
        })
    }

    /// Enroll a student for the course's semester
    ///
    /// A dropped enrollment for the same semester is reactivated, taking the
    /// supplied academic year if there is one. Losing a race against a
    /// concurrent enrollment surfaces as the same conflict as a repeat call.
    pub async fn enroll_student(
        &self,
        course_id: Uuid,
        student_id: Uuid,
        academic_year: Option<String>,
    ) -> ApiResult<Enrollment> {
        let course = self.course(course_id).await?;
        let student = self
            .store
            .find_student(student_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Student".to_string()))?;
        let academic_year = academic_year.filter(|year| !year.trim().is_empty());

        let existing = self
            .store
            .find_enrollment(student.id, course.id, &course.semester)
            .await?;
        let enrollment = match existing {
            Some(enrollment) if enrollment.is_active() => return Err(already_enrolled()),
            Some(enrollment) => self
                .store
                .reactivate_enrollment(enrollment.id, academic_year.as_deref())
                .await
                .map_err(enrollment_conflict)?
                .ok_or_else(|| ApiError::NotFound("Enrollment".to_string()))?,
            None => {
                let now = self.clock.now();
                let academic_year = academic_year
                    .unwrap_or_else(|| format!("{}-{}", now.year(), now.year() + 1));
                self.store
                    .create_enrollment(&NewEnrollment {
                        student_id: student.id,
                        course_id: course.id,
                        semester: course.semester.clone(),
                        academic_year,
                        enrolled_at: now,
                    })
                    .await
                    .map_err(enrollment_conflict)?
            }
        };

        info!("Student {} enrolled in {}", student.roll_number, course.code);
        Ok(enrollment)
    }

    pub async fn drop_enrollment(&self, course_id: Uuid, student_id: Uuid) -> ApiResult<Enrollment> {
        let enrollment = self
            .store
            .find_active_enrollment(student_id, course_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Enrollment".to_string()))?;

        let dropped = self
            .store
            .set_enrollment_status(enrollment.id, EnrollmentStatus::Dropped)
            .await?
            .ok_or_else(|| ApiError::NotFound("Enrollment".to_string()))?;
        info!("Student {} dropped from course {}", student_id, course_id);
        Ok(dropped)
    }

    /// Delete a course with its enrollments, sessions and attendance
    pub async fn delete_course(&self, course_id: Uuid) -> ApiResult<()> {
        if !self.store.delete_course(course_id).await? {
            return Err(ApiError::NotFound("Course".to_string()));
        }
        info!("Course {} deleted", course_id);
        Ok(())
    }

    pub async fn system_stats(&self) -> ApiResult<SystemStats> {
        Ok(self.store.system_stats().await?)
    }

    async fn course(&self, course_id: Uuid) -> ApiResult<Course> {
        self.store
            .find_course(course_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Course".to_string()))
    }
}

fn already_enrolled() -> ApiError {
    ApiError::Conflict("Student is already enrolled in this course".to_string())
}

/// The active-enrollment unique index is the final arbiter between
/// concurrent enrollments
fn enrollment_conflict(err: DatabaseError) -> ApiError {
    match err {
        DatabaseError::UniqueViolation(_) => already_enrolled(),
        other => ApiError::Database(other),
    }
}
