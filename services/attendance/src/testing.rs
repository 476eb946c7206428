//! Shared fixtures for service and route tests

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::admin::AdminService;
use crate::attendance::AttendanceRecorder;
use crate::clock::{Clock, ManualClock};
use crate::models::{Course, NewCourse, NewEnrollment, Student};
use crate::notifications::{LocalPublisher, NotificationHub};
use crate::qr::{QrCodec, QrConfig};
use crate::repositories::{CourseRepository, EnrollmentRepository, MemoryRepository};
use crate::sessions::{SessionManager, ValidityPolicy};

pub const TEST_SECRET: &str = "classroom-test-secret";

/// One teacher owning one course, on a manual clock
pub struct Fixture {
    pub store: Arc<MemoryRepository>,
    pub clock: Arc<ManualClock>,
    pub codec: Arc<QrCodec>,
    pub hub: Arc<NotificationHub>,
    pub teacher: Uuid,
    pub course: Course,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryRepository::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap(),
        ));
        let codec = Arc::new(
            QrCodec::new(&QrConfig {
                secret: TEST_SECRET.to_string(),
            })
            .unwrap(),
        );
        let teacher = store.add_teacher("Ada Lovelace", "ada@example.edu").await;
        let course = store
            .create_course(&NewCourse {
                name: "Compiler Construction".to_string(),
                code: "CS401".to_string(),
                department: Some("Computer Science".to_string()),
                credits: 4,
                semester: "Fall".to_string(),
                teacher_id: teacher,
            })
            .await
            .unwrap();

        Self {
            store,
            clock,
            codec,
            hub: Arc::new(NotificationHub::new()),
            teacher,
            course,
        }
    }

    pub fn sessions(&self) -> SessionManager {
        SessionManager::new(
            self.store.clone(),
            self.codec.clone(),
            self.clock.clone(),
            ValidityPolicy {
                default_minutes: 10,
                max_minutes: 1440,
            },
        )
    }

    pub fn recorder(&self) -> AttendanceRecorder {
        AttendanceRecorder::new(
            self.store.clone(),
            self.codec.clone(),
            self.clock.clone(),
            Arc::new(LocalPublisher::new(self.hub.clone())),
        )
    }

    pub fn admin(&self) -> AdminService {
        AdminService::new(self.store.clone(), self.clock.clone())
    }

    /// A student actively enrolled in the fixture course
    pub async fn enrolled_student(&self, name: &str, roll_number: &str) -> Student {
        let email = format!("{}@example.edu", name.to_lowercase());
        let student = self.store.add_student(name, &email, roll_number).await;
        self.store
            .create_enrollment(&NewEnrollment {
                student_id: student.id,
                course_id: self.course.id,
                semester: self.course.semester.clone(),
                academic_year: "2025-2026".to_string(),
                enrolled_at: self.clock.now(),
            })
            .await
            .unwrap();
        student
    }
}
