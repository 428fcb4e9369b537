//! Achievement statistics
//!
//! Read-only aggregation over the document store. Soft-deleted achievements
//! are excluded from every total.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::achievement::Student;
use crate::store::{bounded, AchievementStore, StatusCounts, StudentDirectory};
use crate::types::{AccoladeError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatistics {
    pub total_students: u64,
    pub total_achievements: u64,
    pub draft_count: u64,
    pub submitted_count: u64,
    pub verified_count: u64,
    pub rejected_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    /// Account behind the profile, for name lookup
    #[serde(skip)]
    pub user_id: Uuid,
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub program_study: String,
    pub academic_year: String,
    pub total_achievements: u64,
    pub draft_count: u64,
    pub submitted_count: u64,
    pub verified_count: u64,
    pub rejected_count: u64,
}

impl StudentReport {
    fn new(student: Student, counts: StatusCounts) -> Self {
        Self {
            user_id: student.user_id,
            student_id: student.student_id,
            name: None,
            program_study: student.program_study,
            academic_year: student.academic_year,
            total_achievements: live_total(&counts),
            draft_count: counts.draft,
            submitted_count: counts.submitted,
            verified_count: counts.verified,
            rejected_count: counts.rejected,
        }
    }
}

fn live_total(counts: &StatusCounts) -> u64 {
    counts.total.saturating_sub(counts.deleted)
}

pub struct ReportService {
    documents: Arc<dyn AchievementStore>,
    students: Arc<dyn StudentDirectory>,
    store_timeout: Duration,
}

impl ReportService {
    pub fn new(
        documents: Arc<dyn AchievementStore>,
        students: Arc<dyn StudentDirectory>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            documents,
            students,
            store_timeout,
        }
    }

    pub async fn statistics(&self) -> Result<ReportStatistics> {
        let total_students =
            bounded(self.store_timeout, "count students", self.students.count_students()).await?;
        let counts = bounded(
            self.store_timeout,
            "count achievements",
            self.documents.count_by_status(None),
        )
        .await?;

        Ok(ReportStatistics {
            total_students,
            total_achievements: live_total(&counts),
            draft_count: counts.draft,
            submitted_count: counts.submitted,
            verified_count: counts.verified,
            rejected_count: counts.rejected,
        })
    }

    /// Counts for one student, looked up by student number
    pub async fn student(&self, student_number: &str) -> Result<StudentReport> {
        let student = bounded(
            self.store_timeout,
            "find student",
            self.students.find_by_student_number(student_number),
        )
        .await?
        .ok_or_else(|| AccoladeError::NotFound(format!("student {student_number}")))?;

        let counts = bounded(
            self.store_timeout,
            "count achievements",
            self.documents.count_by_status(Some(student_number)),
        )
        .await?;
        Ok(StudentReport::new(student, counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievement::{Achievement, AchievementStatus};
    use crate::store::{MemoryAchievementStore, MemoryStudentDirectory};
    use chrono::Utc;

    fn student(number: &str) -> Student {
        Student {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            student_id: number.into(),
            program_study: "Informatics".into(),
            academic_year: "2022".into(),
            advisor_id: None,
        }
    }

    fn achievement(owner: &str, status: AchievementStatus) -> Achievement {
        let now = Utc::now();
        Achievement {
            id: String::new(),
            student_id: owner.into(),
            achievement_type: "competition".into(),
            title: "Hackathon".into(),
            description: String::new(),
            details: Default::default(),
            attachments: vec![],
            tags: vec![],
            points: 0,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    async fn service() -> ReportService {
        let documents = Arc::new(MemoryAchievementStore::new());
        let students = Arc::new(MemoryStudentDirectory::new());
        students.add(student("20221030001"));
        students.add(student("20221030002"));

        for (owner, status) in [
            ("20221030001", AchievementStatus::Verified),
            ("20221030001", AchievementStatus::Submitted),
            ("20221030001", AchievementStatus::Deleted),
            ("20221030002", AchievementStatus::Rejected),
            ("20221030002", AchievementStatus::Draft),
        ] {
            documents.insert(achievement(owner, status)).await.unwrap();
        }
        ReportService::new(documents, students, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_statistics_exclude_deleted() {
        let stats = service().await.statistics().await.unwrap();
        assert_eq!(stats.total_students, 2);
        assert_eq!(stats.total_achievements, 4);
        assert_eq!(stats.verified_count, 1);
        assert_eq!(stats.submitted_count, 1);
        assert_eq!(stats.rejected_count, 1);
        assert_eq!(stats.draft_count, 1);
    }

    #[tokio::test]
    async fn test_student_report() {
        let reports = service().await;
        let report = reports.student("20221030001").await.unwrap();
        assert_eq!(report.total_achievements, 2);
        assert_eq!(report.verified_count, 1);
        assert_eq!(report.rejected_count, 0);

        assert!(matches!(
            reports.student("19990000000").await,
            Err(AccoladeError::NotFound(_))
        ));
    }
}
