//! Collaborator contracts used by the lifecycle coordinator
//!
//! The coordinator never touches MongoDB or SQLite directly. It talks to
//! these traits, which are implemented by:
//!
//! - `db::MongoAchievementStore` / `db::SqliteReferenceStore` /
//!   `db::SqliteStudentDirectory` in production
//! - `store::memory` when running in dev mode without databases, and in tests
//!
//! All status-changing methods are guarded by the expected current status and
//! report whether a row/document matched, so concurrent transitions on the
//! same achievement resolve to exactly one winner.

pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::achievement::{
    Achievement, AchievementPatch, AchievementReference, AchievementStatus, Attachment,
    ReferenceStamp, Student,
};
use crate::types::{AccoladeError, Result};

pub use memory::{MemoryAchievementStore, MemoryReferenceStore, MemoryStudentDirectory};

/// Run a store call under a deadline, tagging failures with `operation`
pub async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(|e| e.context(operation)),
        Err(_) => Err(AccoladeError::StoreUnavailable(format!(
            "{operation}: timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

/// Filter for listing achievements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AchievementFilter {
    /// Restrict to these student numbers (None = any owner)
    pub student_ids: Option<Vec<String>>,
    /// Restrict to these statuses (None = any status)
    pub statuses: Option<Vec<AchievementStatus>>,
}

impl AchievementFilter {
    pub fn owned_by(student_id: impl Into<String>) -> Self {
        Self {
            student_ids: Some(vec![student_id.into()]),
            statuses: None,
        }
    }

    pub fn with_status(status: AchievementStatus) -> Self {
        Self {
            student_ids: None,
            statuses: Some(vec![status]),
        }
    }

    pub fn matches(&self, achievement: &Achievement) -> bool {
        let owner_ok = self
            .student_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| *id == achievement.student_id));
        let status_ok = self
            .statuses
            .as_ref()
            .map_or(true, |statuses| statuses.contains(&achievement.status));
        owner_ok && status_ok
    }
}

/// Achievement counts grouped by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: u64,
    pub draft: u64,
    pub submitted: u64,
    pub verified: u64,
    pub rejected: u64,
    pub deleted: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: AchievementStatus, n: u64) {
        self.total += n;
        match status {
            AchievementStatus::Draft => self.draft += n,
            AchievementStatus::Submitted => self.submitted += n,
            AchievementStatus::Verified => self.verified += n,
            AchievementStatus::Rejected => self.rejected += n,
            AchievementStatus::Deleted => self.deleted += n,
        }
    }
}

/// Achievement document store
#[async_trait]
pub trait AchievementStore: Send + Sync {
    /// Insert a new document; the store assigns and returns the id
    async fn insert(&self, achievement: Achievement) -> Result<Achievement>;

    /// Fetch by id; `Ok(None)` when absent
    async fn get(&self, id: &str) -> Result<Option<Achievement>>;

    /// Apply a content patch if the document is still in `expected` status.
    /// Returns the updated document, or `None` when nothing matched.
    async fn update_content(
        &self,
        id: &str,
        expected: AchievementStatus,
        patch: &AchievementPatch,
    ) -> Result<Option<Achievement>>;

    /// Move `from` -> `to`; returns false when the document was not in `from`
    async fn transition(
        &self,
        id: &str,
        from: AchievementStatus,
        to: AchievementStatus,
    ) -> Result<bool>;

    /// Append an attachment; returns false when the document does not exist
    async fn push_attachment(&self, id: &str, attachment: &Attachment) -> Result<bool>;

    /// Hard-remove a document. Only used to compensate a failed create.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// List matching documents, newest first
    async fn list(&self, filter: &AchievementFilter) -> Result<Vec<Achievement>>;

    /// Count documents by status, optionally for one student number
    async fn count_by_status(&self, student_id: Option<&str>) -> Result<StatusCounts>;
}

/// Achievement reference store
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Insert the draft reference for a newly created document
    async fn insert(&self, student_id: Uuid, achievement_id: &str) -> Result<AchievementReference>;

    /// Fetch by achievement document id; `Ok(None)` when absent
    async fn get(&self, achievement_id: &str) -> Result<Option<AchievementReference>>;

    /// Apply `stamp` if the reference is currently in `from`.
    /// Returns false when the guard did not match.
    async fn transition(
        &self,
        achievement_id: &str,
        from: AchievementStatus,
        stamp: &ReferenceStamp,
    ) -> Result<bool>;

    /// Every reference, for reconciliation scans
    async fn list(&self) -> Result<Vec<AchievementReference>>;
}

/// Account id -> student profile resolution
#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn resolve_by_account(&self, account_id: Uuid) -> Result<Option<Student>>;

    async fn find_by_student_number(&self, student_number: &str) -> Result<Option<Student>>;

    async fn count_students(&self) -> Result<u64>;
}
