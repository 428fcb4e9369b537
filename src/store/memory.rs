//! In-process store implementations
//!
//! Used when dev mode runs without MongoDB/SQLite, and by the coordinator
//! tests. Each store can be told to fail its writes so partial-failure paths
//! can be exercised without a real database outage.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{AchievementFilter, AchievementStore, ReferenceStore, StatusCounts, StudentDirectory};
use crate::achievement::{
    Achievement, AchievementPatch, AchievementReference, AchievementStatus, Attachment,
    ReferenceStamp, Student,
};
use crate::types::{AccoladeError, Result};

fn injected(store: &str) -> AccoladeError {
    AccoladeError::StoreUnavailable(format!("{store}: injected write failure"))
}

/// Achievement documents held in a concurrent map
#[derive(Default)]
pub struct MemoryAchievementStore {
    docs: DashMap<String, Achievement>,
    fail_writes: AtomicBool,
}

impl MemoryAchievementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StoreUnavailable`
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("achievement store"));
        }
        Ok(())
    }
}

#[async_trait]
impl AchievementStore for MemoryAchievementStore {
    async fn insert(&self, mut achievement: Achievement) -> Result<Achievement> {
        self.check_writable()?;
        achievement.id = ObjectId::new().to_hex();
        self.docs.insert(achievement.id.clone(), achievement.clone());
        Ok(achievement)
    }

    async fn get(&self, id: &str) -> Result<Option<Achievement>> {
        Ok(self.docs.get(id).map(|entry| entry.value().clone()))
    }

    async fn update_content(
        &self,
        id: &str,
        expected: AchievementStatus,
        patch: &AchievementPatch,
    ) -> Result<Option<Achievement>> {
        self.check_writable()?;
        match self.docs.get_mut(id) {
            Some(mut doc) if doc.status == expected => {
                patch.apply(&mut doc, Utc::now());
                Ok(Some(doc.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn transition(
        &self,
        id: &str,
        from: AchievementStatus,
        to: AchievementStatus,
    ) -> Result<bool> {
        self.check_writable()?;
        match self.docs.get_mut(id) {
            Some(mut doc) if doc.status == from => {
                doc.status = to;
                doc.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn push_attachment(&self, id: &str, attachment: &Attachment) -> Result<bool> {
        self.check_writable()?;
        match self.docs.get_mut(id) {
            Some(mut doc) => {
                doc.attachments.push(attachment.clone());
                doc.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        self.check_writable()?;
        Ok(self.docs.remove(id).is_some())
    }

    async fn list(&self, filter: &AchievementFilter) -> Result<Vec<Achievement>> {
        let mut items: Vec<Achievement> = self
            .docs
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn count_by_status(&self, student_id: Option<&str>) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for entry in self.docs.iter() {
            if student_id.map_or(true, |s| entry.student_id == s) {
                counts.add(entry.status, 1);
            }
        }
        Ok(counts)
    }
}

/// Reference rows keyed by achievement document id
#[derive(Default)]
pub struct MemoryReferenceStore {
    rows: DashMap<String, AchievementReference>,
    fail_writes: AtomicBool,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StoreUnavailable`
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferenceStore {
    async fn insert(&self, student_id: Uuid, achievement_id: &str) -> Result<AchievementReference> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("reference store"));
        }
        let now = Utc::now();
        let reference = AchievementReference {
            id: Uuid::new_v4(),
            student_id,
            mongo_achievement_id: achievement_id.to_string(),
            status: AchievementStatus::Draft,
            submitted_at: None,
            verified_at: None,
            verified_by: None,
            rejection_note: None,
            created_at: now,
            updated_at: now,
        };
        // One reference per document id
        match self.rows.entry(achievement_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AccoladeError::InvalidState(format!(
                "reference for {achievement_id} already exists"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(reference.clone());
                Ok(reference)
            }
        }
    }

    async fn get(&self, achievement_id: &str) -> Result<Option<AchievementReference>> {
        Ok(self.rows.get(achievement_id).map(|r| r.value().clone()))
    }

    async fn transition(
        &self,
        achievement_id: &str,
        from: AchievementStatus,
        stamp: &ReferenceStamp,
    ) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("reference store"));
        }
        match self.rows.get_mut(achievement_id) {
            Some(mut row) if row.status == from => {
                stamp.apply(&mut row);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<AchievementReference>> {
        Ok(self.rows.iter().map(|r| r.value().clone()).collect())
    }
}

/// Student profiles keyed by account id
#[derive(Default)]
pub struct MemoryStudentDirectory {
    by_account: DashMap<Uuid, Student>,
}

impl MemoryStudentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, student: Student) {
        self.by_account.insert(student.user_id, student);
    }
}

#[async_trait]
impl StudentDirectory for MemoryStudentDirectory {
    async fn resolve_by_account(&self, account_id: Uuid) -> Result<Option<Student>> {
        Ok(self.by_account.get(&account_id).map(|s| s.value().clone()))
    }

    async fn find_by_student_number(&self, student_number: &str) -> Result<Option<Student>> {
        Ok(self
            .by_account
            .iter()
            .find(|s| s.student_id == student_number)
            .map(|s| s.value().clone()))
    }

    async fn count_students(&self) -> Result<u64> {
        Ok(self.by_account.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(student: &str) -> Achievement {
        let now = Utc::now();
        Achievement {
            id: String::new(),
            student_id: student.into(),
            achievement_type: "competition".into(),
            title: "Debate finalist".into(),
            description: String::new(),
            details: Default::default(),
            attachments: vec![],
            tags: vec![],
            points: 0,
            status: AchievementStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_hex_object_id() {
        let store = MemoryAchievementStore::new();
        let created = store.insert(draft("S1")).await.unwrap();
        assert_eq!(created.id.len(), 24);
        assert!(created.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(store.get(&created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_guarded_transition_only_matches_expected_status() {
        let store = MemoryAchievementStore::new();
        let created = store.insert(draft("S1")).await.unwrap();

        assert!(store
            .transition(&created.id, AchievementStatus::Draft, AchievementStatus::Submitted)
            .await
            .unwrap());
        assert!(!store
            .transition(&created.id, AchievementStatus::Draft, AchievementStatus::Submitted)
            .await
            .unwrap());
        assert!(!store
            .transition("missing", AchievementStatus::Draft, AchievementStatus::Submitted)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = MemoryReferenceStore::new();
        let student = Uuid::new_v4();
        store.insert(student, "abc").await.unwrap();
        assert!(store.insert(student, "abc").await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryReferenceStore::new();
        store.fail_writes(true);
        let err = store.insert(Uuid::new_v4(), "abc").await.unwrap_err();
        assert!(matches!(err, AccoladeError::StoreUnavailable(_)));
        store.fail_writes(false);
        assert!(store.insert(Uuid::new_v4(), "abc").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemoryAchievementStore::new();
        let mut older = draft("S1");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        let older = store.insert(older).await.unwrap();
        let newer = store.insert(draft("S1")).await.unwrap();

        let listed = store.list(&AchievementFilter::owned_by("S1")).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
