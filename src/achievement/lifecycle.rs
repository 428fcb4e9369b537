//! Achievement lifecycle coordinator
//!
//! Drives one achievement through `draft -> submitted -> verified | rejected`
//! (or `draft -> deleted`) while keeping the document store and the reference
//! store in step.
//!
//! ## Write protocol
//!
//! Every state-changing operation:
//!
//! 1. Loads the document and checks ownership, then the current status.
//! 2. Writes the document, guarded by the expected status.
//! 3. Writes the reference, guarded by the same expected status.
//!
//! A guard miss on step 2 means another request won the race and the caller
//! gets `InvalidState`. A failure on step 3 leaves the stores disagreeing and
//! is returned as `Inconsistency`; the reconciler reports it from then on.
//! Create compensates a failed reference insert by removing the document.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::attachments::{AttachmentStorage, AttachmentUpload};
use super::model::{
    Achievement, AchievementPatch, AchievementRecord, NewAchievement, ReferenceStamp,
    StatusSnapshot, Student,
};
use super::status::{AchievementStatus, Transition};
use crate::store::{bounded, AchievementFilter, AchievementStore, ReferenceStore, StudentDirectory};
use crate::types::{AccoladeError, Result};

/// Coordinates achievement writes across both stores
pub struct LifecycleCoordinator {
    documents: Arc<dyn AchievementStore>,
    references: Arc<dyn ReferenceStore>,
    students: Arc<dyn StudentDirectory>,
    attachments: Arc<AttachmentStorage>,
    store_timeout: Duration,
}

impl LifecycleCoordinator {
    pub fn new(
        documents: Arc<dyn AchievementStore>,
        references: Arc<dyn ReferenceStore>,
        students: Arc<dyn StudentDirectory>,
        attachments: Arc<AttachmentStorage>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            documents,
            references,
            students,
            attachments,
            store_timeout,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Student profile behind an account, if any
    pub async fn student_for(&self, account_id: Uuid) -> Result<Option<Student>> {
        bounded(
            self.store_timeout,
            "resolve student",
            self.students.resolve_by_account(account_id),
        )
        .await
    }

    /// Fetch one achievement
    pub async fn get(&self, id: &str) -> Result<Achievement> {
        self.load(id).await
    }

    /// List achievements matching `filter`, newest first
    pub async fn list(&self, filter: &AchievementFilter) -> Result<Vec<Achievement>> {
        bounded(self.store_timeout, "list achievements", self.documents.list(filter)).await
    }

    /// Current status and audit stamps from the reference row
    pub async fn status_history(&self, id: &str) -> Result<StatusSnapshot> {
        let reference = bounded(self.store_timeout, "get reference", self.references.get(id))
            .await?
            .ok_or_else(|| AccoladeError::NotFound(format!("achievement {id}")))?;
        Ok(reference.into())
    }

    // =========================================================================
    // Owner operations
    // =========================================================================

    /// Create a draft for the student behind `owner`
    pub async fn create(&self, owner: Uuid, content: NewAchievement) -> Result<AchievementRecord> {
        content.validate()?;
        let student = self
            .student_for(owner)
            .await?
            .ok_or_else(|| AccoladeError::NotFound("student profile not found for account".into()))?;

        let now = Utc::now();
        let draft = Achievement {
            id: String::new(),
            student_id: student.student_id.clone(),
            achievement_type: content.achievement_type,
            title: content.title,
            description: content.description,
            details: content.details,
            attachments: Vec::new(),
            tags: content.tags,
            points: 0,
            status: AchievementStatus::Draft,
            created_at: now,
            updated_at: now,
        };

        let achievement =
            bounded(self.store_timeout, "insert achievement", self.documents.insert(draft)).await?;

        let reference = match bounded(
            self.store_timeout,
            "insert reference",
            self.references.insert(student.id, &achievement.id),
        )
        .await
        {
            Ok(reference) => reference,
            Err(e) => {
                warn!(
                    achievement_id = %achievement.id,
                    error = %e,
                    "Reference insert failed, removing document"
                );
                return Err(self.compensate_create(&achievement.id, e).await);
            }
        };

        info!(
            achievement_id = %achievement.id,
            student = %student.student_id,
            "Achievement created"
        );
        Ok(AchievementRecord {
            achievement,
            reference,
        })
    }

    async fn compensate_create(&self, id: &str, cause: AccoladeError) -> AccoladeError {
        match bounded(self.store_timeout, "remove achievement", self.documents.remove(id)).await {
            Ok(_) => cause,
            Err(e) => {
                error!(
                    achievement_id = %id,
                    error = %e,
                    "Compensation failed, orphaned draft document left behind"
                );
                AccoladeError::Inconsistency {
                    achievement_id: id.to_string(),
                    document_status: Some(AchievementStatus::Draft),
                    reference_status: None,
                }
            }
        }
    }

    /// Replace content fields on the owner's draft
    pub async fn update(&self, id: &str, owner: Uuid, patch: AchievementPatch) -> Result<Achievement> {
        patch.validate()?;
        let (current, _) = self.load_owned(id, owner).await?;
        if !current.status.is_editable() {
            return Err(AccoladeError::InvalidState(format!(
                "achievement {id} is {}, only drafts can be edited",
                current.status
            )));
        }

        let updated = bounded(
            self.store_timeout,
            "update achievement",
            self.documents
                .update_content(id, AchievementStatus::Draft, &patch),
        )
        .await?;

        match updated {
            Some(achievement) => {
                debug!(achievement_id = %id, "Achievement content updated");
                Ok(achievement)
            }
            None => Err(self.lost_race(id, AchievementStatus::Draft).await),
        }
    }

    /// Soft-delete the owner's draft
    pub async fn delete(&self, id: &str, owner: Uuid) -> Result<AchievementRecord> {
        let (current, _) = self.load_owned(id, owner).await?;
        let stamp = ReferenceStamp::Deleted { at: Utc::now() };
        self.apply(current, Transition::Delete, stamp, owner).await
    }

    /// Hand the owner's draft over for verification
    pub async fn submit(&self, id: &str, owner: Uuid) -> Result<AchievementRecord> {
        let (current, _) = self.load_owned(id, owner).await?;
        let stamp = ReferenceStamp::Submitted { at: Utc::now() };
        self.apply(current, Transition::Submit, stamp, owner).await
    }

    /// Store an uploaded file and append it to the owner's achievement
    pub async fn add_attachment(
        &self,
        id: &str,
        owner: Uuid,
        upload: AttachmentUpload,
    ) -> Result<Achievement> {
        self.attachments.check(&upload)?;
        let (current, _) = self.load_owned(id, owner).await?;
        if current.status == AchievementStatus::Deleted {
            return Err(AccoladeError::InvalidState(format!(
                "achievement {id} is deleted"
            )));
        }

        let attachment = self.attachments.save(id, &upload).await?;
        let pushed = match bounded(
            self.store_timeout,
            "push attachment",
            self.documents.push_attachment(id, &attachment),
        )
        .await
        {
            Ok(pushed) => pushed,
            Err(e) => {
                self.attachments.discard(&attachment).await;
                return Err(e);
            }
        };
        if !pushed {
            self.attachments.discard(&attachment).await;
            return Err(AccoladeError::NotFound(format!("achievement {id}")));
        }

        info!(achievement_id = %id, file = %attachment.file_name, "Attachment added");
        self.load(id).await
    }

    // =========================================================================
    // Verifier operations
    // =========================================================================

    /// Accept a submitted achievement
    pub async fn verify(&self, id: &str, verifier: Uuid) -> Result<AchievementRecord> {
        let current = self.load(id).await?;
        let stamp = ReferenceStamp::Verified {
            at: Utc::now(),
            by: verifier,
        };
        self.apply(current, Transition::Verify, stamp, verifier).await
    }

    /// Turn down a submitted achievement with a note for the student
    pub async fn reject(&self, id: &str, verifier: Uuid, note: &str) -> Result<AchievementRecord> {
        let note = note.trim();
        if note.is_empty() {
            return Err(AccoladeError::Validation("rejection note is required".into()));
        }
        let current = self.load(id).await?;
        let stamp = ReferenceStamp::Rejected {
            at: Utc::now(),
            note: note.to_string(),
        };
        self.apply(current, Transition::Reject, stamp, verifier).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load(&self, id: &str) -> Result<Achievement> {
        bounded(self.store_timeout, "get achievement", self.documents.get(id))
            .await?
            .ok_or_else(|| AccoladeError::NotFound(format!("achievement {id}")))
    }

    /// Load and check that `owner` is the student the achievement belongs to
    async fn load_owned(&self, id: &str, owner: Uuid) -> Result<(Achievement, Student)> {
        let achievement = self.load(id).await?;
        let student = self
            .student_for(owner)
            .await?
            .ok_or_else(|| AccoladeError::Forbidden("caller has no student profile".into()))?;
        if student.student_id != achievement.student_id {
            return Err(AccoladeError::Forbidden(format!(
                "achievement {id} belongs to another student"
            )));
        }
        Ok((achievement, student))
    }

    /// Move both stores through `transition`, document first
    async fn apply(
        &self,
        current: Achievement,
        transition: Transition,
        stamp: ReferenceStamp,
        actor: Uuid,
    ) -> Result<AchievementRecord> {
        let id = current.id.clone();
        let from = transition.from_status();
        let to = transition.to_status();

        if current.status != from {
            return Err(AccoladeError::InvalidState(format!(
                "cannot {} achievement {id}: status is {}, expected {from}",
                transition.name(),
                current.status
            )));
        }

        // The returned reference is this row with the stamp applied; nothing is read after the writes
        let mut reference = bounded(self.store_timeout, "get reference", self.references.get(&id))
            .await?
            .ok_or_else(|| AccoladeError::Inconsistency {
                achievement_id: id.clone(),
                document_status: Some(current.status),
                reference_status: None,
            })?;

        let moved = bounded(
            self.store_timeout,
            "update achievement status",
            self.documents.transition(&id, from, to),
        )
        .await?;
        if !moved {
            return Err(self.lost_race(&id, from).await);
        }

        let reference_moved = bounded(
            self.store_timeout,
            "update reference status",
            self.references.transition(&id, from, &stamp),
        )
        .await;

        match reference_moved {
            Ok(true) => {}
            Ok(false) => return Err(self.partial_write(&id, to, "reference guard did not match").await),
            Err(e) => return Err(self.partial_write(&id, to, &e.to_string()).await),
        }

        stamp.apply(&mut reference);
        let mut achievement = current;
        achievement.status = to;
        achievement.updated_at = stamp.at();

        info!(
            achievement_id = %id,
            actor = %actor,
            transition = transition.name(),
            status = %to,
            "Achievement transitioned"
        );
        Ok(AchievementRecord {
            achievement,
            reference,
        })
    }

    /// Error for a guarded write that matched nothing
    async fn lost_race(&self, id: &str, expected: AchievementStatus) -> AccoladeError {
        let now = bounded(self.store_timeout, "get achievement", self.documents.get(id))
            .await
            .ok()
            .flatten();
        match now {
            Some(doc) => AccoladeError::InvalidState(format!(
                "achievement {id} is {}, expected {expected}",
                doc.status
            )),
            None => AccoladeError::NotFound(format!("achievement {id}")),
        }
    }

    /// Error for a document write whose reference write did not follow
    async fn partial_write(&self, id: &str, document_status: AchievementStatus, cause: &str) -> AccoladeError {
        let reference_status = bounded(self.store_timeout, "get reference", self.references.get(id))
            .await
            .ok()
            .flatten()
            .map(|r| r.status);
        error!(
            achievement_id = %id,
            document_status = %document_status,
            reference_status = ?reference_status,
            cause,
            "Reference write failed after document write"
        );
        AccoladeError::Inconsistency {
            achievement_id: id.to_string(),
            document_status: Some(document_status),
            reference_status,
        }
    }
}
