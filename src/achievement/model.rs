//! Achievement domain types
//!
//! These are the store-neutral shapes the coordinator works with. The MongoDB
//! and SQLite adapters convert to and from their own row/document types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::status::AchievementStatus;
use crate::types::AccoladeError;

const MAX_TITLE_LEN: usize = 200;
const DOCUMENT_ID_LEN: usize = 24;
const MAX_TAGS: usize = 20;

/// Achievement content plus its workflow status (document store)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    /// Store-assigned identifier (24 hex characters)
    pub id: String,
    /// Owning student's student number (not the account id)
    pub student_id: String,
    pub achievement_type: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub points: i32,
    pub status: AchievementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Uploaded evidence file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Workflow and audit record (relational store)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AchievementReference {
    pub id: Uuid,
    /// Owning student's internal identifier
    pub student_id: Uuid,
    /// Achievement document id, stored by value
    pub mongo_achievement_id: String,
    pub status: AchievementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit fields written together with a reference status change
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceStamp {
    Submitted { at: DateTime<Utc> },
    Verified { at: DateTime<Utc>, by: Uuid },
    Rejected { at: DateTime<Utc>, note: String },
    Deleted { at: DateTime<Utc> },
}

impl ReferenceStamp {
    pub fn status(&self) -> AchievementStatus {
        match self {
            ReferenceStamp::Submitted { .. } => AchievementStatus::Submitted,
            ReferenceStamp::Verified { .. } => AchievementStatus::Verified,
            ReferenceStamp::Rejected { .. } => AchievementStatus::Rejected,
            ReferenceStamp::Deleted { .. } => AchievementStatus::Deleted,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ReferenceStamp::Submitted { at }
            | ReferenceStamp::Verified { at, .. }
            | ReferenceStamp::Rejected { at, .. }
            | ReferenceStamp::Deleted { at } => *at,
        }
    }

    /// Apply the stamp to an in-memory reference
    pub fn apply(&self, reference: &mut AchievementReference) {
        reference.status = self.status();
        reference.updated_at = self.at();
        match self {
            ReferenceStamp::Submitted { at } => reference.submitted_at = Some(*at),
            ReferenceStamp::Verified { at, by } => {
                reference.verified_at = Some(*at);
                reference.verified_by = Some(*by);
            }
            ReferenceStamp::Rejected { at, note } => {
                reference.verified_at = Some(*at);
                reference.rejection_note = Some(note.clone());
            }
            ReferenceStamp::Deleted { .. } => {}
        }
    }
}

/// Student profile as seen by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Human-readable student number, e.g. "20221030001"
    pub student_id: String,
    pub program_study: String,
    pub academic_year: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisor_id: Option<Uuid>,
}

/// Content supplied when creating an achievement
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewAchievement {
    pub achievement_type: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewAchievement {
    pub fn validate(&self) -> Result<(), AccoladeError> {
        if self.achievement_type.trim().is_empty() {
            return Err(AccoladeError::Validation("achievementType is required".into()));
        }
        validate_title(&self.title)?;
        validate_tags(&self.tags)
    }
}

/// Partial content update; absent fields are left untouched
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AchievementPatch {
    #[serde(default)]
    pub achievement_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub details: Option<Map<String, Value>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl AchievementPatch {
    pub fn is_empty(&self) -> bool {
        self.achievement_type.is_none()
            && self.title.is_none()
            && self.description.is_none()
            && self.details.is_none()
            && self.tags.is_none()
    }

    pub fn validate(&self) -> Result<(), AccoladeError> {
        if self.is_empty() {
            return Err(AccoladeError::Validation("no fields to update".into()));
        }
        if let Some(kind) = &self.achievement_type {
            if kind.trim().is_empty() {
                return Err(AccoladeError::Validation("achievementType cannot be empty".into()));
            }
        }
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(tags) = &self.tags {
            validate_tags(tags)?;
        }
        Ok(())
    }

    /// Apply the patch in memory, stamping `updated_at`
    pub fn apply(&self, achievement: &mut Achievement, now: DateTime<Utc>) {
        if let Some(kind) = &self.achievement_type {
            achievement.achievement_type = kind.clone();
        }
        if let Some(title) = &self.title {
            achievement.title = title.clone();
        }
        if let Some(description) = &self.description {
            achievement.description = description.clone();
        }
        if let Some(details) = &self.details {
            achievement.details = details.clone();
        }
        if let Some(tags) = &self.tags {
            achievement.tags = tags.clone();
        }
        achievement.updated_at = now;
    }
}

/// Document ids are 24 lowercase/uppercase hex characters
pub fn is_document_id(id: &str) -> bool {
    id.len() == DOCUMENT_ID_LEN && id.chars().all(|c| c.is_ascii_hexdigit())
}

fn validate_title(title: &str) -> Result<(), AccoladeError> {
    if title.trim().is_empty() {
        return Err(AccoladeError::Validation("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AccoladeError::Validation(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_tags(tags: &[String]) -> Result<(), AccoladeError> {
    if tags.len() > MAX_TAGS {
        return Err(AccoladeError::Validation(format!("at most {MAX_TAGS} tags allowed")));
    }
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(AccoladeError::Validation("tags cannot be empty".into()));
    }
    Ok(())
}

/// Document and reference returned together after create or a transition
#[derive(Debug, Clone, Serialize)]
pub struct AchievementRecord {
    pub achievement: Achievement,
    pub reference: AchievementReference,
}

/// Current status and audit stamps for one achievement
///
/// No append-only history is kept; this is the reference row as it stands.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub achievement_id: String,
    pub status: AchievementStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<AchievementReference> for StatusSnapshot {
    fn from(r: AchievementReference) -> Self {
        Self {
            achievement_id: r.mongo_achievement_id,
            status: r.status,
            created_at: r.created_at,
            submitted_at: r.submitted_at,
            verified_at: r.verified_at,
            verified_by: r.verified_by,
            rejection_note: r.rejection_note,
            updated_at: r.updated_at,
        }
    }
}
