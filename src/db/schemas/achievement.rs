//! Achievement document schema
//!
//! Field names are camelCase in MongoDB. `status` is stored as the plain
//! lowercase string from `AchievementStatus::as_str` and parsed back on read.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::achievement::{Achievement, AchievementStatus, Attachment};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{AccoladeError, Result};

/// Collection name for achievements
pub const ACHIEVEMENT_COLLECTION: &str = "achievements";

/// Achievement document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Owning student's student number
    pub student_id: String,

    pub achievement_type: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Free-form, type-specific fields (competition level, organizer, ...)
    #[serde(default)]
    pub details: Document,

    #[serde(default)]
    pub attachments: Vec<AttachmentDoc>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub points: i32,

    pub status: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDoc {
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    pub uploaded_at: DateTime,
}

impl From<&Attachment> for AttachmentDoc {
    fn from(a: &Attachment) -> Self {
        Self {
            file_name: a.file_name.clone(),
            file_path: a.file_path.clone(),
            file_type: a.file_type.clone(),
            uploaded_at: DateTime::from_chrono(a.uploaded_at),
        }
    }
}

impl From<AttachmentDoc> for Attachment {
    fn from(a: AttachmentDoc) -> Self {
        Self {
            file_name: a.file_name,
            file_path: a.file_path,
            file_type: a.file_type,
            uploaded_at: a.uploaded_at.to_chrono(),
        }
    }
}

/// Encode a JSON object as a BSON document
pub fn details_to_bson(details: &Map<String, Value>) -> Result<Document> {
    Ok(bson::to_document(details)?)
}

impl AchievementDoc {
    /// Build a document for insert; the id is left for MongoDB to assign
    pub fn from_achievement(a: &Achievement) -> Result<Self> {
        Ok(Self {
            id: None,
            metadata: Metadata::at(
                DateTime::from_chrono(a.created_at),
                DateTime::from_chrono(a.updated_at),
            ),
            student_id: a.student_id.clone(),
            achievement_type: a.achievement_type.clone(),
            title: a.title.clone(),
            description: a.description.clone(),
            details: details_to_bson(&a.details)?,
            attachments: a.attachments.iter().map(AttachmentDoc::from).collect(),
            tags: a.tags.clone(),
            points: a.points,
            status: a.status.as_str().to_string(),
        })
    }

    /// Convert back to the domain type, rejecting unknown status strings
    pub fn into_achievement(self) -> Result<Achievement> {
        let id = self
            .id
            .ok_or_else(|| AccoladeError::Internal("achievement document without _id".into()))?;
        let status: AchievementStatus = self.status.parse().map_err(|e: String| {
            AccoladeError::Internal(format!("achievement {}: {e}", id.to_hex()))
        })?;
        let details: Map<String, Value> = bson::from_document(self.details).map_err(|e| {
            AccoladeError::Internal(format!("achievement {}: bad details: {e}", id.to_hex()))
        })?;
        let created_at = self
            .metadata
            .created_at
            .map(|d| d.to_chrono())
            .unwrap_or_else(|| id.timestamp().to_chrono());
        let updated_at = self
            .metadata
            .updated_at
            .map(|d| d.to_chrono())
            .unwrap_or(created_at);

        Ok(Achievement {
            id: id.to_hex(),
            student_id: self.student_id,
            achievement_type: self.achievement_type,
            title: self.title,
            description: self.description,
            details,
            attachments: self.attachments.into_iter().map(Attachment::from).collect(),
            tags: self.tags,
            points: self.points,
            status,
            created_at,
            updated_at,
        })
    }
}

impl IntoIndexes for AchievementDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Student listings, newest first
            (
                doc! { "studentId": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("student_created_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1 },
                Some(IndexOptions::builder().name("status_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for AchievementDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample() -> Achievement {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut details = Map::new();
        details.insert("level".into(), Value::String("national".into()));
        details.insert("rank".into(), Value::from(1));
        Achievement {
            id: String::new(),
            student_id: "20221030001".into(),
            achievement_type: "competition".into(),
            title: "Programming contest".into(),
            description: "ICPC regional".into(),
            details,
            attachments: vec![Attachment {
                file_name: "cert.pdf".into(),
                file_path: "uploads/x/1.pdf".into(),
                file_type: "application/pdf".into(),
                uploaded_at: at,
            }],
            tags: vec!["icpc".into()],
            points: 0,
            status: AchievementStatus::Submitted,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_field_names_and_status_spelling() {
        let doc = AchievementDoc::from_achievement(&sample()).unwrap();
        let raw = bson::to_document(&doc).unwrap();
        assert_eq!(raw.get_str("status").unwrap(), "submitted");
        assert_eq!(raw.get_str("studentId").unwrap(), "20221030001");
        assert!(raw.get("achievementType").is_some());
        assert!(raw.get("_id").is_none());
    }

    #[test]
    fn test_document_back_to_domain() {
        let source = sample();
        let mut doc = AchievementDoc::from_achievement(&source).unwrap();
        let oid = ObjectId::new();
        doc.id = Some(oid);

        let back = doc.into_achievement().unwrap();
        assert_eq!(back.id, oid.to_hex());
        assert_eq!(back.status, AchievementStatus::Submitted);
        assert_eq!(back.details.get("level"), Some(&Value::String("national".into())));
        assert_eq!(back.attachments, source.attachments);
        assert_eq!(back.created_at, source.created_at);
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        let mut doc = AchievementDoc::from_achievement(&sample()).unwrap();
        doc.id = Some(ObjectId::new());
        doc.status = "approved".into();
        assert!(matches!(doc.into_achievement(), Err(AccoladeError::Internal(_))));
    }
}
