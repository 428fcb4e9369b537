//! SQLite-backed achievement reference store
//!
//! Every mutation is a single `UPDATE ... WHERE mongo_achievement_id = ? AND
//! status = ?` and reports whether a row matched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::achievement::{AchievementReference, AchievementStatus, ReferenceStamp};
use crate::db::sqlite::{uuid_column, RelationalDb};
use crate::store::ReferenceStore;
use crate::types::{AccoladeError, Result};

const SELECT_REFERENCE: &str = "SELECT id, student_id, mongo_achievement_id, status, submitted_at,
        verified_at, verified_by, rejection_note, created_at, updated_at
     FROM achievement_references";

/// Raw row; converted to the domain type outside the rusqlite closure
struct ReferenceRow {
    id: String,
    student_id: String,
    mongo_achievement_id: String,
    status: String,
    submitted_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    verified_by: Option<String>,
    rejection_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReferenceRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            student_id: row.get("student_id")?,
            mongo_achievement_id: row.get("mongo_achievement_id")?,
            status: row.get("status")?,
            submitted_at: row.get("submitted_at")?,
            verified_at: row.get("verified_at")?,
            verified_by: row.get("verified_by")?,
            rejection_note: row.get("rejection_note")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_reference(self) -> Result<AchievementReference> {
        let status: AchievementStatus = self.status.parse().map_err(AccoladeError::Internal)?;
        Ok(AchievementReference {
            id: uuid_column(self.id, "achievement_references.id")?,
            student_id: uuid_column(self.student_id, "achievement_references.student_id")?,
            mongo_achievement_id: self.mongo_achievement_id,
            status,
            submitted_at: self.submitted_at,
            verified_at: self.verified_at,
            verified_by: self
                .verified_by
                .map(|v| uuid_column(v, "achievement_references.verified_by"))
                .transpose()?,
            rejection_note: self.rejection_note,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Column values written for a stamp; `None` leaves the column as it was
struct StampColumns {
    status: &'static str,
    at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    verified_by: Option<String>,
    rejection_note: Option<String>,
}

impl From<&ReferenceStamp> for StampColumns {
    fn from(stamp: &ReferenceStamp) -> Self {
        let mut cols = StampColumns {
            status: stamp.status().as_str(),
            at: stamp.at(),
            submitted_at: None,
            verified_at: None,
            verified_by: None,
            rejection_note: None,
        };
        match stamp {
            ReferenceStamp::Submitted { at } => cols.submitted_at = Some(*at),
            ReferenceStamp::Verified { at, by } => {
                cols.verified_at = Some(*at);
                cols.verified_by = Some(by.to_string());
            }
            ReferenceStamp::Rejected { at, note } => {
                cols.verified_at = Some(*at);
                cols.rejection_note = Some(note.clone());
            }
            ReferenceStamp::Deleted { .. } => {}
        }
        cols
    }
}

pub struct SqliteReferenceStore {
    db: RelationalDb,
}

impl SqliteReferenceStore {
    pub fn new(db: RelationalDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReferenceStore for SqliteReferenceStore {
    async fn insert(&self, student_id: Uuid, achievement_id: &str) -> Result<AchievementReference> {
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

        let row = reference.clone();
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO achievement_references
                        (id, student_id, mongo_achievement_id, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        row.id.to_string(),
                        row.student_id.to_string(),
                        row.mongo_achievement_id,
                        row.status.as_str(),
                        row.created_at,
                        row.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(achievement_id = %achievement_id, "Inserted achievement reference");
        Ok(reference)
    }

    async fn get(&self, achievement_id: &str) -> Result<Option<AchievementReference>> {
        let id = achievement_id.to_string();
        let row = self
            .db
            .run(move |conn| {
                let sql = format!("{SELECT_REFERENCE} WHERE mongo_achievement_id = ?1");
                Ok(conn
                    .query_row(&sql, [id], ReferenceRow::from_row)
                    .optional()?)
            })
            .await?;
        row.map(ReferenceRow::into_reference).transpose()
    }

    async fn transition(
        &self,
        achievement_id: &str,
        from: AchievementStatus,
        stamp: &ReferenceStamp,
    ) -> Result<bool> {
        let id = achievement_id.to_string();
        let cols = StampColumns::from(stamp);
        let changed = self
            .db
            .run(move |conn| {
                Ok(conn.execute(
                    "UPDATE achievement_references SET
                        status = ?1,
                        updated_at = ?2,
                        submitted_at = COALESCE(?3, submitted_at),
                        verified_at = COALESCE(?4, verified_at),
                        verified_by = COALESCE(?5, verified_by),
                        rejection_note = COALESCE(?6, rejection_note)
                     WHERE mongo_achievement_id = ?7 AND status = ?8",
                    params![
                        cols.status,
                        cols.at,
                        cols.submitted_at,
                        cols.verified_at,
                        cols.verified_by,
                        cols.rejection_note,
                        id,
                        from.as_str(),
                    ],
                )?)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn list(&self) -> Result<Vec<AchievementReference>> {
        let rows = self
            .db
            .run(|conn| {
                let sql = format!("{SELECT_REFERENCE} ORDER BY created_at DESC");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], ReferenceRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(ReferenceRow::into_reference).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::accounts::tests::seed_student;

    const DOC: &str = "65f000000000000000000001";

    async fn store_with_reference() -> (SqliteReferenceStore, AchievementReference) {
        let db = RelationalDb::open_in_memory().unwrap();
        let student = seed_student(&db, "20221030001").await;
        let store = SqliteReferenceStore::new(db);
        let reference = store.insert(student.id, DOC).await.unwrap();
        (store, reference)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (store, inserted) = store_with_reference().await;
        let fetched = store.get(DOC).await.unwrap().unwrap();
        assert_eq!(fetched.id, inserted.id);
        assert_eq!(fetched.status, AchievementStatus::Draft);
        assert!(store.get("65f0000000000000000000ff").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_document_id_rejected() {
        let (store, inserted) = store_with_reference().await;
        let err = store.insert(inserted.student_id, DOC).await.unwrap_err();
        assert!(matches!(err, AccoladeError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_guarded_transition() {
        let (store, _) = store_with_reference().await;
        let submitted = ReferenceStamp::Submitted { at: Utc::now() };

        assert!(store.transition(DOC, AchievementStatus::Draft, &submitted).await.unwrap());
        assert!(!store.transition(DOC, AchievementStatus::Draft, &submitted).await.unwrap());

        let verifier = Uuid::new_v4();
        let verified = ReferenceStamp::Verified { at: Utc::now(), by: verifier };
        assert!(store.transition(DOC, AchievementStatus::Submitted, &verified).await.unwrap());

        let row = store.get(DOC).await.unwrap().unwrap();
        assert_eq!(row.status, AchievementStatus::Verified);
        assert_eq!(row.verified_by, Some(verifier));
        assert!(row.submitted_at.is_some());
        assert!(row.rejection_note.is_none());
    }

    #[tokio::test]
    async fn test_reject_keeps_verifier_empty() {
        let (store, _) = store_with_reference().await;
        store
            .transition(DOC, AchievementStatus::Draft, &ReferenceStamp::Submitted { at: Utc::now() })
            .await
            .unwrap();
        let rejected = ReferenceStamp::Rejected {
            at: Utc::now(),
            note: "missing proof".into(),
        };
        assert!(store.transition(DOC, AchievementStatus::Submitted, &rejected).await.unwrap());

        let row = store.get(DOC).await.unwrap().unwrap();
        assert_eq!(row.status, AchievementStatus::Rejected);
        assert_eq!(row.rejection_note.as_deref(), Some("missing proof"));
        assert!(row.verified_at.is_some());
        assert!(row.verified_by.is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
