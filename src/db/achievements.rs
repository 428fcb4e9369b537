//! MongoDB-backed achievement document store

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use tracing::debug;

use crate::achievement::{Achievement, AchievementPatch, AchievementStatus, Attachment};
use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{details_to_bson, AchievementDoc, AttachmentDoc, ACHIEVEMENT_COLLECTION};
use crate::store::{AchievementFilter, AchievementStore, StatusCounts};
use crate::types::{AccoladeError, Result};

pub struct MongoAchievementStore {
    collection: MongoCollection<AchievementDoc>,
}

impl MongoAchievementStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        let collection = client.collection(ACHIEVEMENT_COLLECTION).await?;
        Ok(Self { collection })
    }
}

/// Ids that are not valid ObjectIds can never match a document
fn parse_id(id: &str) -> Option<ObjectId> {
    ObjectId::parse_str(id).ok()
}

fn patch_to_set(patch: &AchievementPatch) -> Result<Document> {
    let mut set = Document::new();
    if let Some(kind) = &patch.achievement_type {
        set.insert("achievementType", kind.as_str());
    }
    if let Some(title) = &patch.title {
        set.insert("title", title.as_str());
    }
    if let Some(description) = &patch.description {
        set.insert("description", description.as_str());
    }
    if let Some(details) = &patch.details {
        set.insert("details", details_to_bson(details)?);
    }
    if let Some(tags) = &patch.tags {
        set.insert("tags", tags.clone());
    }
    Ok(set)
}

fn filter_to_query(filter: &AchievementFilter) -> Document {
    let mut query = Document::new();
    if let Some(ids) = &filter.student_ids {
        query.insert("studentId", doc! { "$in": ids.clone() });
    }
    if let Some(statuses) = &filter.statuses {
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        query.insert("status", doc! { "$in": names });
    }
    query
}

fn count_value(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(n)) => (*n).max(0) as u64,
        Some(Bson::Int64(n)) => (*n).max(0) as u64,
        _ => 0,
    }
}

#[async_trait]
impl AchievementStore for MongoAchievementStore {
    async fn insert(&self, mut achievement: Achievement) -> Result<Achievement> {
        let doc = AchievementDoc::from_achievement(&achievement)?;
        let id = self.collection.insert_one(doc).await?;
        achievement.id = id.to_hex();
        debug!(achievement_id = %achievement.id, "Inserted achievement document");
        Ok(achievement)
    }

    async fn get(&self, id: &str) -> Result<Option<Achievement>> {
        let Some(oid) = parse_id(id) else {
            return Ok(None);
        };
        self.collection
            .find_one(doc! { "_id": oid })
            .await?
            .map(AchievementDoc::into_achievement)
            .transpose()
    }

    async fn update_content(
        &self,
        id: &str,
        expected: AchievementStatus,
        patch: &AchievementPatch,
    ) -> Result<Option<Achievement>> {
        let Some(oid) = parse_id(id) else {
            return Ok(None);
        };
        let set = patch_to_set(patch)?;
        self.collection
            .find_one_and_update(
                doc! { "_id": oid, "status": expected.as_str() },
                doc! { "$set": set },
            )
            .await?
            .map(AchievementDoc::into_achievement)
            .transpose()
    }

    async fn transition(
        &self,
        id: &str,
        from: AchievementStatus,
        to: AchievementStatus,
    ) -> Result<bool> {
        let Some(oid) = parse_id(id) else {
            return Ok(false);
        };
        let result = self
            .collection
            .update_one(
                doc! { "_id": oid, "status": from.as_str() },
                doc! { "$set": { "status": to.as_str() } },
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn push_attachment(&self, id: &str, attachment: &Attachment) -> Result<bool> {
        let Some(oid) = parse_id(id) else {
            return Ok(false);
        };
        let entry = bson::to_bson(&AttachmentDoc::from(attachment))?;
        let result = self
            .collection
            .update_one(
                doc! { "_id": oid },
                doc! { "$push": { "attachments": entry } },
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let Some(oid) = parse_id(id) else {
            return Ok(false);
        };
        self.collection.delete_one(doc! { "_id": oid }).await
    }

    async fn list(&self, filter: &AchievementFilter) -> Result<Vec<Achievement>> {
        self.collection
            .find_many(filter_to_query(filter), doc! { "metadata.created_at": -1 })
            .await?
            .into_iter()
            .map(AchievementDoc::into_achievement)
            .collect()
    }

    async fn count_by_status(&self, student_id: Option<&str>) -> Result<StatusCounts> {
        let mut pipeline = Vec::new();
        if let Some(student) = student_id {
            pipeline.push(doc! { "$match": { "studentId": student } });
        }
        pipeline.push(doc! { "$group": { "_id": "$status", "count": { "$sum": 1 } } });

        let mut counts = StatusCounts::default();
        for group in self.collection.aggregate(pipeline).await? {
            let name = group
                .get_str("_id")
                .map_err(|e| AccoladeError::Internal(format!("bad status group: {e}")))?;
            let status: AchievementStatus = name.parse().map_err(AccoladeError::Internal)?;
            counts.add(status, count_value(group.get("count")));
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_query_shape() {
        let mut filter = AchievementFilter::owned_by("20221030001");
        filter.statuses = Some(vec![AchievementStatus::Draft, AchievementStatus::Submitted]);
        let query = filter_to_query(&filter);

        let students = query.get_document("studentId").unwrap().get_array("$in").unwrap();
        assert_eq!(students.len(), 1);
        let statuses = query.get_document("status").unwrap().get_array("$in").unwrap();
        assert_eq!(
            statuses,
            &vec![Bson::String("draft".into()), Bson::String("submitted".into())]
        );
        assert!(filter_to_query(&AchievementFilter::default()).is_empty());
    }

    #[test]
    fn test_patch_only_sets_present_fields() {
        let patch = AchievementPatch {
            title: Some("New title".into()),
            ..Default::default()
        };
        let set = patch_to_set(&patch).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get_str("title").unwrap(), "New title");
        assert!(set.get("status").is_none());
    }

    #[test]
    fn test_invalid_ids_never_match() {
        assert!(parse_id("not-an-object-id").is_none());
        assert!(parse_id("65f000000000000000000001").is_some());
    }

    #[test]
    fn test_count_value_accepts_both_int_widths() {
        assert_eq!(count_value(Some(&Bson::Int32(3))), 3);
        assert_eq!(count_value(Some(&Bson::Int64(7))), 7);
        assert_eq!(count_value(None), 0);
    }
}
