//! MongoDB client and collection wrapper

use bson::{doc, oid::ObjectId, DateTime, Document};
use futures_util::StreamExt;
use mongodb::{
    options::{IndexOptions, ReturnDocument, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::db::schemas::Metadata;
use crate::types::{AccoladeError, Result};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and ping; fails fast when the server is unreachable
    pub async fn new(uri: &str, db_name: &str, timeout_ms: u64) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        let separator = if uri.contains('?') { '&' } else { '?' };
        let timeout_uri = format!(
            "{uri}{separator}serverSelectionTimeoutMS={timeout_ms}&connectTimeoutMS={timeout_ms}"
        );

        let client = Client::with_uri_str(&timeout_uri).await.map_err(|e| {
            AccoladeError::StoreUnavailable(format!("failed to connect to MongoDB: {e}"))
        })?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AccoladeError::StoreUnavailable(format!("MongoDB ping failed: {e}")))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection, creating its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };
        mongo_collection.apply_indexes().await?;
        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();
        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner.create_indexes(indices).await.map_err(|e| {
            AccoladeError::StoreUnavailable(format!("failed to create indexes: {e}"))
        })?;
        Ok(())
    }

    /// Insert a document, filling in any missing metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId> {
        let metadata = item.mut_metadata();
        let now = DateTime::now();
        metadata.created_at.get_or_insert(now);
        metadata.updated_at.get_or_insert(now);

        let result = self.inner.insert_one(item).await?;
        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| AccoladeError::Internal("inserted id is not an ObjectId".into()))
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        Ok(self.inner.find_one(filter).await?)
    }

    /// Find matching documents in `sort` order, skipping undecodable ones
    pub async fn find_many(&self, filter: Document, sort: Document) -> Result<Vec<T>> {
        let cursor = self.inner.find(filter).sort(sort).await?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Update one document, stamping `metadata.updated_at`
    pub async fn update_one(&self, filter: Document, mut update: Document) -> Result<UpdateResult> {
        stamp_updated(&mut update);
        Ok(self
            .inner
            .update_one(filter, UpdateModifications::Document(update))
            .await?)
    }

    /// Update one document and return it as written, or `None` if nothing matched
    pub async fn find_one_and_update(&self, filter: Document, mut update: Document) -> Result<Option<T>> {
        stamp_updated(&mut update);
        Ok(self
            .inner
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    /// Hard delete; returns whether a document was removed
    pub async fn delete_one(&self, filter: Document) -> Result<bool> {
        let result = self.inner.delete_one(filter).await?;
        Ok(result.deleted_count == 1)
    }

    /// Run an aggregation pipeline, returning raw documents
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let mut cursor = self.inner.aggregate(pipeline).await?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.next().await {
            out.push(doc?);
        }
        Ok(out)
    }
}

fn stamp_updated(update: &mut Document) {
    let now = DateTime::now();
    match update.get_document_mut("$set") {
        Ok(set) => {
            set.insert("metadata.updated_at", now);
        }
        Err(_) => {
            update.insert("$set", doc! { "metadata.updated_at": now });
        }
    }
}
