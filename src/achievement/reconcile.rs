//! Cross-store consistency checks
//!
//! Document and reference writes are not atomic. When the second write of a
//! transition fails the two stores disagree; this module is the read path that
//! finds those pairs. Nothing here repairs data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::status::AchievementStatus;
use crate::store::{bounded, AchievementFilter, AchievementStore, ReferenceStore};
use crate::types::{AccoladeError, Result};

/// Status of one achievement as each store sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub achievement_id: String,
    pub document_status: Option<AchievementStatus>,
    pub reference_status: Option<AchievementStatus>,
    pub consistent: bool,
}

impl ConsistencyReport {
    fn new(
        achievement_id: String,
        document_status: Option<AchievementStatus>,
        reference_status: Option<AchievementStatus>,
    ) -> Self {
        let consistent = matches!(
            (document_status, reference_status),
            (Some(d), Some(r)) if d == r
        );
        Self {
            achievement_id,
            document_status,
            reference_status,
            consistent,
        }
    }
}

/// Compares document and reference statuses
pub struct Reconciler {
    documents: Arc<dyn AchievementStore>,
    references: Arc<dyn ReferenceStore>,
    store_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        documents: Arc<dyn AchievementStore>,
        references: Arc<dyn ReferenceStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            documents,
            references,
            store_timeout,
        }
    }

    /// Compare both stores for one achievement id
    pub async fn check(&self, id: &str) -> Result<ConsistencyReport> {
        let document = bounded(self.store_timeout, "get achievement", self.documents.get(id)).await?;
        let reference = bounded(self.store_timeout, "get reference", self.references.get(id)).await?;

        if document.is_none() && reference.is_none() {
            return Err(AccoladeError::NotFound(format!("achievement {id}")));
        }
        Ok(ConsistencyReport::new(
            id.to_string(),
            document.map(|d| d.status),
            reference.map(|r| r.status),
        ))
    }

    /// Every mismatched pair, including documents without a reference and
    /// references whose document is gone
    pub async fn scan(&self) -> Result<Vec<ConsistencyReport>> {
        let documents = bounded(
            self.store_timeout,
            "list achievements",
            self.documents.list(&AchievementFilter::default()),
        )
        .await?;
        let references = bounded(self.store_timeout, "list references", self.references.list()).await?;

        let mut by_id: HashMap<String, AchievementStatus> = references
            .into_iter()
            .map(|r| (r.mongo_achievement_id, r.status))
            .collect();

        let mut mismatches = Vec::new();
        for doc in documents {
            let reference_status = by_id.remove(&doc.id);
            let report = ConsistencyReport::new(doc.id, Some(doc.status), reference_status);
            if !report.consistent {
                mismatches.push(report);
            }
        }
        for (id, status) in by_id {
            mismatches.push(ConsistencyReport::new(id, None, Some(status)));
        }

        mismatches.sort_by(|a, b| a.achievement_id.cmp(&b.achievement_id));
        Ok(mismatches)
    }
}

/// Run `scan` every `interval` and log what it finds
pub fn spawn_reconcile_task(reconciler: Arc<Reconciler>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match reconciler.scan().await {
                Ok(mismatches) if mismatches.is_empty() => {
                    debug!("Reconcile scan: stores agree");
                }
                Ok(mismatches) => {
                    for m in &mismatches {
                        error!(
                            achievement_id = %m.achievement_id,
                            document_status = ?m.document_status,
                            reference_status = ?m.reference_status,
                            "Inconsistent achievement"
                        );
                    }
                    warn!("Reconcile scan: {} inconsistent achievements", mismatches.len());
                }
                Err(e) => warn!("Reconcile scan failed: {}", e),
            }
        }
    });
    info!("Reconcile task started (every {}s)", interval.as_secs());
}
