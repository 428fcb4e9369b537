//! Common metadata for stored documents

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Creation and last-update timestamps
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

impl Metadata {
    pub fn at(created_at: DateTime, updated_at: DateTime) -> Self {
        Self {
            created_at: Some(created_at),
            updated_at: Some(updated_at),
        }
    }
}
