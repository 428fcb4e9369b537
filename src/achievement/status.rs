//! Achievement workflow status
//!
//! The same enumeration is written to the achievement document and to the
//! reference row. Both store adapters go through `as_str` / `FromStr`, so the
//! two stores can only ever hold one of these five spellings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an achievement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AchievementStatus {
    #[default]
    Draft,
    Submitted,
    Verified,
    Rejected,
    Deleted,
}

/// Operations that move an achievement between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Submit,
    Verify,
    Reject,
    Delete,
}

impl AchievementStatus {
    pub const ALL: [AchievementStatus; 5] = [
        AchievementStatus::Draft,
        AchievementStatus::Submitted,
        AchievementStatus::Verified,
        AchievementStatus::Rejected,
        AchievementStatus::Deleted,
    ];

    /// Storage spelling, identical in both stores
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementStatus::Draft => "draft",
            AchievementStatus::Submitted => "submitted",
            AchievementStatus::Verified => "verified",
            AchievementStatus::Rejected => "rejected",
            AchievementStatus::Deleted => "deleted",
        }
    }

    /// Content edits are only allowed while the owner still holds the draft
    pub fn is_editable(&self) -> bool {
        *self == AchievementStatus::Draft
    }
}

impl Transition {
    /// Status the achievement must be in for this transition
    pub fn from_status(&self) -> AchievementStatus {
        match self {
            Transition::Submit | Transition::Delete => AchievementStatus::Draft,
            Transition::Verify | Transition::Reject => AchievementStatus::Submitted,
        }
    }

    /// Status the achievement ends up in
    pub fn to_status(&self) -> AchievementStatus {
        match self {
            Transition::Submit => AchievementStatus::Submitted,
            Transition::Verify => AchievementStatus::Verified,
            Transition::Reject => AchievementStatus::Rejected,
            Transition::Delete => AchievementStatus::Deleted,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Submit => "submit",
            Transition::Verify => "verify",
            Transition::Reject => "reject",
            Transition::Delete => "delete",
        }
    }
}

impl fmt::Display for AchievementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AchievementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(AchievementStatus::Draft),
            "submitted" => Ok(AchievementStatus::Submitted),
            "verified" => Ok(AchievementStatus::Verified),
            "rejected" => Ok(AchievementStatus::Rejected),
            "deleted" => Ok(AchievementStatus::Deleted),
            other => Err(format!("unknown achievement status: {other}")),
        }
    }
}
