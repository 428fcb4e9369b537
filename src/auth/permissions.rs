//! Permission set for achievement and account operations
//!
//! Permissions travel in tokens and in the `permissions` table as
//! `resource:action` strings. Inside the crate they are always `Permission`
//! values; an unknown string is a decoding error, not a silent deny.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Closed set of `resource:action` pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    AchievementCreate,
    AchievementRead,
    AchievementUpdate,
    AchievementDelete,
    AchievementVerify,
    UserManage,
    ReportRead,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::AchievementCreate,
        Permission::AchievementRead,
        Permission::AchievementUpdate,
        Permission::AchievementDelete,
        Permission::AchievementVerify,
        Permission::UserManage,
        Permission::ReportRead,
    ];

    pub fn resource(&self) -> &'static str {
        match self {
            Permission::AchievementCreate
            | Permission::AchievementRead
            | Permission::AchievementUpdate
            | Permission::AchievementDelete
            | Permission::AchievementVerify => "achievement",
            Permission::UserManage => "user",
            Permission::ReportRead => "report",
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Permission::AchievementCreate => "create",
            Permission::AchievementRead => "read",
            Permission::AchievementUpdate => "update",
            Permission::AchievementDelete => "delete",
            Permission::AchievementVerify => "verify",
            Permission::UserManage => "manage",
            Permission::ReportRead => "read",
        }
    }

    /// Parse from separate `resource` and `action` columns
    pub fn from_parts(resource: &str, action: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.resource() == resource && p.action() == action)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Permission::AchievementCreate => "Create own achievements",
            Permission::AchievementRead => "Read achievements",
            Permission::AchievementUpdate => "Edit and submit own achievements",
            Permission::AchievementDelete => "Delete own draft achievements",
            Permission::AchievementVerify => "Verify or reject submitted achievements",
            Permission::UserManage => "Manage users and inspect store consistency",
            Permission::ReportRead => "Read achievement reports",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource(), self.action())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed permission: {s}"))?;
        Self::from_parts(resource, action).ok_or_else(|| format!("unknown permission: {s}"))
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Set of permissions held by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(HashSet<Permission>);

impl PermissionSet {
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// True when at least one of `required` is held
    pub fn any_of(&self, required: &[Permission]) -> bool {
        required.iter().any(|p| self.0.contains(p))
    }

    /// Sorted, for stable token and response output
    pub fn to_vec(&self) -> Vec<Permission> {
        let mut perms: Vec<_> = self.0.iter().copied().collect();
        perms.sort();
        perms
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Seeded roles and their grants
pub mod roles {
    use super::Permission;

    pub const ADMIN: &str = "Admin";
    pub const STUDENT: &str = "Mahasiswa";
    pub const ADVISOR: &str = "Dosen Wali";

    pub fn grants(role: &str) -> &'static [Permission] {
        match role {
            ADMIN => &Permission::ALL,
            STUDENT => &[
                Permission::AchievementCreate,
                Permission::AchievementRead,
                Permission::AchievementUpdate,
                Permission::AchievementDelete,
            ],
            ADVISOR => &[
                Permission::AchievementRead,
                Permission::AchievementVerify,
                Permission::ReportRead,
            ],
            _ => &[],
        }
    }
}
