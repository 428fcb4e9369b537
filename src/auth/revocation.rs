//! Token revocation
//!
//! Logout and refresh put the presented token on a revocation list until its
//! natural expiry. The gate consults the list on every request.
//!
//! `MemoryRevocationList` is process-local. Running more than one instance
//! needs a shared implementation of `RevocationList`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::{debug, info};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Revocation-checking collaborator
pub trait RevocationList: Send + Sync {
    /// True while `token` is revoked and not yet past its expiry
    fn is_revoked(&self, token: &str) -> bool;

    /// Revoke `token` until `expires_at` (Unix seconds)
    fn revoke(&self, token: &str, expires_at: u64);
}

/// Token -> expiry map with lazy eviction on lookup
#[derive(Default)]
pub struct MemoryRevocationList {
    entries: DashMap<String, u64>,
}

impl MemoryRevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry past its expiry, returning how many were removed
    pub fn cleanup(&self) -> usize {
        let now = unix_now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

impl RevocationList for MemoryRevocationList {
    fn is_revoked(&self, token: &str) -> bool {
        let now = unix_now();
        match self.entries.get(token).map(|e| *e.value()) {
            Some(expires_at) if expires_at > now => true,
            Some(_) => {
                self.entries.remove(token);
                false
            }
            None => false,
        }
    }

    fn revoke(&self, token: &str, expires_at: u64) {
        self.entries.insert(token.to_string(), expires_at);
    }
}

/// Periodically evict expired entries
pub fn spawn_cleanup_task(list: Arc<MemoryRevocationList>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = list.cleanup();
            if removed > 0 {
                debug!("Revocation cleanup: removed {} expired tokens", removed);
            }
        }
    });
    info!("Revocation cleanup task started");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoked_until_expiry() {
        let list = MemoryRevocationList::new();
        assert!(!list.is_revoked("t1"));

        list.revoke("t1", unix_now() + 60);
        assert!(list.is_revoked("t1"));
        assert!(!list.is_revoked("t2"));
    }

    #[test]
    fn test_expired_entries_evicted_on_lookup() {
        let list = MemoryRevocationList::new();
        list.revoke("old", unix_now().saturating_sub(1));
        assert_eq!(list.len(), 1);

        assert!(!list.is_revoked("old"));
        assert!(list.is_empty());
    }

    #[test]
    fn test_cleanup() {
        let list = MemoryRevocationList::new();
        list.revoke("old", unix_now().saturating_sub(10));
        list.revoke("live", unix_now() + 600);

        assert_eq!(list.cleanup(), 1);
        assert!(list.is_revoked("live"));
    }
}
