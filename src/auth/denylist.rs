use crate::persistence::Store;
use dashmap::DashMap;
use std::sync::Arc;

/// Revoked token ids with per-entry TTL. The in-memory map answers
/// lookups; every mutation is mirrored to the store so revocations
/// survive restarts and are visible to other instances sharing the
/// database.
pub struct RevocationList {
    entries: DashMap<String, i64>,
    store: Arc<Store>,
}

impl RevocationList {
    pub fn new(store: Arc<Store>) -> Self {
        let entries = DashMap::new();
        let now = chrono::Utc::now().timestamp();
        match store.load_revocations(now) {
            Ok(rows) => {
                for (jti, expires_at) in rows {
                    entries.insert(jti, expires_at);
                }
            }
            Err(e) => {
                tracing::error!("Failed to load revocation denylist: {}", e);
            }
        }
        Self { entries, store }
    }

    pub fn revoke(&self, jti: &str, expires_at: i64) {
        self.entries.insert(jti.to_string(), expires_at);
        if let Err(e) = self.store.insert_revocation(jti, expires_at) {
            tracing::error!("Failed to persist revocation for {}: {}", jti, e);
        }
    }

    pub fn contains(&self, jti: &str) -> bool {
        let now = chrono::Utc::now().timestamp();
        let live = match self.entries.get(jti) {
            Some(expires_at) => *expires_at > now,
            None => return false,
        };
        if !live {
            self.entries.remove(jti);
        }
        live
    }

    /// Drops entries whose tokens have outlived their own validity.
    pub fn purge_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        let purged = before - self.entries.len();
        if let Err(e) = self.store.purge_expired_revocations(now) {
            tracing::error!("Failed to purge persisted revocations: {}", e);
        }
        if purged > 0 {
            tracing::debug!("Purged {} expired revocation entries", purged);
        }
        purged
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
