use crate::auth::claims::{Claims, Keyring, TokenKind};
use crate::auth::denylist::RevocationList;
use crate::error::{AppResult, AuthError};
use crate::models::{AccountIdentity, Tier};
use crate::persistence::{LineageRow, Store};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// One login's chain of refresh rotations. `generation` only ever
/// moves forward; a refresh token carrying an older generation is a
/// replay by definition.
#[derive(Debug, Clone)]
struct Lineage {
    account_id: String,
    generation: i64,
    refresh_jti: String,
    access_jti: String,
    revoked: bool,
}

pub struct TokenAuthority {
    keyring: Keyring,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
    lineages: DashMap<String, Lineage>,
    denylist: RevocationList,
    store: Arc<Store>,
}

impl TokenAuthority {
    pub fn new(
        secret: &[u8],
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
        store: Arc<Store>,
    ) -> Self {
        let lineages = DashMap::new();
        match store.load_lineages() {
            Ok(rows) => {
                for row in rows {
                    lineages.insert(
                        row.id.clone(),
                        Lineage {
                            account_id: row.account_id,
                            generation: row.generation,
                            refresh_jti: row.refresh_jti,
                            access_jti: row.access_jti,
                            revoked: row.revoked,
                        },
                    );
                }
            }
            Err(e) => {
                tracing::error!("Failed to load refresh lineages: {}", e);
            }
        }
        Self {
            keyring: Keyring::new(secret),
            access_ttl_secs,
            refresh_ttl_secs,
            lineages,
            denylist: RevocationList::new(store.clone()),
            store,
        }
    }

    pub fn denylist(&self) -> &RevocationList {
        &self.denylist
    }

    /// Fresh credential pair at the head of a new lineage.
    pub fn issue(&self, account_id: &str, tier: Tier) -> AppResult<CredentialPair> {
        let lineage_id = uuid::Uuid::new_v4().to_string();
        let (pair, lineage) = self.mint(account_id, tier, &lineage_id, 0);
        self.persist_lineage(&lineage_id, &lineage);
        self.lineages.insert(lineage_id, lineage);
        Ok(pair)
    }

    /// Signature, expiry, type and denylist check. Side-effect-free.
    pub fn verify(&self, access_token: &str) -> Result<AccountIdentity, AuthError> {
        let claims = self.keyring.parse(access_token)?;
        if claims.typ != TokenKind::Access {
            return Err(AuthError::Invalid);
        }
        if self.denylist.contains(&claims.jti) {
            return Err(AuthError::Revoked);
        }
        if let Some(lineage) = self.lineages.get(&claims.lin) {
            if lineage.revoked {
                return Err(AuthError::Revoked);
            }
        }
        Ok(AccountIdentity {
            account_id: claims.sub,
            tier: claims.tier,
        })
    }

    /// Rotate a refresh token. Exactly one concurrent caller can win:
    /// the lineage entry is held exclusively for the comparison and the
    /// generation bump, so the loser observes the new generation and
    /// gets `Reused`.
    pub fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, AuthError> {
        let claims = self.keyring.parse(refresh_token)?;
        if claims.typ != TokenKind::Refresh {
            return Err(AuthError::Invalid);
        }
        if self.denylist.contains(&claims.jti) {
            return Err(AuthError::Revoked);
        }

        let mut entry = self
            .lineages
            .get_mut(&claims.lin)
            .ok_or(AuthError::Invalid)?;
        if entry.revoked {
            return Err(AuthError::Invalid);
        }

        if claims.generation != entry.generation || claims.jti != entry.refresh_jti {
            // Replay of a rotated token: someone is holding a stale
            // refresh credential. Kill the whole family.
            tracing::warn!(
                "Refresh replay detected for account {} (lineage {}, presented gen {} vs current {})",
                entry.account_id,
                claims.lin,
                claims.generation,
                entry.generation
            );
            self.revoke_lineage_entry(&claims.lin, &mut entry);
            return Err(AuthError::Reused);
        }

        let account_id = entry.account_id.clone();
        // Tier travels inside the signed claims; the lineage record
        // only backs replay detection.
        let tier = claims.tier;
        let next_generation = entry.generation + 1;
        let (pair, minted) = self.mint(&account_id, tier, &claims.lin, next_generation);
        entry.generation = minted.generation;
        entry.refresh_jti = minted.refresh_jti.clone();
        entry.access_jti = minted.access_jti.clone();
        let snapshot = entry.clone();
        drop(entry);
        self.persist_lineage(&claims.lin, &snapshot);
        Ok(pair)
    }

    /// Denylist a single refresh token id for its remaining validity.
    pub fn revoke_refresh(&self, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self.keyring.parse(refresh_token)?;
        if claims.typ != TokenKind::Refresh {
            return Err(AuthError::Invalid);
        }
        self.denylist.revoke(&claims.jti, claims.exp);
        Ok(())
    }

    /// Logout / compromise response: every live lineage of the account
    /// dies, which also kills its outstanding access tokens.
    pub fn revoke_account(&self, account_id: &str) {
        let lineage_ids: Vec<String> = self
            .lineages
            .iter()
            .filter(|entry| entry.account_id == account_id && !entry.revoked)
            .map(|entry| entry.key().clone())
            .collect();
        for lineage_id in lineage_ids {
            if let Some(mut entry) = self.lineages.get_mut(&lineage_id) {
                self.revoke_lineage_entry(&lineage_id, &mut entry);
            }
        }
    }

    fn revoke_lineage_entry(&self, lineage_id: &str, entry: &mut Lineage) {
        entry.revoked = true;
        let expires_at = chrono::Utc::now().timestamp() + self.refresh_ttl_secs;
        self.denylist.revoke(&entry.refresh_jti, expires_at);
        self.denylist
            .revoke(&entry.access_jti, chrono::Utc::now().timestamp() + self.access_ttl_secs);
        let snapshot = entry.clone();
        self.persist_lineage(lineage_id, &snapshot);
    }

    fn mint(
        &self,
        account_id: &str,
        tier: Tier,
        lineage_id: &str,
        generation: i64,
    ) -> (CredentialPair, Lineage) {
        let now = chrono::Utc::now().timestamp();
        let access_jti = uuid::Uuid::new_v4().to_string();
        let refresh_jti = uuid::Uuid::new_v4().to_string();

        let access = Claims {
            sub: account_id.to_string(),
            jti: access_jti.clone(),
            lin: lineage_id.to_string(),
            generation,
            tier,
            typ: TokenKind::Access,
            iat: now,
            exp: now + self.access_ttl_secs,
        };
        let refresh = Claims {
            sub: account_id.to_string(),
            jti: refresh_jti.clone(),
            lin: lineage_id.to_string(),
            generation,
            tier,
            typ: TokenKind::Refresh,
            iat: now,
            exp: now + self.refresh_ttl_secs,
        };

        // Signing HS256 claims only fails on a malformed key, which
        // new() would have rejected already.
        let pair = CredentialPair {
            access_token: self.keyring.sign(&access).unwrap_or_default(),
            refresh_token: self.keyring.sign(&refresh).unwrap_or_default(),
            token_type: "bearer",
            expires_in: self.access_ttl_secs,
        };
        let lineage = Lineage {
            account_id: account_id.to_string(),
            generation,
            refresh_jti,
            access_jti,
            revoked: false,
        };
        (pair, lineage)
    }

    fn persist_lineage(&self, lineage_id: &str, lineage: &Lineage) {
        let row = LineageRow {
            id: lineage_id.to_string(),
            account_id: lineage.account_id.clone(),
            generation: lineage.generation,
            refresh_jti: lineage.refresh_jti.clone(),
            access_jti: lineage.access_jti.clone(),
            revoked: lineage.revoked,
        };
        if let Err(e) = self.store.upsert_lineage(&row) {
            tracing::error!("Failed to persist lineage {}: {}", lineage_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(
            b"test-secret",
            900,
            7 * 24 * 3600,
            Arc::new(Store::open_in_memory().unwrap()),
        )
    }

    #[test]
    fn issue_and_verify() {
        let authority = authority();
        let pair = authority.issue("acc-1", Tier::Starter).unwrap();
        let identity = authority.verify(&pair.access_token).unwrap();
        assert_eq!(identity.account_id, "acc-1");
        assert_eq!(identity.tier, Tier::Starter);
    }

    #[test]
    fn refresh_rotates_and_replay_revokes_family() {
        let authority = authority();
        let first = authority.issue("acc-1", Tier::Professional).unwrap();

        let second = authority.refresh(&first.refresh_token).unwrap();
        assert!(authority.verify(&second.access_token).is_ok());

        // The consumed token comes back: replay.
        let replay = authority.refresh(&first.refresh_token);
        assert_eq!(replay.unwrap_err(), AuthError::Reused);

        // The whole family is dead, including the freshest pair.
        let after = authority.refresh(&second.refresh_token);
        assert!(matches!(
            after.unwrap_err(),
            AuthError::Invalid | AuthError::Revoked
        ));
        assert_eq!(
            authority.verify(&second.access_token).unwrap_err(),
            AuthError::Revoked
        );
    }

    #[test]
    fn newest_token_refreshes_before_replay_detection() {
        let authority = authority();
        let first = authority.issue("acc-1", Tier::Starter).unwrap();
        let second = authority.refresh(&first.refresh_token).unwrap();
        let third = authority.refresh(&second.refresh_token).unwrap();
        assert!(authority.verify(&third.access_token).is_ok());
    }

    #[test]
    fn refresh_with_access_token_is_invalid() {
        let authority = authority();
        let pair = authority.issue("acc-1", Tier::Starter).unwrap();
        assert_eq!(
            authority.refresh(&pair.access_token).unwrap_err(),
            AuthError::Invalid
        );
    }

    #[test]
    fn revoke_account_kills_access_tokens() {
        let authority = authority();
        let pair = authority.issue("acc-1", Tier::Agency).unwrap();
        authority.revoke_account("acc-1");
        assert_eq!(
            authority.verify(&pair.access_token).unwrap_err(),
            AuthError::Revoked
        );
        assert!(authority.refresh(&pair.refresh_token).is_err());
    }

    #[test]
    fn revoked_refresh_token_is_rejected() {
        let authority = authority();
        let pair = authority.issue("acc-1", Tier::Starter).unwrap();
        authority.revoke_refresh(&pair.refresh_token).unwrap();
        assert_eq!(
            authority.refresh(&pair.refresh_token).unwrap_err(),
            AuthError::Revoked
        );
    }
}
