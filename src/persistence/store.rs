use crate::error::{AppError, AppResult};
use crate::models::{Account, Tier};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Shared persistence for everything that must survive a process
/// restart: accounts, finished artifacts, the token denylist and
/// refresh lineages. In a multi-instance deployment this is the seam
/// where a shared database plugs in; callers never touch SQL.
pub struct Store {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    Completed,
    Degraded,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Completed => "completed",
            ArtifactStatus::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub job_id: String,
    pub account_id: String,
    pub content: String,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct LineageRow {
    pub id: String,
    pub account_id: String,
    pub generation: i64,
    pub refresh_jti: String,
    pub access_jti: String,
    pub revoked: bool,
}

impl Store {
    pub fn open(path: &Path) -> AppResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                tier TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS artifacts (
                job_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS revoked_tokens (
                jti TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS lineages (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                generation INTEGER NOT NULL,
                refresh_jti TEXT NOT NULL,
                access_jti TEXT NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT 0
            )",
            [],
        )?;
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_artifacts_account ON artifacts(account_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_lineages_account ON lineages(account_id)",
            [],
        );
        Ok(())
    }

    // --- accounts ---

    pub fn create_account(&self, account: &Account) -> AppResult<()> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO accounts (id, email, password_hash, tier, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account.id,
                account.email,
                account.password_hash,
                account.tier.as_str(),
                account.created_at
            ],
        )?;
        if inserted == 0 {
            return Err(AppError::Account(format!(
                "email already registered: {}",
                account.email
            )));
        }
        Ok(())
    }

    pub fn find_account_by_email(&self, email: &str) -> AppResult<Option<Account>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, email, password_hash, tier, created_at FROM accounts WHERE email = ?1",
                params![email],
                map_account_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_account(&self, account_id: &str) -> AppResult<Option<Account>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, email, password_hash, tier, created_at FROM accounts WHERE id = ?1",
                params![account_id],
                map_account_row,
            )
            .optional()?;
        Ok(row)
    }

    // --- artifacts (content-store handoff) ---

    pub fn save_artifact(
        &self,
        account_id: &str,
        job_id: &str,
        content: &str,
        status: ArtifactStatus,
    ) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO artifacts (job_id, account_id, content, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job_id,
                account_id,
                content,
                status.as_str(),
                chrono::Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn get_artifact(&self, job_id: &str) -> AppResult<Option<ArtifactRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT job_id, account_id, content, status, created_at
                 FROM artifacts WHERE job_id = ?1",
                params![job_id],
                |row| {
                    Ok(ArtifactRecord {
                        job_id: row.get(0)?,
                        account_id: row.get(1)?,
                        content: row.get(2)?,
                        status: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // --- revocation denylist ---

    pub fn insert_revocation(&self, jti: &str, expires_at: i64) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO revoked_tokens (jti, expires_at) VALUES (?1, ?2)",
            params![jti, expires_at],
        )?;
        Ok(())
    }

    pub fn load_revocations(&self, now: i64) -> AppResult<Vec<(String, i64)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT jti, expires_at FROM revoked_tokens WHERE expires_at > ?1")?;
        let rows = stmt
            .query_map(params![now], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn purge_expired_revocations(&self, now: i64) -> AppResult<usize> {
        let conn = self.conn.lock();
        let purged = conn.execute(
            "DELETE FROM revoked_tokens WHERE expires_at <= ?1",
            params![now],
        )?;
        Ok(purged)
    }

    // --- refresh lineages ---

    pub fn upsert_lineage(&self, lineage: &LineageRow) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO lineages
             (id, account_id, generation, refresh_jti, access_jti, revoked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                lineage.id,
                lineage.account_id,
                lineage.generation,
                lineage.refresh_jti,
                lineage.access_jti,
                lineage.revoked
            ],
        )?;
        Ok(())
    }

    pub fn load_lineages(&self) -> AppResult<Vec<LineageRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, account_id, generation, refresh_jti, access_jti, revoked FROM lineages",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LineageRow {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    generation: row.get(2)?,
                    refresh_jti: row.get(3)?,
                    access_jti: row.get(4)?,
                    revoked: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_lineage(&self, lineage_id: &str) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM lineages WHERE id = ?1", params![lineage_id])?;
        Ok(())
    }
}

fn map_account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let tier_raw: String = row.get(3)?;
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        tier: Tier::parse(&tier_raw).unwrap_or(Tier::Starter),
        created_at: row.get(4)?,
    })
}
