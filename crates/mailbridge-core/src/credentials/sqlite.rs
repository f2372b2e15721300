//! `SQLite` + keyring credential backend.
//!
//! Record metadata lives in a `credentials` table; passwords and tokens are
//! kept out of the database and stored in a [`Keychain`], one JSON blob per
//! account. The database row and the keychain entry are written together:
//! the keychain write happens inside the row's transaction, so a keychain
//! failure rolls the row back, and a failed commit restores the previous
//! keychain entry.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, warn};

use super::backend::CredentialBackend;
use super::keychain::Keychain;
use super::record::{AddressMode, CredentialRecord};
use crate::Result;

/// Database file name inside the bridge's database directory.
pub const DATABASE_FILE: &str = "credentials.db";

/// Secret part of a record, as stored in the keychain.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordSecrets {
    api_token: String,
    mailbox_password: String,
    bridge_password: String,
}

impl RecordSecrets {
    fn of(record: &CredentialRecord) -> Self {
        Self {
            api_token: record.api_token.clone(),
            mailbox_password: record.mailbox_password.clone(),
            bridge_password: record.bridge_password.clone(),
        }
    }
}

/// Credential backend persisting to `SQLite` and a keychain.
pub struct SqliteBackend {
    pool: SqlitePool,
    keychain: Arc<dyn Keychain>,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &Path, keychain: Arc<dyn Keychain>) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", database_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let backend = Self { pool, keychain };
        backend.initialize().await?;
        Ok(backend)
    }

    /// Opens the database inside a directory, creating the directory first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database fails to open.
    pub async fn open_in(db_dir: &Path, keychain: Arc<dyn Keychain>) -> Result<Self> {
        tokio::fs::create_dir_all(db_dir).await?;
        Self::new(&db_dir.join(DATABASE_FILE), keychain).await
    }

    /// Create an in-memory backend for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory(keychain: Arc<dyn Keychain>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let backend = Self { pool, keychain };
        backend.initialize().await?;
        Ok(backend)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS credentials (
                account_id TEXT PRIMARY KEY NOT NULL,
                login TEXT NOT NULL,
                emails TEXT NOT NULL,
                address_mode TEXT NOT NULL,
                version TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Puts back the keychain entry that was there before a failed write.
    fn restore_secret(&self, account_id: &str, previous: Option<&str>) {
        let restored = match previous {
            Some(secret) => self.keychain.put(account_id, secret),
            None => self.keychain.delete(account_id),
        };
        if let Err(e) = restored {
            warn!(account_id, "Failed to restore keychain entry: {e}");
        }
    }

    fn row_to_record(&self, row: &sqlx::sqlite::SqliteRow) -> Result<CredentialRecord> {
        let account_id: String = row.try_get("account_id")?;
        let emails: Vec<String> = serde_json::from_str(row.try_get::<&str, _>("emails")?)?;
        let created_at: String = row.try_get("created_at")?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                warn!(account_id = %account_id, "Unreadable creation time: {e}");
                DateTime::<Utc>::UNIX_EPOCH
            });

        let secrets = match self.keychain.get(&account_id)? {
            Some(blob) => serde_json::from_str(&blob)?,
            None => {
                // Row without secrets: treat as logged out.
                warn!(account_id = %account_id, "No secrets in keychain");
                RecordSecrets::default()
            }
        };

        let mut record = CredentialRecord::new(
            account_id,
            row.try_get::<String, _>("login")?,
            secrets.mailbox_password,
            secrets.bridge_password,
            emails,
        );
        record.api_token = secrets.api_token;
        record.address_mode = AddressMode::from_storage(row.try_get::<&str, _>("address_mode")?);
        record.version = row.try_get("version")?;
        record.created_at = created_at;
        Ok(record)
    }
}

#[async_trait]
impl CredentialBackend for SqliteBackend {
    async fn load_all(&self) -> Result<Vec<CredentialRecord>> {
        let rows = sqlx::query(
            r"
            SELECT account_id, login, emails, address_mode, version, created_at
            FROM credentials
            ORDER BY created_at ASC, account_id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_record(row)).collect()
    }

    async fn save(&self, record: &CredentialRecord) -> Result<()> {
        let account_id = record.account_id();
        let emails = serde_json::to_string(&record.emails)?;
        let secrets = serde_json::to_string(&RecordSecrets::of(record))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO credentials (account_id, login, emails, address_mode, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                login = excluded.login,
                emails = excluded.emails,
                address_mode = excluded.address_mode,
                version = excluded.version,
                updated_at = CURRENT_TIMESTAMP
            ",
        )
        .bind(account_id)
        .bind(&record.login)
        .bind(&emails)
        .bind(record.address_mode.as_str())
        .bind(&record.version)
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let previous = self.keychain.get(account_id)?;
        // Dropping `tx` on error rolls the row back.
        self.keychain.put(account_id, &secrets)?;

        if let Err(e) = tx.commit().await {
            self.restore_secret(account_id, previous.as_deref());
            return Err(e.into());
        }

        debug!(account_id, "Saved credentials");
        Ok(())
    }

    async fn remove(&self, account_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM credentials WHERE account_id = ?")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let previous = self.keychain.get(account_id)?;
        self.keychain.delete(account_id)?;

        if let Err(e) = tx.commit().await {
            self.restore_secret(account_id, previous.as_deref());
            return Err(e.into());
        }

        debug!(account_id, "Removed credentials");
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;
    use crate::credentials::keychain::MemoryKeychain;

    async fn backend() -> (SqliteBackend, Arc<MemoryKeychain>) {
        let keychain = Arc::new(MemoryKeychain::new());
        let backend = SqliteBackend::in_memory(keychain.clone()).await.unwrap();
        (backend, keychain)
    }

    fn record(id: &str) -> CredentialRecord {
        let mut record = CredentialRecord::new(
            id,
            format!("login-{id}"),
            "mailbox-pass",
            "bridge-pass",
            vec![format!("{id}@example.com")],
        );
        record.api_token = "uid:refresh".to_string();
        record
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (backend, keychain) = backend().await;
        let saved = record("u1");

        backend.save(&saved).await.unwrap();

        let loaded = backend.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let loaded = &loaded[0];
        assert_eq!(loaded.account_id(), "u1");
        assert_eq!(loaded.login, "login-u1");
        assert_eq!(loaded.emails, vec!["u1@example.com".to_string()]);
        assert_eq!(loaded.api_token, "uid:refresh");
        assert_eq!(loaded.mailbox_password, "mailbox-pass");
        assert_eq!(loaded.bridge_password, "bridge-pass");
        assert_eq!(loaded.address_mode, AddressMode::Combined);
        assert_eq!(loaded.created_at.timestamp(), saved.created_at.timestamp());

        // Secrets never reach the database
        let blob = keychain.get("u1").unwrap().unwrap();
        assert!(blob.contains("mailbox-pass"));
    }

    #[tokio::test]
    async fn test_save_updates_existing() {
        let (backend, _) = backend().await;
        let mut saved = record("u1");
        backend.save(&saved).await.unwrap();

        saved.address_mode = AddressMode::Split;
        saved.api_token = "uid:refresh2".to_string();
        saved.emails.push("second@example.com".to_string());
        backend.save(&saved).await.unwrap();

        let loaded = backend.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].address_mode, AddressMode::Split);
        assert_eq!(loaded[0].api_token, "uid:refresh2");
        assert_eq!(loaded[0].emails.len(), 2);
    }

    #[tokio::test]
    async fn test_keychain_failure_rolls_back_row() {
        let (backend, keychain) = backend().await;
        keychain.set_fail_writes(true);

        let err = backend.save(&record("u1")).await.unwrap_err();
        assert!(err.is_storage_fault());
        assert!(backend.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keychain_failure_keeps_previous_version() {
        let (backend, keychain) = backend().await;
        let mut saved = record("u1");
        backend.save(&saved).await.unwrap();

        keychain.set_fail_writes(true);
        saved.login = "renamed".to_string();
        saved.api_token = "uid:other".to_string();
        assert!(backend.save(&saved).await.is_err());

        let loaded = backend.load_all().await.unwrap();
        assert_eq!(loaded[0].login, "login-u1");
        assert_eq!(loaded[0].api_token, "uid:refresh");
    }

    #[tokio::test]
    async fn test_remove() {
        let (backend, keychain) = backend().await;
        backend.save(&record("u1")).await.unwrap();

        assert!(backend.remove("u1").await.unwrap());
        assert!(backend.load_all().await.unwrap().is_empty());
        assert!(keychain.is_empty());

        assert!(!backend.remove("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_failure_keeps_record() {
        let (backend, keychain) = backend().await;
        backend.save(&record("u1")).await.unwrap();

        keychain.set_fail_writes(true);
        assert!(backend.remove("u1").await.is_err());

        let loaded = backend.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].mailbox_password, "mailbox-pass");
    }

    #[tokio::test]
    async fn test_missing_secrets_load_as_logged_out() {
        let (backend, keychain) = backend().await;
        backend.save(&record("u1")).await.unwrap();
        keychain.delete("u1").unwrap();

        let loaded = backend.load_all().await.unwrap();
        assert!(!loaded[0].is_connected());
        assert_eq!(loaded[0].login, "login-u1");
    }

    #[tokio::test]
    async fn test_open_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("db");
        let keychain = Arc::new(MemoryKeychain::new());

        let backend = SqliteBackend::open_in(&db_dir, keychain.clone())
            .await
            .unwrap();
        backend.save(&record("u1")).await.unwrap();
        drop(backend);

        assert!(db_dir.join(DATABASE_FILE).exists());
        let reopened = SqliteBackend::open_in(&db_dir, keychain).await.unwrap();
        assert_eq!(reopened.load_all().await.unwrap().len(), 1);
    }
}
