//! Credential store.
//!
//! The store keeps every record in memory and writes through to a
//! [`CredentialBackend`]. Mutations for one account are serialized by a
//! per-account lock; different accounts proceed in parallel.
//!
//! A mutation never touches the in-memory copy until the backend has
//! accepted the new version, so a failed write leaves memory and disk in
//! agreement. The critical section runs on its own task: a caller that stops
//! waiting cannot interrupt a write halfway between disk and memory.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use mailbridge_api::ApiToken;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backend::CredentialBackend;
use super::record::CredentialRecord;
use crate::error::StorageError;
use crate::{Error, Result};

/// Keyed storage of per-account credential records.
#[async_trait]
pub trait CredentialsStorer: Send + Sync {
    /// Creates a record. Fails with [`Error::AlreadyExists`] on duplicates.
    async fn add(
        &self,
        account_id: &str,
        login: &str,
        mailbox_password: &str,
        bridge_password: &str,
        emails: &[String],
    ) -> Result<CredentialRecord>;

    /// Returns a copy of a record.
    async fn get(&self, account_id: &str) -> Result<CredentialRecord>;

    /// Returns all account identifiers, oldest first.
    async fn list(&self) -> Result<Vec<String>>;

    /// Removes a record and its secrets.
    async fn delete(&self, account_id: &str) -> Result<()>;

    /// Clears the session token and mailbox password, keeping the record.
    async fn logout(&self, account_id: &str) -> Result<()>;

    /// Replaces the stored session token (`"<uid>:<refresh_token>"`).
    ///
    /// A token that does not parse is rejected with [`Error::InvalidInput`].
    async fn update_token(&self, account_id: &str, token: &str) -> Result<()>;

    /// Replaces the mailbox password.
    async fn update_password(&self, account_id: &str, password: &str) -> Result<()>;

    /// Replaces the address list.
    async fn update_emails(&self, account_id: &str, emails: &[String]) -> Result<()>;

    /// Flips between combined and split address mode.
    async fn switch_address_mode(&self, account_id: &str) -> Result<()>;
}

struct StoreInner {
    backend: Arc<dyn CredentialBackend>,
    records: RwLock<HashMap<String, CredentialRecord>>,
    /// Per-account locks serializing mutations.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StoreInner {
    fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `critical` under the account's lock.
    ///
    /// Once no record remains for the account and nobody else holds its
    /// lock, the lock entry is dropped.
    async fn exclusive<T, F, Fut>(&self, account_id: &str, critical: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = {
            let lock = self.lock_for(account_id);
            let _guard = lock.lock().await;
            critical().await
        };

        if !self.records.read().contains_key(account_id) {
            self.locks
                .remove_if(account_id, |_, lock| Arc::strong_count(lock) == 1);
        }
        result
    }

    fn cached(&self, account_id: &str) -> Result<CredentialRecord> {
        self.records
            .read()
            .get(account_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(account_id.to_string()))
    }
}

/// Write-through credential store over a [`CredentialBackend`].
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

impl CredentialStore {
    /// Opens the store, loading every record from the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub async fn open(backend: Arc<dyn CredentialBackend>) -> Result<Self> {
        let loaded = backend.load_all().await?;
        info!(accounts = loaded.len(), "Loaded credentials");

        let records = loaded
            .into_iter()
            .map(|record| (record.account_id().to_string(), record))
            .collect();

        Ok(Self {
            inner: Arc::new(StoreInner {
                backend,
                records: RwLock::new(records),
                locks: DashMap::new(),
            }),
        })
    }

    /// Runs a critical section to completion on its own task.
    async fn run<T, F>(critical: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match tokio::spawn(critical).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(StorageError::Task(e.to_string()).into()),
        }
    }

    /// Read-modify-write of one record.
    async fn mutate<F>(&self, account_id: &str, operation: &'static str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut CredentialRecord) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let account_id = account_id.to_string();

        Self::run(async move {
            inner
                .exclusive(&account_id, || async {
                    let mut updated = inner.cached(&account_id)?;
                    apply(&mut updated);

                    if let Err(e) = inner.backend.save(&updated).await {
                        warn!(account_id = %account_id, operation, "Failed to persist credentials: {e}");
                        return Err(e);
                    }

                    inner.records.write().insert(account_id.clone(), updated);
                    debug!(account_id = %account_id, operation, "Updated credentials");
                    Ok(())
                })
                .await
        })
        .await
    }
}

#[async_trait]
impl CredentialsStorer for CredentialStore {
    async fn add(
        &self,
        account_id: &str,
        login: &str,
        mailbox_password: &str,
        bridge_password: &str,
        emails: &[String],
    ) -> Result<CredentialRecord> {
        if account_id.is_empty() {
            return Err(Error::InvalidInput("account id is empty".to_string()));
        }

        let inner = Arc::clone(&self.inner);
        let record = CredentialRecord::new(
            account_id,
            login,
            mailbox_password,
            bridge_password,
            emails.to_vec(),
        );

        Self::run(async move {
            let account_id = record.account_id().to_string();
            inner
                .exclusive(&account_id, || async {
                    if inner.records.read().contains_key(&account_id) {
                        return Err(Error::AlreadyExists(account_id.clone()));
                    }

                    inner.backend.save(&record).await?;
                    inner
                        .records
                        .write()
                        .insert(account_id.clone(), record.clone());
                    info!(account_id = %account_id, "Added credentials");
                    Ok(record)
                })
                .await
        })
        .await
    }

    async fn get(&self, account_id: &str) -> Result<CredentialRecord> {
        self.inner.cached(account_id)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let records = self.inner.records.read();
        let mut ordered: Vec<&CredentialRecord> = records.values().collect();
        ordered.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.account_id().cmp(b.account_id()))
        });
        Ok(ordered
            .into_iter()
            .map(|record| record.account_id().to_string())
            .collect())
    }

    async fn delete(&self, account_id: &str) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let account_id = account_id.to_string();

        Self::run(async move {
            inner
                .exclusive(&account_id, || async {
                    if !inner.records.read().contains_key(&account_id) {
                        return Err(Error::NotFound(account_id.clone()));
                    }

                    if !inner.backend.remove(&account_id).await? {
                        warn!(account_id = %account_id, "Record was cached but not stored");
                    }

                    inner.records.write().remove(&account_id);
                    info!(account_id = %account_id, "Deleted credentials");
                    Ok(())
                })
                .await
        })
        .await
    }

    async fn logout(&self, account_id: &str) -> Result<()> {
        self.mutate(account_id, "logout", CredentialRecord::clear_session)
            .await
    }

    async fn update_token(&self, account_id: &str, token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(Error::InvalidInput(
                "token is empty; use logout to clear a session".to_string(),
            ));
        }
        let token = token
            .parse::<ApiToken>()
            .map_err(|e| Error::InvalidInput(format!("malformed token: {e}")))?
            .to_string();
        self.mutate(account_id, "update_token", move |record| {
            record.api_token = token;
        })
        .await
    }

    async fn update_password(&self, account_id: &str, password: &str) -> Result<()> {
        let password = password.to_string();
        self.mutate(account_id, "update_password", move |record| {
            record.mailbox_password = password;
        })
        .await
    }

    async fn update_emails(&self, account_id: &str, emails: &[String]) -> Result<()> {
        let emails = emails.to_vec();
        self.mutate(account_id, "update_emails", move |record| {
            record.emails = emails;
        })
        .await
    }

    async fn switch_address_mode(&self, account_id: &str) -> Result<()> {
        self.mutate(account_id, "switch_address_mode", |record| {
            record.address_mode = record.address_mode.toggled();
        })
        .await
    }
}
