//! Durable persistence behind the credential store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::record::CredentialRecord;
use crate::Result;
use crate::error::StorageError;

/// Durable storage for credential records.
///
/// Every call is all-or-nothing: on error, the durable state is the state
/// before the call.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Loads every stored record.
    async fn load_all(&self) -> Result<Vec<CredentialRecord>>;

    /// Inserts or replaces a record.
    async fn save(&self, record: &CredentialRecord) -> Result<()>;

    /// Removes a record. Returns false if it was not stored.
    async fn remove(&self, account_id: &str) -> Result<bool>;
}

/// In-memory backend with fault injection.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, CredentialRecord>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the durable copy of a record.
    #[must_use]
    pub fn stored(&self, account_id: &str) -> Option<CredentialRecord> {
        self.records.lock().get(account_id).cloned()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("backend is read-only".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialBackend for MemoryBackend {
    async fn load_all(&self) -> Result<Vec<CredentialRecord>> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn save(&self, record: &CredentialRecord) -> Result<()> {
        self.check_writable()?;
        self.records
            .lock()
            .insert(record.account_id().to_string(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, account_id: &str) -> Result<bool> {
        self.check_writable()?;
        let removed = self.records.lock().remove(account_id).is_some();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_remove() {
        let backend = MemoryBackend::new();
        let record = CredentialRecord::new("u1", "login", "mp", "bp", Vec::new());

        backend.save(&record).await.unwrap();
        assert_eq!(backend.load_all().await.unwrap(), vec![record.clone()]);
        assert_eq!(backend.stored("u1"), Some(record));

        assert!(backend.remove("u1").await.unwrap());
        assert!(!backend.remove("u1").await.unwrap());
        assert!(backend.load_all().await.unwrap().is_empty());
        assert_eq!(backend.write_count(), 3);
    }

    #[tokio::test]
    async fn test_fail_writes_leaves_state_untouched() {
        let backend = MemoryBackend::new();
        let record = CredentialRecord::new("u1", "login", "mp", "bp", Vec::new());
        backend.save(&record).await.unwrap();

        backend.set_fail_writes(true);
        let mut changed = record.clone();
        changed.login = "other".to_string();

        assert!(backend.save(&changed).await.unwrap_err().is_storage_fault());
        assert!(backend.remove("u1").await.is_err());
        assert_eq!(backend.stored("u1").unwrap().login, "login");
        assert_eq!(backend.write_count(), 1);
    }
}
