//! Secret storage for credential records.
//!
//! Passwords and tokens live in the platform's native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager
//!
//! Each account has exactly one entry holding its secrets as a JSON blob.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use keyring::Entry;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::Result;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "mailbridge";

/// Credential type identifier for the per-account secret blob.
const SECRETS_CREDENTIAL: &str = "secrets";

/// Keyed secret storage.
pub trait Keychain: Send + Sync {
    /// Stores the secret for an account, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn put(&self, account_id: &str, secret: &str) -> Result<()>;

    /// Loads the secret for an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn get(&self, account_id: &str) -> Result<Option<String>>;

    /// Deletes the secret for an account. Missing entries are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn delete(&self, account_id: &str) -> Result<()>;
}

/// [`Keychain`] backed by the system keyring.
#[derive(Debug, Clone)]
pub struct KeyringKeychain {
    service: String,
}

impl KeyringKeychain {
    /// Creates a keychain using the default service name.
    #[must_use]
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Creates a keychain under a custom service name.
    #[must_use]
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Generates the keyring entry key for an account.
    fn entry(&self, account_id: &str) -> Result<Entry> {
        let key = format!("{}_{SECRETS_CREDENTIAL}_{account_id}", self.service);
        Ok(Entry::new(&self.service, &key)?)
    }
}

impl Default for KeyringKeychain {
    fn default() -> Self {
        Self::new()
    }
}

impl Keychain for KeyringKeychain {
    fn put(&self, account_id: &str, secret: &str) -> Result<()> {
        self.entry(account_id)?.set_password(secret)?;
        debug!(account_id, "Stored secrets in keyring");
        Ok(())
    }

    fn get(&self, account_id: &str) -> Result<Option<String>> {
        match self.entry(account_id)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => {
                debug!(account_id, "No secrets found in keyring");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, account_id: &str) -> Result<()> {
        match self.entry(account_id)?.delete_credential() {
            Ok(()) => {
                debug!(account_id, "Deleted secrets from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!(account_id, "No secrets to delete from keyring");
                Ok(())
            }
            Err(e) => {
                warn!(account_id, "Failed to delete secrets from keyring: {e}");
                Err(e.into())
            }
        }
    }
}

/// In-process [`Keychain`], used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryKeychain {
    /// Creates an empty keychain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put`/`delete` fail, simulating a locked keyring.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("keychain is locked".to_string()).into());
        }
        Ok(())
    }
}

impl Keychain for MemoryKeychain {
    fn put(&self, account_id: &str, secret: &str) -> Result<()> {
        self.check_writable()?;
        self.entries
            .lock()
            .insert(account_id.to_string(), secret.to_string());
        Ok(())
    }

    fn get(&self, account_id: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(account_id).cloned())
    }

    fn delete(&self, account_id: &str) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().remove(account_id);
        Ok(())
    }
}
