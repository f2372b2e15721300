//! Shared fakes for the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mailbridge_api::{Client, ClientConfig, ClientFactory, ClientParams, DefaultClientFactory};
use mailbridge_core::{
    CredentialBackend, CredentialRecord, CredentialStore, CredentialsStorer, MemoryBackend,
    PanicHandler, Result, StorageError,
};
use parking_lot::Mutex;

/// Installs a test subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn api_config() -> ClientConfig {
    ClientConfig::with_default_host("test").unwrap()
}

pub fn emails(addresses: &[&str]) -> Vec<String> {
    addresses.iter().map(ToString::to_string).collect()
}

pub async fn memory_store() -> (Arc<CredentialStore>, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = CredentialStore::open(backend.clone()).await.unwrap();
    (Arc::new(store), backend)
}

/// Backend that fails chosen writes and passes everything else to a
/// [`MemoryBackend`].
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    /// Writes left before the next injected failure; 0 when disarmed.
    fail_in: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`th write from now fail once. Writes before and after it
    /// go through.
    pub fn fail_nth_write(&self, n: usize) {
        self.fail_in.store(n, Ordering::SeqCst);
    }

    /// Makes every write fail until turned off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.set_fail_writes(fail);
    }

    pub fn stored(&self, account_id: &str) -> Option<CredentialRecord> {
        self.inner.stored(account_id)
    }

    fn check_write(&self) -> Result<()> {
        let hit = self
            .fail_in
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok_and(|left| left == 1);
        if hit {
            return Err(StorageError::Unavailable("injected write failure".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialBackend for FlakyBackend {
    async fn load_all(&self) -> Result<Vec<CredentialRecord>> {
        self.inner.load_all().await
    }

    async fn save(&self, record: &CredentialRecord) -> Result<()> {
        self.check_write()?;
        self.inner.save(record).await
    }

    async fn remove(&self, account_id: &str) -> Result<bool> {
        self.check_write()?;
        self.inner.remove(account_id).await
    }
}

pub async fn flaky_store() -> (Arc<CredentialStore>, Arc<FlakyBackend>) {
    let backend = Arc::new(FlakyBackend::new());
    let store = CredentialStore::open(backend.clone()).await.unwrap();
    (Arc::new(store), backend)
}

/// Factory that counts how many handles it built.
#[derive(Debug, Default)]
pub struct CountingFactory {
    builds: AtomicUsize,
}

impl CountingFactory {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ClientFactory for CountingFactory {
    fn build(&self, params: ClientParams) -> Arc<dyn Client> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        DefaultClientFactory.build(params)
    }
}

/// Panic handler that remembers every message.
#[derive(Debug, Default)]
pub struct RecordingPanicHandler {
    messages: Mutex<Vec<String>>,
}

impl RecordingPanicHandler {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl PanicHandler for RecordingPanicHandler {
    fn handle_panic(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

/// Store that panics when asked to update the token of one account.
pub struct PanickingStore {
    inner: Arc<CredentialStore>,
    poisoned: String,
}

impl PanickingStore {
    pub fn new(inner: Arc<CredentialStore>, poisoned: impl Into<String>) -> Self {
        Self {
            inner,
            poisoned: poisoned.into(),
        }
    }
}

#[async_trait]
impl CredentialsStorer for PanickingStore {
    async fn add(
        &self,
        account_id: &str,
        login: &str,
        mailbox_password: &str,
        bridge_password: &str,
        emails: &[String],
    ) -> Result<CredentialRecord> {
        self.inner
            .add(account_id, login, mailbox_password, bridge_password, emails)
            .await
    }

    async fn get(&self, account_id: &str) -> Result<CredentialRecord> {
        self.inner.get(account_id).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.inner.list().await
    }

    async fn delete(&self, account_id: &str) -> Result<()> {
        self.inner.delete(account_id).await
    }

    async fn logout(&self, account_id: &str) -> Result<()> {
        self.inner.logout(account_id).await
    }

    async fn update_token(&self, account_id: &str, token: &str) -> Result<()> {
        assert_ne!(account_id, self.poisoned, "poisoned account");
        self.inner.update_token(account_id, token).await
    }

    async fn update_password(&self, account_id: &str, password: &str) -> Result<()> {
        self.inner.update_password(account_id, password).await
    }

    async fn update_emails(&self, account_id: &str, emails: &[String]) -> Result<()> {
        self.inner.update_emails(account_id, emails).await
    }

    async fn switch_address_mode(&self, account_id: &str) -> Result<()> {
        self.inner.switch_address_mode(account_id).await
    }
}
