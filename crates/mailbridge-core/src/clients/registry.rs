//! Per-account client handle cache.
//!
//! Each account has a slot guarded by its own async lock. Construction,
//! auth-event eviction and session-manager evictions all happen under that
//! lock, so two callers never build a handle for the same account at the
//! same time, and no caller sees a handle while its account is mid-update.
//!
//! # Proxy flips
//!
//! Handles remember the proxy generation they were built under. After a flip,
//! the cached handle is stale and the next [`ClientManager::get_client`]
//! replaces it. The replacement inherits the stale handle's live token, which
//! may be newer than the stored one if a refresh event is still queued.
//!
//! # Unknown accounts
//!
//! Asking for an account with no credential record is not an error. The
//! caller gets an unauthenticated handle whose first authenticated use fails
//! with [`mailbridge_api::Error::Unauthenticated`]. Such handles are never
//! cached. A stored token that does not parse gets the same treatment.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use mailbridge_api::{
    ApiToken, AuthSender, Client, ClientAuth, ClientConfig, ClientFactory, ClientParams,
    ProxyPolicy,
};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use super::channel::AuthChannel;
use super::proxy::ProxyGate;
use crate::Result;
use crate::credentials::CredentialsStorer;

/// Hands out client handles and owns the auth event channel.
#[async_trait]
pub trait ClientManager: Send + Sync {
    /// Shared handle used before any account is logged in.
    fn get_anonymous_client(&self) -> Arc<dyn Client>;

    /// Returns the handle for an account, building it if needed.
    async fn get_client(&self, account_id: &str) -> Result<Arc<dyn Client>>;

    /// Permits proxy fallback for handles built from now on.
    fn allow_proxy(&self);

    /// Forbids proxy fallback for handles built from now on.
    fn disallow_proxy(&self);

    /// Sender for the bridge-wide auth event channel.
    fn get_bridge_auth_channel(&self) -> AuthSender;
}

#[derive(Debug)]
struct CachedClient {
    client: Arc<dyn Client>,
    generation: u64,
}

type Slot = Arc<Mutex<Option<CachedClient>>>;

/// Default [`ClientManager`].
pub struct ClientRegistry {
    config: ClientConfig,
    factory: Arc<dyn ClientFactory>,
    credentials: Arc<dyn CredentialsStorer>,
    proxy: ProxyGate,
    channel: AuthChannel,
    anonymous: Arc<dyn Client>,
    /// Slots are only removed by [`ClientRegistry::forget`], once unused.
    slots: DashMap<String, Slot>,
}

impl ClientRegistry {
    /// Creates a registry.
    pub fn new(
        config: ClientConfig,
        factory: Arc<dyn ClientFactory>,
        credentials: Arc<dyn CredentialsStorer>,
        proxy: ProxyPolicy,
    ) -> Self {
        let channel = AuthChannel::new();
        let anonymous = factory.build(ClientParams {
            user_id: None,
            token: None,
            proxy,
            config: config.clone(),
            auth_sink: channel.sender(),
        });

        Self {
            config,
            factory,
            credentials,
            proxy: ProxyGate::new(proxy),
            channel,
            anonymous,
            slots: DashMap::new(),
        }
    }

    /// Current proxy policy.
    #[must_use]
    pub fn proxy_policy(&self) -> ProxyPolicy {
        self.proxy.policy()
    }

    /// Sets the proxy policy. Returns true if it changed.
    pub fn set_proxy_policy(&self, policy: ProxyPolicy) -> bool {
        self.proxy.set(policy).is_some()
    }

    /// Receiving half of the auth channel, for the single auth worker.
    pub fn take_auth_receiver(&self) -> Option<UnboundedReceiver<ClientAuth>> {
        self.channel.take_receiver()
    }

    fn slot(&self, account_id: &str) -> Slot {
        self.slots
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn build(&self, account_id: &str, token: Option<ApiToken>, proxy: ProxyPolicy) -> Arc<dyn Client> {
        self.factory.build(ClientParams {
            user_id: Some(account_id.to_string()),
            token,
            proxy,
            config: self.config.clone(),
            auth_sink: self.channel.sender(),
        })
    }

    /// Returns true if a handle valid under the current proxy policy is cached.
    pub async fn has_cached_client(&self, account_id: &str) -> bool {
        let Some(slot) = self.slots.get(account_id).map(|s| s.clone()) else {
            return false;
        };
        let guard = slot.lock().await;
        guard
            .as_ref()
            .is_some_and(|cached| cached.generation == self.proxy.snapshot().generation)
    }

    /// Drops the cached handle for an account and runs `op` while holding
    /// the account's slot.
    ///
    /// Nobody can fetch a handle for the account until `op` finishes. If `op`
    /// fails, the evicted handle is put back. A slot left empty is released
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns whatever `op` returns.
    pub async fn evict_with<T, F, Fut>(&self, account_id: &str, op: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let slot = self.slot(account_id);
        let result = {
            let mut guard = slot.lock().await;
            let evicted = guard.take();

            match op().await {
                Ok(value) => {
                    if evicted.is_some() {
                        debug!(account_id, "Evicted cached client");
                    }
                    Ok(value)
                }
                Err(e) => {
                    *guard = evicted;
                    Err(e)
                }
            }
        };

        drop(slot);
        self.forget(account_id);
        result
    }

    /// Drops the cached handle for an account.
    pub async fn evict(&self, account_id: &str) {
        let Some(slot) = self.slots.get(account_id).map(|s| s.clone()) else {
            return;
        };
        if slot.lock().await.take().is_some() {
            debug!(account_id, "Evicted cached client");
        }
    }

    /// Releases the slot of an account with no cached handle.
    ///
    /// The slot is kept while anyone holds it or a handle is cached in it, so
    /// this never affects a caller.
    pub fn forget(&self, account_id: &str) {
        let removed = self.slots.remove_if(account_id, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|cached| cached.is_none())
        });
        if removed.is_some() {
            debug!(account_id, "Released client slot");
        }
    }

    /// Number of accounts with a slot.
    #[must_use]
    pub fn tracked_accounts(&self) -> usize {
        self.slots.len()
    }

    /// Drops every cached handle.
    pub async fn clear(&self) {
        let slots: Vec<Slot> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        for slot in slots {
            slot.lock().await.take();
        }
        info!("Cleared all cached clients");
    }

    /// Applies one auth event.
    ///
    /// A refreshed token is persisted; a revocation logs the account out. In
    /// both cases the cached handle is evicted first, and put back if the
    /// store rejects the change.
    ///
    /// # Errors
    ///
    /// Returns the store error; the registry is left as it was.
    pub async fn apply_auth_event(&self, event: ClientAuth) -> Result<()> {
        let ClientAuth { user_id, auth } = event;

        let result = match auth {
            Some(auth) => {
                let token = auth.api_token().to_string();
                self.evict_with(&user_id, || self.credentials.update_token(&user_id, &token))
                    .await
            }
            None => {
                self.evict_with(&user_id, || self.credentials.logout(&user_id))
                    .await
            }
        };

        match &result {
            Ok(()) => debug!(account_id = %user_id, "Applied auth event"),
            Err(e) => warn!(account_id = %user_id, "Failed to apply auth event: {e}"),
        }
        result
    }
}

#[async_trait]
impl ClientManager for ClientRegistry {
    fn get_anonymous_client(&self) -> Arc<dyn Client> {
        Arc::clone(&self.anonymous)
    }

    async fn get_client(&self, account_id: &str) -> Result<Arc<dyn Client>> {
        let slot = self.slot(account_id);
        let mut guard = slot.lock().await;
        let snapshot = self.proxy.snapshot();

        // A handle from an older proxy generation is replaced, keeping its live token
        let carried = match guard.as_ref() {
            Some(cached) if cached.generation == snapshot.generation => {
                return Ok(Arc::clone(&cached.client));
            }
            Some(stale) => {
                debug!(account_id, "Rebuilding client after proxy change");
                Some(stale.client.api_token())
            }
            None => None,
        };

        let record = match self.credentials.get(account_id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                guard.take();
                drop(guard);
                drop(slot);
                self.forget(account_id);
                debug!(account_id, "No credentials, returning unauthenticated client");
                return Ok(self.build(account_id, None, snapshot.policy));
            }
            Err(e) => return Err(e),
        };

        let token = match carried {
            Some(token) => token,
            None => record.split_api_token().unwrap_or_else(|e| {
                warn!(account_id, "Stored token is unusable, client is unauthenticated: {e}");
                None
            }),
        };

        let client = self.build(account_id, token, snapshot.policy);
        *guard = Some(CachedClient {
            client: Arc::clone(&client),
            generation: snapshot.generation,
        });
        debug!(account_id, proxy = ?snapshot.policy, "Built client");
        Ok(client)
    }

    fn allow_proxy(&self) {
        self.proxy.allow();
    }

    fn disallow_proxy(&self) {
        self.proxy.disallow();
    }

    fn get_bridge_auth_channel(&self) -> AuthSender {
        self.channel.sender()
    }
}
