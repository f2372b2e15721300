//! Session manager.
//!
//! Owns the credential store, the client registry and the auth worker that
//! drains the registry's auth channel, and exposes the account flows the
//! protocol front ends and the UI call into.

use std::sync::Arc;

use mailbridge_api::{Auth, ClientAuth, ClientFactory, DefaultClientFactory, ProxyPolicy};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::ClientRegistry;
use crate::config::Configer;
use crate::credentials::{
    CredentialRecord, CredentialStore, CredentialsStorer, KeyringKeychain, SqliteBackend,
    generate_bridge_password,
};
use crate::panic::{PanicHandler, panic_message};
use crate::preferences::{ALLOW_PROXY_KEY, PreferenceProvider};
use crate::worker::{AuthEvents, run_auth_worker};
use crate::{Error, Result};

/// Wires the credential store, the client registry and the auth worker.
pub struct SessionManager {
    configer: Arc<dyn Configer>,
    preferences: Arc<dyn PreferenceProvider>,
    panic_handler: Arc<dyn PanicHandler>,
    credentials: Arc<dyn CredentialsStorer>,
    clients: Arc<ClientRegistry>,
    auth: AuthEvents,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Creates a manager from explicit parts.
    pub fn new(
        configer: Arc<dyn Configer>,
        preferences: Arc<dyn PreferenceProvider>,
        panic_handler: Arc<dyn PanicHandler>,
        credentials: Arc<dyn CredentialsStorer>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let proxy = ProxyPolicy::from(preferences.get_bool(ALLOW_PROXY_KEY));
        let clients = Arc::new(ClientRegistry::new(
            configer.api_config(),
            factory,
            Arc::clone(&credentials),
            proxy,
        ));

        let auth = AuthEvents::new(Arc::clone(&clients), Arc::clone(&panic_handler));

        Self {
            configer,
            preferences,
            panic_handler,
            credentials,
            clients,
            auth,
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Opens the on-disk credential store and builds a manager around it.
    ///
    /// Metadata lives in `SQLite` under [`Configer::db_dir`], secrets in the
    /// system keyring.
    ///
    /// # Errors
    ///
    /// Returns an error if the API configuration is invalid or the store
    /// cannot be opened.
    pub async fn open(
        configer: Arc<dyn Configer>,
        preferences: Arc<dyn PreferenceProvider>,
        panic_handler: Arc<dyn PanicHandler>,
    ) -> Result<Self> {
        configer
            .api_config()
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let backend = SqliteBackend::open_in(&configer.db_dir(), Arc::new(KeyringKeychain::new()))
            .await?;
        let store = CredentialStore::open(Arc::new(backend)).await?;

        Ok(Self::new(
            configer,
            preferences,
            panic_handler,
            Arc::new(store),
            Arc::new(DefaultClientFactory),
        ))
    }

    /// Credential store.
    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialsStorer> {
        &self.credentials
    }

    /// Client registry.
    #[must_use]
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Configuration provider.
    #[must_use]
    pub fn configer(&self) -> &Arc<dyn Configer> {
        &self.configer
    }

    /// Starts the auth worker. Calling it again while running does nothing.
    ///
    /// The proxy policy is re-read from the preferences first.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager was already shut down.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Ok(());
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::Canceled);
        }

        let allow = self.preferences.get_bool(ALLOW_PROXY_KEY);
        self.clients.set_proxy_policy(ProxyPolicy::from(allow));

        let events = self
            .clients
            .take_auth_receiver()
            .ok_or_else(|| Error::Config("auth channel already consumed".to_string()))?;

        *worker = Some(tokio::spawn(run_auth_worker(
            self.auth.clone(),
            events,
            self.shutdown.clone(),
        )));
        info!(allow_proxy = allow, "Session manager started");
        Ok(())
    }

    /// Returns true while the auth worker is running.
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the auth worker after it has drained the queued events.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let Some(handle) = self.worker.lock().await.take() else {
            return;
        };
        if let Err(e) = handle.await {
            if e.is_panic() {
                self.panic_handler
                    .handle_panic(&panic_message(e.into_panic().as_ref()));
            } else {
                warn!("Auth worker did not finish: {e}");
            }
        }
        info!("Session manager stopped");
    }

    /// Applies one auth event, routing a panic to the panic handler.
    ///
    /// A storage fault is retried with a short backoff. If the store keeps
    /// failing, the event is parked until [`Self::retry_pending_auth_events`]
    /// or the worker's timer lands it, or a newer event for the account
    /// replaces it.
    pub async fn process_auth_event(&self, event: ClientAuth) {
        self.auth.apply(event).await;
    }

    /// Number of accounts with an auth event the store has not accepted yet.
    #[must_use]
    pub fn pending_auth_events(&self) -> usize {
        self.auth.pending_len()
    }

    /// Tries every parked auth event once.
    pub async fn retry_pending_auth_events(&self) {
        self.auth.retry_pending().await;
    }

    /// Records a successful login.
    ///
    /// A new account gets a generated bridge password. An existing account
    /// keeps its bridge password and address mode and gets the new mailbox
    /// password and addresses. Any cached handle for the account is dropped.
    ///
    /// # Errors
    ///
    /// Returns the store error. Whatever the call already wrote is undone:
    /// a record it added is removed, an existing record gets its mailbox
    /// password and addresses back.
    pub async fn finish_login(
        &self,
        account_id: &str,
        login: &str,
        mailbox_password: &str,
        emails: &[String],
        auth: &Auth,
    ) -> Result<CredentialRecord> {
        let token = auth.api_token().to_string();
        let credentials = &self.credentials;

        let record = self
            .clients
            .evict_with(account_id, || async move {
                let previous = match credentials.get(account_id).await {
                    Ok(record) => Some(record),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                };

                let stored: Result<()> = async {
                    if previous.is_some() {
                        credentials
                            .update_password(account_id, mailbox_password)
                            .await?;
                        credentials.update_emails(account_id, emails).await?;
                    } else {
                        credentials
                            .add(
                                account_id,
                                login,
                                mailbox_password,
                                &generate_bridge_password(),
                                emails,
                            )
                            .await?;
                    }
                    credentials.update_token(account_id, &token).await
                }
                .await;

                if let Err(e) = stored {
                    undo_login(credentials.as_ref(), account_id, previous).await;
                    return Err(e);
                }
                credentials.get(account_id).await
            })
            .await?;

        info!(account_id, "Login finished");
        Ok(record)
    }

    /// Logs an account out, keeping its record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or a storage error.
    pub async fn logout(&self, account_id: &str) -> Result<()> {
        self.clients
            .evict_with(account_id, || self.credentials.logout(account_id))
            .await?;
        info!(account_id, "Logged out");
        Ok(())
    }

    /// Removes an account and its secrets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or a storage error.
    pub async fn delete_account(&self, account_id: &str) -> Result<()> {
        self.clients
            .evict_with(account_id, || self.credentials.delete(account_id))
            .await?;
        info!(account_id, "Deleted account");
        Ok(())
    }

    /// Flips an account between combined and split address mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or a storage error.
    pub async fn switch_address_mode(&self, account_id: &str) -> Result<()> {
        self.clients
            .evict_with(account_id, || self.credentials.switch_address_mode(account_id))
            .await?;
        info!(account_id, "Switched address mode");
        Ok(())
    }

    /// Checks credentials presented by a local IMAP/SMTP client.
    ///
    /// `username` may be the login name or any of the account's addresses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no account matches, and
    /// [`Error::Unauthenticated`] if the account is logged out or the
    /// password is wrong.
    pub async fn check_bridge_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<CredentialRecord> {
        for account_id in self.credentials.list().await? {
            let record = match self.credentials.get(&account_id).await {
                Ok(record) => record,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if !record.login.eq_ignore_ascii_case(username) && !record.has_email(username) {
                continue;
            }

            if !record.is_connected() {
                warn!(account_id = %account_id, "Bridge login for logged-out account");
                return Err(Error::Unauthenticated);
            }
            if !record.check_bridge_password(password) {
                warn!(account_id = %account_id, "Bridge login with wrong password");
                return Err(Error::Unauthenticated);
            }
            debug!(account_id = %account_id, "Bridge login accepted");
            return Ok(record);
        }
        Err(Error::NotFound(username.to_string()))
    }

    /// Stores the proxy preference and applies it to new handles.
    ///
    /// # Errors
    ///
    /// Returns the preference error. The policy is left unchanged then.
    pub fn set_proxy_allowed(&self, allowed: bool) -> Result<()> {
        self.preferences.set_bool(ALLOW_PROXY_KEY, allowed)?;
        self.clients.set_proxy_policy(ProxyPolicy::from(allowed));
        Ok(())
    }

    /// Logs every account out, drops all handles and wipes local data.
    ///
    /// # Errors
    ///
    /// Returns the first store or filesystem error.
    pub async fn clear_data(&self) -> Result<()> {
        for account_id in self.credentials.list().await? {
            match self.logout(&account_id).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.clients.clear().await;
        self.configer.clear_data()?;
        info!("Cleared all data");
        Ok(())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Puts the store back the way it was before a failed login.
async fn undo_login(
    credentials: &dyn CredentialsStorer,
    account_id: &str,
    previous: Option<CredentialRecord>,
) {
    let undone = match previous {
        None => match credentials.delete(account_id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        },
        Some(record) => match credentials
            .update_password(account_id, &record.mailbox_password)
            .await
        {
            Ok(()) => credentials.update_emails(account_id, &record.emails).await,
            Err(e) => Err(e),
        },
    };
    if let Err(e) = undone {
        error!(account_id, "Failed to undo partial login: {e}");
    }
}
