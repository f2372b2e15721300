//! Default client handle.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{AuthSender, Client, ClientAuth, ClientFactory, ClientParams};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::proxy::ProxyPolicy;
use crate::token::{ApiToken, Auth};

/// Handle holding session state for one account.
///
/// Transport is supplied elsewhere; this type owns the token, the proxy
/// snapshot and the duty to report auth changes.
#[derive(Debug)]
pub struct ApiClient {
    user_id: Option<String>,
    token: RwLock<Option<ApiToken>>,
    proxy: ProxyPolicy,
    config: ClientConfig,
    auth_sink: AuthSender,
}

impl ApiClient {
    /// Creates a handle from construction parameters.
    #[must_use]
    pub fn new(params: ClientParams) -> Self {
        Self {
            user_id: params.user_id,
            token: RwLock::new(params.token),
            proxy: params.proxy,
            config: params.config,
            auth_sink: params.auth_sink,
        }
    }

    fn report(&self, event: ClientAuth) -> Result<()> {
        self.auth_sink
            .send(event)
            .map_err(|_| Error::ChannelClosed)
    }
}

impl Client for ApiClient {
    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn api_token(&self) -> Option<ApiToken> {
        self.token.read().clone()
    }

    fn proxy_policy(&self) -> ProxyPolicy {
        self.proxy
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn update_auth(&self, auth: Auth) -> Result<()> {
        // The anonymous handle is shared; the login flow keeps the auth instead.
        let Some(user_id) = &self.user_id else {
            debug!("Ignoring auth on anonymous client");
            return Ok(());
        };

        *self.token.write() = Some(auth.api_token());
        debug!(account_id = %user_id, "Reporting refreshed auth");
        self.report(ClientAuth::refreshed(user_id.clone(), auth))
    }

    fn revoke(&self) -> Result<()> {
        self.token.write().take();

        let Some(user_id) = &self.user_id else {
            return Ok(());
        };
        debug!(account_id = %user_id, "Reporting revoked session");
        self.report(ClientAuth::revoked(user_id.clone()))
    }
}

/// Factory producing [`ApiClient`] handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClientFactory;

impl ClientFactory for DefaultClientFactory {
    fn build(&self, params: ClientParams) -> Arc<dyn Client> {
        Arc::new(ApiClient::new(params))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn params(user_id: Option<&str>, sink: AuthSender) -> ClientParams {
        ClientParams {
            user_id: user_id.map(str::to_string),
            token: None,
            proxy: ProxyPolicy::Allowed,
            config: ClientConfig::with_default_host("test").unwrap(),
            auth_sink: sink,
        }
    }

    #[test]
    fn test_unauthenticated_handle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = DefaultClientFactory.build(params(Some("u1"), tx));
        assert!(!client.is_authenticated());
        assert!(matches!(
            client.ensure_authenticated(),
            Err(Error::Unauthenticated)
        ));
        assert_eq!(client.proxy_policy(), ProxyPolicy::Allowed);
    }

    #[test]
    fn test_update_auth_reports_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = DefaultClientFactory.build(params(Some("u1"), tx));

        client.update_auth(Auth::new("uid", "access", "refresh")).unwrap();

        assert_eq!(
            client.ensure_authenticated().unwrap(),
            ApiToken::new("uid", "refresh")
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.auth.unwrap().refresh_token, "refresh");
    }

    #[test]
    fn test_anonymous_handle_keeps_no_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = DefaultClientFactory.build(params(None, tx));

        client.update_auth(Auth::new("uid", "access", "refresh")).unwrap();

        assert!(!client.is_authenticated());
        assert!(matches!(
            client.ensure_authenticated(),
            Err(Error::Unauthenticated)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_revoke_reports_and_clears() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut p = params(Some("u2"), tx);
        p.token = Some(ApiToken::new("uid", "refresh"));
        let client = DefaultClientFactory.build(p);

        client.revoke().unwrap();

        assert!(!client.is_authenticated());
        let event = rx.try_recv().unwrap();
        assert_eq!(event.user_id, "u2");
        assert!(event.auth.is_none());
    }

    #[test]
    fn test_closed_channel_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let client = DefaultClientFactory.build(params(Some("u3"), tx));

        assert!(matches!(
            client.update_auth(Auth::new("uid", "a", "r")),
            Err(Error::ChannelClosed)
        ));
    }
}
