//! Client handles and the seam used to construct them.
//!
//! A [`Client`] is a live session object bound to one account (or the
//! anonymous pre-login handle). The bridge never constructs handles
//! directly; it goes through a [`ClientFactory`] so transports and test
//! fakes can be swapped in.

mod handle;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::proxy::ProxyPolicy;
use crate::token::{ApiToken, Auth};

pub use handle::{ApiClient, DefaultClientFactory};

/// Notification that an account's session changed.
///
/// `auth: Some(..)` carries a refreshed token; `auth: None` means the remote
/// session was revoked and the account must be logged out.
#[derive(Debug, Clone)]
pub struct ClientAuth {
    /// Account the event belongs to.
    pub user_id: String,
    /// New auth, or `None` on revocation.
    pub auth: Option<Auth>,
}

impl ClientAuth {
    /// Creates a refresh event.
    #[must_use]
    pub fn refreshed(user_id: impl Into<String>, auth: Auth) -> Self {
        Self {
            user_id: user_id.into(),
            auth: Some(auth),
        }
    }

    /// Creates a revocation event.
    #[must_use]
    pub fn revoked(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth: None,
        }
    }
}

/// Sending half of the bridge-wide auth event channel.
pub type AuthSender = UnboundedSender<ClientAuth>;

/// A session handle to the remote mail API.
pub trait Client: Send + Sync + fmt::Debug {
    /// Account this handle is bound to, `None` for the anonymous handle.
    fn user_id(&self) -> Option<&str>;

    /// Current durable token, if any.
    fn api_token(&self) -> Option<ApiToken>;

    /// Proxy policy captured when the handle was built.
    fn proxy_policy(&self) -> ProxyPolicy;

    /// Configuration the handle was built with.
    fn config(&self) -> &ClientConfig;

    /// Installs new auth after login or a token refresh.
    ///
    /// Account-bound handles keep the auth and report the change on the
    /// auth channel. The anonymous handle is shared by every pre-login flow
    /// and keeps nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth channel has been closed.
    fn update_auth(&self, auth: Auth) -> Result<()>;

    /// Drops the session locally and reports the revocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth channel has been closed.
    fn revoke(&self) -> Result<()>;

    /// Returns true if the handle carries a token.
    fn is_authenticated(&self) -> bool {
        self.api_token().is_some()
    }

    /// Returns the token or fails with [`Error::Unauthenticated`].
    ///
    /// Handles are built lazily, so this is where a missing credential
    /// surfaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthenticated`] if there is no token.
    fn ensure_authenticated(&self) -> Result<ApiToken> {
        self.api_token().ok_or(Error::Unauthenticated)
    }
}

/// Everything needed to build one handle.
#[derive(Debug, Clone)]
pub struct ClientParams {
    /// Account the handle is for; `None` builds the anonymous handle.
    pub user_id: Option<String>,
    /// Stored token to seed the session with.
    pub token: Option<ApiToken>,
    /// Proxy policy at construction time.
    pub proxy: ProxyPolicy,
    /// API configuration.
    pub config: ClientConfig,
    /// Where auth changes are reported.
    pub auth_sink: AuthSender,
}

/// Builds client handles.
pub trait ClientFactory: Send + Sync {
    /// Builds a handle from the given parameters.
    fn build(&self, params: ClientParams) -> Arc<dyn Client>;
}
