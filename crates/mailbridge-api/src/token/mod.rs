//! Session token types.
//!
//! An [`Auth`] is what the remote API hands back after login or a refresh.
//! Only its durable part, the [`ApiToken`] (session UID plus refresh token),
//! is kept in credential records; access tokens are re-derived on demand.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between session UID and refresh token in the stored form.
const TOKEN_SEPARATOR: char = ':';

/// Durable session secret: session UID and refresh token.
///
/// Stored as `"<uid>:<refresh_token>"`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiToken {
    /// Session UID assigned by the API.
    pub uid: String,
    /// Refresh token for the session.
    pub refresh_token: String,
}

impl ApiToken {
    /// Creates a new token from its parts.
    #[must_use]
    pub fn new(uid: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Display for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{TOKEN_SEPARATOR}{}", self.uid, self.refresh_token)
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("uid", &self.uid)
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

impl FromStr for ApiToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (uid, refresh) = s
            .split_once(TOKEN_SEPARATOR)
            .ok_or_else(|| Error::invalid_token("missing separator"))?;

        if uid.is_empty() {
            return Err(Error::invalid_token("empty session uid"));
        }
        if refresh.is_empty() {
            return Err(Error::invalid_token("empty refresh token"));
        }

        Ok(Self::new(uid, refresh))
    }
}

/// Authentication state returned by the API after login or refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct Auth {
    /// Session UID.
    pub uid: String,
    /// Access token string.
    pub access_token: String,
    /// Refresh token for obtaining new access tokens.
    pub refresh_token: String,
    /// Expiration time of the access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Scope granted by the API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Auth {
    /// Creates a new auth value.
    #[must_use]
    pub fn new(
        uid: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
            scope: None,
        }
    }

    /// Sets the expiration time from a lifetime in seconds.
    #[must_use]
    pub fn with_expires_in(mut self, secs: u32) -> Self {
        self.expires_at = Some(Utc::now() + Duration::seconds(i64::from(secs)));
        self
    }

    /// Sets the expiration time.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Checks if the access token is expired (with 60 second buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + Duration::seconds(60) >= exp)
    }

    /// Returns the durable part of this auth.
    #[must_use]
    pub fn api_token(&self) -> ApiToken {
        ApiToken::new(self.uid.clone(), self.refresh_token.clone())
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("uid", &self.uid)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_api_token_display_and_parse() {
        let token = ApiToken::new("uid-1", "refresh-1");
        assert_eq!(token.to_string(), "uid-1:refresh-1");

        let parsed: ApiToken = "uid-1:refresh-1".parse().unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn test_api_token_refresh_may_contain_separator() {
        let parsed: ApiToken = "uid:abc:def".parse().unwrap();
        assert_eq!(parsed.uid, "uid");
        assert_eq!(parsed.refresh_token, "abc:def");
    }

    #[test]
    fn test_api_token_rejects_malformed() {
        assert!(matches!(
            "no-separator".parse::<ApiToken>(),
            Err(Error::InvalidToken(_))
        ));
        assert!(":refresh".parse::<ApiToken>().is_err());
        assert!("uid:".parse::<ApiToken>().is_err());
        assert!("".parse::<ApiToken>().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let auth = Auth::new("uid", "access-secret", "refresh-secret");
        let debug = format!("{auth:?}");
        assert!(!debug.contains("access-secret"));
        assert!(!debug.contains("refresh-secret"));

        let token = auth.api_token();
        assert!(!format!("{token:?}").contains("refresh-secret"));
    }

    #[test]
    fn test_auth_expiration() {
        let expired =
            Auth::new("uid", "a", "r").with_expires_at(Utc::now() - Duration::seconds(120));
        assert!(expired.is_expired());

        let valid = Auth::new("uid", "a", "r").with_expires_in(3600);
        assert!(!valid.is_expired());

        let no_expiry = Auth::new("uid", "a", "r");
        assert!(!no_expiry.is_expired());
    }

    #[test]
    fn test_auth_projects_api_token() {
        let auth = Auth::new("uid-9", "access", "refresh-9").with_scope("full");
        assert_eq!(auth.api_token(), ApiToken::new("uid-9", "refresh-9"));
    }
}
