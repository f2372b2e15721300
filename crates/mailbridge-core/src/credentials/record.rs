//! Credential record model.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use mailbridge_api::ApiToken;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Result;

/// Format version written into every record.
pub const RECORD_VERSION: &str = "1";

/// Length of generated bridge passwords.
const BRIDGE_PASSWORD_LEN: usize = 16;

/// How an account's addresses are exposed to local clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    /// All addresses share one mailbox.
    #[default]
    Combined,
    /// Each address gets its own mailbox.
    Split,
}

impl AddressMode {
    /// Returns the other mode.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Combined => Self::Split,
            Self::Split => Self::Combined,
        }
    }

    /// Storage name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::Split => "split",
        }
    }

    /// Parses a storage name, defaulting to combined.
    #[must_use]
    pub fn from_storage(s: &str) -> Self {
        match s {
            "split" => Self::Split,
            _ => Self::Combined,
        }
    }
}

/// Durable secrets and metadata for one account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    account_id: String,
    /// Login name used with the remote API.
    pub login: String,
    /// Addresses owned by the account; empty until the first sync.
    pub emails: Vec<String>,
    /// Stored session token (`"<uid>:<refresh_token>"`), empty when logged out.
    pub api_token: String,
    /// Password unlocking the remote mailbox keys.
    pub mailbox_password: String,
    /// Password local IMAP/SMTP clients use against the bridge.
    pub bridge_password: String,
    /// Address handling mode.
    pub address_mode: AddressMode,
    /// When the record was first added.
    pub created_at: DateTime<Utc>,
    /// Record format version.
    pub version: String,
}

impl CredentialRecord {
    /// Creates a logged-out record with no token yet.
    #[must_use]
    pub fn new(
        account_id: impl Into<String>,
        login: impl Into<String>,
        mailbox_password: impl Into<String>,
        bridge_password: impl Into<String>,
        emails: Vec<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            login: login.into(),
            emails,
            api_token: String::new(),
            mailbox_password: mailbox_password.into(),
            bridge_password: bridge_password.into(),
            address_mode: AddressMode::default(),
            created_at: Utc::now(),
            version: RECORD_VERSION.to_string(),
        }
    }

    /// Account identifier. Fixed for the life of the record.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Returns true if the record holds a session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.api_token.is_empty() && !self.mailbox_password.is_empty()
    }

    /// Forgets the session while keeping login, addresses and mode.
    pub fn clear_session(&mut self) {
        self.api_token.clear();
        self.mailbox_password.clear();
    }

    /// Parses the stored token.
    ///
    /// Returns `Ok(None)` when logged out.
    ///
    /// # Errors
    ///
    /// Returns an error if a non-empty token is malformed.
    pub fn split_api_token(&self) -> Result<Option<ApiToken>> {
        if self.api_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.api_token.parse::<ApiToken>()?))
    }

    /// First address of the account.
    #[must_use]
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(String::as_str)
    }

    /// Returns true if `address` belongs to the account (case-insensitive).
    #[must_use]
    pub fn has_email(&self, address: &str) -> bool {
        self.emails.iter().any(|e| e.eq_ignore_ascii_case(address))
    }

    /// Compares a candidate bridge password by digest.
    #[must_use]
    pub fn check_bridge_password(&self, candidate: &str) -> bool {
        Sha256::digest(self.bridge_password.as_bytes()) == Sha256::digest(candidate.as_bytes())
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("account_id", &self.account_id)
            .field("login", &self.login)
            .field("emails", &self.emails)
            .field("connected", &self.is_connected())
            .field("address_mode", &self.address_mode)
            .field("created_at", &self.created_at)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Generates a random bridge password for local clients.
#[must_use]
pub fn generate_bridge_password() -> String {
    let bytes: [u8; BRIDGE_PASSWORD_LEN] = rand::thread_rng().r#gen();
    let mut password = URL_SAFE_NO_PAD.encode(bytes);
    password.truncate(BRIDGE_PASSWORD_LEN);
    password
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn record() -> CredentialRecord {
        CredentialRecord::new(
            "u1",
            "login1",
            "mp",
            "bp",
            vec!["u1@x.com".to_string(), "alias@x.com".to_string()],
        )
    }

    mod address_mode_tests {
        use super::*;

        #[test]
        fn default_is_combined() {
            assert_eq!(AddressMode::default(), AddressMode::Combined);
        }

        #[test]
        fn toggle() {
            assert_eq!(AddressMode::Combined.toggled(), AddressMode::Split);
            assert_eq!(AddressMode::Split.toggled(), AddressMode::Combined);
        }

        #[test]
        fn storage_names() {
            for mode in [AddressMode::Combined, AddressMode::Split] {
                assert_eq!(AddressMode::from_storage(mode.as_str()), mode);
            }
            assert_eq!(AddressMode::from_storage("garbage"), AddressMode::Combined);
        }
    }

    mod record_tests {
        use super::*;

        #[test]
        fn new_is_not_connected() {
            let record = record();
            assert_eq!(record.account_id(), "u1");
            assert!(record.api_token.is_empty());
            assert!(!record.is_connected());
            assert_eq!(record.version, RECORD_VERSION);
            assert_eq!(record.split_api_token().unwrap(), None);
        }

        #[test]
        fn connected_with_token() {
            let mut record = record();
            record.api_token = "uid:refresh".to_string();
            assert!(record.is_connected());
            assert_eq!(
                record.split_api_token().unwrap(),
                Some(ApiToken::new("uid", "refresh"))
            );
        }

        #[test]
        fn malformed_token_is_an_error() {
            let mut record = record();
            record.api_token = "garbage".to_string();
            assert!(record.split_api_token().is_err());
        }

        #[test]
        fn clear_session_keeps_metadata() {
            let mut record = record();
            record.api_token = "uid:refresh".to_string();
            record.address_mode = AddressMode::Split;

            record.clear_session();

            assert!(!record.is_connected());
            assert!(record.api_token.is_empty());
            assert!(record.mailbox_password.is_empty());
            assert_eq!(record.login, "login1");
            assert_eq!(record.emails.len(), 2);
            assert_eq!(record.address_mode, AddressMode::Split);
            assert_eq!(record.bridge_password, "bp");
        }

        #[test]
        fn emails() {
            let record = record();
            assert_eq!(record.primary_email(), Some("u1@x.com"));
            assert!(record.has_email("ALIAS@x.com"));
            assert!(!record.has_email("other@x.com"));

            let empty = CredentialRecord::new("u2", "l", "m", "b", Vec::new());
            assert_eq!(empty.primary_email(), None);
        }

        #[test]
        fn bridge_password_check() {
            let record = record();
            assert!(record.check_bridge_password("bp"));
            assert!(!record.check_bridge_password("bq"));
            assert!(!record.check_bridge_password(""));
        }

        #[test]
        fn debug_redacts_secrets() {
            let mut record = record();
            record.api_token = "uid:refresh-secret".to_string();
            let debug = format!("{record:?}");
            assert!(!debug.contains("refresh-secret"));
            assert!(!debug.contains("\"mp\""));
            assert!(!debug.contains("\"bp\""));
            assert!(debug.contains("login1"));
        }
    }

    mod password_tests {
        use super::*;

        #[test]
        fn generated_length_and_alphabet() {
            let password = generate_bridge_password();
            assert_eq!(password.len(), BRIDGE_PASSWORD_LEN);
            assert!(
                password
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
        }

        #[test]
        fn generated_passwords_differ() {
            assert_ne!(generate_bridge_password(), generate_bridge_password());
        }
    }
}
