//! Per-account credential storage.
//!
//! Records are cached in memory by [`CredentialStore`] and written through
//! to a [`CredentialBackend`]. The production backend keeps metadata in
//! `SQLite` and secrets in the system keyring.

mod backend;
mod keychain;
mod record;
mod sqlite;
mod store;

pub use backend::{CredentialBackend, MemoryBackend};
pub use keychain::{Keychain, KeyringKeychain, MemoryKeychain};
pub use record::{AddressMode, CredentialRecord, RECORD_VERSION, generate_bridge_password};
pub use sqlite::SqliteBackend;
pub use store::{CredentialStore, CredentialsStorer};
