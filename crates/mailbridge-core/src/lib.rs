//! # mailbridge-core
//!
//! Session core of the mail bridge.
//!
//! This crate provides:
//! - **Credential store** - per-account records cached in memory and written
//!   through to `SQLite` plus the system keyring
//! - **Client registry** - one cached API handle per account, rebuilt after
//!   auth changes and proxy policy flips
//! - **Auth event channel** - the single queue every handle reports token
//!   refreshes and revocations on
//! - **Capabilities** - configuration, preferences and the panic hook
//! - **Session manager** - login, logout, deletion and bridge-login checks,
//!   plus the background auth worker

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cancel;
pub mod clients;
pub mod config;
pub mod credentials;
mod error;
pub mod panic;
pub mod preferences;
mod session;
mod worker;

pub use cancel::cancellable;
pub use clients::{AuthChannel, ClientManager, ClientRegistry, ProxyGate, ProxySnapshot};
pub use config::{Configer, DirConfig};
pub use credentials::{
    AddressMode, CredentialBackend, CredentialRecord, CredentialStore, CredentialsStorer,
    Keychain, KeyringKeychain, MemoryBackend, MemoryKeychain, SqliteBackend,
    generate_bridge_password,
};
pub use error::{Error, Result, StorageError};
pub use panic::{LoggingPanicHandler, PanicHandler};
pub use preferences::{ALLOW_PROXY_KEY, FilePreferences, MemoryPreferences, PreferenceProvider};
pub use session::SessionManager;
