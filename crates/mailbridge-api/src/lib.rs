//! # mailbridge-api
//!
//! Vocabulary shared between the bridge session core and the remote mail
//! API client.
//!
//! ## Contents
//!
//! - **Tokens**: [`Auth`] as returned by login/refresh, and its durable
//!   projection [`ApiToken`] (`"<uid>:<refresh_token>"`)
//! - **Configuration**: [`ClientConfig`] describing the API endpoint
//! - **Proxy policy**: [`ProxyPolicy`], captured by every handle at build time
//! - **Handles**: the [`Client`] trait, the [`ClientFactory`] construction
//!   seam and the default [`ApiClient`]
//! - **Auth events**: [`ClientAuth`], reported by handles whenever their
//!   session is refreshed or revoked
//!
//! ## Example
//!
//! ```ignore
//! use mailbridge_api::{ApiToken, Auth};
//!
//! let auth = Auth::new("uid", "access", "refresh").with_expires_in(3600);
//! let stored = auth.api_token().to_string();
//! let token: ApiToken = stored.parse()?;
//! ```
//!
//! Wire-level request handling lives outside this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
mod error;
pub mod proxy;
pub mod token;

pub use client::{
    ApiClient, AuthSender, Client, ClientAuth, ClientFactory, ClientParams, DefaultClientFactory,
};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use proxy::ProxyPolicy;
pub use token::{ApiToken, Auth};
