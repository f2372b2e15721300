//! Client handle management.
//!
//! The [`ClientRegistry`] caches one handle per account, builds handles
//! under the current [`ProxyGate`] policy and owns the [`AuthChannel`] that
//! every handle reports auth changes on.

mod channel;
mod proxy;
mod registry;

pub use channel::AuthChannel;
pub use proxy::{ProxyGate, ProxySnapshot};
pub use registry::{ClientManager, ClientRegistry};
