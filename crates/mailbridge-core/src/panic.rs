//! Hook for faults recovered at a task boundary.

use std::any::Any;

use tracing::error;

/// Receives recovered panics.
///
/// Implementations must return promptly and must not panic themselves; they
/// may be called from any task concurrently.
pub trait PanicHandler: Send + Sync {
    /// Called once per recovered panic.
    fn handle_panic(&self, message: &str);
}

/// [`PanicHandler`] that logs the panic and carries on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPanicHandler;

impl PanicHandler for LoggingPanicHandler {
    fn handle_panic(&self, message: &str) {
        error!(panic = message, "Recovered from panic");
    }
}

/// Extracts the message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
