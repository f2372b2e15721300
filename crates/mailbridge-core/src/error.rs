//! Error types for the session core.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Account not found.
    #[error("Account not found: {0}")]
    NotFound(String),

    /// Account already exists.
    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    /// Durable storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Operation needs a valid session.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The caller canceled the operation.
    #[error("Operation canceled")]
    Canceled,

    /// Invalid argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// API client error.
    #[error("API error: {0}")]
    Api(mailbridge_api::Error),
}

impl Error {
    /// Returns true for [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if durable storage failed.
    #[must_use]
    pub const fn is_storage_fault(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<mailbridge_api::Error> for Error {
    fn from(err: mailbridge_api::Error) -> Self {
        match err {
            mailbridge_api::Error::Unauthenticated => Self::Unauthenticated,
            other => Self::Api(other),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.into())
    }
}

impl From<keyring::Error> for Error {
    fn from(err: keyring::Error) -> Self {
        Self::Storage(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.into())
    }
}

/// Failures of the durable credential storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// System keyring failed.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing store refused the operation (locked, read-only, ...).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The persistence task did not run to completion.
    #[error("Persistence task failed: {0}")]
    Task(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
