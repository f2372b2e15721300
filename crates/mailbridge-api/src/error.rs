//! Error types for API client operations.

/// Result type alias for API client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// API client error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The handle carries no usable token.
    #[error("Client is not authenticated")]
    Unauthenticated,

    /// Token expired.
    #[error("Token expired")]
    TokenExpired,

    /// A stored token could not be parsed.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The auth event channel has no consumer anymore.
    #[error("Auth channel closed")]
    ChannelClosed,

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Creates an invalid token error.
    #[must_use]
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken(reason.into())
    }

    /// Returns true if the error means the caller must log in again.
    #[must_use]
    pub const fn requires_relogin(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::TokenExpired | Self::InvalidToken(_)
        )
    }
}
