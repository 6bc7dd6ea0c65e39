//! Error types for token and session operations

/// Errors from token decoding, endpoint calls and session storage.
///
/// `Clone` so a single refresh outcome can be handed to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("refresh exchange rejected ({status}): {message}")]
    RefreshRejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("login rejected ({status}): {message}")]
    LoginRejected { status: u16, message: String },

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("session storage error: {0}")]
    Storage(String),
}

/// Result alias for session-auth operations.
pub type Result<T> = std::result::Result<T, Error>;
