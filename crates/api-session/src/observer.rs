//! Forced-logout notification

use crate::error::Error;

/// Why the controller ended the session on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutReason {
    /// A refresh was needed but no refresh token was held.
    NoRefreshToken,
    /// The refresh exchange failed.
    RefreshFailed { message: String },
    /// The backend rejected the access token in a way a refresh cannot fix,
    /// or kept rejecting it after a refresh.
    TokenRejected { message: String },
}

impl LogoutReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            LogoutReason::NoRefreshToken => "no_refresh_token",
            LogoutReason::RefreshFailed { .. } => "refresh_failed",
            LogoutReason::TokenRejected { .. } => "token_rejected",
        }
    }
}

impl From<&Error> for LogoutReason {
    fn from(err: &Error) -> Self {
        match err {
            Error::NoRefreshToken => LogoutReason::NoRefreshToken,
            Error::RefreshExchangeFailed { message, .. } => LogoutReason::RefreshFailed {
                message: message.clone(),
            },
            other => LogoutReason::TokenRejected {
                message: other.to_string(),
            },
        }
    }
}

/// Receives forced-logout notifications.
///
/// Called once per ended session, after local state has been torn down.
/// Implementations should be idempotent anyway: a session restored and lost
/// again produces another call. Not called for user-initiated logout.
pub trait SessionObserver: Send + Sync {
    fn on_unauthorized(&self, reason: &LogoutReason);
}

impl<F> SessionObserver for F
where
    F: Fn(&LogoutReason) + Send + Sync,
{
    fn on_unauthorized(&self, reason: &LogoutReason) {
        self(reason)
    }
}
