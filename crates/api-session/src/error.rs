//! Error types for session-managed API calls

/// Errors returned by the session controller.
///
/// `NoRefreshToken`, `RefreshExchangeFailed`, `AuthExpired` and `AuthInvalid`
/// mean the session is over: the controller has already forced a logout
/// before returning them. Everything else leaves session state untouched.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("session expired: no refresh token available")]
    NoRefreshToken,

    /// `status` is `None` when the exchange never got an HTTP response.
    #[error("session expired: token refresh failed: {message}")]
    RefreshExchangeFailed {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("session expired: access token still rejected after refresh: {0}")]
    AuthExpired(String),

    #[error("session expired: {0}")]
    AuthInvalid(String),

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("invalid request body: {0}")]
    Encode(String),

    #[error("session storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Whether this error ended the session.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            Error::NoRefreshToken
                | Error::RefreshExchangeFailed { .. }
                | Error::AuthExpired(_)
                | Error::AuthInvalid(_)
        )
    }

    /// HTTP status of a generic request failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::RefreshExchangeFailed { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<session_auth::Error> for Error {
    fn from(err: session_auth::Error) -> Self {
        match err {
            session_auth::Error::Http(msg) => Error::Transport(msg),
            session_auth::Error::RefreshRejected {
                status,
                code,
                message,
            } => Error::RefreshExchangeFailed {
                status: Some(status),
                code,
                message,
            },
            session_auth::Error::LoginRejected { status, message } => {
                Error::Http { status, message }
            }
            session_auth::Error::InvalidToken(msg)
            | session_auth::Error::UnexpectedResponse(msg) => Error::Decode(msg),
            session_auth::Error::Storage(msg) => Error::Storage(msg),
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ending_variants_are_flagged() {
        assert!(Error::NoRefreshToken.is_session_expired());
        assert!(Error::AuthInvalid("revoked".into()).is_session_expired());
        assert!(
            Error::RefreshExchangeFailed {
                status: Some(401),
                code: None,
                message: "nope".into()
            }
            .is_session_expired()
        );
        assert!(
            !Error::Http {
                status: 500,
                message: "boom".into()
            }
            .is_session_expired()
        );
        assert!(!Error::Transport("refused".into()).is_session_expired());
    }

    #[test]
    fn http_error_displays_server_message() {
        let err = Error::Http {
            status: 404,
            message: "Event not found".into(),
        };
        assert_eq!(err.to_string(), "Event not found");
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn refresh_rejection_maps_with_status() {
        let err: Error = session_auth::Error::RefreshRejected {
            status: 401,
            code: Some("REFRESH_TOKEN_EXPIRED".into()),
            message: "expired".into(),
        }
        .into();
        assert!(err.is_session_expired());
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().starts_with("session expired"));
    }
}
