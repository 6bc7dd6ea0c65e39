//! Login, refresh and logout calls against the backend
//!
//! These are the only requests that bypass the session controller: login has
//! no session yet, refresh is what the controller falls back on, and logout
//! must never be retried or trigger another forced logout.

use common::Secret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::constants::{
    CSRF_HEADER, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, SUBSCRIPTION_EXPIRED_CODE,
};
use crate::error::{Error, Result};
use crate::store::TokenPair;

/// Credentials posted to the login endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: Secret<String>,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<Secret<String>>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Result of a login attempt that reached the backend.
///
/// A lapsed subscription is not a credential failure: the account is valid
/// but has to go through renewal, so it gets its own variant instead of an
/// error.
#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated { user: Value, tokens: TokenPair },
    SubscriptionExpired {
        end_date: Option<String>,
        message: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(default)]
    user: Value,
    access_token: Secret<String>,
    refresh_token: Secret<String>,
}

/// JSON error body as returned by the backend.
///
/// Every field is optional; bodies that are not JSON objects parse to the
/// default (all `None`).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default, alias = "errorCode")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default, alias = "endDate")]
    pub subscription_end_date: Option<String>,
}

impl ErrorBody {
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// Human-readable message: `message`, else a string `error` field.
    pub fn message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .filter(|m| !m.is_empty())
            .or_else(|| self.error.as_ref().and_then(Value::as_str))
    }

    pub fn code_is(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

/// Fallback message for error responses without a usable body.
pub fn http_error_message(status: u16) -> String {
    format!("HTTP error! status: {status}")
}

/// Join an endpoint onto the API base URL. Absolute URLs pass through.
pub fn endpoint_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_owned();
    }
    let base = base_url.trim_end_matches('/');
    if endpoint.starts_with('/') {
        format!("{base}{endpoint}")
    } else {
        format!("{base}/{endpoint}")
    }
}

/// Post credentials to the login endpoint.
pub async fn login(
    client: &reqwest::Client,
    base_url: &str,
    request: &LoginRequest,
) -> Result<LoginOutcome> {
    let response = client
        .post(endpoint_url(base_url, LOGIN_PATH))
        .json(request)
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Http(format!("reading login response: {e}")))?;

    if status.is_success() {
        let parsed: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| Error::UnexpectedResponse(format!("invalid login response: {e}")))?;
        debug!(email = %request.email, "login accepted");
        return Ok(LoginOutcome::Authenticated {
            user: parsed.user,
            tokens: TokenPair {
                access_token: parsed.access_token,
                refresh_token: parsed.refresh_token,
            },
        });
    }

    let error = ErrorBody::parse(&body);
    if error.code_is(SUBSCRIPTION_EXPIRED_CODE) {
        info!(
            email = %request.email,
            end_date = ?error.subscription_end_date,
            "login refused: subscription expired"
        );
        return Ok(LoginOutcome::SubscriptionExpired {
            end_date: error.subscription_end_date.clone(),
            message: error
                .message()
                .unwrap_or("subscription expired")
                .to_owned(),
        });
    }

    Err(Error::LoginRejected {
        status: status.as_u16(),
        message: error
            .message()
            .map(str::to_owned)
            .unwrap_or_else(|| http_error_message(status.as_u16())),
    })
}

/// Exchange a refresh token for a new access/refresh pair.
///
/// The refresh token is single use: on success the old one is dead and the
/// returned pair must replace it.
pub async fn refresh_token(
    client: &reqwest::Client,
    base_url: &str,
    refresh: &Secret<String>,
) -> Result<TokenPair> {
    let response = client
        .post(endpoint_url(base_url, REFRESH_PATH))
        .json(&serde_json::json!({ "refreshToken": refresh.expose_str() }))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        let error = ErrorBody::parse(&body);
        return Err(Error::RefreshRejected {
            status: status.as_u16(),
            code: error.code.clone(),
            message: error
                .message()
                .map(str::to_owned)
                .unwrap_or_else(|| http_error_message(status.as_u16())),
        });
    }

    response
        .json::<TokenPair>()
        .await
        .map_err(|e| Error::UnexpectedResponse(format!("invalid refresh response: {e}")))
}

/// Tell the backend the session is over. Best effort: callers log failures
/// and tear down local state regardless.
pub async fn logout(
    client: &reqwest::Client,
    base_url: &str,
    user_id: Option<&str>,
    bearer: Option<&Secret<String>>,
    csrf: Option<&Secret<String>>,
) -> Result<()> {
    let mut request = client
        .post(endpoint_url(base_url, LOGOUT_PATH))
        .json(&serde_json::json!({ "userId": user_id }));
    if let Some(token) = bearer {
        request = request.bearer_auth(token.expose_str());
    }
    if let Some(csrf) = csrf {
        request = request.header(CSRF_HEADER, csrf.expose_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Http(format!("logout returned {status}")));
    }
    Ok(())
}
