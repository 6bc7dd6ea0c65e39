//! In-process fake of the booking admin backend for tests
//!
//! Implements the token contract: one valid access token and one valid
//! refresh token at a time, single-use refresh rotation, CSRF issuance and a
//! catch-all business route that enforces bearer and CSRF checks and echoes
//! what it saw.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Mint an unsigned JWT-shaped token.
pub(crate) fn jwt(sub: &str, exp: u64, jti: u32) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": sub, "exp": exp, "jti": jti }).to_string());
    format!("{header}.{payload}.sig")
}

pub(crate) fn now() -> u64 {
    session_auth::claims::unix_now()
}

/// Access token valid for an hour.
pub(crate) fn fresh_token(jti: u32) -> String {
    jwt("7", now() + 3600, jti)
}

/// Access token that expired an hour ago.
pub(crate) fn expired_token(jti: u32) -> String {
    jwt("7", now().saturating_sub(3600), jti)
}

/// One request as seen by the business route.
#[derive(Debug, Clone)]
pub(crate) struct Seen {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub csrf: Option<String>,
    pub content_type: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Backend {
    pub access: String,
    pub refresh: String,
    pub issued: u32,
    pub revoked: Vec<String>,
    pub csrf: Option<String>,
    /// Reject this many state-changing requests with a CSRF error regardless
    /// of the header.
    pub csrf_rejections: u32,
    pub csrf_fetch_fails: bool,
    pub refresh_delay: Duration,
    /// Answer every refresh with this status and `REFRESH_TOKEN_REVOKED`.
    pub refresh_failure: Option<u16>,
    pub subscription_expired: bool,
    /// Answer every bearer on business routes with `TOKEN_EXPIRED`.
    pub always_token_expired: bool,
    pub refresh_calls: u32,
    pub csrf_calls: u32,
    pub logout_calls: u32,
    pub csrf_bearer: Option<String>,
    pub logout_body: Option<Value>,
    pub requests: Vec<Seen>,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            access: fresh_token(1),
            refresh: "rt_1".into(),
            issued: 1,
            revoked: Vec::new(),
            csrf: None,
            csrf_rejections: 0,
            csrf_fetch_fails: false,
            refresh_delay: Duration::ZERO,
            refresh_failure: None,
            subscription_expired: false,
            always_token_expired: false,
            refresh_calls: 0,
            csrf_calls: 0,
            logout_calls: 0,
            csrf_bearer: None,
            logout_body: None,
            requests: Vec::new(),
        }
    }
}

type Shared = Arc<Mutex<Backend>>;

pub(crate) struct MockBackend {
    pub url: String,
    state: Shared,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/login", post(login))
            .route("/refresh-token", post(refresh))
            .route("/csrf-token", get(csrf))
            .route("/logout", post(logout))
            .fallback(business)
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { url, state }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Backend) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.with(|b| b.requests.clone())
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn error(status: StatusCode, code: Option<&str>, message: &str) -> Response {
    (status, Json(json!({ "code": code, "message": message }))).into_response()
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let backend = state.lock().unwrap();
    if backend.subscription_expired {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "code": "SUBSCRIPTION_EXPIRED",
                "message": "Your subscription has expired",
                "subscriptionEndDate": "2026-09-30"
            })),
        )
            .into_response();
    }
    if body["password"] != "hunter2" {
        return error(StatusCode::UNAUTHORIZED, None, "Invalid email or password");
    }
    Json(json!({
        "user": { "id": 7, "email": body["email"] },
        "accessToken": backend.access,
        "refreshToken": backend.refresh,
    }))
    .into_response()
}

async fn refresh(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let delay = {
        let mut backend = state.lock().unwrap();
        backend.refresh_calls += 1;
        backend.refresh_delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut backend = state.lock().unwrap();
    if let Some(status) = backend.refresh_failure {
        let status = StatusCode::from_u16(status).unwrap();
        return error(status, Some("REFRESH_TOKEN_REVOKED"), "Refresh token revoked");
    }
    if body["refreshToken"] != backend.refresh.as_str() {
        return error(
            StatusCode::UNAUTHORIZED,
            Some("REFRESH_TOKEN_REVOKED"),
            "Refresh token revoked",
        );
    }
    backend.issued += 1;
    backend.access = fresh_token(backend.issued);
    backend.refresh = format!("rt_{}", backend.issued);
    Json(json!({ "accessToken": backend.access, "refreshToken": backend.refresh })).into_response()
}

async fn csrf(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut backend = state.lock().unwrap();
    backend.csrf_calls += 1;
    backend.csrf_bearer = header(&headers, "authorization");
    if backend.csrf_fetch_fails {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let token = format!("csrf-{}", backend.csrf_calls);
    backend.csrf = Some(token.clone());
    Json(json!({ "csrfToken": token })).into_response()
}

async fn logout(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut backend = state.lock().unwrap();
    backend.logout_calls += 1;
    backend.logout_body = Some(body);
    StatusCode::NO_CONTENT.into_response()
}

async fn business(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut backend = state.lock().unwrap();
    let seen = Seen {
        method: method.to_string(),
        path: uri.path().to_owned(),
        authorization: header(&headers, "authorization"),
        csrf: header(&headers, "x-csrf-token"),
        content_type: header(&headers, "content-type"),
        request_id: header(&headers, "x-request-id"),
    };
    backend.requests.push(seen.clone());

    let bearer = seen
        .authorization
        .as_deref()
        .and_then(|v| v.strip_prefix("Bearer "));
    match bearer {
        Some(_) if backend.always_token_expired => {
            return error(StatusCode::UNAUTHORIZED, Some("TOKEN_EXPIRED"), "jwt expired");
        }
        Some(token) if token == backend.access => {}
        Some(token) if backend.revoked.iter().any(|r| r == token) => {
            return error(StatusCode::UNAUTHORIZED, Some("TOKEN_REVOKED"), "Token revoked");
        }
        Some(_) => {
            return error(StatusCode::UNAUTHORIZED, Some("TOKEN_EXPIRED"), "jwt expired");
        }
        None => return error(StatusCode::UNAUTHORIZED, None, "Authentication required"),
    }

    let state_changing = !(method == Method::GET || method == Method::HEAD);
    if state_changing {
        if backend.csrf_rejections > 0 {
            backend.csrf_rejections -= 1;
            return error(StatusCode::FORBIDDEN, Some("EBADCSRFTOKEN"), "invalid csrf token");
        }
        if seen.csrf.is_none() || seen.csrf != backend.csrf {
            return error(StatusCode::FORBIDDEN, Some("EBADCSRFTOKEN"), "invalid csrf token");
        }
    }

    match seen.path.as_str() {
        "/validation" => error(StatusCode::UNPROCESSABLE_ENTITY, None, "Title is required"),
        "/broken" => (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").into_response(),
        "/empty" => StatusCode::NO_CONTENT.into_response(),
        _ => {
            let echoed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            Json(json!({
                "method": seen.method,
                "path": seen.path,
                "body": echoed,
                "bodyLength": body.len(),
            }))
            .into_response()
        }
    }
}
