//! Session controller
//!
//! `SessionClient` is the only entry point the rest of the application
//! uses. Every call goes through `request`, which layers the recovery
//! policy on top of the executor:
//!
//! 1. state-changing call without a cached CSRF token: fetch one
//! 2. access token expired locally: refresh before sending
//! 3. send
//! 4. CSRF rejection: refetch and resend once
//! 5. refreshable 401: refresh and resend once
//! 6. terminal 401, failed refresh, or a second refreshable 401: forced
//!    logout
//!
//! Each failure class is retried at most once per call.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use common::Secret;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use session_auth::{
    DEFAULT_EXPIRY_MARGIN, LoginOutcome, LoginRequest, PersistedSession, SessionPersistence,
    TokenStore,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::csrf::CsrfCoordinator;
use crate::error::{Error, Result};
use crate::executor::{ApiRequest, Outcome, RequestBody, RequestExecutor, UploadPart};
use crate::metrics;
use crate::observer::{LogoutReason, SessionObserver};
use crate::refresh::RefreshCoordinator;

/// Connection settings for one backend.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    /// Tokens are treated as expired this long before their `exp`.
    pub expiry_margin: Duration,
    /// Whole-request timeout. `None` leaves it to the transport.
    pub request_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            expiry_margin: DEFAULT_EXPIRY_MARGIN,
            request_timeout: None,
        }
    }

    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// HTTP client with a cookie jar, so credentialed requests carry whatever
/// session cookies the backend sets alongside the CSRF token.
pub fn build_http_client(config: &SessionConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().cookie_store(true);
    if let Some(timeout) = config.request_timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| Error::Transport(format!("building HTTP client: {e}")))
}

pub struct SessionClientBuilder {
    config: SessionConfig,
    http: Option<reqwest::Client>,
    persistence: Option<SessionPersistence>,
}

impl SessionClientBuilder {
    /// Use this HTTP client instead of building one from the config.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Persist the session so it survives restarts.
    pub fn persistence(mut self, persistence: SessionPersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn build(self) -> Result<SessionClient> {
        let http = match self.http {
            Some(http) => http,
            None => build_http_client(&self.config)?,
        };
        let base_url = self.config.base_url.clone();
        let tokens = Arc::new(TokenStore::new(self.config.expiry_margin));
        let persistence = self.persistence.map(Arc::new);

        Ok(SessionClient {
            csrf: CsrfCoordinator::new(http.clone(), base_url.clone(), tokens.clone()),
            refresher: RefreshCoordinator::new(
                http.clone(),
                base_url.clone(),
                tokens.clone(),
                persistence.clone(),
            ),
            executor: RequestExecutor::new(http.clone(), base_url),
            config: self.config,
            http,
            tokens,
            persistence,
            observers: RwLock::new(Vec::new()),
        })
    }
}

/// Authenticated client for the booking admin API.
pub struct SessionClient {
    config: SessionConfig,
    http: reqwest::Client,
    tokens: Arc<TokenStore>,
    persistence: Option<Arc<SessionPersistence>>,
    csrf: CsrfCoordinator,
    pub(crate) refresher: RefreshCoordinator,
    executor: RequestExecutor,
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
}

impl SessionClient {
    pub fn builder(config: SessionConfig) -> SessionClientBuilder {
        SessionClientBuilder {
            config,
            http: None,
            persistence: None,
        }
    }

    /// Client without persistence.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Register a forced-logout observer.
    pub fn on_unauthorized(&self, observer: impl SessionObserver + 'static) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    // --- session lifecycle ---

    /// Install tokens directly, starting a new session.
    pub async fn init(&self, access: Option<Secret<String>>, refresh: Option<Secret<String>>) {
        self.tokens.init(access, refresh).await;
        self.csrf.invalidate();
    }

    /// Load the persisted session, if any. Returns whether tokens were
    /// installed.
    pub async fn restore(&self) -> Result<bool> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        let Some(session) = persistence.rehydrate().await? else {
            return Ok(false);
        };
        if !session.has_tokens() {
            return Ok(false);
        }
        self.init(session.access_token, session.refresh_token).await;
        info!("session restored");
        Ok(true)
    }

    /// Log in with email and password.
    ///
    /// On `Authenticated` the tokens are installed and persisted together
    /// with the returned user. `SubscriptionExpired` leaves the client
    /// logged out.
    #[instrument(skip_all)]
    pub async fn login(&self, credentials: &LoginRequest) -> Result<LoginOutcome> {
        let outcome = session_auth::login(&self.http, &self.config.base_url, credentials).await?;

        if let LoginOutcome::Authenticated { user, tokens } = &outcome {
            self.init(
                Some(tokens.access_token.clone()),
                Some(tokens.refresh_token.clone()),
            )
            .await;
            if let Some(persistence) = &self.persistence
                && let Err(e) = persistence
                    .save(&PersistedSession::new(tokens, user.clone()))
                    .await
            {
                warn!(error = %e, "failed to persist session after login");
            }
            info!("logged in");
        }
        Ok(outcome)
    }

    /// End the session.
    ///
    /// Local state is torn down before this returns. The backend is told in
    /// a spawned task whose failure is only logged; the handle lets callers
    /// wait for it. Observers are not notified.
    pub async fn logout(&self) -> JoinHandle<()> {
        let user_id = self.tokens.user_id().await;
        let bearer = self.tokens.access_token().await;
        let csrf = self.csrf.token();
        let http = self.http.clone();
        let base_url = self.config.base_url.clone();

        let notify = tokio::spawn(async move {
            match session_auth::logout(
                &http,
                &base_url,
                user_id.as_deref(),
                bearer.as_ref(),
                csrf.as_ref(),
            )
            .await
            {
                Ok(()) => debug!("backend notified of logout"),
                Err(e) => warn!(error = %e, "logout notification failed"),
            }
        });

        self.tokens.clear_tokens().await;
        self.csrf.invalidate();
        self.clear_persisted().await;
        info!("logged out");
        notify
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.has_access_token().await
    }

    /// Subject of the current access token.
    pub async fn user_id(&self) -> Option<String> {
        self.tokens.user_id().await
    }

    /// User profile saved at login.
    pub async fn persisted_user(&self) -> Result<Option<Value>> {
        match &self.persistence {
            Some(persistence) => Ok(persistence.user().await?),
            None => Ok(None),
        }
    }

    // --- requests ---

    pub async fn get(&self, endpoint: &str) -> Result<Value> {
        self.request(Method::GET, endpoint, RequestBody::Empty).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<Value> {
        self.request(Method::POST, endpoint, json_body(body)?).await
    }

    pub async fn put<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<Value> {
        self.request(Method::PUT, endpoint, json_body(body)?).await
    }

    pub async fn patch<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<Value> {
        self.request(Method::PATCH, endpoint, json_body(body)?).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<Value> {
        self.request(Method::DELETE, endpoint, RequestBody::Empty).await
    }

    /// POST a multipart form.
    pub async fn upload(&self, endpoint: &str, parts: Vec<UploadPart>) -> Result<Value> {
        self.request(Method::POST, endpoint, RequestBody::Multipart(parts))
            .await
    }

    /// Send a request with session recovery applied.
    #[instrument(skip_all, fields(method = %method, endpoint = %endpoint))]
    pub async fn request(&self, method: Method, endpoint: &str, body: RequestBody) -> Result<Value> {
        let request = ApiRequest::new(method, endpoint, body);
        let result = self.send(&request).await;
        metrics::record_request(match &result {
            Ok(_) => "success",
            Err(e) if e.is_session_expired() => "session_expired",
            Err(_) => "failure",
        });
        result
    }

    async fn send(&self, request: &ApiRequest) -> Result<Value> {
        let mut csrf = if request.is_state_changing() {
            self.csrf.ensure().await
        } else {
            None
        };

        let epoch = self.tokens.epoch().await;
        if self.tokens.has_access_token().await
            && self.tokens.has_refresh_token().await
            && self.tokens.is_token_expired().await
        {
            debug!("access token expired, refreshing before send");
            if let Err(e) = self.refresher.refresh_access_token().await {
                return Err(self.force_logout(epoch, e).await);
            }
        }

        let mut csrf_retried = false;
        let mut auth_retried = false;
        loop {
            let epoch = self.tokens.epoch().await;
            let bearer = self.tokens.access_token().await;
            let outcome = self
                .executor
                .execute(request, bearer.as_ref(), csrf.as_ref())
                .await?;

            match outcome {
                Outcome::Success(value) => return Ok(value),
                Outcome::CsrfRejected(message) => {
                    if csrf.is_none() || csrf_retried {
                        return Err(Error::Http {
                            status: 403,
                            message,
                        });
                    }
                    csrf_retried = true;
                    info!(request_id = %request.request_id, "CSRF token rejected, refetching");
                    self.csrf.invalidate();
                    csrf = self.csrf.fetch().await;
                }
                Outcome::AuthExpired(message) => {
                    if auth_retried {
                        return Err(self.force_logout(epoch, Error::AuthExpired(message)).await);
                    }
                    auth_retried = true;
                    info!(request_id = %request.request_id, "access token rejected as expired, refreshing");
                    if let Err(e) = self.refresher.refresh_access_token().await {
                        return Err(self.force_logout(epoch, e).await);
                    }
                }
                Outcome::AuthInvalid(message) => {
                    return Err(self.force_logout(epoch, Error::AuthInvalid(message)).await);
                }
                Outcome::Failed { status, message } => {
                    return Err(Error::Http { status, message });
                }
            }
        }
    }

    /// End the session that was current at `epoch` and notify observers.
    ///
    /// Only the first caller for a given epoch does anything, so concurrent
    /// failures of one session produce one logout. Returns `err` for the
    /// caller to propagate.
    pub(crate) async fn force_logout(&self, epoch: u64, err: Error) -> Error {
        if !self.tokens.end_session(epoch).await {
            debug!(error = %err, "session already ended");
            return err;
        }

        let reason = LogoutReason::from(&err);
        warn!(reason = reason.label(), error = %err, "forcing logout");
        self.csrf.invalidate();
        self.clear_persisted().await;
        metrics::record_forced_logout(reason.label());

        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_unauthorized(&reason);
        }
        err
    }

    async fn clear_persisted(&self) {
        if let Some(persistence) = &self.persistence
            && let Err(e) = persistence.clear().await
        {
            warn!(error = %e, "failed to clear persisted session");
        }
    }
}

fn json_body<T: Serialize + ?Sized>(body: &T) -> Result<RequestBody> {
    serde_json::to_value(body)
        .map(RequestBody::Json)
        .map_err(|e| Error::Encode(format!("serializing request body: {e}")))
}
