//! CSRF token cache with deduplicated fetches
//!
//! The token is independent of the bearer pair: it is fetched lazily before
//! the first state-changing request, reused until the backend rejects it, and
//! dropped when the session ends. A failed fetch is not an error for the
//! caller; the write goes out without the header and the backend rejects
//! that one request.

use std::sync::{Arc, Mutex, PoisonError};

use common::Secret;
use serde::Deserialize;
use session_auth::endpoints::http_error_message;
use session_auth::{CSRF_PATH, TokenStore, endpoint_url};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::single_flight::SingleFlight;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrfResponse {
    csrf_token: Secret<String>,
}

/// Cached token plus a generation bumped on every invalidation, so a fetch
/// that started before `invalidate` cannot repopulate the cache.
#[derive(Default)]
struct Cache {
    token: Option<Secret<String>>,
    generation: u64,
}

pub struct CsrfCoordinator {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    cache: Arc<Mutex<Cache>>,
    flight: Arc<SingleFlight<Option<Secret<String>>>>,
}

impl CsrfCoordinator {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, tokens: Arc<TokenStore>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            tokens,
            cache: Arc::default(),
            flight: Arc::new(SingleFlight::new()),
        }
    }

    /// Currently cached token, without fetching.
    pub fn token(&self) -> Option<Secret<String>> {
        lock(&self.cache).token.clone()
    }

    /// Cached token, fetching one first if the cache is empty.
    pub async fn ensure(&self) -> Option<Secret<String>> {
        if let Some(token) = self.token() {
            return Some(token);
        }
        self.fetch().await
    }

    /// Fetch a new token from the backend and cache it.
    ///
    /// Concurrent callers share one GET. Returns `None` when the fetch fails;
    /// the cache is left as it was.
    pub async fn fetch(&self) -> Option<Secret<String>> {
        let http = self.http.clone();
        let url = endpoint_url(&self.base_url, CSRF_PATH);
        let tokens = Arc::clone(&self.tokens);
        let cache = Arc::clone(&self.cache);
        let generation = lock(&cache).generation;

        let result = self
            .flight
            .run(move || async move {
                let bearer = tokens.access_token().await;
                match request_token(&http, &url, bearer.as_ref()).await {
                    Ok(token) => {
                        metrics::record_csrf_fetch("success");
                        let mut cache = lock(&cache);
                        if cache.generation == generation {
                            cache.token = Some(token.clone());
                            debug!("CSRF token cached");
                        }
                        Some(token)
                    }
                    Err(e) => {
                        metrics::record_csrf_fetch("failure");
                        warn!(error = %e, "CSRF token fetch failed, continuing without one");
                        None
                    }
                }
            })
            .await;

        result.ok().flatten()
    }

    /// Drop the cached token. The next state-changing request fetches anew.
    pub fn invalidate(&self) {
        let mut cache = lock(&self.cache);
        cache.token = None;
        cache.generation += 1;
    }
}

fn lock(cache: &Mutex<Cache>) -> std::sync::MutexGuard<'_, Cache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn request_token(
    http: &reqwest::Client,
    url: &str,
    bearer: Option<&Secret<String>>,
) -> Result<Secret<String>> {
    let mut request = http.get(url);
    if let Some(token) = bearer {
        request = request.bearer_auth(token.expose_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::Transport(format!("CSRF token request failed: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Http {
            status: status.as_u16(),
            message: http_error_message(status.as_u16()),
        });
    }

    let body: CsrfResponse = response
        .json()
        .await
        .map_err(|e| Error::Decode(format!("invalid CSRF token response: {e}")))?;
    if body.csrf_token.is_empty() {
        return Err(Error::Decode("empty CSRF token".into()));
    }
    Ok(body.csrf_token)
}
