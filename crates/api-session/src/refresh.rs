//! Access token renewal
//!
//! `RefreshCoordinator` performs the refresh-token exchange with at most one
//! exchange in flight: callers arriving while one runs wait for its result
//! instead of spending the (single-use) refresh token again.
//! `spawn_refresh_task` renews ahead of expiry in the background so most
//! requests never pay for a refresh.

use std::sync::Arc;
use std::time::Duration;

use session_auth::{SessionPersistence, TokenPair, TokenStore};
use tracing::{debug, info, warn};

use crate::client::SessionClient;
use crate::error::{Error, Result};
use crate::metrics;
use crate::single_flight::SingleFlight;

pub struct RefreshCoordinator {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    persistence: Option<Arc<SessionPersistence>>,
    flight: Arc<SingleFlight<Result<TokenPair>>>,
}

impl RefreshCoordinator {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<TokenStore>,
        persistence: Option<Arc<SessionPersistence>>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            tokens,
            persistence,
            flight: Arc::new(SingleFlight::new()),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.flight.is_in_flight()
    }

    /// Exchange the refresh token for a new pair, or join the exchange
    /// already in flight.
    ///
    /// On success the store and the session file hold the new pair before
    /// any caller is woken. Every caller of one exchange sees the same
    /// result.
    pub async fn refresh_access_token(&self) -> Result<TokenPair> {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let tokens = Arc::clone(&self.tokens);
        let persistence = self.persistence.clone();

        self.flight
            .run(move || async move {
                exchange(&http, &base_url, &tokens, persistence.as_deref()).await
            })
            .await
            .unwrap_or_else(|_| {
                Err(Error::RefreshExchangeFailed {
                    status: None,
                    code: None,
                    message: "token refresh ended without a result".into(),
                })
            })
    }
}

async fn exchange(
    http: &reqwest::Client,
    base_url: &str,
    tokens: &TokenStore,
    persistence: Option<&SessionPersistence>,
) -> Result<TokenPair> {
    let epoch = tokens.epoch().await;
    let Some(refresh) = tokens.refresh_token().await else {
        metrics::record_refresh("no_refresh_token");
        debug!("refresh requested without a refresh token");
        return Err(Error::NoRefreshToken);
    };

    debug!(epoch, "exchanging refresh token");
    let pair = match session_auth::refresh_token(http, base_url, &refresh).await {
        Ok(pair) => pair,
        Err(e) => {
            metrics::record_refresh("failure");
            let err = exchange_error(e);
            warn!(error = %err, "token refresh failed");
            return Err(err);
        }
    };

    if !tokens.replace_tokens(epoch, pair.clone()).await {
        metrics::record_refresh("discarded");
        info!("session ended during token refresh, discarding new tokens");
        return Err(Error::NoRefreshToken);
    }

    if let Some(persistence) = persistence {
        match persistence.save_tokens(tokens, epoch, &pair).await {
            Ok(true) => {}
            Ok(false) => debug!("session ended before refreshed tokens were persisted"),
            Err(e) => warn!(error = %e, "failed to persist refreshed tokens"),
        }
    }

    metrics::record_refresh("success");
    info!("access token refreshed");
    Ok(pair)
}

/// Rejections keep their status; anything that never got an answer from the
/// token endpoint has none.
fn exchange_error(err: session_auth::Error) -> Error {
    match err {
        rejected @ session_auth::Error::RefreshRejected { .. } => rejected.into(),
        other => Error::RefreshExchangeFailed {
            status: None,
            code: None,
            message: other.to_string(),
        },
    }
}

/// Spawn a background task that refreshes the access token ahead of expiry.
///
/// Runs every `interval` and refreshes when the token expires within
/// `threshold`. A rejected refresh ends the session exactly like a failed
/// request-time refresh. Errors without an HTTP answer are left for the
/// next cycle.
pub fn spawn_refresh_task(
    client: Arc<SessionClient>,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&client, threshold).await;
        }
    })
}

async fn refresh_cycle(client: &SessionClient, threshold: Duration) {
    let tokens = client.token_store();
    if !tokens.has_refresh_token().await || !tokens.expires_within(threshold).await {
        return;
    }

    let epoch = tokens.epoch().await;
    debug!("access token expiring within threshold, refreshing");

    match client.refresher.refresh_access_token().await {
        Ok(_) => info!("background token refresh succeeded"),
        Err(Error::RefreshExchangeFailed { status: None, message, .. }) => {
            warn!(error = %message, "background refresh failed (transient), will retry next cycle");
        }
        Err(e) => {
            client.force_logout(epoch, e).await;
        }
    }
}
