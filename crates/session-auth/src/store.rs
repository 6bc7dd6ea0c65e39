//! In-memory holder for the current bearer credentials
//!
//! Every mutation happens under one `RwLock` so the access/refresh pair is
//! always replaced together. The store also tracks a session epoch: it is
//! bumped whenever a session begins (`init`) or ends (`clear_tokens`,
//! `end_session`). Callers capture the epoch before a network round trip and
//! hand it back when they want to mutate, so work started under one session
//! can never clobber the next one.

use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::claims::{self, Claims};
use crate::constants::DEFAULT_EXPIRY_MARGIN;

/// Access/refresh token pair as issued by login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
}

impl TokenPair {
    pub fn new(access: impl Into<Secret<String>>, refresh: impl Into<Secret<String>>) -> Self {
        Self {
            access_token: access.into(),
            refresh_token: refresh.into(),
        }
    }
}

#[derive(Default)]
struct State {
    access: Option<Secret<String>>,
    refresh: Option<Secret<String>>,
    epoch: u64,
}

impl State {
    fn claims(&self) -> Option<Claims> {
        let access = self.access.as_ref()?;
        claims::decode(access.expose_str()).ok()
    }

    fn clear(&mut self) {
        self.access = None;
        self.refresh = None;
        self.epoch += 1;
    }
}

/// Current access and refresh tokens plus the session epoch.
pub struct TokenStore {
    state: RwLock<State>,
    expiry_margin: Duration,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_MARGIN)
    }
}

impl TokenStore {
    /// Empty store; tokens are treated as expired `expiry_margin` early.
    pub fn new(expiry_margin: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            expiry_margin,
        }
    }

    pub fn expiry_margin(&self) -> Duration {
        self.expiry_margin
    }

    /// Install tokens after login or rehydration. Starts a new epoch, which
    /// is returned. Empty strings count as absent.
    pub async fn init(
        &self,
        access: Option<Secret<String>>,
        refresh: Option<Secret<String>>,
    ) -> u64 {
        let mut state = self.state.write().await;
        state.access = access.filter(|t| !t.is_empty());
        state.refresh = refresh.filter(|t| !t.is_empty());
        state.epoch += 1;
        debug!(
            epoch = state.epoch,
            has_access = state.access.is_some(),
            has_refresh = state.refresh.is_some(),
            "token store initialized"
        );
        state.epoch
    }

    /// Replace both tokens atomically without starting a new epoch.
    pub async fn set_tokens(&self, tokens: TokenPair) {
        let mut state = self.state.write().await;
        state.access = Some(tokens.access_token);
        state.refresh = Some(tokens.refresh_token);
    }

    /// Replace both tokens only if `epoch` is still current.
    ///
    /// Returns false (and leaves the store alone) when the session ended or
    /// was replaced while the caller was waiting on the network.
    pub async fn replace_tokens(&self, epoch: u64, tokens: TokenPair) -> bool {
        let mut state = self.state.write().await;
        if state.epoch != epoch {
            return false;
        }
        state.access = Some(tokens.access_token);
        state.refresh = Some(tokens.refresh_token);
        true
    }

    /// Drop both tokens and start a new (empty) epoch.
    pub async fn clear_tokens(&self) {
        self.state.write().await.clear();
        debug!("token store cleared");
    }

    /// Clear the store if `epoch` is still current. Returns whether it did,
    /// so exactly one of several concurrent callers ends a given session.
    pub async fn end_session(&self, epoch: u64) -> bool {
        let mut state = self.state.write().await;
        if state.epoch != epoch {
            return false;
        }
        state.clear();
        true
    }

    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    pub async fn access_token(&self) -> Option<Secret<String>> {
        self.state.read().await.access.clone()
    }

    pub async fn refresh_token(&self) -> Option<Secret<String>> {
        self.state.read().await.refresh.clone()
    }

    pub async fn has_access_token(&self) -> bool {
        self.state.read().await.access.is_some()
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.state.read().await.refresh.is_some()
    }

    /// Subject of the current access token, `None` when absent or undecodable.
    pub async fn user_id(&self) -> Option<String> {
        self.state.read().await.claims()?.subject
    }

    /// True when there is no access token, it cannot be decoded, or it
    /// expires within the safety margin.
    pub async fn is_token_expired(&self) -> bool {
        self.expires_within(self.expiry_margin).await
    }

    /// True when the access token is missing, undecodable, or expires
    /// within `window` from now.
    pub async fn expires_within(&self, window: Duration) -> bool {
        match self.state.read().await.claims() {
            Some(claims) => claims.is_expired_at(claims::unix_now(), window),
            None => true,
        }
    }
}
