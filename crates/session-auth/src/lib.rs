//! Bearer-token session primitives for the booking admin API
//!
//! Holds everything that touches the access/refresh token pair without
//! orchestrating requests: payload decoding, the in-memory token store, the
//! login/refresh/logout endpoint calls, and the on-disk session files. The
//! request orchestration (CSRF, retry, forced logout) lives in `api-session`.
//!
//! Session flow:
//! 1. `endpoints::login()` returns a `LoginOutcome`
//! 2. Tokens installed via `TokenStore::init()` and saved via `SessionPersistence::save()`
//! 3. `TokenStore::is_token_expired()` decides when a refresh is due
//! 4. `endpoints::refresh_token()` exchanges the refresh token for a new pair
//! 5. `TokenStore::replace_tokens()` + `SessionPersistence::save_tokens()` record it,
//!    the latter only while the same session is still current
//! 6. `endpoints::logout()` notifies the backend; local state is cleared regardless

pub mod claims;
pub mod constants;
pub mod endpoints;
pub mod error;
pub mod persist;
pub mod store;

pub use claims::{Claims, decode};
pub use constants::*;
pub use endpoints::{ErrorBody, LoginOutcome, LoginRequest, endpoint_url, login, logout, refresh_token};
pub use error::{Error, Result};
pub use persist::{PersistedSession, SessionFile, SessionPersistence};
pub use store::{TokenPair, TokenStore};
