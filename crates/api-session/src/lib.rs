//! Authenticated session client for the booking admin API
//!
//! Wraps every API call in the session recovery policy: bearer tokens are
//! refreshed ahead of expiry and after a refreshable 401, with concurrent
//! refreshes collapsed into one exchange; CSRF tokens are fetched lazily and
//! refetched once on rejection; unrecoverable authentication failures end
//! the session and notify registered observers.
//!
//! ```no_run
//! # async fn demo() -> api_session::Result<()> {
//! use api_session::{LoginOutcome, LoginRequest, SessionClient, SessionConfig};
//!
//! let client = SessionClient::new(SessionConfig::new("https://api.example.com"))?;
//! client.on_unauthorized(|reason: &api_session::LogoutReason| {
//!     eprintln!("signed out: {}", reason.label());
//! });
//! if let LoginOutcome::Authenticated { .. } = client
//!     .login(&LoginRequest::new("expert@example.com", "hunter2"))
//!     .await?
//! {
//!     let events = client.get("/events").await?;
//!     println!("{events}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod csrf;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod observer;
pub mod refresh;
pub mod single_flight;

#[cfg(test)]
mod testing;

pub use client::{SessionClient, SessionClientBuilder, SessionConfig, build_http_client};
pub use csrf::CsrfCoordinator;
pub use error::{Error, Result};
pub use executor::{ApiRequest, Outcome, RequestBody, RequestExecutor, UploadPart, classify};
pub use observer::{LogoutReason, SessionObserver};
pub use refresh::{RefreshCoordinator, spawn_refresh_task};
pub use single_flight::{Abandoned, SingleFlight};

pub use reqwest::Method;
pub use session_auth::{LoginOutcome, LoginRequest, PersistedSession, SessionPersistence, TokenPair};
