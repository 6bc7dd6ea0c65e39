//! Command-line errors

use thiserror::Error;

/// Errors raised before any request is made.
///
/// API failures are `api_session::Error` and pass through `anyhow`
/// unchanged.
#[derive(Error, Debug)]
pub enum Error {
    #[error("BOOKING_ADMIN_PASSWORD must be set to log in")]
    MissingPassword,

    #[error("request body is not valid JSON: {0}")]
    InvalidBody(String),
}
