//! Backend contract constants
//!
//! Paths are relative to the configured API base URL. Error codes are the
//! machine-readable `code` values the backend puts in JSON error bodies.

use std::time::Duration;

/// Credential login, returns `{ user, accessToken, refreshToken }`
pub const LOGIN_PATH: &str = "/login";

/// Refresh exchange, takes `{ refreshToken }`
pub const REFRESH_PATH: &str = "/refresh-token";

/// CSRF token issue endpoint, returns `{ csrfToken }`
pub const CSRF_PATH: &str = "/csrf-token";

/// Best-effort logout notification, takes `{ userId }`
pub const LOGOUT_PATH: &str = "/logout";

/// Header carrying the CSRF token on state-changing requests
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Access tokens are treated as expired this long before their `exp` claim.
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(10);

/// 401 code marking an access token that a refresh can recover.
/// Any other 401 is terminal.
pub const TOKEN_EXPIRED_CODE: &str = "TOKEN_EXPIRED";

/// 403 codes marking a CSRF rejection.
pub const CSRF_ERROR_CODES: &[&str] = &["EBADCSRFTOKEN", "CSRF_INVALID"];

/// Login response code for an account whose subscription has lapsed.
pub const SUBSCRIPTION_EXPIRED_CODE: &str = "SUBSCRIPTION_EXPIRED";

/// Refresh failure code: refresh token past its lifetime, re-login required.
pub const REFRESH_TOKEN_EXPIRED_CODE: &str = "REFRESH_TOKEN_EXPIRED";

/// Refresh failure code: refresh token revoked server-side.
pub const REFRESH_TOKEN_REVOKED_CODE: &str = "REFRESH_TOKEN_REVOKED";
