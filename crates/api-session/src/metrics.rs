//! Session counters
//!
//! Emitted through the `metrics` facade; without an installed recorder these
//! are no-ops, so the embedding application decides whether to export them.
//!
//! - `session_requests_total` (counter): label `outcome`
//! - `session_refresh_total` (counter): label `outcome`
//! - `session_csrf_fetch_total` (counter): label `outcome`
//! - `session_forced_logout_total` (counter): label `reason`

/// Record the terminal outcome of one controller request.
pub fn record_request(outcome: &'static str) {
    ::metrics::counter!("session_requests_total", "outcome" => outcome).increment(1);
}

/// Record one refresh exchange (not one waiter).
pub fn record_refresh(outcome: &'static str) {
    ::metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_csrf_fetch(outcome: &'static str) {
    ::metrics::counter!("session_csrf_fetch_total", "outcome" => outcome).increment(1);
}

pub fn record_forced_logout(reason: &'static str) {
    ::metrics::counter!("session_forced_logout_total", "reason" => reason).increment(1);
}
