//! Prometheus rendering of the session counters
//!
//! The counters themselves are emitted by `api_session::metrics`; this binary
//! only installs a recorder when `--metrics` is given and dumps the text
//! exposition to stderr before exiting.

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}
