//! Tracing and metrics bootstrap.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetrySection;

/// Install the global tracing subscriber and, when configured, the
/// Prometheus metrics exporter. Safe to call once per process.
pub fn init(options: &TelemetrySection) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.log_filter.clone()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .try_init();

    if let Some(addr) = options.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
        tracing::debug!(%addr, "metrics exporter listening");
    }
    Ok(())
}
