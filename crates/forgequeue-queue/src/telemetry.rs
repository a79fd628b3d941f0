//! Telemetry wiring: a `tracing-subscriber` console layer and an optional
//! Prometheus exporter for the `metrics` facade this crate already records
//! through. Neither is required for the coordinator/worker pool to function
//! — callers that embed forgequeue in a larger service are free to install
//! their own subscriber/recorder instead and skip this module entirely.

use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a `tracing` subscriber that logs to stdout, honoring
/// `RUST_LOG` and falling back to `info` with this crate at `debug`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,forgequeue_queue=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Installs a Prometheus exporter serving the metrics this crate records
/// through the `metrics` facade (see `metrics::register_metrics`) at
/// `addr`, and registers their descriptions.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    crate::metrics::register_metrics();
    Ok(())
}
