//! Structured logging and Prometheus metrics.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Prometheus handle for on-demand scrape output (e.g. GET /metrics).
pub type PrometheusHandle = metrics_exporter_prometheus::PrometheusHandle;

pub const PAYMENTS_SUBMITTED: &str = "payments_submitted_total";
pub const SIMULATION_FAILURES: &str = "payment_simulation_failures_total";
pub const STATUS_QUERIES: &str = "payment_status_queries_total";

const DEFAULT_FILTER: &str = "info,tinypay_gateway=debug,tower_http=info";

/// Log output selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global tracing subscriber, filtered by `RUST_LOG`.
///
/// Returns an error if a subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    }
}

/// Install the global metrics recorder and return a handle for rendering.
///
/// Uses `PrometheusBuilder` without an HTTP listener; the application
/// exposes metrics via GET /metrics using `handle.render()`.
///
/// # Errors
/// Returns an error if a recorder is already installed or building fails.
pub fn init_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new()
        .with_recommended_naming(true)
        .install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// Convenience to wrap the handle in Arc for shared use in app state.
#[must_use]
pub fn init_metrics_handle() -> Option<Arc<PrometheusHandle>> {
    init_metrics().ok().map(Arc::new)
}

fn describe_metrics() {
    metrics::describe_counter!(PAYMENTS_SUBMITTED, "Payments broadcast to a ledger");
    metrics::describe_counter!(
        SIMULATION_FAILURES,
        "Payments rejected because their dry run failed"
    );
    metrics::describe_counter!(STATUS_QUERIES, "Transaction status lookups");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_env_value() {
        assert_eq!(LogFormat::from_env_value(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some("text")), LogFormat::Pretty);
        assert_eq!(LogFormat::from_env_value(None), LogFormat::Pretty);
    }
}
