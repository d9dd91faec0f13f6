//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connections currently in the registry (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades rejected for lack of a principal (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Frames dropped because a send buffer was full (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Keepalive probes sent (counter).
pub const WS_KEEPALIVE_PROBES_TOTAL: &str = "ws_keepalive_probes_total";
/// Keepalive loops that ended without a cancel (counter, labels: outcome).
pub const WS_KEEPALIVE_TERMINATIONS_TOTAL: &str = "ws_keepalive_terminations_total";
/// Broadcast passes started (counter, labels: event_type).
pub const BROADCAST_EVENTS_TOTAL: &str = "broadcast_events_total";
/// Frames handed to a connection (counter).
pub const BROADCAST_DELIVERIES_TOTAL: &str = "broadcast_deliveries_total";
/// Subscribers skipped by the visibility filter (counter).
pub const BROADCAST_FILTERED_TOTAL: &str = "broadcast_filtered_total";
/// Per-subscriber processing or serialization failures, plus caught panics (counter).
pub const BROADCAST_FAILURES_TOTAL: &str = "broadcast_failures_total";
