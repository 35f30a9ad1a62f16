//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// WebSocket sessions opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions ended total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered WebSocket sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused because the connection cap was reached (counter).
pub const WS_UPGRADES_REFUSED_TOTAL: &str = "ws_upgrades_refused_total";
/// Session lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Successful broadcast deliveries (counter).
pub const BROADCAST_DELIVERIES_TOTAL: &str = "broadcast_deliveries_total";
/// Failed broadcast deliveries, each closing its recipient (counter).
pub const BROADCAST_FAILURES_TOTAL: &str = "broadcast_failures_total";
/// Pong replies written (counter).
pub const PONGS_SENT_TOTAL: &str = "pongs_sent_total";
/// Pings answered by an in-flight pong instead of a new one (counter).
pub const PINGS_COALESCED_TOTAL: &str = "pings_coalesced_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_recorder_renders() {
        // Build a recorder + handle (no global install to avoid test conflicts).
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_UPGRADES_REFUSED_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            BROADCAST_DELIVERIES_TOTAL,
            BROADCAST_FAILURES_TOTAL,
            PONGS_SENT_TOTAL,
            PINGS_COALESCED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
