//! Prometheus metrics recorder and `/metrics` endpoint.

use axum::Router;
use axum::extract::State;
use axum::routing::get;
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

/// Router serving `GET /metrics` in Prometheus text format.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket sessions started (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions ended (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live WebSocket sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades rejected because the id was already claimed (counter).
pub const WS_CLAIM_CONFLICTS_TOTAL: &str = "ws_claim_conflicts_total";
/// Upgrade requests refused before the handshake (counter, labels: status).
pub const WS_UPGRADES_REJECTED_TOTAL: &str = "ws_upgrades_rejected_total";
/// Frames queued on their destination (counter).
pub const RELAY_FRAMES_FORWARDED_TOTAL: &str = "relay_frames_forwarded_total";
/// Frames dropped after decoding (counter, labels: reason).
pub const RELAY_FRAMES_DROPPED_TOTAL: &str = "relay_frames_dropped_total";
/// Out-of-band HTTP relays (counter, labels: status).
pub const RELAY_POSTS_TOTAL: &str = "relay_posts_total";

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn render_without_global_install() {
        // Build a recorder + handle without installing it globally.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[tokio::test]
    async fn metrics_endpoint_responds() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = metrics_router(handle);

        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_CLAIM_CONFLICTS_TOTAL,
            WS_UPGRADES_REJECTED_TOTAL,
            RELAY_FRAMES_FORWARDED_TOTAL,
            RELAY_FRAMES_DROPPED_TOTAL,
            RELAY_POSTS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
