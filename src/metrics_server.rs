//! Minimal HTTP surface exposing Prometheus-format metrics, grounded on the
//! teacher's `server::serve` (axum router + `TcpListener::bind` + `axum::serve`)
//! but reduced to the one `/metrics` route this pipeline needs.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

#[derive(Clone)]
struct MetricsState {
    handle: PrometheusHandle,
}

/// Install the global Prometheus recorder. Must be called once, before any
/// `counter!`/`gauge!` call site runs.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

/// Serve `/metrics` on `host:port` until the process exits. Intended to run
/// as one of the long-lived tasks alongside the worker pools.
pub async fn serve(handle: PrometheusHandle, host: String, port: u16) -> anyhow::Result<()> {
    let state = MetricsState { handle };
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!(%addr, "starting metrics server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn render_metrics(
    axum::extract::State(state): axum::extract::State<MetricsState>,
) -> String {
    state.handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_route_returns_ok() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let state = MetricsState { handle };
        let app = Router::new()
            .route("/metrics", get(render_metrics))
            .with_state(state);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
