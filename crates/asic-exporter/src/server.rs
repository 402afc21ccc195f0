//! Web server setup and routing

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/metrics", get(api::metrics))
        .route("/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the poll loop and serve metrics until the server stops
pub async fn run(state: Arc<AppState>, bind: SocketAddr) -> Result<()> {
    let app = router(state.clone());

    // Start polling in background
    tokio::spawn(state.poller.clone().run());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(url = %format!("http://{}/metrics", bind), "Starting metrics server");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.discovery.ip_range = Some("lab:10.0.1.0/24".to_string());
        AppState::new(config).unwrap()
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = state();
        state
            .registry
            .register("asic_miner_status_power", "Power draw in watts", &["ip", "location"])
            .unwrap();
        state
            .registry
            .set(
                "asic_miner_status_power",
                "10.0.1.5".parse().unwrap(),
                &["10.0.1.5".to_string(), "lab".to_string()],
                3300.0,
            )
            .unwrap();

        let (status, content_type, body) = get(router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(prometheus::TEXT_FORMAT));
        assert!(body.contains("asic_miner_status_power{ip=\"10.0.1.5\",location=\"lab\"} 3300"));
        assert!(body.contains("asic_exporter_devices_discovered"));
    }

    #[tokio::test]
    async fn test_landing_page_links_metrics() {
        let (status, _, body) = get(router(state()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("href=\"/metrics\""));
        assert!(body.contains("lab: 10.0.1.0/24"));
    }

    #[tokio::test]
    async fn test_landing_page_escapes_location_names() {
        let mut config = Config::default();
        config.discovery.ip_range = Some("<b>&\"lab\":10.0.1.0/24".to_string());
        let state = AppState::new(config).unwrap();

        let (_, _, body) = get(router(state), "/").await;
        assert!(body.contains("<li>&lt;b&gt;&amp;&quot;lab&quot;: 10.0.1.0/24</li>"));
        assert!(!body.contains("<b>"));
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _, body) = get(router(state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _, _) = get(router(state()), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
