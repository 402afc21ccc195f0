//! HTTP handlers

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
};
use std::sync::Arc;
use tracing::error;

use crate::state::AppState;

/// Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.registry.encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Landing page
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    let ranges: String = state
        .locations
        .ranges()
        .iter()
        .map(|r| format!("<li>{}: {}</li>", escape_html(&r.name), r.network))
        .collect();

    Html(format!(
        "<html><head><title>ASIC Exporter</title></head><body>\
         <h1>ASIC Exporter</h1>\
         <p><a href=\"/metrics\">Metrics</a></p>\
         <p>Poll interval: {}s, state: {}</p>\
         <ul>{}</ul>\
         </body></html>",
        state.config.exporter.refresh_interval,
        state.poller.state(),
        ranges
    ))
}

/// Liveness probe
pub async fn health() -> &'static str {
    "ok"
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
