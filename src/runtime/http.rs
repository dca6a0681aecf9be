//! HTTP surface the runtime mounts (`spec.md` §6).
//!
//! `GET /prompts`, plugin-contributed routes merged in with `(method,
//! path)` uniqueness enforced by [`crate::plugin::PluginRegistry`], and an
//! optional websocket log/monitoring stream.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ServerConfig;
use crate::plugin::HttpRoute;
use crate::templates::TemplateRegistry;
use crate::{Error, Result};

use super::monitoring::MonitoringHub;

#[derive(Clone)]
pub struct AppState {
    pub templates: Arc<TemplateRegistry>,
    pub monitoring: Arc<MonitoringHub>,
}

/// Assemble the full router: `/prompts`, every plugin-contributed route
/// (merged per path so distinct methods at the same path coexist), the
/// websocket log-stream endpoint at `log_stream_path`, and the CORS layer
/// built from `server.cors*` (`spec.md` §6 "Configuration at boot":
/// `corsOrigin`/`corsMethods`/`corsAllowedHeaders`).
pub fn build_router(state: AppState, plugin_routes: Vec<HttpRoute>, server: &ServerConfig) -> Result<Router> {
    let mut router = Router::new().route("/prompts", get(list_prompts));

    let mut by_path: HashMap<String, MethodRouter<AppState>> = HashMap::new();
    for route in plugin_routes {
        by_path
            .entry(route.path.clone())
            .and_modify(|existing| *existing = std::mem::take(existing).merge(route.router.clone()))
            .or_insert(route.router);
    }
    for (path, method_router) in by_path {
        if path == "/prompts" || path == server.log_stream_path {
            return Err(Error::RouteConflict { method: "*".to_string(), path });
        }
        router = router.route(&path, method_router);
    }

    router = router.route(&server.log_stream_path, get(log_stream));

    Ok(router.with_state(state).layer(TraceLayer::new_for_http()).layer(cors_layer(server)))
}

/// Build a `CorsLayer` from the configured origins/methods/headers. A bare
/// `"*"` entry in `cors_origin` is treated as "allow any origin" rather
/// than a literal header value.
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let allow_origin = if server.cors_origin.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = server.cors_origin.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
        AllowOrigin::list(origins)
    };

    let methods: Vec<Method> = server.cors_methods.iter().filter_map(|m| Method::from_bytes(m.as_bytes()).ok()).collect();
    let headers: Vec<HeaderName> = server.cors_allowed_headers.iter().filter_map(|h| HeaderName::from_str(h).ok()).collect();

    CorsLayer::new().allow_origin(allow_origin).allow_methods(methods).allow_headers(headers)
}

/// `GET /prompts` → `200` array of `{id, path, template}`; `500` on read
/// failure (`spec.md` §6).
async fn list_prompts(State(state): State<AppState>) -> Response {
    match state.templates.list() {
        Ok(listings) => {
            let body: Vec<_> = listings
                .into_iter()
                .map(|l| json!({"id": l.id, "path": l.path.to_string_lossy(), "template": l.template}))
                .collect();
            axum::Json(body).into_response()
        }
        Err(e) => {
            warn!(error = %e, "failed to list prompt templates");
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Optional websocket endpoint streaming `MonitoringEvent`s as JSON text
/// frames (`spec.md` §6: "Optional websocket endpoint for log streaming").
async fn log_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_monitoring_events(socket, state.monitoring))
}

async fn stream_monitoring_events(mut socket: WebSocket, monitoring: Arc<MonitoringHub>) {
    let mut events = monitoring.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Ok(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}
