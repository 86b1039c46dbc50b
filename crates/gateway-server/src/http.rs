//! The supervisor's HTTP surface (spec §6): `/ws` upgrade, `/health`
//! liveness, `/metrics` scrape. Grounded in the axum `Router` + `State`
//! pattern the broader example pack's network crate uses for its own
//! WebSocket server (`nautilus_network`'s `axum::serve` + `Router` bench
//! harness), adapted here to a stateful router carrying the supervisor.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::ws::{WebSocketSink, WebSocketSource};
use crate::{HandshakeRejected, Supervisor};

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub metrics_handle: PrometheusHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.supervisor.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

/// Extracts the bearer credential from the upgrade's `Authorization`
/// header (spec §6: "Upgrade endpoint path `/ws` (bearer token via
/// `Authorization` header)"). Absence or a malformed header is not
/// rejected here — the Connection's AUTHENTICATING phase is the single
/// place that decides whether a credential is valid.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_owned)
}

async fn ws_upgrade(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    if state.supervisor.connections().len() >= state.supervisor.config().max_connections {
        return (StatusCode::SERVICE_UNAVAILABLE, "gateway at capacity").into_response();
    }

    let token = bearer_token(&headers);
    let max_message_size = state.supervisor.config().max_message_size_bytes;

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let sink: Box<dyn gateway_switch::connection::transport::FrameSink> = Box::new(WebSocketSink::new(sink));
        let source: Box<dyn gateway_switch::connection::transport::FrameSource> =
            Box::new(WebSocketSource::new(stream, max_message_size));

        if let Err(HandshakeRejected::AtCapacity { max_connections }) =
            state.supervisor.handle_client_handshake(token, sink, source)
        {
            tracing::info!(max_connections, "rejected connection at capacity after upgrade raced the check");
        }
    })
}
