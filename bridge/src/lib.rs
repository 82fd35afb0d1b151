// Relay Bridge HTTP API server
//
// SSE subscriptions, publish requests and chat over the relay core runtime

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::get,
    Json, Router,
};
use relay_core::{BusError, Relay, StatusEnvelope};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

pub const DONE_EVENT: &str = "done";
pub const DONE_MESSAGE: &str = "Done writing response";

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("missing required parameter `text`")]
    MissingText,
    #[error("subscription failed: {0}")]
    Subscription(#[from] BusError),
    #[error("invalid bind address: {0}")]
    InvalidAddr(String),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match &self {
            BridgeError::MissingText => StatusCode::BAD_REQUEST,
            BridgeError::Subscription(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::InvalidAddr(_) | BridgeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(StatusEnvelope::error(self.to_string()))).into_response()
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
}

impl AppState {
    pub fn new(relay: Relay) -> Self {
        Self { relay }
    }
}

#[derive(Debug, Deserialize)]
struct TextParams {
    text: Option<String>,
}

/// Build the HTTP router with fully open CORS
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/subscription/:namespace",
            get(subscribe_handler).post(publish_handler),
        )
        .route("/api/chat/:namespace", get(chat_handler))
        .route("/api/functions", get(functions_handler))
        .route("/healthz", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve `state` on `addr` until `shutdown` resolves
pub async fn start_server<F>(addr: &str, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| BridgeError::InvalidAddr(format!("{addr}: {e}")))?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "bridge", url = %format!("http://{}", addr), "Relay bridge ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!(target: "bridge", "Relay bridge stopped");
    Ok(())
}

/// SSE stream of every message published on `namespace`
#[tracing::instrument(name = "bridge.subscribe", skip(state))]
async fn subscribe_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let subscriber = state.relay.bus.subscribe(&namespace).await?;
    info!(target: "bridge", namespace = %namespace, "New SSE subscriber connected");

    // Dropping the stream on client disconnect releases the subscription
    let stream = subscriber.map(|message| Ok(Event::default().data(message.payload)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Resolve `text` and publish the outcome on `namespace`.
///
/// `text` comes from the query string or a JSON body `{"text": ...}`.
#[tracing::instrument(name = "bridge.publish", skip(state, params, body))]
async fn publish_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(params): Query<TextParams>,
    body: Bytes,
) -> Result<Json<StatusEnvelope>> {
    let text = params
        .text
        .or_else(|| text_from_body(&body))
        .ok_or(BridgeError::MissingText)?;

    let report = state.relay.bridge.publish_request(&namespace, &text).await;
    if let Some(e) = &report.transport_error {
        warn!(target: "bridge", namespace = %namespace, error = %e, "Publish did not reach the broker");
    }
    Ok(Json(report.envelope()))
}

fn text_from_body(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice::<TextParams>(body).ok()?.text
}

/// SSE stream of a chat reply followed by a `done` event
#[tracing::instrument(name = "bridge.chat", skip(state, params))]
async fn chat_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(params): Query<TextParams>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let text = params.text.ok_or(BridgeError::MissingText)?;
    let chat = state.relay.chat.clone();

    let stream = async_stream::stream! {
        match chat.stream_reply(&text, &namespace).await {
            Ok(mut deltas) => {
                while let Some(delta) = deltas.next().await {
                    match delta {
                        Ok(delta) => yield Ok(Event::default().data(delta)),
                        Err(e) => {
                            warn!(target: "bridge", namespace = %namespace, error = %e, "Chat stream failed");
                            yield Ok(Event::default().event("error").data(e.to_string()));
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(target: "bridge", namespace = %namespace, error = %e, "Chat could not start");
                yield Ok(Event::default().event("error").data(e.to_string()));
            }
        }
        yield Ok(Event::default().event(DONE_EVENT).data(DONE_MESSAGE));
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn functions_handler(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.relay.catalog.schemas())
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "broker": state.relay.broker_kind() }))
}
