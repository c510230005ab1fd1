use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{Json, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use skiff_signal::{generate_endpoint_id, ClientFrame, ServerFrame};

use crate::registry::{EndpointHandle, Envelope, Registry};
use crate::router::Router;

/// Shared state for the signaling endpoint.
#[derive(Clone)]
pub struct RelayState {
    registry: Arc<Registry>,
    router: Arc<Router>,
}

impl RelayState {
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());
        let router = Arc::new(Router::new(registry.clone()));
        Self { registry, router }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the relay's HTTP surface: `/health` plus the `/ws` signaling
/// endpoint.
pub fn relay_router(state: RelayState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    registered: usize,
}

async fn health_check(State(state): State<RelayState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        registered: state.registry.len(),
    })
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per connected endpoint: read frames, dispatch to the registry
/// and router, clean up on disconnect.
async fn handle_socket(socket: WebSocket, state: RelayState) {
    let endpoint_id = generate_endpoint_id();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    // Writer task: drains this endpoint's queue in FIFO order. A `Close`
    // envelope shuts the connection down from the server side.
    let writer_id = endpoint_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match envelope {
                Envelope::Deliver(frame) => {
                    let Ok(json) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Envelope::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        debug!(endpoint = %writer_id, "writer task ended");
    });

    let handle = EndpointHandle::new(endpoint_id.clone(), tx);
    debug!(endpoint = %endpoint_id, "endpoint connected");

    // Transport-level id, informational only; nothing routes by it.
    let _ = handle.deliver(ServerFrame::Me {
        id: endpoint_id.clone(),
    });

    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(endpoint = %endpoint_id, error = %err, "websocket error");
                break;
            }
        };
        match message {
            Message::Text(text) => dispatch_text(&text, &handle, &state),
            // Tolerate JSON arriving in binary frames.
            Message::Binary(data) => {
                if let Ok(text) = String::from_utf8(data) {
                    dispatch_text(&text, &handle, &state);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.router.handle_disconnect(&endpoint_id);
    handle.close();
    let _ = writer.await;
    debug!(endpoint = %endpoint_id, "endpoint disconnected");
}

/// Parse and dispatch one inbound frame. Malformed or unknown frames are
/// dropped here; they are never fatal to the connection.
fn dispatch_text(text: &str, handle: &EndpointHandle, state: &RelayState) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(endpoint = %handle.endpoint_id(), error = %err, "dropping unparseable frame");
            return;
        }
    };
    match frame {
        ClientFrame::RegisterShortId { short_id } => {
            match state.registry.register(&short_id, handle.clone()) {
                Some(evicted) => {
                    info!(%short_id, %evicted, "identifier re-registered, previous endpoint evicted")
                }
                None => info!(%short_id, endpoint = %handle.endpoint_id(), "identifier registered"),
            }
            let _ = handle.deliver(ServerFrame::Registered { short_id });
        }
        ClientFrame::CallUser {
            user_to_call,
            signal_data,
            from,
            name,
        } => state
            .router
            .relay_call(handle, user_to_call, signal_data, from, name),
        ClientFrame::AnswerCall { signal, to } => state.router.relay_answer(handle, to, signal),
    }
}
