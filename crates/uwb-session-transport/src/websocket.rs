//! WebSocket bridge to a remote UWB service.
//!
//! The service connects to `/uwb`. Queued [`AdapterRequest`]s go out as
//! JSON text frames; inbound frames are decoded into [`AdapterMessage`]s
//! for the event pump. One service connection at a time; the adapter is
//! available exactly while it is connected.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tower_http::trace::TraceLayer;

use crate::{
    channel::ChannelAdapter,
    protocol::{AdapterMessage, AdapterRequest},
};

type RequestReceiver = mpsc::UnboundedReceiver<AdapterRequest>;

/// Bridge handler state.
#[derive(Clone)]
pub struct BridgeState {
    adapter: Arc<ChannelAdapter>,
    requests: Arc<Mutex<RequestReceiver>>,
    messages: mpsc::UnboundedSender<AdapterMessage>,
}

impl BridgeState {
    /// Create new bridge state from the adapter, its request receiver and
    /// the event pump's sender.
    #[must_use]
    pub fn new(
        adapter: Arc<ChannelAdapter>,
        requests: RequestReceiver,
        messages: mpsc::UnboundedSender<AdapterMessage>,
    ) -> Self {
        Self {
            adapter,
            requests: Arc::new(Mutex::new(requests)),
            messages,
        }
    }
}

/// WebSocket upgrade handler.
///
/// Answers `409 Conflict` while another service is connected.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BridgeState>) -> Response {
    let Ok(requests) = Arc::clone(&state.requests).try_lock_owned() else {
        tracing::warn!("Rejecting second UWB service connection");
        return (StatusCode::CONFLICT, "A UWB service is already connected").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, requests))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    state: BridgeState,
    requests: OwnedMutexGuard<RequestReceiver>,
) {
    let (sender, receiver) = socket.split();
    run_bridge(sender, receiver, state, requests).await;
}

/// Pump requests out and service messages in until either side closes.
async fn run_bridge<S, R, E>(
    mut sender: S,
    mut receiver: R,
    state: BridgeState,
    mut requests: OwnedMutexGuard<RequestReceiver>,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    // Requests queued while nobody was connected are stale.
    while requests.try_recv().is_ok() {}
    state.adapter.set_available(true);
    tracing::info!("UWB service connected");

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                let json = match request.encode() {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize request: {e}");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => {
                let decoded = match frame {
                    Some(Ok(Message::Text(text))) => AdapterMessage::decode(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => AdapterMessage::decode(text),
                        Err(_) => continue,
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {e}");
                        break;
                    }
                };
                match decoded {
                    Ok(message) => {
                        if state.messages.send(message).is_err() {
                            tracing::warn!("Event pump stopped, closing service connection");
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Invalid service message: {e}"),
                }
            }
        }
    }

    state.adapter.set_available(false);
    tracing::info!("UWB service disconnected");
}

/// Create the bridge router.
///
/// # Example
/// ```ignore
/// let app = Router::new().merge(create_router(bridge_state));
/// ```
#[must_use]
pub fn create_router(state: BridgeState) -> Router {
    Router::new()
        .route("/uwb", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
