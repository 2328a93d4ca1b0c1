use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use session_tracker_lib::events::SessionEvent;
use tokio::sync::mpsc;

use crate::{
    notifier::{DeliveryFailure, Transport},
    server_state::ServerState,
    subscriptions::HandleId,
};

pub const SESSION_SCOPE_HEADER: &str = "x-session-id";

#[derive(Debug, Deserialize)]
pub struct ScopeParams {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Messages a connected client may send. Lets a socket that connected without a scope subscribe later.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientMessage {
    Subscribe {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// The outboxes of all open websockets.
#[derive(Default)]
pub struct SocketHub {
    outboxes: RwLock<HashMap<HandleId, mpsc::Sender<Arc<str>>>>,
}

impl SocketHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, capacity: usize) -> (HandleId, mpsc::Receiver<Arc<str>>) {
        let handle = HandleId::next();
        let (tx, rx) = mpsc::channel(capacity);
        self.outboxes.write().insert(handle, tx);
        (handle, rx)
    }

    pub fn disconnect(&self, handle: HandleId) {
        self.outboxes.write().remove(&handle);
    }

    pub fn len(&self) -> usize {
        self.outboxes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Transport for SocketHub {
    async fn publish(&self, handle: HandleId, payload: Arc<str>) -> Result<(), DeliveryFailure> {
        let outbox = self.outboxes.read().get(&handle).cloned().ok_or(DeliveryFailure::Closed(handle))?;
        outbox.send(payload).await.map_err(|_| DeliveryFailure::Closed(handle))
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ScopeParams>,
    headers: HeaderMap,
) -> Response {
    let scope = params.session_id.or_else(|| {
        headers
            .get(SESSION_SCOPE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    });

    ws.on_upgrade(move |socket| handle_socket(socket, scope, state))
}

async fn handle_socket(socket: WebSocket, scope: Option<String>, state: Arc<ServerState>) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut outbox) = state.hub.connect(state.config.outbox_capacity as usize);

    tracing::info!("Subscriber {} connected", handle);

    let writer = tokio::spawn(async move {
        while let Some(payload) = outbox.recv().await {
            if let Err(err) = sender.send(Message::Text(payload.to_string().into())).await {
                tracing::debug!("Failed to write to {}: {}", handle, err);
                break;
            }
        }
    });

    subscribe(&state, handle, scope.as_deref()).await;

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!("Websocket error on {}: {}", handle, err);
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Subscribe { session_id }) => subscribe(&state, handle, Some(&session_id)).await,
                Err(err) => tracing::debug!("Ignoring message from {}: {}", handle, err),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.unsubscribe(handle);
    state.hub.disconnect(handle);
    writer.abort();

    tracing::info!("Subscriber {} disconnected", handle);
}

/// A failed subscribe is reported to the client, the socket stays open.
async fn subscribe(state: &ServerState, handle: HandleId, scope: Option<&str>) {
    let reply = match state.registry.subscribe(scope, handle).await {
        Ok(subscription) => SessionEvent::Subscribed { session_id: subscription.session_id },
        Err(err) => {
            tracing::warn!("{} could not subscribe: {}", handle, err);
            SessionEvent::SubscriptionError {
                code: err.code().to_string(),
                message: err.to_string(),
            }
        }
    };

    if let Err(err) = state.notifier.send_to(handle, &reply).await {
        tracing::warn!("{}", err);
    }
}
