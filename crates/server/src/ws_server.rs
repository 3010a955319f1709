//! WebSocket endpoint: auth gate, connection pumps, teardown.

use crate::auth::{self, AuthError};
use crate::client::{ClientState, Hub};
use crate::config::Config;
use crate::router::MessageRouter;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::json;
use std::sync::Arc;
use store::Store;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared application state.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub store: Arc<Store>,
    pub router: Arc<MessageRouter>,
    pub config: Arc<Config>,
    pub shutdown: CancellationToken,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let allow_cross_origin = state.config.features.allow_cross_origin;
    let router = Router::new()
        .route("/ws/auction", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);
    if allow_cross_origin {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Health check handler: server liveness plus the store's ping report.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.hub.client_count(),
        "database": state.store.health().await,
    }))
}

/// WebSocket upgrade handler.
///
/// The auth gate runs before the upgrade: a missing, invalid, or expired
/// session token, or an unknown user, is an HTTP 401 and no connection is
/// created.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let user = match auth::authenticate(&headers, &state.config.auth.secret_key, &state.store).await
    {
        Ok(user) => user,
        Err(AuthError::Lookup(e)) => {
            warn!("User lookup failed during upgrade: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            debug!("Rejected WebSocket upgrade: {}", e);
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    ws.max_message_size(state.config.websocket.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Handle one WebSocket connection: register with the hub, run the two
/// pumps, tear down on the first of peer close, read error, write error, or
/// server shutdown.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: store::User) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Message>(state.config.websocket.send_queue_depth);
    let client = Arc::new(ClientState::new(user.id, user.email, tx));
    let conn_id = state.hub.register(client.clone());

    counter!("auction_connections_total").increment(1);
    gauge!("auction_active_connections").set(state.hub.client_count() as f64);
    info!("Client {} connected as {}", conn_id, client.email);

    // Write pump: sole writer to the socket, draining the bounded queue in
    // enqueue order. Exits on write error or teardown.
    let writer = client.clone();
    let mut write_pump = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if writer.is_closed() {
                break;
            }
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut ping = interval(state.config.websocket.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Read pump: inbound frames are processed in arrival order.
    loop {
        tokio::select! {
            biased;

            _ = state.shutdown.cancelled() => break,

            // Write pump exited (write error, or teardown already started).
            _ = &mut write_pump => break,

            _ = ping.tick() => {
                if client.enqueue(Message::Ping(vec![].into())).is_err() {
                    break;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.router.handle(&client, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if client.enqueue(Message::Pong(data)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary and pong frames are ignored
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                }
            }
        }
    }

    // Teardown: idempotent, whichever side got here first wins.
    client.close();
    state.hub.unregister(&conn_id);
    write_pump.abort();

    counter!("auction_disconnections_total").increment(1);
    gauge!("auction_active_connections").set(state.hub.client_count() as f64);
    info!("Client {} disconnected", conn_id);
}
