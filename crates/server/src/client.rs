//! Connected-client state and the broadcast hub.
//!
//! The hub owns the set of live connections in a `DashMap`. Enqueueing to a
//! client is always non-blocking; a client whose bounded outbound queue
//! refuses a broadcast is treated as a slow consumer and torn down rather
//! than stalling the fan-out.

use crate::error::{Result, ServerError};
use crate::protocol::ServerMessage;
use crate::rate_limit::TokenBucket;
use axum::extract::ws::Message;
use dashmap::{DashMap, DashSet};
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique connection identifier. One user may hold several connections.
pub type ConnId = Uuid;

/// State for a single connected client.
pub struct ClientState {
    /// Connection identifier, distinct from the user id.
    pub conn_id: ConnId,
    /// Authenticated user id; recorded on accepted bids.
    pub user_id: String,
    pub email: String,
    /// Bounded outbound queue. The write pump is the sole consumer.
    tx: mpsc::Sender<Message>,
    /// Set once teardown starts; checked by the write pump before every
    /// frame.
    closed: AtomicBool,
    /// Inbound admission bucket.
    pub limiter: TokenBucket,
    /// Auction ids this client has joined.
    pub auctions: DashSet<String>,
}

impl ClientState {
    pub fn new(user_id: String, email: String, tx: mpsc::Sender<Message>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            user_id,
            email,
            tx,
            closed: AtomicBool::new(false),
            limiter: TokenBucket::default(),
            auctions: DashSet::new(),
        }
    }

    /// Serialize and enqueue a frame for this client without blocking.
    pub fn send(&self, msg: &ServerMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.enqueue(Message::Text(json.into()))
    }

    /// Enqueue a raw frame. Fails when the client is closed or its queue is
    /// full.
    pub fn enqueue(&self, msg: Message) -> Result<()> {
        if self.is_closed() {
            return Err(ServerError::ChannelSend);
        }
        self.tx.try_send(msg).map_err(|_| ServerError::ChannelSend)
    }

    /// Mark the client closed. Returns true on the first call only, so
    /// teardown runs exactly once no matter which path initiates it.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Registry of live connections and the broadcast primitive.
pub struct Hub {
    clients: DashMap<ConnId, Arc<ClientState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn register(&self, client: Arc<ClientState>) -> ConnId {
        let conn_id = client.conn_id;
        self.clients.insert(conn_id, client);
        conn_id
    }

    /// Remove a connection. Safe to call for ids that are already gone.
    pub fn unregister(&self, conn_id: &ConnId) {
        if self.clients.remove(conn_id).is_some() {
            debug!("Client {} unregistered", conn_id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Broadcast a frame to every live client.
    ///
    /// The frame is serialized once. Enqueue is non-blocking: a full queue
    /// marks the client closed and drops it from the registry. The map is
    /// never mutated while iterating.
    pub fn broadcast(&self, msg: &ServerMessage) {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize broadcast frame: {}", e);
                return;
            }
        };

        let mut slow: Vec<ConnId> = Vec::new();
        for entry in self.clients.iter() {
            let client = entry.value();
            if client.is_closed() {
                continue;
            }
            if client.tx.try_send(Message::Text(json.clone().into())).is_err() {
                slow.push(*entry.key());
            }
        }
        counter!("auction_broadcasts_total").increment(1);

        for conn_id in slow {
            warn!("Disconnecting slow consumer {}", conn_id);
            counter!("auction_slow_consumer_disconnects_total").increment(1);
            self.drop_client(&conn_id);
        }
    }

    /// Close and unregister a single client.
    fn drop_client(&self, conn_id: &ConnId) {
        if let Some((_, client)) = self.clients.remove(conn_id) {
            client.close();
        }
    }

    /// Tear down every connection. Used on server shutdown.
    pub fn shutdown(&self) {
        let conn_ids: Vec<ConnId> = self.clients.iter().map(|e| *e.key()).collect();
        for conn_id in &conn_ids {
            self.drop_client(conn_id);
        }
        if !conn_ids.is_empty() {
            info!("Hub closed {} connection(s)", conn_ids.len());
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(depth: usize) -> (Arc<ClientState>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(depth);
        let client = Arc::new(ClientState::new(
            format!("user-{}", Uuid::new_v4()),
            "user@example.com".to_string(),
            tx,
        ));
        (client, rx)
    }

    fn error_frame() -> ServerMessage {
        ServerMessage::Error {
            code: 1002,
            message: "Rate limit exceeded".to_string(),
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let (client, _rx) = test_client(4);
        assert!(client.close());
        assert!(!client.close());
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_live_clients() {
        let hub = Hub::new();
        let (a, mut rx_a) = test_client(8);
        let (b, mut rx_b) = test_client(8);
        hub.register(a);
        hub.register(b);

        hub.broadcast(&error_frame());

        assert!(matches!(rx_a.recv().await, Some(Message::Text(_))));
        assert!(matches!(rx_b.recv().await, Some(Message::Text(_))));
    }

    #[tokio::test]
    async fn test_slow_consumer_is_dropped() {
        let hub = Hub::new();
        let (slow, _rx_slow) = test_client(1);
        let (fast, mut rx_fast) = test_client(8);
        let slow_id = hub.register(slow.clone());
        hub.register(fast);

        // Saturate the slow client's queue, then broadcast.
        slow.send(&error_frame()).unwrap();
        hub.broadcast(&error_frame());

        assert!(slow.is_closed());
        assert_eq!(hub.client_count(), 1);
        assert!(matches!(rx_fast.recv().await, Some(Message::Text(_))));

        // Subsequent broadcasts no longer reference the dropped client.
        hub.broadcast(&error_frame());
        assert!(matches!(rx_fast.recv().await, Some(Message::Text(_))));
        hub.unregister(&slow_id); // no-op, already gone
    }

    #[tokio::test]
    async fn test_send_after_close_is_refused() {
        let (client, mut rx) = test_client(4);
        client.close();
        assert!(client.send(&error_frame()).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everyone() {
        let hub = Hub::new();
        let (a, _rx_a) = test_client(4);
        let (b, _rx_b) = test_client(4);
        hub.register(a.clone());
        hub.register(b.clone());

        hub.shutdown();

        assert_eq!(hub.client_count(), 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
