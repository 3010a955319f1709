//! Inbound message routing: admission, parsing, dispatch.

use crate::bidding;
use crate::client::{ClientState, Hub};
use crate::error::{Result, ServerError};
use crate::protocol::{self, ClientMessage};
use metrics::counter;
use std::sync::Arc;
use store::Store;
use tracing::{debug, error, warn};

/// Routes parsed client messages to their handlers.
pub struct MessageRouter {
    hub: Arc<Hub>,
    store: Arc<Store>,
}

impl MessageRouter {
    pub fn new(hub: Arc<Hub>, store: Arc<Store>) -> Self {
        Self { hub, store }
    }

    /// Handle one raw inbound frame from `client`.
    ///
    /// Validation order: rate-limit admission, envelope parse, known type,
    /// payload parse, domain checks. Every failure answers the sender with
    /// a typed error frame; nothing is broadcast.
    pub async fn handle(&self, client: &Arc<ClientState>, raw: &str) {
        if !client.limiter.allow() {
            warn!("Rate limit exceeded for client {}", client.conn_id);
            counter!("auction_rate_limited_total").increment(1);
            self.reply_error(client, &ServerError::RateLimited);
            return;
        }

        let msg = match protocol::parse_client_message(raw) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Invalid message from client {}: {}", client.conn_id, e);
                self.reply_error(client, &e);
                return;
            }
        };

        if let Err(e) = self.dispatch(client, msg).await {
            match &e {
                ServerError::Store(inner) => {
                    error!("Store failure handling message from {}: {}", client.conn_id, inner)
                }
                _ => debug!("Rejected message from client {}: {}", client.conn_id, e),
            }
            self.reply_error(client, &e);
        }
    }

    async fn dispatch(&self, client: &Arc<ClientState>, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::Join { auction_id } => {
                debug!("Client {} joined auction {}", client.conn_id, auction_id);
                client.auctions.insert(auction_id);
                Ok(())
            }
            ClientMessage::Update { auction_id } => self.send_snapshot(client, &auction_id).await,
            ClientMessage::Bid { auction_id, amount } => {
                bidding::place_bid(&self.store, &self.hub, client, &auction_id, amount).await
            }
        }
    }

    /// Answer an `update` request with the auction snapshot, to the sender
    /// only.
    async fn send_snapshot(&self, client: &Arc<ClientState>, auction_id: &str) -> Result<()> {
        let auction = self
            .store
            .get_auction_by_id(auction_id)
            .await?
            .ok_or_else(|| ServerError::AuctionNotFound(auction_id.to_string()))?;
        client.send(&protocol::update_frame(&auction)?)
    }

    fn reply_error(&self, client: &ClientState, err: &ServerError) {
        if client.send(&err.to_frame()).is_err() {
            debug!("Failed to deliver error frame to {}", client.conn_id);
        }
    }
}
