//! Server error types and their wire-frame mapping.

use crate::protocol::ServerMessage;
use thiserror::Error;

/// Errors produced while handling client traffic.
///
/// Each variant maps to a typed error frame (`code`/`message`) addressed to
/// the offending client only; none of them disconnect other clients.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid message format: {0}")]
    BadMessageFormat(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("auction not found: {0}")]
    AuctionNotFound(String),

    #[error("bid {amount} too low against current bid {current_bid}")]
    BidTooLow { amount: i64, current_bid: i64 },

    #[error("auction closed: {0}")]
    AuctionClosed(String),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound queue refused the frame (client closed or full).
    #[error("channel send error")]
    ChannelSend,
}

impl ServerError {
    /// Wire error code (see the protocol table).
    pub fn code(&self) -> u16 {
        match self {
            ServerError::BadMessageFormat(_) => 1000,
            ServerError::UnknownMessageType(_) => 1001,
            ServerError::RateLimited => 1002,
            ServerError::AuctionNotFound(_) => 1003,
            ServerError::BidTooLow { .. } => 1004,
            ServerError::AuctionClosed(_) => 1005,
            ServerError::Store(_) | ServerError::Json(_) | ServerError::ChannelSend => 1500,
        }
    }

    /// User-facing message. Storage and internal failures stay opaque;
    /// their details are only logged server-side.
    pub fn wire_message(&self) -> String {
        match self {
            ServerError::BadMessageFormat(_) => "Invalid message format".to_string(),
            ServerError::UnknownMessageType(t) => format!("Unknown message type: {t}"),
            ServerError::RateLimited => "Rate limit exceeded".to_string(),
            ServerError::AuctionNotFound(_) => "Auction not found".to_string(),
            ServerError::BidTooLow { .. } => {
                "Bid amount must be higher than current price".to_string()
            }
            ServerError::AuctionClosed(_) => "Auction is closed".to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Build the typed error frame for this error.
    pub fn to_frame(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code(),
            message: self.wire_message(),
        }
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
