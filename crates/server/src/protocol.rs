//! Wire protocol for the auction WebSocket.
//!
//! Every frame is a UTF-8 JSON object. Inbound frames share the envelope
//! `{"type": <string>, "data": <string>}` where `data` is an opaque JSON
//! string; it is parsed exactly once, here, into a typed [`ClientMessage`].

use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use store::{Auction, AuctionStatus};

/// Envelope shared by inbound frames and data-carrying outbound frames.
#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: String,
}

// ============================================================================
// Client → Server Messages
// ============================================================================

/// A fully parsed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Record interest in an auction; no state mutation.
    Join { auction_id: String },
    /// Offer `amount` on an auction; enters the bid pipeline.
    Bid { auction_id: String, amount: i64 },
    /// Request a snapshot of the auction, sent to the requester only.
    Update { auction_id: String },
}

#[derive(Debug, Deserialize)]
struct JoinPayload {
    auction_id: String,
}

#[derive(Debug, Deserialize)]
struct BidPayload {
    auction_id: String,
    amount: i64,
}

/// Parse one raw inbound frame.
///
/// Validation order: envelope parse, known `type`, payload parse. Domain
/// checks happen downstream.
pub fn parse_client_message(raw: &str) -> Result<ClientMessage> {
    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|e| ServerError::BadMessageFormat(e.to_string()))?;
    match envelope.kind.as_str() {
        "join" => {
            let payload: JoinPayload = serde_json::from_str(&envelope.data)
                .map_err(|e| ServerError::BadMessageFormat(e.to_string()))?;
            Ok(ClientMessage::Join {
                auction_id: payload.auction_id,
            })
        }
        "bid" => {
            let payload: BidPayload = serde_json::from_str(&envelope.data)
                .map_err(|e| ServerError::BadMessageFormat(e.to_string()))?;
            Ok(ClientMessage::Bid {
                auction_id: payload.auction_id,
                amount: payload.amount,
            })
        }
        "update" => {
            let payload: JoinPayload = serde_json::from_str(&envelope.data)
                .map_err(|e| ServerError::BadMessageFormat(e.to_string()))?;
            Ok(ClientMessage::Update {
                auction_id: payload.auction_id,
            })
        }
        other => Err(ServerError::UnknownMessageType(other.to_string())),
    }
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Message sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// An accepted bid, broadcast to all connected clients.
    Bid { data: String },
    /// Terminal settlement of an auction, broadcast to all clients.
    AuctionEnd { data: String },
    /// Auction snapshot, sent to the requester only.
    Update { data: String },
    /// Typed error, sent to the offending client only.
    Error { code: u16, message: String },
}

/// Payload of a `bid` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidBroadcast {
    pub auction_id: String,
    pub amount: i64,
    pub bidder_id: String,
    pub new_bid_count: i32,
}

/// Payload of an `auction_end` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionEndBroadcast {
    pub auction_id: String,
    pub status: AuctionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    pub final_price: i64,
}

pub fn bid_frame(payload: &BidBroadcast) -> Result<ServerMessage> {
    Ok(ServerMessage::Bid {
        data: serde_json::to_string(payload)?,
    })
}

pub fn auction_end_frame(payload: &AuctionEndBroadcast) -> Result<ServerMessage> {
    Ok(ServerMessage::AuctionEnd {
        data: serde_json::to_string(payload)?,
    })
}

pub fn update_frame(auction: &Auction) -> Result<ServerMessage> {
    Ok(ServerMessage::Update {
        data: serde_json::to_string(auction)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bid() {
        let raw = r#"{"type":"bid","data":"{\"auction_id\":\"A1\",\"amount\":110}"}"#;
        let msg = parse_client_message(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Bid {
                auction_id: "A1".to_string(),
                amount: 110
            }
        );
    }

    #[test]
    fn test_parse_join_and_update() {
        let raw = r#"{"type":"join","data":"{\"auction_id\":\"A1\"}"}"#;
        assert_eq!(
            parse_client_message(raw).unwrap(),
            ClientMessage::Join {
                auction_id: "A1".to_string()
            }
        );
        let raw = r#"{"type":"update","data":"{\"auction_id\":\"A1\"}"}"#;
        assert_eq!(
            parse_client_message(raw).unwrap(),
            ClientMessage::Update {
                auction_id: "A1".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type() {
        let raw = r#"{"type":"subscribe","data":"{}"}"#;
        match parse_client_message(raw) {
            Err(ServerError::UnknownMessageType(t)) => assert_eq!(t, "subscribe"),
            other => panic!("expected unknown message type, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_envelope_and_payload() {
        assert!(matches!(
            parse_client_message("not json"),
            Err(ServerError::BadMessageFormat(_))
        ));
        // Valid envelope, garbage payload string.
        let raw = r#"{"type":"bid","data":"{\"auction_id\":42}"}"#;
        assert!(matches!(
            parse_client_message(raw),
            Err(ServerError::BadMessageFormat(_))
        ));
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = ServerMessage::Error {
            code: 1004,
            message: "Bid amount must be higher than current price".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], 1004);
    }

    #[test]
    fn test_bid_broadcast_shape() {
        let frame = bid_frame(&BidBroadcast {
            auction_id: "A1".to_string(),
            amount: 110,
            bidder_id: "U1".to_string(),
            new_bid_count: 4,
        })
        .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "bid");
        // data is a string-of-JSON, not a nested object
        let inner: BidBroadcast = serde_json::from_str(json["data"].as_str().unwrap()).unwrap();
        assert_eq!(inner.amount, 110);
        assert_eq!(inner.new_bid_count, 4);
    }

    #[test]
    fn test_auction_end_omits_absent_winner() {
        let frame = auction_end_frame(&AuctionEndBroadcast {
            auction_id: "A3".to_string(),
            status: AuctionStatus::ReserveNotMet,
            winner_id: None,
            final_price: 300,
        })
        .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "auction_end");
        let inner: serde_json::Value =
            serde_json::from_str(json["data"].as_str().unwrap()).unwrap();
        assert_eq!(inner["status"], "reserve_not_met");
        assert!(inner.get("winner_id").is_none());
    }
}
