//! Real-time auction coordination service.
//!
//! This service:
//! - Authenticates WebSocket upgrades from an Auth.js session cookie
//! - Runs one read pump and one write pump per connection
//! - Applies bids inside serializable database transactions
//! - Settles each auction exactly once at its deadline
//! - Broadcasts accepted bids and settlements to every connected client
//!
//! ## Architecture
//!
//! ```text
//! HTTP upgrade → auth gate
//!         ↓
//! Hub (DashMap registry, bounded per-client queues)
//!         ↓                         ↑ broadcast
//! MessageRouter → bid pipeline (sqlx, SELECT … FOR UPDATE)
//!
//! AuctionScheduler: periodic sweep + one-shot deadline timers
//! ```
//!
//! ## Fan-out discipline
//!
//! - Frames are serialized once per broadcast
//! - Enqueues never block; a full queue disconnects the slow consumer
//! - The write pump is the sole writer to each socket

pub mod auth;
pub mod bidding;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod rate_limit;
pub mod router;
pub mod scheduler;
pub mod ws_server;

pub use client::{ClientState, ConnId, Hub};
pub use config::Config;
pub use error::{Result, ServerError};
pub use protocol::{ClientMessage, ServerMessage};
pub use router::MessageRouter;
pub use scheduler::AuctionScheduler;
pub use ws_server::{create_router, AppState};
