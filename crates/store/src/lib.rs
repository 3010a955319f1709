//! Persistence layer for the auction server.
//!
//! Wraps a `sqlx` Postgres pool behind the operations the coordination
//! layer needs: user lookup, auction reads, the scheduled→active flip,
//! conditional settlement, bid insertion, and the serializable
//! transactional variants used by the bid pipeline.

pub mod error;
pub mod models;
pub mod store;

pub use error::{Result, StoreError};
pub use models::{Auction, AuctionStatus, Bid, User};
pub use store::{Store, StoreConfig, StoreTx};
