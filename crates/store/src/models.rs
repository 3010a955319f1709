//! Row types for the `User`, `Auctions`, and `Bid` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an auction.
///
/// Transitions are one-way: `scheduled → active → {sold, reserve_not_met,
/// cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Scheduled,
    Active,
    Sold,
    ReserveNotMet,
    Cancelled,
}

impl AuctionStatus {
    /// Whether the auction can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AuctionStatus::Sold | AuctionStatus::ReserveNotMet | AuctionStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuctionStatus::Scheduled => "scheduled",
            AuctionStatus::Active => "active",
            AuctionStatus::Sold => "sold",
            AuctionStatus::ReserveNotMet => "reserve_not_met",
            AuctionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An auction row. Monetary fields are integers in minor currency units.
///
/// The descriptive vehicle metadata is carried unchanged; the server never
/// interprets it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Auction {
    pub id: String,
    pub mileage: i32,
    pub state: String,
    #[sqlx(rename = "circulationDate")]
    pub circulation_date: DateTime<Utc>,
    #[sqlx(rename = "fuelType")]
    pub fuel_type: String,
    pub power: i32,
    pub transmission: String,
    #[sqlx(rename = "carBody")]
    pub car_body: String,
    #[sqlx(rename = "gearBox")]
    pub gear_box: String,
    pub color: String,
    pub doors: i32,
    pub seats: i32,
    #[sqlx(rename = "startDate")]
    pub start_date: DateTime<Utc>,
    #[sqlx(rename = "endDate")]
    pub end_date: DateTime<Utc>,
    #[sqlx(rename = "startPrice")]
    pub start_price: i64,
    #[sqlx(rename = "maxPrice")]
    pub max_price: i64,
    #[sqlx(rename = "reservePrice")]
    pub reserve_price: i64,
    #[sqlx(rename = "currentBid")]
    pub current_bid: i64,
    #[sqlx(rename = "bidIncrement")]
    pub bid_increment: i64,
    #[sqlx(rename = "currentBidderId")]
    pub current_bidder_id: Option<String>,
    #[sqlx(rename = "biddersCount")]
    pub bidders_count: i32,
    #[sqlx(rename = "winnerId")]
    pub winner_id: Option<String>,
    #[sqlx(rename = "onlyForMerchants")]
    pub only_for_merchants: bool,
    pub status: AuctionStatus,
    #[sqlx(rename = "carId")]
    pub car_id: String,
    #[sqlx(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// An accepted bid. Immutable once written; id and timestamp are
/// server-assigned.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bid {
    pub id: String,
    #[sqlx(rename = "auctionId")]
    pub auction_id: String,
    #[sqlx(rename = "userId")]
    pub user_id: String,
    pub price: i64,
    #[sqlx(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// A user row. The server only ever reads users.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: String,
    pub role: String,
}
