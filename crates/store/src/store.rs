//! PostgreSQL store adapter.
//!
//! Owns the connection pool and exposes the auction, user, and bid
//! operations the server consumes, plus the transactional variants the bid
//! pipeline runs at serializable isolation.

use crate::error::{Result, StoreError};
use crate::models::{Auction, AuctionStatus, Bid, User};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl StoreConfig {
    /// Render the config as a Postgres connection string.
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            name: "auctions".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 10,
        }
    }
}

const AUCTION_COLUMNS: &str = r#""id", "mileage", "state", "circulationDate", "fuelType", "power",
    "transmission", "carBody", "gearBox", "color", "doors", "seats",
    "startDate", "endDate", "startPrice", "maxPrice", "reservePrice",
    "currentBid", "bidIncrement", "currentBidderId", "biddersCount",
    "winnerId", "onlyForMerchants", "status", "carId", "createdAt", "updatedAt""#;

const BID_COLUMNS: &str = r#""id", "auctionId", "userId", "price", "createdAt", "updatedAt""#;

/// Pooled handle to the auction database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect and build the pool.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.dsn())
            .await
            .map_err(StoreError::Connect)?;
        info!(
            "Connected to database {} at {}:{}",
            config.name, config.host, config.port
        );
        Ok(Self { pool })
    }

    /// Ping-based health report with pool statistics. The ping is bounded
    /// to one second.
    pub async fn health(&self) -> serde_json::Value {
        let ping = tokio::time::timeout(
            Duration::from_secs(1),
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await;
        match ping {
            Ok(Ok(_)) => json!({
                "status": "up",
                "open_connections": self.pool.size(),
                "idle_connections": self.pool.num_idle(),
            }),
            Ok(Err(e)) => json!({ "status": "down", "error": e.to_string() }),
            Err(_) => json!({ "status": "down", "error": "ping timed out" }),
        }
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Disconnected from database");
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT "id", "name", "email", "role" FROM public."User" WHERE "email" = $1"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn get_auction_by_id(&self, auction_id: &str) -> Result<Option<Auction>> {
        let query = format!(
            r#"SELECT {AUCTION_COLUMNS} FROM public."Auctions" WHERE "id" = $1"#
        );
        let auction = sqlx::query_as::<_, Auction>(&query)
            .bind(auction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(auction)
    }

    /// All auctions currently in the `active` status, soonest deadline
    /// first. Overdue rows are included so the scheduler can recover them.
    pub async fn get_current_auctions(&self) -> Result<Vec<Auction>> {
        let query = format!(
            r#"SELECT {AUCTION_COLUMNS} FROM public."Auctions"
               WHERE "status" = 'active' ORDER BY "endDate" ASC"#
        );
        let auctions = sqlx::query_as::<_, Auction>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(auctions)
    }

    /// Flip `scheduled` auctions whose start date has passed to `active`.
    /// Returns the number of rows transitioned.
    pub async fn activate_due_auctions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE public."Auctions" SET "status" = 'active', "updatedAt" = $1
               WHERE "status" = 'scheduled' AND "startDate" <= $1"#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Move an auction into a terminal status. The update is conditional on
    /// the row still being `active`, so concurrent settlement attempts
    /// resolve to exactly one winner: `None` means another path already
    /// settled the auction.
    pub async fn settle_auction(
        &self,
        auction_id: &str,
        status: AuctionStatus,
        winner_id: Option<&str>,
    ) -> Result<Option<Auction>> {
        let query = format!(
            r#"UPDATE public."Auctions"
               SET "status" = $1, "winnerId" = $2, "updatedAt" = now()
               WHERE "id" = $3 AND "status" = 'active'
               RETURNING {AUCTION_COLUMNS}"#
        );
        let auction = sqlx::query_as::<_, Auction>(&query)
            .bind(status)
            .bind(winner_id)
            .bind(auction_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(a) = &auction {
            debug!("Auction {} settled as {}", a.id, a.status);
        }
        Ok(auction)
    }

    pub async fn create_bid(&self, auction_id: &str, user_id: &str, price: i64) -> Result<Bid> {
        let query = format!(
            r#"INSERT INTO public."Bid" ("id", "auctionId", "userId", "price", "updatedAt")
               VALUES (gen_random_uuid()::text, $1, $2, $3, now())
               RETURNING {BID_COLUMNS}"#
        );
        let bid = sqlx::query_as::<_, Bid>(&query)
            .bind(auction_id)
            .bind(user_id)
            .bind(price)
            .fetch_one(&self.pool)
            .await?;
        Ok(bid)
    }

    /// Begin a serializable transaction for the bid pipeline.
    pub async fn begin(&self) -> Result<StoreTx> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(StoreTx { tx })
    }
}

/// An open serializable transaction.
///
/// Dropping an uncommitted `StoreTx` rolls it back.
pub struct StoreTx {
    tx: Transaction<'static, Postgres>,
}

impl StoreTx {
    /// Read an auction row under a row-level lock (`SELECT … FOR UPDATE`),
    /// linearizing concurrent bids on the same auction.
    pub async fn auction_for_update(&mut self, auction_id: &str) -> Result<Option<Auction>> {
        let query = format!(
            r#"SELECT {AUCTION_COLUMNS} FROM public."Auctions" WHERE "id" = $1 FOR UPDATE"#
        );
        let auction = sqlx::query_as::<_, Auction>(&query)
            .bind(auction_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(auction)
    }

    /// Apply an accepted bid to the locked auction row.
    pub async fn apply_bid(
        &mut self,
        auction_id: &str,
        amount: i64,
        bidder_id: &str,
        bidders_count: i32,
    ) -> Result<Auction> {
        let query = format!(
            r#"UPDATE public."Auctions"
               SET "currentBid" = $1, "currentBidderId" = $2, "biddersCount" = $3, "updatedAt" = now()
               WHERE "id" = $4
               RETURNING {AUCTION_COLUMNS}"#
        );
        let auction = sqlx::query_as::<_, Auction>(&query)
            .bind(amount)
            .bind(bidder_id)
            .bind(bidders_count)
            .bind(auction_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(auction)
    }

    /// Insert the bid row with a server-generated id and timestamp.
    pub async fn create_bid(
        &mut self,
        auction_id: &str,
        user_id: &str,
        price: i64,
    ) -> Result<Bid> {
        let query = format!(
            r#"INSERT INTO public."Bid" ("id", "auctionId", "userId", "price", "updatedAt")
               VALUES (gen_random_uuid()::text, $1, $2, $3, now())
               RETURNING {BID_COLUMNS}"#
        );
        let bid = sqlx::query_as::<_, Bid>(&query)
            .bind(auction_id)
            .bind(user_id)
            .bind(price)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(bid)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
