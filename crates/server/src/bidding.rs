//! Bid acceptance pipeline.
//!
//! The correctness-critical path: each accepted bid runs inside one
//! serializable transaction with the auction row locked, and the broadcast
//! happens strictly after commit, so no client ever observes a bid the
//! store could contradict.

use crate::client::{ClientState, Hub};
use crate::error::{Result, ServerError};
use crate::protocol::{self, BidBroadcast};
use chrono::{DateTime, Utc};
use metrics::counter;
use store::{Auction, AuctionStatus, Store};
use tracing::info;

/// Domain validation against the locked auction row.
fn check_bid(auction: &Auction, amount: i64, now: DateTime<Utc>) -> Result<()> {
    if auction.status != AuctionStatus::Active || now >= auction.end_date {
        return Err(ServerError::AuctionClosed(auction.id.clone()));
    }
    if amount <= auction.current_bid || amount - auction.current_bid < auction.bid_increment {
        return Err(ServerError::BidTooLow {
            amount,
            current_bid: auction.current_bid,
        });
    }
    Ok(())
}

/// Run one bid through the pipeline and broadcast on success.
///
/// Concurrent bids on the same auction serialize on the row lock; duplicate
/// amounts get one acceptance and then `bid-too-low`.
pub async fn place_bid(
    store: &Store,
    hub: &Hub,
    client: &ClientState,
    auction_id: &str,
    amount: i64,
) -> Result<()> {
    let result = run_pipeline(store, client, auction_id, amount).await;
    match result {
        Ok(updated) => {
            counter!("auction_bids_total").increment(1);
            info!(
                "Bid accepted on auction {} by {} at {}",
                auction_id, client.user_id, amount
            );
            let frame = protocol::bid_frame(&BidBroadcast {
                auction_id: updated.id.clone(),
                amount,
                bidder_id: client.user_id.clone(),
                new_bid_count: updated.bidders_count,
            })?;
            hub.broadcast(&frame);
            Ok(())
        }
        Err(e) => {
            counter!("auction_bids_rejected_total").increment(1);
            Err(e)
        }
    }
}

/// The transactional half: lock, validate, mutate, insert, commit.
///
/// The `StoreTx` rolls back on drop, so any early return leaves the store
/// untouched.
async fn run_pipeline(
    store: &Store,
    client: &ClientState,
    auction_id: &str,
    amount: i64,
) -> Result<Auction> {
    let mut tx = store.begin().await?;

    let auction = tx
        .auction_for_update(auction_id)
        .await?
        .ok_or_else(|| ServerError::AuctionNotFound(auction_id.to_string()))?;

    check_bid(&auction, amount, Utc::now())?;

    let updated = tx
        .apply_bid(auction_id, amount, &client.user_id, auction.bidders_count + 1)
        .await?;
    tx.create_bid(auction_id, &client.user_id, amount).await?;
    tx.commit().await?;

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn active_auction() -> Auction {
        let now = Utc::now();
        Auction {
            id: "A1".to_string(),
            mileage: 120_000,
            state: "used".to_string(),
            circulation_date: now - Duration::days(3650),
            fuel_type: "diesel".to_string(),
            power: 110,
            transmission: "manual".to_string(),
            car_body: "sedan".to_string(),
            gear_box: "6-speed".to_string(),
            color: "grey".to_string(),
            doors: 5,
            seats: 5,
            start_date: now - Duration::hours(1),
            end_date: now + Duration::hours(1),
            start_price: 50,
            max_price: 10_000,
            reserve_price: 200,
            current_bid: 100,
            bid_increment: 10,
            current_bidder_id: Some("U0".to_string()),
            bidders_count: 3,
            winner_id: None,
            only_for_merchants: false,
            status: AuctionStatus::Active,
            car_id: "C1".to_string(),
            created_at: now - Duration::days(7),
            updated_at: now,
        }
    }

    #[test]
    fn test_accepts_improving_bid() {
        let auction = active_auction();
        assert!(check_bid(&auction, 110, Utc::now()).is_ok());
        assert!(check_bid(&auction, 500, Utc::now()).is_ok());
    }

    #[test]
    fn test_rejects_bid_at_or_below_current() {
        let auction = active_auction();
        assert!(matches!(
            check_bid(&auction, 100, Utc::now()),
            Err(ServerError::BidTooLow { .. })
        ));
        assert!(matches!(
            check_bid(&auction, 90, Utc::now()),
            Err(ServerError::BidTooLow { .. })
        ));
    }

    #[test]
    fn test_rejects_sub_increment_bid() {
        // 105 improves on 100 but falls short of the increment of 10.
        let auction = active_auction();
        assert!(matches!(
            check_bid(&auction, 105, Utc::now()),
            Err(ServerError::BidTooLow { .. })
        ));
        assert!(check_bid(&auction, 110, Utc::now()).is_ok());
    }

    #[test]
    fn test_rejects_non_active_status() {
        let mut auction = active_auction();
        auction.status = AuctionStatus::Sold;
        assert!(matches!(
            check_bid(&auction, 110, Utc::now()),
            Err(ServerError::AuctionClosed(_))
        ));
    }

    #[test]
    fn test_rejects_past_deadline() {
        let auction = active_auction();
        let after_end = auction.end_date + Duration::seconds(1);
        assert!(matches!(
            check_bid(&auction, 110, after_end),
            Err(ServerError::AuctionClosed(_))
        ));
        // The deadline itself is already closed.
        assert!(matches!(
            check_bid(&auction, 110, auction.end_date),
            Err(ServerError::AuctionClosed(_))
        ));
    }
}
