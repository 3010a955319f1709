//! Auction deadline scheduling and settlement.
//!
//! Two cooperating mechanisms: a periodic sweep that discovers live
//! auctions, and a one-shot timer per auction armed for its deadline. The
//! job registry is the single source of truth; insertion is re-checked
//! under the write lock so the sweeper and a fired timer can never both
//! settle the same auction.

use crate::client::Hub;
use crate::error::Result;
use crate::protocol::{self, AuctionEndBroadcast};
use chrono::Utc;
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use store::{Auction, AuctionStatus, Store};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// An armed settlement timer for one auction.
struct AuctionJob {
    handle: JoinHandle<()>,
}

/// Registry of armed jobs, keyed by auction id. At most one job per id.
struct JobRegistry {
    jobs: RwLock<HashMap<String, AuctionJob>>,
}

impl JobRegistry {
    fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    fn contains(&self, auction_id: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(auction_id)
    }

    /// Insert `job` unless one is already registered. The existence check
    /// is repeated under the write lock; a losing insert aborts its timer.
    fn try_insert(&self, auction_id: &str, job: AuctionJob) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(auction_id) {
            job.handle.abort();
            return false;
        }
        jobs.insert(auction_id.to_string(), job);
        true
    }

    fn remove(&self, auction_id: &str) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(auction_id);
    }

    fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Abort every armed timer without firing it.
    fn shutdown(&self) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }
}

/// Periodic sweeper plus per-auction one-shot timers.
pub struct AuctionScheduler {
    store: Arc<Store>,
    hub: Arc<Hub>,
    jobs: Arc<JobRegistry>,
    sweep_interval: Duration,
    shutdown: CancellationToken,
}

impl AuctionScheduler {
    pub fn new(
        store: Arc<Store>,
        hub: Arc<Hub>,
        sweep_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            hub,
            jobs: Arc::new(JobRegistry::new()),
            sweep_interval,
            shutdown,
        }
    }

    /// Run the sweeper until shutdown (blocking).
    pub async fn run(self: Arc<Self>) {
        info!(
            "Auction scheduler running, sweeping every {:?}",
            self.sweep_interval
        );
        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                _ = sweep.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Auction sweep failed: {}", e);
                    }
                }
            }
        }

        self.jobs.shutdown();
        info!("Auction scheduler stopped");
    }

    /// One sweep: flip due `scheduled` rows to `active`, settle overdue
    /// auctions inline, and arm a timer for each live auction with no
    /// registered job.
    async fn sweep_once(&self) -> Result<()> {
        let now = Utc::now();

        let activated = self.store.activate_due_auctions(now).await?;
        if activated > 0 {
            info!("{} auction(s) moved to active", activated);
        }

        let auctions = self.store.get_current_auctions().await?;
        debug!("{} active auction(s)", auctions.len());

        for auction in auctions {
            if self.jobs.contains(&auction.id) {
                continue;
            }

            let remaining = auction.end_date - now;
            if remaining <= chrono::Duration::zero() {
                // Overdue row the timer path missed (e.g. across a restart).
                if auction.winner_id.is_none() {
                    if let Err(e) = settle_auction(&self.store, &self.hub, &auction.id).await {
                        error!("Settlement of overdue auction {} failed: {}", auction.id, e);
                    }
                }
                continue;
            }

            let delay = remaining.to_std().unwrap_or_default();
            debug!("Auction {} ends in {:?}", auction.id, delay);
            self.arm(auction.id.clone(), delay);
        }

        gauge!("auction_active_jobs").set(self.jobs.len() as f64);
        Ok(())
    }

    /// Arm a one-shot timer for the auction's deadline.
    fn arm(&self, auction_id: String, delay: Duration) {
        let store = self.store.clone();
        let hub = self.hub.clone();
        let jobs = self.jobs.clone();
        let shutdown = self.shutdown.clone();
        let id = auction_id.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Err(e) = settle_auction(&store, &hub, &id).await {
                // Leave the auction unsettled; the next sweep retries it.
                error!("Settlement of auction {} failed: {}", id, e);
            }
            jobs.remove(&id);
        });

        if !self.jobs.try_insert(&auction_id, AuctionJob { handle }) {
            debug!("Job for auction {} already armed", auction_id);
        }
    }
}

/// Decide the terminal status for an auction at its deadline.
fn settlement_outcome(auction: &Auction) -> (AuctionStatus, Option<String>) {
    if auction.current_bid < auction.reserve_price {
        (AuctionStatus::ReserveNotMet, None)
    } else {
        (AuctionStatus::Sold, auction.current_bidder_id.clone())
    }
}

/// Settle one auction: persist the terminal status and broadcast the
/// result. Idempotent — an already-terminal row returns silently, and the
/// conditional update ensures at most one caller broadcasts.
async fn settle_auction(store: &Store, hub: &Hub, auction_id: &str) -> Result<()> {
    let Some(auction) = store.get_auction_by_id(auction_id).await? else {
        warn!("Auction {} disappeared before settlement", auction_id);
        return Ok(());
    };
    if auction.status.is_terminal() {
        debug!("Auction {} already settled as {}", auction_id, auction.status);
        return Ok(());
    }

    let (status, winner_id) = settlement_outcome(&auction);
    let Some(settled) = store
        .settle_auction(auction_id, status, winner_id.as_deref())
        .await?
    else {
        // Another path won the settlement race and already broadcast.
        debug!("Auction {} settled concurrently", auction_id);
        return Ok(());
    };

    counter!("auction_settlements_total").increment(1);
    info!("Auction {} ended: {}", auction_id, status);

    let frame = protocol::auction_end_frame(&AuctionEndBroadcast {
        auction_id: settled.id.clone(),
        status,
        winner_id: settled.winner_id.clone(),
        final_price: settled.current_bid,
    })?;
    hub.broadcast(&frame);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn auction_with(current_bid: i64, reserve_price: i64) -> Auction {
        let now = Utc::now();
        Auction {
            id: "A2".to_string(),
            mileage: 80_000,
            state: "used".to_string(),
            circulation_date: now - ChronoDuration::days(2000),
            fuel_type: "petrol".to_string(),
            power: 90,
            transmission: "automatic".to_string(),
            car_body: "hatchback".to_string(),
            gear_box: "cvt".to_string(),
            color: "blue".to_string(),
            doors: 3,
            seats: 4,
            start_date: now - ChronoDuration::hours(24),
            end_date: now,
            start_price: 50,
            max_price: 5_000,
            reserve_price,
            current_bid,
            bid_increment: 10,
            current_bidder_id: Some("U3".to_string()),
            bidders_count: 5,
            winner_id: None,
            only_for_merchants: false,
            status: AuctionStatus::Active,
            car_id: "C2".to_string(),
            created_at: now - ChronoDuration::days(30),
            updated_at: now,
        }
    }

    #[test]
    fn test_outcome_reserve_met() {
        let (status, winner) = settlement_outcome(&auction_with(250, 200));
        assert_eq!(status, AuctionStatus::Sold);
        assert_eq!(winner.as_deref(), Some("U3"));
    }

    #[test]
    fn test_outcome_reserve_not_met() {
        let (status, winner) = settlement_outcome(&auction_with(300, 500));
        assert_eq!(status, AuctionStatus::ReserveNotMet);
        assert!(winner.is_none());
    }

    #[test]
    fn test_outcome_reserve_exactly_met() {
        let (status, _) = settlement_outcome(&auction_with(200, 200));
        assert_eq!(status, AuctionStatus::Sold);
    }

    #[tokio::test]
    async fn test_registry_insert_is_deduplicated() {
        let registry = JobRegistry::new();
        let job = || AuctionJob {
            handle: tokio::spawn(std::future::pending::<()>()),
        };

        assert!(registry.try_insert("A1", job()));
        assert!(!registry.try_insert("A1", job()));
        assert_eq!(registry.len(), 1);

        registry.remove("A1");
        assert!(!registry.contains("A1"));
        assert!(registry.try_insert("A1", job()));

        registry.shutdown();
        assert_eq!(registry.len(), 0);
    }
}
