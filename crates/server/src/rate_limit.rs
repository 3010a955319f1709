//! Per-connection token-bucket admission control.
//!
//! Checked on every inbound frame before any parsing. `allow` never waits;
//! a refusal drops the message and answers with a typed error frame.

use std::sync::Mutex;
use std::time::Instant;

/// Default refill rate, tokens per second.
pub const RATE_REFILL_PER_SEC: f64 = 1.0;
/// Default burst capacity.
pub const RATE_BURST: f64 = 3.0;

/// A non-blocking token bucket. Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    refill_per_sec: f64,
    capacity: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(refill_per_sec: f64, capacity: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            refill_per_sec,
            capacity,
        }
    }

    /// Try to take one token. Returns false when the bucket is empty.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        if state.tokens < 1.0 {
            return false;
        }
        state.tokens -= 1.0;
        true
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(RATE_REFILL_PER_SEC, RATE_BURST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_burst_then_refusal() {
        let bucket = TokenBucket::default();
        let now = Instant::now();
        assert!(bucket.allow_at(now));
        assert!(bucket.allow_at(now));
        assert!(bucket.allow_at(now));
        assert!(!bucket.allow_at(now));
    }

    #[test]
    fn test_refill_over_time() {
        let bucket = TokenBucket::default();
        let now = Instant::now();
        for _ in 0..3 {
            assert!(bucket.allow_at(now));
        }
        assert!(!bucket.allow_at(now));
        // One second buys back exactly one token.
        let later = now + Duration::from_secs(1);
        assert!(bucket.allow_at(later));
        assert!(!bucket.allow_at(later));
    }

    #[test]
    fn test_capacity_is_capped() {
        let bucket = TokenBucket::default();
        let now = Instant::now();
        // A long idle period must not accumulate more than the burst size.
        let later = now + Duration::from_secs(3600);
        for _ in 0..3 {
            assert!(bucket.allow_at(later));
        }
        assert!(!bucket.allow_at(later));
    }
}
