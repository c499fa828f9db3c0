//! Fetch variants for a watcher
//!
//! Streaming sources are awaited directly. Polling sources run on the worker
//! pool behind a minimum-interval throttle and a rate limit retry loop.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::FetchError;
use crate::parser::OrderBookSnapshot;
use crate::source::{PollingSource, StreamingSource};

use super::pool::WorkerPool;

/// Where a watcher gets its books from. Chosen once, at construction.
#[derive(Clone)]
pub enum BookSource {
    Streaming(Arc<dyn StreamingSource>),
    Polling {
        source: Arc<dyn PollingSource>,
        pool: WorkerPool,
    },
}

impl BookSource {
    pub fn kind(&self) -> &'static str {
        match self {
            BookSource::Streaming(_) => "streaming",
            BookSource::Polling { .. } => "polling",
        }
    }
}

impl std::fmt::Debug for BookSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// How a fetch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    /// Exchange timed out or was unavailable; the book is empty
    Degraded(String),
    /// Still rate limited after every attempt; the book is empty
    Exhausted,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Ok => "ok",
            FetchStatus::Degraded(_) => "degraded",
            FetchStatus::Exhausted => "exhausted",
        }
    }
}

/// Rate limit retry schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            multiplier: 1.25,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            initial_delay: Duration::try_from_secs_f64(config.retry_initial_delay_secs)
                .unwrap_or(RetryPolicy::default().initial_delay),
            multiplier: config.retry_multiplier,
        }
    }
}

/// Minimum spacing between successful polls of one exchange market
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_fetch: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_fetch: Mutex::new(None),
        }
    }

    /// Time left before the next request may go out
    pub fn remaining(&self, now: Instant) -> Duration {
        match *self.last_fetch.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(last) => self.min_interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn record_fetch(&self, at: Instant) {
        *self.last_fetch.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    pub fn last_fetch(&self) -> Option<Instant> {
        *self.last_fetch.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A finished polling attempt sequence
#[derive(Debug, Clone)]
pub struct PollResult {
    pub snapshot: OrderBookSnapshot,
    pub status: FetchStatus,
    /// Rate limit retries that were slept through
    pub retries: u32,
}

/// Blocking poll with throttle and rate limit backoff.
///
/// `sleep` is the only way this function waits, so tests can observe the
/// schedule without burning wall-clock time.
pub fn poll_with_retry<S>(
    source: &dyn PollingSource,
    exchange: &str,
    market: &str,
    depth_limit: usize,
    throttle: &Throttle,
    policy: RetryPolicy,
    mut sleep: S,
) -> PollResult
where
    S: FnMut(Duration),
{
    let wait = throttle.remaining(Instant::now());
    if !wait.is_zero() {
        sleep(wait);
    }

    let mut delay = policy.initial_delay;
    let mut retries = 0;

    for attempt in 1..=policy.max_attempts {
        match source.fetch_order_book(market, depth_limit) {
            Ok(snapshot) => {
                throttle.record_fetch(Instant::now());
                return PollResult {
                    snapshot,
                    status: FetchStatus::Ok,
                    retries,
                };
            }
            Err(FetchError::RateLimited) => {
                debug!(
                    exchange = %exchange,
                    market = %market,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "Rate limit exceeded"
                );
                if attempt == policy.max_attempts {
                    break;
                }
                sleep(delay);
                retries += 1;
                delay = Duration::try_from_secs_f64(delay.as_secs_f64() * policy.multiplier)
                    .unwrap_or(Duration::MAX);
            }
            Err(e) => {
                warn!(exchange = %exchange, market = %market, error = %e, "Exchange degraded, using empty book");
                return PollResult {
                    snapshot: OrderBookSnapshot::empty(),
                    status: FetchStatus::Degraded(e.to_string()),
                    retries,
                };
            }
        }
    }

    error!(
        exchange = %exchange,
        market = %market,
        attempts = policy.max_attempts,
        "Rate limit retries exhausted, using empty book"
    );
    PollResult {
        snapshot: OrderBookSnapshot::empty(),
        status: FetchStatus::Exhausted,
        retries,
    }
}
