//! Watcher module
//!
//! One watcher per exchange market pair. It owns the latest book and the depth
//! levels derived from it, and launches generation-tagged fetches. Only the
//! outcome of the most recent generation is ever applied.

mod fetch;
mod pool;

pub use fetch::{poll_with_retry, BookSource, FetchStatus, PollResult, RetryPolicy, Throttle};
pub use pool::WorkerPool;

use futures_util::future::BoxFuture;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RecorderError, Result};
use crate::orderbook::{calculate_price_at_depths, DepthCalculation, DepthLevels, Side};
use crate::parser::OrderBookSnapshot;

const DEFAULT_ORDER_BOOK_LIMIT: usize = 200;
const DEFAULT_MIN_FETCH_INTERVAL: Duration = Duration::from_secs(2);

/// Fetch lifecycle of a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing launched yet
    Idle,
    /// A fetch is in flight
    Pending,
    /// The latest fetch finished and its book is ready to refresh from
    Done,
}

/// Result of one fetch, tagged with the generation that launched it
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub generation: u64,
    pub snapshot: OrderBookSnapshot,
    pub status: FetchStatus,
    pub retries: u32,
}

/// A launched fetch. Whoever drives it hands the outcome back to
/// [`Watcher::complete`].
pub type FetchTask = BoxFuture<'static, FetchOutcome>;

/// Depth levels exported for downstream consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthRecord {
    pub exchange_name: String,
    pub market: String,
    pub ask_levels: DepthLevels,
    pub bid_levels: DepthLevels,
}

/// Live state for one exchange market pair
#[derive(Debug)]
pub struct Watcher {
    exchange_name: String,
    market: String,
    source: BookSource,
    order_book_limit: usize,
    depth_levels: Vec<Decimal>,
    throttle: Arc<Throttle>,
    retry: RetryPolicy,

    order_book: Option<OrderBookSnapshot>,
    ask_price: Option<Decimal>,
    bid_price: Option<Decimal>,
    ask_levels: DepthLevels,
    bid_levels: DepthLevels,

    state: RunState,
    generation: u64,
}

impl Watcher {
    /// Create an idle watcher with no data
    pub fn new(
        exchange_name: impl Into<String>,
        market: impl Into<String>,
        source: BookSource,
        depth_levels: Vec<Decimal>,
    ) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            market: market.into(),
            source,
            order_book_limit: DEFAULT_ORDER_BOOK_LIMIT,
            depth_levels,
            throttle: Arc::new(Throttle::new(DEFAULT_MIN_FETCH_INTERVAL)),
            retry: RetryPolicy::default(),
            order_book: None,
            ask_price: None,
            bid_price: None,
            ask_levels: DepthLevels::new(),
            bid_levels: DepthLevels::new(),
            state: RunState::Idle,
            generation: 0,
        }
    }

    pub fn with_order_book_limit(mut self, limit: usize) -> Self {
        self.order_book_limit = limit;
        self
    }

    pub fn with_min_fetch_interval(mut self, interval: Duration) -> Self {
        self.throttle = Arc::new(Throttle::new(interval));
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn source_kind(&self) -> &'static str {
        self.source.kind()
    }

    pub fn order_book_limit(&self) -> usize {
        self.order_book_limit
    }

    pub fn depth_levels(&self) -> &[Decimal] {
        &self.depth_levels
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ask_price(&self) -> Option<Decimal> {
        self.ask_price
    }

    pub fn bid_price(&self) -> Option<Decimal> {
        self.bid_price
    }

    pub fn ask_levels(&self) -> &DepthLevels {
        &self.ask_levels
    }

    pub fn bid_levels(&self) -> &DepthLevels {
        &self.bid_levels
    }

    /// Launch the next fetch.
    ///
    /// Any fetch still in flight is superseded: it keeps running, but its
    /// outcome carries an old generation and will be refused by `complete`.
    pub fn create_task(&mut self) -> FetchTask {
        self.generation += 1;
        self.state = RunState::Pending;

        let generation = self.generation;
        let exchange = self.exchange_name.clone();
        let market = self.market.clone();
        let limit = self.order_book_limit;

        debug!(
            exchange = %exchange,
            market = %market,
            generation,
            source = self.source.kind(),
            "Launching fetch"
        );

        match &self.source {
            BookSource::Streaming(source) => {
                let source = source.clone();
                Box::pin(async move {
                    match source.await_order_book(&market, limit).await {
                        Ok(snapshot) => FetchOutcome {
                            generation,
                            snapshot,
                            status: FetchStatus::Ok,
                            retries: 0,
                        },
                        Err(e) => {
                            warn!(exchange = %exchange, market = %market, error = %e, "Stream delivered no book");
                            FetchOutcome {
                                generation,
                                snapshot: OrderBookSnapshot::empty(),
                                status: FetchStatus::Degraded(e.to_string()),
                                retries: 0,
                            }
                        }
                    }
                })
            }
            BookSource::Polling { source, pool } => {
                let source = source.clone();
                let pool = pool.clone();
                let throttle = self.throttle.clone();
                let policy = self.retry;
                Box::pin(async move {
                    let job_exchange = exchange.clone();
                    let job_market = market.clone();
                    let polled = pool
                        .run(move || {
                            poll_with_retry(
                                source.as_ref(),
                                &job_exchange,
                                &job_market,
                                limit,
                                &throttle,
                                policy,
                                std::thread::sleep,
                            )
                        })
                        .await;

                    match polled {
                        Ok(poll) => FetchOutcome {
                            generation,
                            snapshot: poll.snapshot,
                            status: poll.status,
                            retries: poll.retries,
                        },
                        Err(e) => {
                            warn!(exchange = %exchange, market = %market, error = %e, "Polling job failed");
                            FetchOutcome {
                                generation,
                                snapshot: OrderBookSnapshot::empty(),
                                status: FetchStatus::Degraded(e.to_string()),
                                retries: 0,
                            }
                        }
                    }
                })
            }
        }
    }

    /// Apply a finished fetch.
    ///
    /// Returns false, leaving state untouched, when the outcome belongs to a
    /// superseded generation or was already applied.
    pub fn complete(&mut self, outcome: FetchOutcome) -> bool {
        if outcome.generation != self.generation || self.state != RunState::Pending {
            debug!(
                exchange = %self.exchange_name,
                market = %self.market,
                stale_generation = outcome.generation,
                current_generation = self.generation,
                "Discarding superseded fetch result"
            );
            return false;
        }

        self.order_book = Some(outcome.snapshot);
        self.state = RunState::Done;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.state == RunState::Pending
    }

    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }

    /// True once a refresh has seen a best ask
    pub fn has_data(&self) -> bool {
        self.ask_price.is_some()
    }

    /// Recompute best prices and depth levels from the latest applied book.
    ///
    /// An empty side leaves the previous best price in place. Targets the book
    /// is too thin for are logged and left out of the level maps.
    pub fn refresh_depths(&mut self) {
        let Some(book) = self.order_book.as_ref() else {
            debug!(exchange = %self.exchange_name, market = %self.market, "No book to refresh from");
            return;
        };

        if let Some(best) = book.asks.first() {
            self.ask_price = Some(best.price);
        }
        if let Some(best) = book.bids.first() {
            self.bid_price = Some(best.price);
        }

        let asks = calculate_price_at_depths(&book.asks, Side::Ask, &self.depth_levels);
        let bids = calculate_price_at_depths(&book.bids, Side::Bid, &self.depth_levels);

        self.warn_if_short(&asks);
        self.warn_if_short(&bids);

        self.ask_levels = asks.levels;
        self.bid_levels = bids.levels;
    }

    fn warn_if_short(&self, calc: &DepthCalculation) {
        if !calc.success {
            warn!(
                exchange = %self.exchange_name,
                market = %self.market,
                side = %calc.side,
                targets = ?self.depth_levels,
                max_quantity = %calc.max_quantity,
                "Could not map out depth levels"
            );
        }
    }

    /// Relative spread, `(best_ask - best_bid) / best_bid`
    pub fn get_spread(&self) -> Result<Decimal> {
        let (Some(ask), Some(bid)) = (self.ask_price, self.bid_price) else {
            return Err(RecorderError::NoData {
                exchange: self.exchange_name.clone(),
                market: self.market.clone(),
            });
        };

        (ask - bid)
            .checked_div(bid)
            .ok_or_else(|| RecorderError::InvalidBook {
                exchange: self.exchange_name.clone(),
                market: self.market.clone(),
                reason: format!("best bid {bid} cannot normalise a spread"),
            })
    }

    /// Current levels as a standalone record
    pub fn get_depth_record(&self) -> DepthRecord {
        DepthRecord {
            exchange_name: self.exchange_name.clone(),
            market: self.market.clone(),
            ask_levels: self.ask_levels.clone(),
            bid_levels: self.bid_levels.clone(),
        }
    }
}
