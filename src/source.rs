//! Exchange connectivity boundary
//!
//! A watcher is bound to exactly one of these once, at construction.

use async_trait::async_trait;

use crate::error::{FetchError, Result};
use crate::parser::OrderBookSnapshot;

/// A source that pushes full books as they change
#[async_trait]
pub trait StreamingSource: Send + Sync {
    /// Suspend until the next full book for `market` is pushed.
    ///
    /// Reconnection is the source's own business; an error here means the
    /// push could not be delivered at all.
    async fn await_order_book(&self, market: &str, depth_limit: usize) -> Result<OrderBookSnapshot>;
}

/// A source that needs one blocking request per book.
///
/// Always called from the worker pool, never from the scheduler task.
#[cfg_attr(test, mockall::automock)]
pub trait PollingSource: Send + Sync {
    fn fetch_order_book(
        &self,
        market: &str,
        depth_limit: usize,
    ) -> std::result::Result<OrderBookSnapshot, FetchError>;
}

/// `BTC/EUR` -> `BTCEUR`, the symbol form Binance-compatible APIs expect
pub fn exchange_symbol(market: &str) -> String {
    market.replace(['/', '-'], "").to_uppercase()
}
