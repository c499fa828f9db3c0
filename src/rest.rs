//! REST polling source
//!
//! Binance-compatible `/depth` endpoint, fetched with a blocking client so it
//! can only run on the worker pool.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use crate::error::{FetchError, RecorderError, Result};
use crate::orderbook::Side;
use crate::parser::{OrderBookSnapshot, PriceLevel};
use crate::source::{exchange_symbol, PollingSource};

/// Polls order books over HTTP
pub struct RestSource {
    client: Client,
    endpoint: String,
}

impl RestSource {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RecorderError::from)?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn depth_url(&self, market: &str, depth_limit: usize) -> String {
        format!(
            "{}/depth?symbol={}&limit={}",
            self.endpoint,
            exchange_symbol(market),
            depth_limit
        )
    }
}

/// Map an HTTP status onto the fetch taxonomy
fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        429 | 418 => FetchError::RateLimited,
        408 | 504 => FetchError::Timeout,
        _ if status.is_server_error() => FetchError::Unavailable(status.to_string()),
        _ => FetchError::Other(format!("HTTP {status}")),
    })
}

/// Best price first, whatever order the exchange answered in
fn sort_best_first(levels: &mut [PriceLevel], side: Side) {
    let sorted = levels
        .windows(2)
        .all(|w| side.is_at_least_as_good(w[0].price, w[1].price));
    if !sorted {
        match side {
            Side::Ask => levels.sort_by(|a, b| a.price.cmp(&b.price)),
            Side::Bid => levels.sort_by(|a, b| b.price.cmp(&a.price)),
        }
    }
}

impl PollingSource for RestSource {
    fn fetch_order_book(
        &self,
        market: &str,
        depth_limit: usize,
    ) -> std::result::Result<OrderBookSnapshot, FetchError> {
        let url = self.depth_url(market, depth_limit);
        debug!(url = %url, "Fetching order book");

        let response = self.client.get(&url).send()?;
        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let mut book: OrderBookSnapshot = response
            .json()
            .map_err(|e| FetchError::Other(format!("malformed depth payload: {e}")))?;
        sort_best_first(&mut book.asks, Side::Ask);
        sort_best_first(&mut book.bids, Side::Bid);
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_depth_url() {
        let source = RestSource::new("https://api.binance.com/api/v3/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.depth_url("BTC/EUR", 500),
            "https://api.binance.com/api/v3/depth?symbol=BTCEUR&limit=500"
        );
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(FetchError::RateLimited)
        );
        assert_eq!(
            classify_status(StatusCode::GATEWAY_TIMEOUT),
            Some(FetchError::Timeout)
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Some(FetchError::Unavailable(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Some(FetchError::Other(_))
        ));
    }

    #[test]
    fn test_sort_best_first() {
        let mut asks = vec![
            PriceLevel::new(dec!(102), dec!(1)),
            PriceLevel::new(dec!(100), dec!(1)),
        ];
        let mut bids = vec![
            PriceLevel::new(dec!(98), dec!(1)),
            PriceLevel::new(dec!(99), dec!(1)),
        ];
        sort_best_first(&mut asks, Side::Ask);
        sort_best_first(&mut bids, Side::Bid);
        assert_eq!(asks[0].price, dec!(100));
        assert_eq!(bids[0].price, dec!(99));
    }

    #[test]
    fn test_unreachable_host_is_unavailable() {
        // Nothing listens on port 9 of the loopback interface
        let source = RestSource::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = source.fetch_order_book("BTC/EUR", 100).unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_) | FetchError::Timeout));
    }
}
