//! Depth Recorder Library
//!
//! Watches order books for many exchange market pairs and derives the price
//! at configured cumulative-quantity depths on each side of every book.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod publisher;
pub mod rest;
pub mod scheduler;
pub mod source;
pub mod watcher;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use config::{Config, ExchangeConfig, SourceKind};
pub use error::{FetchError, RecorderError, Result};
pub use metrics::Metrics;
pub use orderbook::{calculate_price_at_depths, DepthCalculation, DepthLevels, Side};
pub use parser::{OrderBookSnapshot, PriceLevel};
pub use publisher::{DepthSink, LogSink, Publisher, RecordQueue};
pub use rest::RestSource;
pub use scheduler::Scheduler;
pub use source::{PollingSource, StreamingSource};
pub use watcher::{BookSource, DepthRecord, FetchOutcome, RunState, Watcher, WorkerPool};
pub use websocket::WebSocketSource;

/// Application state shared with the health server
pub struct AppState {
    pub metrics: Metrics,
    pub config: Arc<Config>,
    pub watcher_count: usize,
}
