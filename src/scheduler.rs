//! Scheduler driving every watcher from one task
//!
//! Launches a fetch for each idle watcher, applies finished fetches, and
//! queues depth records for the sink. Fetch futures for all watchers live in
//! one `FuturesUnordered`, so watchers suspend independently of each other.
//! Nothing here waits on the sink.

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::publisher::RecordQueue;
use crate::watcher::{FetchOutcome, Watcher};

/// A fetch tagged with the index of the watcher that launched it
type Tagged = BoxFuture<'static, (usize, FetchOutcome)>;

/// Drives a fixed set of watchers
pub struct Scheduler {
    watchers: Vec<Watcher>,
    in_flight: FuturesUnordered<Tagged>,
    records: RecordQueue,
    metrics: Metrics,
    status_interval: Duration,
}

impl Scheduler {
    pub fn new(watchers: Vec<Watcher>, records: RecordQueue, metrics: Metrics) -> Self {
        metrics.set_watchers(watchers.len());
        Self {
            watchers,
            in_flight: FuturesUnordered::new(),
            records,
            metrics,
            status_interval: Duration::from_secs(30),
        }
    }

    pub fn with_status_interval(mut self, status_interval: Duration) -> Self {
        self.status_interval = status_interval;
        self
    }

    pub fn watchers(&self) -> &[Watcher] {
        &self.watchers
    }

    /// Fetches launched and not yet finished, superseded ones included
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn launch(&mut self, index: usize) {
        let task = self.watchers[index].create_task();
        self.in_flight.push(task.map(move |outcome| (index, outcome)).boxed());
    }

    /// One pass over every watcher.
    ///
    /// A finished watcher is refreshed, its record queued, and its next fetch
    /// launched. A watcher that never started gets its first fetch.
    pub fn sweep(&mut self) {
        for index in 0..self.watchers.len() {
            let watcher = &mut self.watchers[index];
            if watcher.is_done() {
                watcher.refresh_depths();
                self.records.offer(watcher.get_depth_record());
                self.launch(index);
            } else if !self.watchers[index].is_pending() {
                self.launch(index);
            }
        }
    }

    /// Wait for one fetch to finish, apply it, then sweep.
    ///
    /// Returns false when nothing is in flight.
    pub async fn step(&mut self) -> bool {
        let Some((index, outcome)) = self.in_flight.next().await else {
            return false;
        };
        self.apply(index, outcome);
        self.sweep();
        true
    }

    fn apply(&mut self, index: usize, outcome: FetchOutcome) {
        let watcher = &mut self.watchers[index];
        self.metrics
            .record_fetch(watcher.exchange_name(), &outcome.status, outcome.retries);
        if !watcher.complete(outcome) {
            self.metrics.record_stale();
        }
    }

    /// Run forever
    pub async fn run(mut self) {
        if self.watchers.is_empty() {
            warn!("No watchers configured, scheduler has nothing to do");
            return;
        }
        info!(watchers = self.watchers.len(), "Starting scheduler");

        let mut status = interval(self.status_interval);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.sweep();
        loop {
            tokio::select! {
                finished = self.in_flight.next() => match finished {
                    Some((index, outcome)) => {
                        self.apply(index, outcome);
                        self.sweep();
                    }
                    None => self.sweep(),
                },
                _ = status.tick() => self.log_status(),
            }
        }
    }

    fn log_status(&self) {
        for watcher in &self.watchers {
            match watcher.get_spread() {
                Ok(spread) => info!(
                    exchange = %watcher.exchange_name(),
                    market = %watcher.market(),
                    ask = ?watcher.ask_price(),
                    bid = ?watcher.bid_price(),
                    spread = %spread,
                    "Order book status"
                ),
                Err(e) => debug!(
                    exchange = %watcher.exchange_name(),
                    market = %watcher.market(),
                    error = %e,
                    "Order book status unavailable"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::parser::{OrderBookSnapshot, PriceLevel};
    use crate::publisher::DepthSink;
    use crate::source::StreamingSource;
    use crate::watcher::{BookSource, DepthRecord};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct FixedStream;

    #[async_trait]
    impl StreamingSource for FixedStream {
        async fn await_order_book(&self, _market: &str, _limit: usize) -> Result<OrderBookSnapshot> {
            tokio::task::yield_now().await;
            Ok(OrderBookSnapshot {
                last_update_id: 1,
                asks: vec![PriceLevel::new(dec!(101), dec!(0.05))],
                bids: vec![PriceLevel::new(dec!(100), dec!(0.05))],
            })
        }
    }

    /// Forwards every published record to the test
    struct CollectSink(mpsc::UnboundedSender<DepthRecord>);

    #[async_trait]
    impl DepthSink for CollectSink {
        async fn publish(&self, record: &DepthRecord) -> Result<()> {
            let _ = self.0.send(record.clone());
            Ok(())
        }
    }

    /// Never finishes a publish
    struct StalledSink;

    #[async_trait]
    impl DepthSink for StalledSink {
        async fn publish(&self, _record: &DepthRecord) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn watcher(exchange: &str) -> Watcher {
        Watcher::new(
            exchange,
            "BTC/EUR",
            BookSource::Streaming(Arc::new(FixedStream)),
            vec![dec!(0.04)],
        )
    }

    fn collecting(watchers: Vec<Watcher>) -> (Scheduler, mpsc::UnboundedReceiver<DepthRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = Metrics::new().unwrap();
        let (records, _drain) = RecordQueue::spawn(Arc::new(CollectSink(tx)), 16, metrics.clone());
        (Scheduler::new(watchers, records, metrics), rx)
    }

    #[tokio::test]
    async fn test_sweep_launches_idle_watchers() {
        let (mut scheduler, mut rx) = collecting(vec![watcher("Kraken"), watcher("Bitstamp")]);

        scheduler.sweep();
        assert_eq!(scheduler.in_flight(), 2);
        assert!(scheduler.watchers().iter().all(Watcher::is_pending));

        // Pending watchers are left alone
        scheduler.sweep();
        assert_eq!(scheduler.in_flight(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_step_publishes_and_relaunches() {
        let (mut scheduler, mut rx) = collecting(vec![watcher("Kraken")]);

        scheduler.sweep();
        assert!(scheduler.step().await);

        let record = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(record.ask_levels.get(dec!(0.04)), Some(dec!(101)));
        assert_eq!(record.bid_levels.get(dec!(0.04)), Some(dec!(100)));

        let watcher = &scheduler.watchers()[0];
        assert!(watcher.is_pending());
        assert_eq!(watcher.generation(), 2);
        assert_eq!(watcher.get_spread().unwrap(), dec!(0.01));
    }

    #[tokio::test]
    async fn test_step_without_work() {
        let (mut scheduler, _rx) = collecting(Vec::new());
        assert!(!scheduler.step().await);
    }

    #[tokio::test]
    async fn test_stalled_sink_does_not_stop_watchers() {
        let metrics = Metrics::new().unwrap();
        let (records, _drain) = RecordQueue::spawn(Arc::new(StalledSink), 1, metrics.clone());
        let mut scheduler = Scheduler::new(
            vec![watcher("Kraken"), watcher("Bitstamp")],
            records,
            metrics.clone(),
        );

        scheduler.sweep();
        timeout(Duration::from_secs(5), async {
            for _ in 0..200 {
                assert!(scheduler.step().await);
            }
        })
        .await
        .expect("scheduler stalled behind the sink");

        let generations: Vec<u64> = scheduler.watchers().iter().map(Watcher::generation).collect();
        assert_eq!(generations.iter().sum::<u64>(), 202);
        assert!(generations.iter().all(|g| *g > 10));
        let dropped: u64 = metrics
            .encode()
            .lines()
            .find_map(|line| line.strip_prefix("depth_recorder_records_dropped_total "))
            .and_then(|value| value.parse().ok())
            .unwrap();
        assert!(dropped >= 190);
    }
}
