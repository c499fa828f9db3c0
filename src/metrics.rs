//! Prometheus metrics for the recorder

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::watcher::FetchStatus;

/// Counters exported on `/metrics`
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    fetches: IntCounterVec,
    rate_limit_retries: IntCounterVec,
    stale_discarded: IntCounter,
    records_published: IntCounterVec,
    sink_errors: IntCounter,
    records_dropped: IntCounter,
    watchers: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("depth_recorder".to_string()), None)?;

        let fetches = IntCounterVec::new(
            Opts::new("fetches_total", "Completed order book fetches"),
            &["exchange", "status"],
        )?;
        let rate_limit_retries = IntCounterVec::new(
            Opts::new("rate_limit_retries_total", "Retries after a rate limit signal"),
            &["exchange"],
        )?;
        let stale_discarded = IntCounter::new(
            "stale_results_discarded_total",
            "Fetch results dropped because a newer fetch had been launched",
        )?;
        let records_published = IntCounterVec::new(
            Opts::new("depth_records_published_total", "Depth records handed to the sink"),
            &["exchange", "market"],
        )?;
        let sink_errors = IntCounter::new("sink_errors_total", "Depth records the sink rejected")?;
        let records_dropped = IntCounter::new(
            "records_dropped_total",
            "Depth records dropped because the sink queue was full",
        )?;
        let watchers = IntGauge::new("watchers", "Exchange market pairs being watched")?;

        registry.register(Box::new(fetches.clone()))?;
        registry.register(Box::new(rate_limit_retries.clone()))?;
        registry.register(Box::new(stale_discarded.clone()))?;
        registry.register(Box::new(records_published.clone()))?;
        registry.register(Box::new(sink_errors.clone()))?;
        registry.register(Box::new(records_dropped.clone()))?;
        registry.register(Box::new(watchers.clone()))?;

        Ok(Self {
            registry,
            fetches,
            rate_limit_retries,
            stale_discarded,
            records_published,
            sink_errors,
            records_dropped,
            watchers,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_fetch(&self, exchange: &str, status: &FetchStatus, retries: u32) {
        self.fetches
            .with_label_values(&[exchange, status.as_str()])
            .inc();
        if retries > 0 {
            self.rate_limit_retries
                .with_label_values(&[exchange])
                .inc_by(u64::from(retries));
        }
    }

    pub fn record_stale(&self) {
        self.stale_discarded.inc();
    }

    pub fn record_published(&self, exchange: &str, market: &str) {
        self.records_published
            .with_label_values(&[exchange, market])
            .inc();
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.inc();
    }

    pub fn record_dropped(&self) {
        self.records_dropped.inc();
    }

    pub fn set_watchers(&self, count: usize) {
        self.watchers.set(count as i64);
    }

    /// Text exposition of everything registered
    pub fn encode(&self) -> String {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
