//! Publisher module for depth records
//!
//! Hands each refreshed depth record to downstream consumers. Records pass
//! through a bounded queue drained by its own task, so a slow consumer costs
//! dropped records rather than a stalled scheduler.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{RecorderError, Result};
use crate::metrics::Metrics;
use crate::watcher::DepthRecord;

/// Default bound on a single IPC write
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination for depth records
#[async_trait]
pub trait DepthSink: Send + Sync {
    async fn publish(&self, record: &DepthRecord) -> Result<()>;
}

/// Writes every record to the log. Used when no IPC socket is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl DepthSink for LogSink {
    async fn publish(&self, record: &DepthRecord) -> Result<()> {
        let asks = serde_json::to_string(&record.ask_levels)?;
        let bids = serde_json::to_string(&record.bid_levels)?;
        info!(
            exchange = %record.exchange_name,
            market = %record.market,
            ask_levels = %asks,
            bid_levels = %bids,
            "Depth levels"
        );
        Ok(())
    }
}

/// Bounded hand-off between the scheduler and a sink
#[derive(Clone)]
pub struct RecordQueue {
    tx: mpsc::Sender<DepthRecord>,
    metrics: Metrics,
}

impl RecordQueue {
    /// Spawn the task that drains the queue into `sink`.
    ///
    /// The task ends once every `RecordQueue` clone is dropped.
    pub fn spawn(sink: Arc<dyn DepthSink>, capacity: usize, metrics: Metrics) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<DepthRecord>(capacity.max(1));
        let drain_metrics = metrics.clone();

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match sink.publish(&record).await {
                    Ok(()) => drain_metrics.record_published(&record.exchange_name, &record.market),
                    Err(e) => {
                        warn!(
                            exchange = %record.exchange_name,
                            market = %record.market,
                            error = %e,
                            "Failed to publish depth record"
                        );
                        drain_metrics.record_sink_error();
                    }
                }
            }
            debug!("Record queue closed");
        });

        (Self { tx, metrics }, handle)
    }

    /// Queue a record without waiting.
    ///
    /// Returns false, counting the record as dropped, when the queue is full
    /// or the drain task is gone.
    pub fn offer(&self, record: DepthRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                debug!(
                    exchange = %record.exchange_name,
                    market = %record.market,
                    "Sink queue full, dropping depth record"
                );
                self.metrics.record_dropped();
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Sink queue closed, dropping depth record");
                self.metrics.record_dropped();
                false
            }
        }
    }
}

/// Publisher for sending depth records via Unix socket
pub struct Publisher {
    socket_path: String,
    stream: Mutex<Option<UnixStream>>,
    write_timeout: Duration,
}

impl Publisher {
    /// Create a new publisher
    pub async fn new(socket_path: &str) -> Result<Self> {
        let publisher = Self {
            socket_path: socket_path.to_string(),
            stream: Mutex::new(None),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        };

        // Consumers may start after us
        if let Err(e) = publisher.connect().await {
            warn!(error = %e, "Initial IPC connection failed, will retry on publish");
        }

        Ok(publisher)
    }

    /// A consumer that stops reading loses its connection after `write_timeout`
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Connect to the Unix socket
    async fn connect(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(RecorderError::IpcError(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            RecorderError::IpcError(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let mut guard = self.stream.lock().await;
        *guard = Some(stream);

        info!(path = %self.socket_path, "Connected to IPC socket");
        Ok(())
    }

    /// MessagePack body behind a 4-byte big-endian length prefix
    pub fn frame(record: &DepthRecord) -> Result<Vec<u8>> {
        let data = rmp_serde::to_vec_named(record).map_err(|e| {
            RecorderError::SerializationError(format!("Failed to serialize: {}", e))
        })?;

        let len = u32::try_from(data.len())
            .map_err(|_| RecorderError::SerializationError("record too large".to_string()))?
            .to_be_bytes();
        let mut message = Vec::with_capacity(4 + data.len());
        message.extend_from_slice(&len);
        message.extend_from_slice(&data);
        Ok(message)
    }
}

#[async_trait]
impl DepthSink for Publisher {
    async fn publish(&self, record: &DepthRecord) -> Result<()> {
        let message = Self::frame(record)?;

        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            drop(guard);
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Failed to reconnect to IPC socket");
                return Ok(()); // Don't fail on publish errors
            }
            guard = self.stream.lock().await;
        }

        if let Some(stream) = guard.as_mut() {
            match timeout(self.write_timeout, stream.write_all(&message)).await {
                Ok(Ok(())) => {
                    debug!(
                        exchange = %record.exchange_name,
                        market = %record.market,
                        "Published depth record"
                    );
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to write to IPC socket");
                    *guard = None;
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "IPC consumer not reading, dropping connection"
                    );
                    *guard = None;
                }
            }
        }

        Ok(())
    }
}
