//! Streaming source over partial-depth websocket feeds
//!
//! One background feed per stream keeps the latest full book in a watch
//! channel and reconnects on its own. Awaiting a book means waiting for the
//! next push on that channel.

use async_trait::async_trait;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

use super::WebSocketClient;
use crate::error::{RecorderError, Result};
use crate::parser::{OrderBookSnapshot, ParsedMessage};
use crate::source::{exchange_symbol, StreamingSource};

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Book sizes the partial-depth stream offers
const SUPPORTED_DEPTHS: [usize; 3] = [5, 10, 20];

type BookSender = Arc<watch::Sender<Option<OrderBookSnapshot>>>;

struct Feed {
    books: BookSender,
    handle: JoinHandle<()>,
}

/// Pushes full books from Binance-compatible partial-depth streams
pub struct WebSocketSource {
    endpoint: String,
    reconnect_delay_ms: u64,
    feeds: Mutex<HashMap<String, Feed>>,
}

/// Largest stream depth not above the requested limit
pub fn stream_depth(depth_limit: usize) -> usize {
    SUPPORTED_DEPTHS
        .iter()
        .rev()
        .copied()
        .find(|d| *d <= depth_limit)
        .unwrap_or(SUPPORTED_DEPTHS[0])
}

pub fn stream_name(market: &str, depth_limit: usize) -> String {
    format!(
        "{}@depth{}@100ms",
        exchange_symbol(market).to_lowercase(),
        stream_depth(depth_limit)
    )
}

impl WebSocketSource {
    pub fn new(endpoint: &str, reconnect_delay_ms: u64) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            reconnect_delay_ms,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Receiver that only sees pushes made after this call
    fn subscribe(&self, market: &str, depth_limit: usize) -> watch::Receiver<Option<OrderBookSnapshot>> {
        let name = stream_name(market, depth_limit);
        let mut feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());

        let feed = feeds.entry(name.clone()).or_insert_with(|| {
            let (tx, _) = watch::channel(None);
            let books = Arc::new(tx);
            let client = WebSocketClient::new(&self.endpoint, &name);
            let handle = tokio::spawn(run_feed(client, books.clone(), self.reconnect_delay_ms));
            Feed { books, handle }
        });

        feed.books.subscribe()
    }
}

impl Drop for WebSocketSource {
    fn drop(&mut self) {
        let feeds = self.feeds.get_mut().unwrap_or_else(|e| e.into_inner());
        for feed in feeds.values() {
            feed.handle.abort();
        }
    }
}

#[async_trait]
impl StreamingSource for WebSocketSource {
    async fn await_order_book(&self, market: &str, depth_limit: usize) -> Result<OrderBookSnapshot> {
        let mut rx = self.subscribe(market, depth_limit);

        loop {
            rx.changed()
                .await
                .map_err(|_| RecorderError::WebSocketConnection("depth feed stopped".to_string()))?;
            let latest = rx.borrow_and_update().clone();
            if let Some(book) = latest {
                return Ok(book);
            }
        }
    }
}

/// Keep one stream alive forever, reconnecting with exponential backoff
async fn run_feed(mut client: WebSocketClient, books: BookSender, reconnect_delay_ms: u64) {
    let mut reconnect_attempts: u32 = 0;

    loop {
        let e = match feed_once(&mut client, &books, &mut reconnect_attempts).await {
            Ok(never) => match never {},
            Err(e) => e,
        };
        error!(url = %client.url(), error = %e, "Depth stream error");
        reconnect_attempts += 1;

        let base_delay = reconnect_delay_ms.saturating_mul(2u64.pow(reconnect_attempts.min(6)));
        let delay = Duration::from_millis(base_delay.min(MAX_BACKOFF_MS));

        warn!(
            attempt = reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after error..."
        );
        sleep(delay).await;
    }
}

/// Pump one connection until it fails. Closing counts as failing.
async fn feed_once(
    client: &mut WebSocketClient,
    books: &BookSender,
    reconnect_attempts: &mut u32,
) -> Result<Infallible> {
    client.connect().await?;
    *reconnect_attempts = 0;

    let mut last_message = Instant::now();
    let keepalive_timeout = Duration::from_secs(30);
    let recv_timeout = Duration::from_secs(45);

    loop {
        match timeout(recv_timeout, client.recv()).await {
            Ok(Ok(Some(text))) => {
                last_message = Instant::now();
                match ParsedMessage::parse(&text) {
                    Ok(ParsedMessage::Depth(book)) => {
                        books.send_replace(Some(book));
                    }
                    Ok(ParsedMessage::Unknown(msg)) => {
                        tracing::trace!(msg = %msg, "Unknown message type");
                    }
                    Err(e) => warn!(error = %e, "Failed to parse depth message"),
                }
            }
            Ok(Ok(None)) => {
                if last_message.elapsed() > keepalive_timeout {
                    if let Err(e) = client.ping().await {
                        warn!(error = %e, "Failed to send keepalive ping");
                    }
                }
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(
                    last_message_secs = last_message.elapsed().as_secs(),
                    "No message received within timeout, sending keepalive"
                );
                if let Err(e) = client.ping().await {
                    warn!(error = %e, "Failed to send keepalive ping, reconnecting");
                    return Err(RecorderError::ConnectionTimeout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use rust_decimal_macros::dec;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::Message;

    #[test]
    fn test_stream_depth_rounds_down_to_supported() {
        assert_eq!(stream_depth(200), 20);
        assert_eq!(stream_depth(100), 20);
        assert_eq!(stream_depth(12), 10);
        assert_eq!(stream_depth(5), 5);
        assert_eq!(stream_depth(1), 5);
    }

    #[test]
    fn test_stream_name() {
        assert_eq!(stream_name("BTC/EUR", 500), "btceur@depth20@100ms");
    }

    #[tokio::test]
    async fn test_awaits_pushed_book() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let payload = r#"{"lastUpdateId":5,"bids":[["41990.10","0.5"]],"asks":[["42000.00","0.25"]]}"#;
            while ws.send(Message::Text(payload.to_string())).await.is_ok() {
                sleep(Duration::from_millis(20)).await;
            }
        });

        let source = WebSocketSource::new(&format!("ws://{addr}"), 50);
        let book = timeout(Duration::from_secs(5), source.await_order_book("BTC/EUR", 200))
            .await
            .expect("no book pushed in time")
            .unwrap();

        assert_eq!(book.last_update_id, 5);
        assert_eq!(book.asks[0].price, dec!(42000.00));
        assert_eq!(book.bids[0].quantity, dec!(0.5));
    }

    #[tokio::test]
    async fn test_reconnects_after_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // First connection is closed straight away
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.close(None).await.unwrap();

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let payload = r#"{"lastUpdateId":9,"bids":[["100","1"]],"asks":[["101","1"]]}"#;
            while ws.send(Message::Text(payload.to_string())).await.is_ok() {
                sleep(Duration::from_millis(20)).await;
            }
        });

        let source = WebSocketSource::new(&format!("ws://{addr}"), 10);
        let book = timeout(Duration::from_secs(5), source.await_order_book("ETH/EUR", 10))
            .await
            .expect("feed did not reconnect")
            .unwrap();

        assert_eq!(book.last_update_id, 9);
    }
}
