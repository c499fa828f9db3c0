//! Error types for the depth recorder

use thiserror::Error;

/// Depth recorder errors
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Worker pool error: {0}")]
    Worker(String),

    #[error("No order book data observed yet for {exchange} {market}")]
    NoData { exchange: String, market: String },

    #[error("Invalid order book for {exchange} {market}: {reason}")]
    InvalidBook {
        exchange: String,
        market: String,
        reason: String,
    },

    #[error("Connection timeout")]
    ConnectionTimeout,
}

/// Failure signals raised by a polling order book source.
///
/// Only `RateLimited` is retried. Everything else degrades the fetch to an
/// empty book right away.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("exchange not available: {0}")]
    Unavailable(String),

    #[error("fetch failed: {0}")]
    Other(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for RecorderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RecorderError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        RecorderError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for RecorderError {
    fn from(err: reqwest::Error) -> Self {
        RecorderError::RestApiError(err.to_string())
    }
}

impl From<std::io::Error> for RecorderError {
    fn from(err: std::io::Error) -> Self {
        RecorderError::IpcError(err.to_string())
    }
}

impl From<config::ConfigError> for RecorderError {
    fn from(err: config::ConfigError) -> Self {
        RecorderError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        if err.is_connect() {
            return FetchError::Unavailable(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 || status.as_u16() == 418 => {
                FetchError::RateLimited
            }
            Some(status) if status.is_server_error() => FetchError::Unavailable(status.to_string()),
            _ => FetchError::Other(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;
