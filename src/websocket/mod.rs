//! WebSocket module for streaming depth sources

mod client;
mod manager;

pub use client::WebSocketClient;
pub use manager::{stream_depth, stream_name, WebSocketSource};
