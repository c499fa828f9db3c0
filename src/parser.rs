//! Parser module for exchange order book payloads
//!
//! Handles deserialization of full-book depth snapshots, both the REST
//! `/depth` response and the partial-depth websocket push, which share a shape.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Price level (price, quantity pair)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Full order book snapshot, best price first on both sides.
///
/// Asks ascend by price, bids descend. Handed to a watcher as a whole and not
/// mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OrderBookSnapshot {
    /// Last update ID, zero when the source does not provide one
    #[serde(rename = "lastUpdateId", default)]
    pub last_update_id: u64,

    /// Bids
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

impl OrderBookSnapshot {
    /// The degraded response used when an exchange times out or is down.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }
}

/// Combined stream message wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Stream name
    pub stream: String,

    /// Data payload
    pub data: serde_json::Value,
}

/// Parsed WebSocket message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Depth(OrderBookSnapshot),
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw WebSocket message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        // Combined streams wrap the payload
        if let Ok(stream_msg) = serde_json::from_str::<StreamMessage>(raw) {
            if stream_msg.stream.contains("depth") {
                let depth: OrderBookSnapshot = serde_json::from_value(stream_msg.data)?;
                return Ok(ParsedMessage::Depth(depth));
            }
            return Ok(ParsedMessage::Unknown(stream_msg.data.to_string()));
        }

        if let Ok(depth) = serde_json::from_str::<OrderBookSnapshot>(raw) {
            return Ok(ParsedMessage::Depth(depth));
        }

        Ok(ParsedMessage::Unknown(raw.to_string()))
    }
}

/// Exchanges disagree on whether levels are quoted as strings or numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Text(String),
    Number(serde_json::Number),
}

impl RawNumber {
    fn to_decimal<E: serde::de::Error>(&self) -> Result<Decimal, E> {
        let text = match self {
            RawNumber::Text(s) => s.clone(),
            RawNumber::Number(n) => n.to_string(),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(E::custom)
    }
}

/// Custom deserializer for price levels from array of pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<RawNumber>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            // Some venues append an order count or timestamp after price and quantity
            if pair.len() < 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            Ok(PriceLevel {
                price: pair[0].to_decimal::<D::Error>()?,
                quantity: pair[1].to_decimal::<D::Error>()?,
            })
        })
        .collect()
}
