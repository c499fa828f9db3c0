//! Order book module
//!
//! Reduces full-book snapshots into depth-level prices.

mod depth;

pub use depth::{calculate_price_at_depths, DepthCalculation, DepthLevels};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Whether `a` is at least as good a price as `b` on this side.
    pub fn is_at_least_as_good(self, a: Decimal, b: Decimal) -> bool {
        match self {
            Side::Ask => a <= b,
            Side::Bid => a >= b,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
