//! Depth-level price calculation
//!
//! Walks one side of a book from the best price outwards and records the price
//! of the level at which each cumulative-quantity target is first reached.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::ser::{Error, Serialize, SerializeMap, Serializer};

use super::Side;
use crate::parser::PriceLevel;

/// Depth target to achieved price, in configured target order.
///
/// Kept as pairs so decimal targets never have to act as hash keys. Serializes
/// as a map from the target, rendered as a string, to the price as a float.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepthLevels(Vec<(Decimal, Decimal)>);

impl DepthLevels {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Price recorded for `target`, if the book was deep enough to reach it.
    pub fn get(&self, target: Decimal) -> Option<Decimal> {
        self.0
            .iter()
            .find(|(t, _)| *t == target)
            .map(|(_, price)| *price)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Decimal, Decimal)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Decimal, Decimal)> for DepthLevels {
    fn from_iter<I: IntoIterator<Item = (Decimal, Decimal)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for DepthLevels {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (target, price) in &self.0 {
            let price = price
                .to_f64()
                .ok_or_else(|| S::Error::custom(format!("price {price} has no float form")))?;
            map.serialize_entry(&target.to_string(), &price)?;
        }
        map.end()
    }
}

/// Result of reducing one book side against the configured targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthCalculation {
    pub side: Side,
    /// True when every target was reached
    pub success: bool,
    pub levels: DepthLevels,
    /// Total quantity on the whole side
    pub max_quantity: Decimal,
}

/// Reduce a best-price-first book side to the price at each depth target.
///
/// No interpolation: a target maps to the price of the level whose quantity
/// pushed the running total to or past it. Targets beyond the available
/// liquidity are left out and `success` is false.
pub fn calculate_price_at_depths(
    levels: &[PriceLevel],
    side: Side,
    targets: &[Decimal],
) -> DepthCalculation {
    let mut reached: Vec<Option<Decimal>> = vec![None; targets.len()];
    let mut cumulative = Decimal::ZERO;

    for level in levels {
        cumulative += level.quantity;
        for (slot, target) in reached.iter_mut().zip(targets) {
            if slot.is_none() && cumulative >= *target {
                *slot = Some(level.price);
            }
        }
    }

    let success = reached.iter().all(Option::is_some);
    let levels = targets
        .iter()
        .zip(reached)
        .filter_map(|(target, price)| price.map(|p| (*target, p)))
        .collect();

    DepthCalculation {
        side,
        success,
        levels,
        max_quantity: cumulative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn side(levels: &[(Decimal, Decimal)]) -> Vec<PriceLevel> {
        levels.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect()
    }

    #[test]
    fn test_target_reached_at_crossing_level() {
        let asks = side(&[
            (dec!(100), dec!(0.01)),
            (dec!(101), dec!(0.02)),
            (dec!(102), dec!(0.05)),
        ]);
        let calc = calculate_price_at_depths(&asks, Side::Ask, &[dec!(0.04)]);

        assert!(calc.success);
        assert_eq!(calc.levels.get(dec!(0.04)), Some(dec!(102)));
        assert_eq!(calc.max_quantity, dec!(0.08));
        assert_eq!(calc.side, Side::Ask);
    }

    #[test]
    fn test_insufficient_liquidity() {
        let asks = side(&[(dec!(100), dec!(0.01))]);
        let calc = calculate_price_at_depths(&asks, Side::Ask, &[dec!(0.04)]);

        assert!(!calc.success);
        assert!(calc.levels.is_empty());
        assert_eq!(calc.max_quantity, dec!(0.01));
    }

    #[test]
    fn test_exact_threshold_counts_as_reached() {
        let bids = side(&[(dec!(50000), dec!(0.01)), (dec!(49999), dec!(0.03))]);
        let calc = calculate_price_at_depths(&bids, Side::Bid, &[dec!(0.04)]);

        assert!(calc.success);
        assert_eq!(calc.levels.get(dec!(0.04)), Some(dec!(49999)));
    }

    #[test]
    fn test_partial_success_keeps_reached_targets_in_order() {
        let bids = side(&[
            (dec!(200), dec!(0.5)),
            (dec!(199), dec!(0.25)),
            (dec!(198), dec!(1)),
        ]);
        let targets = [dec!(5), dec!(0.1), dec!(0.6)];
        let calc = calculate_price_at_depths(&bids, Side::Bid, &targets);

        assert!(!calc.success);
        assert_eq!(calc.max_quantity, dec!(1.75));
        let pairs: Vec<_> = calc.levels.iter().copied().collect();
        assert_eq!(pairs, vec![(dec!(0.1), dec!(200)), (dec!(0.6), dec!(199))]);
        assert_eq!(calc.levels.get(dec!(5)), None);
    }

    #[test]
    fn test_empty_side() {
        let calc = calculate_price_at_depths(&[], Side::Ask, &[dec!(0.04)]);
        assert!(!calc.success);
        assert!(calc.levels.is_empty());
        assert_eq!(calc.max_quantity, Decimal::ZERO);
    }

    #[test]
    fn test_no_targets_is_trivially_successful() {
        let asks = side(&[(dec!(100), dec!(1))]);
        let calc = calculate_price_at_depths(&asks, Side::Ask, &[]);
        assert!(calc.success);
        assert!(calc.levels.is_empty());
        assert_eq!(calc.max_quantity, dec!(1));
    }

    #[test]
    fn test_levels_serialize_as_map() {
        let levels: DepthLevels = [(dec!(0.04), dec!(42038.45))].into_iter().collect();
        let json = serde_json::to_value(&levels).unwrap();
        let price = json["0.04"].as_f64().expect("price is a float");
        assert!((price - 42038.45).abs() < 1e-9);
        assert_eq!(json.as_object().unwrap().len(), 1);
    }
}
