//! Position and snapshot models for a perpetuals account.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of a position or of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Direction implied by a signed size. Zero is treated as long.
    pub fn from_size(size: Decimal) -> Self {
        if size < Decimal::ZERO {
            Direction::Short
        } else {
            Direction::Long
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open perpetual position on one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Asset symbol (e.g., "BTC")
    pub symbol: String,

    /// Signed size in coins: positive = long, negative = short
    pub size: Decimal,

    /// Average entry price
    pub entry_price: Decimal,

    /// Mark price at the time of the snapshot
    pub mark_price: Decimal,

    /// Unrealized P&L in USD
    #[serde(default)]
    pub unrealized_pnl: Decimal,

    /// Margin allocated to the position in USD
    #[serde(default)]
    pub margin_used: Decimal,

    /// Liquidation price, when the venue reports one
    #[serde(default)]
    pub liquidation_price: Option<Decimal>,
}

impl Position {
    #[cfg(test)]
    pub fn new(symbol: impl Into<String>, size: Decimal, entry_price: Decimal, mark_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            size,
            entry_price,
            mark_price,
            unrealized_pnl: (mark_price - entry_price) * size,
            margin_used: Decimal::ZERO,
            liquidation_price: None,
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::from_size(self.size)
    }

    /// Notional value at mark, always non-negative.
    pub fn value(&self) -> Decimal {
        self.size.abs() * self.mark_price
    }

    /// Unrealized P&L relative to margin used.
    pub fn return_on_margin(&self) -> Decimal {
        if self.margin_used > Decimal::ZERO {
            self.unrealized_pnl / self.margin_used
        } else {
            Decimal::ZERO
        }
    }
}

/// Symbol → position for one account at one poll.
///
/// Only non-zero positions are ever stored; inserting a zero-size position
/// removes the symbol instead. Iteration is ordered by symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    positions: BTreeMap<String, Position>,
}

impl PositionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, position: Position) {
        if position.size.is_zero() {
            self.positions.remove(&position.symbol);
        } else {
            self.positions.insert(position.symbol.clone(), position);
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Sum of notional values across all positions.
    pub fn total_value(&self) -> Decimal {
        self.positions.values().map(Position::value).sum()
    }
}

impl FromIterator<Position> for PositionSnapshot {
    fn from_iter<I: IntoIterator<Item = Position>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for position in iter {
            snapshot.insert(position);
        }
        snapshot
    }
}

/// Equity plus open positions of an account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Account value (equity) in USD
    pub equity: Decimal,

    /// Open positions
    pub positions: PositionSnapshot,
}

impl AccountSnapshot {
    pub fn new(equity: Decimal, positions: PositionSnapshot) -> Self {
        Self { equity, positions }
    }

    /// Total notional value of all open positions.
    pub fn total_position_value(&self) -> Decimal {
        self.positions.total_value()
    }

    /// Total notional / equity, zero when equity is not positive.
    pub fn utilization(&self) -> Decimal {
        if self.equity > Decimal::ZERO {
            self.total_position_value() / self.equity
        } else {
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_size_never_stored() {
        let mut snapshot = PositionSnapshot::new();
        snapshot.insert(Position::new("BTC", dec!(0.5), dec!(60000), dec!(61000)));
        snapshot.insert(Position::new("ETH", dec!(0), dec!(3000), dec!(3000)));

        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.contains("ETH"));

        // Zero-size update removes an existing entry
        snapshot.insert(Position::new("BTC", dec!(0), dec!(60000), dec!(61000)));
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_short_value_is_positive() {
        let pos = Position::new("SOL", dec!(-10), dec!(150), dec!(140));
        assert_eq!(pos.direction(), Direction::Short);
        assert_eq!(pos.value(), dec!(1400));
        // Short gains when price falls
        assert_eq!(pos.unrealized_pnl, dec!(100));
    }

    #[test]
    fn test_utilization() {
        let positions: PositionSnapshot = vec![
            Position::new("BTC", dec!(0.01), dec!(60000), dec!(60000)),
            Position::new("ETH", dec!(-0.1), dec!(3000), dec!(3000)),
        ]
        .into_iter()
        .collect();

        let account = AccountSnapshot::new(dec!(1800), positions);
        assert_eq!(account.total_position_value(), dec!(900));
        assert_eq!(account.utilization(), dec!(0.5));

        let broke = AccountSnapshot::new(dec!(0), account.positions.clone());
        assert_eq!(broke.utilization(), Decimal::ZERO);
    }
}
