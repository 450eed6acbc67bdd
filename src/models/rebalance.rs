//! Rebalance actions produced by the portfolio rebalancer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// What a rebalance action does to the follower's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Open,
    Increase,
    Decrease,
    Close,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Open => "OPEN",
            ActionKind::Increase => "INCREASE",
            ActionKind::Decrease => "DECREASE",
            ActionKind::Close => "CLOSE",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One follower-side adjustment toward the signal allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceAction {
    pub symbol: String,

    /// Follower's current notional in the symbol
    pub current_value: Decimal,

    /// Notional the follower should hold after the action
    pub target_value: Decimal,

    /// `target_value - current_value`
    pub value_delta: Decimal,

    /// Direction to hold (signal side, or follower side for closes)
    pub direction: Direction,

    pub kind: ActionKind,
}

impl RebalanceAction {
    pub fn new(
        symbol: impl Into<String>,
        current_value: Decimal,
        target_value: Decimal,
        direction: Direction,
        kind: ActionKind,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            current_value,
            target_value,
            value_delta: target_value - current_value,
            direction,
            kind,
        }
    }
}
