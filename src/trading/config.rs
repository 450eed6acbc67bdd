//! Trading configuration.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::SizingMethod;

/// Configuration for position sizing, rebalancing, and trade limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Which sizing method to use (or portfolio mirroring)
    pub sizing_method: SizingMethod,

    /// Follower/signal size ratio for `fixed_ratio`
    pub account_ratio: Decimal,

    /// Largest absolute follower delta in coins, if capped
    pub max_position_size: Option<Decimal>,

    /// Absolute follower size for `fixed_size`
    pub fixed_size: Decimal,

    /// Multiplier for `percentage`
    pub percentage_multiplier: Decimal,

    /// Fraction of follower equity per trade for `wallet_percentage`
    pub wallet_percentage: Decimal,

    /// USD per trade for `wallet_fixed`
    pub wallet_fixed_amount: Decimal,

    /// Relative value change required before a rebalance adjusts a position
    pub min_rebalance_diff: Decimal,

    /// Ceiling on the follower's target utilization (0.0 to 1.0)
    pub max_utilization: Decimal,

    /// Smallest order notional the venue accepts, in USD
    pub min_order_value: Decimal,

    /// Maximum trades per symbol within one hour
    pub max_trades_per_symbol_hourly: usize,

    /// Minimum seconds between two trades on the same symbol
    pub min_seconds_between_trades: i64,

    /// Maximum share of follower equity committed to one symbol
    pub max_position_percent: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            sizing_method: SizingMethod::FixedRatio,
            account_ratio: dec!(0.1),
            max_position_size: None,
            fixed_size: dec!(1),
            percentage_multiplier: dec!(0.1),
            wallet_percentage: dec!(0.1),     // 10% of equity per trade
            wallet_fixed_amount: dec!(10),    // $10 per trade
            min_rebalance_diff: dec!(0.05),   // 5% hysteresis band
            max_utilization: dec!(0.8),       // Never deploy more than 80%
            min_order_value: dec!(10),        // Venue minimum
            max_trades_per_symbol_hourly: 3,
            min_seconds_between_trades: 30,
            max_position_percent: dec!(0.25), // 25% max per symbol
        }
    }
}

impl TradingConfig {
    /// Reject values that would make sizing or rebalancing meaningless.
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("account_ratio", self.account_ratio),
            ("fixed_size", self.fixed_size),
            ("percentage_multiplier", self.percentage_multiplier),
            ("wallet_percentage", self.wallet_percentage),
            ("wallet_fixed_amount", self.wallet_fixed_amount),
            ("min_rebalance_diff", self.min_rebalance_diff),
            ("min_order_value", self.min_order_value),
            ("max_position_percent", self.max_position_percent),
        ];
        for (name, value) in non_negative {
            if value < Decimal::ZERO {
                bail!("{} must not be negative (got {})", name, value);
            }
        }

        if let Some(max) = self.max_position_size {
            if max <= Decimal::ZERO {
                bail!("max_position_size must be positive (got {})", max);
            }
        }

        if self.max_utilization <= Decimal::ZERO || self.max_utilization > Decimal::ONE {
            bail!(
                "max_utilization must be within (0, 1] (got {})",
                self.max_utilization
            );
        }

        if self.min_seconds_between_trades < 0 {
            bail!("min_seconds_between_trades must not be negative");
        }

        Ok(())
    }

    pub fn is_portfolio_mirror(&self) -> bool {
        self.sizing_method == SizingMethod::PortfolioMirror
    }
}
