//! Position sizing: converts a signal-side size delta into a follower-side delta.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::TradingConfig;

/// Position sizing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    /// Signal delta scaled by the account ratio
    FixedRatio,
    /// Fixed size, direction taken from the signal
    FixedSize,
    /// Signal delta scaled by the percentage multiplier
    Percentage,
    /// Share of follower equity, direction taken from the signal
    WalletPercentage,
    /// Fixed USD amount, direction taken from the signal
    WalletFixed,
    /// Rebalance toward the signal's allocation instead of copying deltas
    PortfolioMirror,
}

impl SizingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingMethod::FixedRatio => "fixed_ratio",
            SizingMethod::FixedSize => "fixed_size",
            SizingMethod::Percentage => "percentage",
            SizingMethod::WalletPercentage => "wallet_percentage",
            SizingMethod::WalletFixed => "wallet_fixed",
            SizingMethod::PortfolioMirror => "portfolio_mirror",
        }
    }

    fn is_wallet_based(&self) -> bool {
        matches!(self, SizingMethod::WalletPercentage | SizingMethod::WalletFixed)
    }
}

impl FromStr for SizingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed_ratio" => Ok(Self::FixedRatio),
            "fixed_size" => Ok(Self::FixedSize),
            "percentage" => Ok(Self::Percentage),
            "wallet_percentage" => Ok(Self::WalletPercentage),
            "wallet_fixed" => Ok(Self::WalletFixed),
            "portfolio_mirror" => Ok(Self::PortfolioMirror),
            other => Err(format!(
                "unknown sizing method '{}' (expected fixed_ratio, fixed_size, percentage, \
                 wallet_percentage, wallet_fixed or portfolio_mirror)",
                other
            )),
        }
    }
}

impl std::fmt::Display for SizingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follower-side market data needed by the wallet-based methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizingContext {
    /// Follower account equity in USD
    pub follower_equity: Decimal,
    /// Current price of the symbol
    pub price: Decimal,
}

/// Calculator for follower trade sizes.
pub struct PositionSizer {
    config: TradingConfig,
}

impl PositionSizer {
    /// Share of equity the `wallet_fixed` method may never exceed.
    const WALLET_FIXED_BUFFER: Decimal = dec!(0.9);

    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    pub fn method(&self) -> SizingMethod {
        self.config.sizing_method
    }

    /// Follower delta for a signal delta, ignoring wallet context.
    ///
    /// Wallet-based methods need equity and price; with an empty context they
    /// size to zero.
    #[cfg(test)]
    pub fn follower_delta(&self, signal_delta: Decimal) -> Decimal {
        self.follower_delta_with(signal_delta, SizingContext::default())
    }

    /// Follower delta for a signal delta.
    ///
    /// The result keeps the signal's sign. Ratio-based methods are clamped to
    /// `max_position_size` when one is configured; clamping never flips sign.
    pub fn follower_delta_with(&self, signal_delta: Decimal, ctx: SizingContext) -> Decimal {
        if signal_delta.is_zero() {
            return Decimal::ZERO;
        }
        let sign = if signal_delta.is_sign_negative() {
            Decimal::NEGATIVE_ONE
        } else {
            Decimal::ONE
        };

        let raw = match self.config.sizing_method {
            SizingMethod::FixedRatio => signal_delta * self.config.account_ratio,
            SizingMethod::FixedSize => sign * self.config.fixed_size,
            SizingMethod::Percentage => signal_delta * self.config.percentage_multiplier,
            SizingMethod::WalletPercentage => {
                sign * self.units_for_value(ctx.follower_equity * self.config.wallet_percentage, ctx.price)
            }
            SizingMethod::WalletFixed => {
                let budget = self
                    .config
                    .wallet_fixed_amount
                    .min(ctx.follower_equity * Self::WALLET_FIXED_BUFFER);
                sign * self.units_for_value(budget, ctx.price)
            }
            SizingMethod::PortfolioMirror => Decimal::ZERO,
        };

        if self.config.sizing_method.is_wallet_based() {
            return raw;
        }
        self.clamp(raw)
    }

    fn units_for_value(&self, value: Decimal, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO || value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        value / price
    }

    fn clamp(&self, size: Decimal) -> Decimal {
        match self.config.max_position_size {
            Some(max) if size.abs() > max => {
                if size.is_sign_negative() {
                    -max
                } else {
                    max
                }
            }
            _ => size,
        }
    }
}
