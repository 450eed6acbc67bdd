//! Per-symbol trade limiter guarding against scaled-entry overexposure.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::TradingConfig;

/// Outcome of a limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitDecision {
    pub allowed: bool,
    pub reason: String,
}

impl LimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "OK".to_string(),
        }
    }

    fn block(reason: String) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Tracks recent trades and committed value per symbol.
pub struct PositionLimiter {
    max_trades_per_hour: usize,
    min_interval: Duration,
    max_position_percent: Decimal,

    trade_history: HashMap<String, Vec<DateTime<Utc>>>,
    position_values: HashMap<String, Decimal>,
}

impl PositionLimiter {
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            max_trades_per_hour: config.max_trades_per_symbol_hourly,
            min_interval: Duration::seconds(config.min_seconds_between_trades),
            max_position_percent: config.max_position_percent,
            trade_history: HashMap::new(),
            position_values: HashMap::new(),
        }
    }

    /// Check whether a trade of `trade_value` USD on `symbol` may go ahead.
    pub fn check(
        &mut self,
        symbol: &str,
        trade_value: Decimal,
        equity: Decimal,
        now: DateTime<Utc>,
    ) -> LimitDecision {
        if let Some(history) = self.trade_history.get_mut(symbol) {
            // Time since last trade
            if let Some(last) = history.last() {
                let elapsed = now - *last;
                if elapsed < self.min_interval {
                    return LimitDecision::block(format!(
                        "only {}s since last {} trade (min {}s)",
                        elapsed.num_seconds(),
                        symbol,
                        self.min_interval.num_seconds()
                    ));
                }
            }

            // Trades within the last hour
            let cutoff = now - Duration::hours(1);
            history.retain(|t| *t > cutoff);
            if history.len() >= self.max_trades_per_hour {
                return LimitDecision::block(format!(
                    "reached {} trades/hour limit on {}",
                    self.max_trades_per_hour, symbol
                ));
            }
        }

        // Committed value
        let current = self.position_values.get(symbol).copied().unwrap_or(Decimal::ZERO);
        let max_allowed = equity * self.max_position_percent;
        if current + trade_value > max_allowed {
            return LimitDecision::block(format!(
                "{} would exceed {}% position limit (current ${:.2}, new ${:.2}, max ${:.2})",
                symbol,
                (self.max_position_percent * Decimal::ONE_HUNDRED).round_dp(0),
                current,
                trade_value,
                max_allowed
            ));
        }

        LimitDecision::allow()
    }

    /// Record an executed trade.
    pub fn record(&mut self, symbol: &str, trade_value: Decimal, now: DateTime<Utc>) {
        self.trade_history
            .entry(symbol.to_string())
            .or_default()
            .push(now);
        let total = self
            .position_values
            .entry(symbol.to_string())
            .or_insert(Decimal::ZERO);
        *total += trade_value;

        debug!(symbol = %symbol, value = %trade_value, total = %total, "Recorded trade");
    }

    /// Forget committed value once a position is closed.
    pub fn reset(&mut self, symbol: &str) {
        if self.position_values.remove(symbol).is_some() {
            info!(symbol = %symbol, "Reset position tracking");
        }
    }

    /// Number of trades on `symbol` within the hour before `now`.
    pub fn recent_trades(&self, symbol: &str, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(1);
        self.trade_history
            .get(symbol)
            .map(|h| h.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0)
    }
}
