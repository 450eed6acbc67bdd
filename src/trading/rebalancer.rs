//! Portfolio rebalancer: sizes the follower toward the signal's allocation.
//!
//! The follower's target exposure is its own equity times the signal's
//! utilization (capped at `max_utilization`), split across symbols in the
//! same proportions as the signal's position values.
//!
//! Rules per symbol:
//! - signal holds, follower does not, not in baseline → OPEN
//! - both hold → INCREASE/DECREASE when the relative gap exceeds `min_rebalance_diff`
//! - both hold on opposite sides → INCREASE/DECREASE toward the signal's side even
//!   inside the threshold (local rule: the hysteresis band only absorbs price drift,
//!   never a wrong-side position)
//! - follower holds, signal does not → CLOSE, regardless of threshold
//! - signal holds a baseline symbol the follower never opened → nothing

use std::collections::{BTreeSet, HashSet};

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{AccountSnapshot, ActionKind, RebalanceAction};

use super::TradingConfig;

/// Thresholds used by the rebalancer.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceConfig {
    /// Relative value gap required before adjusting a held position
    pub min_rebalance_diff: Decimal,
    /// Ceiling on the follower's target utilization
    pub max_utilization: Decimal,
}

impl From<&TradingConfig> for RebalanceConfig {
    fn from(config: &TradingConfig) -> Self {
        Self {
            min_rebalance_diff: config.min_rebalance_diff,
            max_utilization: config.max_utilization,
        }
    }
}

/// Output of one rebalance computation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalancePlan {
    pub target_utilization: Decimal,
    pub target_total_value: Decimal,
    /// Closes first, then decreases, increases, opens; by symbol within each.
    pub actions: Vec<RebalanceAction>,
}

/// `|target - current| / current`, with 1 for a fresh position and 0 when both are empty.
pub fn percent_diff(current_value: Decimal, target_value: Decimal) -> Decimal {
    if current_value > Decimal::ZERO {
        (target_value - current_value).abs() / current_value
    } else if target_value > Decimal::ZERO {
        Decimal::ONE
    } else {
        Decimal::ZERO
    }
}

/// Compute the rebalance actions for the follower.
pub fn compute_rebalance(
    signal: &AccountSnapshot,
    follower: &AccountSnapshot,
    baseline: &HashSet<String>,
    config: &RebalanceConfig,
) -> RebalancePlan {
    let target_utilization = signal.utilization().min(config.max_utilization);
    let target_total_value = follower.equity.max(Decimal::ZERO) * target_utilization;
    let signal_total = signal.total_position_value();

    let symbols: BTreeSet<&str> = signal
        .positions
        .symbols()
        .chain(follower.positions.symbols())
        .collect();

    let mut actions = Vec::new();

    for symbol in symbols {
        let signal_pos = signal.positions.get(symbol);
        let follower_pos = follower.positions.get(symbol);

        let signal_value = signal_pos.map(|p| p.value()).unwrap_or(Decimal::ZERO);
        let current_value = follower_pos.map(|p| p.value()).unwrap_or(Decimal::ZERO);

        let proportion = if signal_total > Decimal::ZERO && signal_value > Decimal::ZERO {
            signal_value / signal_total
        } else {
            Decimal::ZERO
        };
        let target_value = target_total_value * proportion;
        let diff = percent_diff(current_value, target_value);

        let signal_holds = signal_value > Decimal::ZERO;

        let action = match (signal_pos.filter(|_| signal_holds), follower_pos) {
            // Signal holds, follower does not
            (Some(sp), None) => {
                if baseline.contains(symbol) {
                    debug!(symbol = %symbol, "Baseline position, not mirrored");
                    None
                } else if target_value > Decimal::ZERO {
                    Some(RebalanceAction::new(
                        symbol,
                        Decimal::ZERO,
                        target_value,
                        sp.direction(),
                        ActionKind::Open,
                    ))
                } else {
                    None
                }
            }

            // Both hold: adjust outside the hysteresis band, or when sides disagree
            (Some(sp), Some(fp)) => {
                let flipped = sp.direction() != fp.direction();
                if diff > config.min_rebalance_diff || flipped {
                    let kind = if target_value > current_value {
                        ActionKind::Increase
                    } else {
                        ActionKind::Decrease
                    };
                    Some(RebalanceAction::new(
                        symbol,
                        current_value,
                        target_value,
                        sp.direction(),
                        kind,
                    ))
                } else {
                    debug!(
                        symbol = %symbol,
                        diff = %diff,
                        "Within rebalance threshold"
                    );
                    None
                }
            }

            // Signal gone: always close
            (None, Some(fp)) => Some(RebalanceAction::new(
                symbol,
                current_value,
                Decimal::ZERO,
                fp.direction(),
                ActionKind::Close,
            )),

            (None, None) => None,
        };

        if let Some(action) = action {
            actions.push(action);
        }
    }

    actions.sort_by_key(|a| action_rank(a.kind));

    RebalancePlan {
        target_utilization,
        target_total_value,
        actions,
    }
}

fn action_rank(kind: ActionKind) -> u8 {
    match kind {
        ActionKind::Close => 0,
        ActionKind::Decrease => 1,
        ActionKind::Increase => 2,
        ActionKind::Open => 3,
    }
}

/// Symbols the signal holds at startup; never auto-opened afterwards.
pub fn baseline_from(signal: &AccountSnapshot) -> HashSet<String> {
    signal.positions.symbols().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, Position, PositionSnapshot};
    use rust_decimal_macros::dec;

    fn account(equity: Decimal, entries: &[(&str, Decimal, Decimal)]) -> AccountSnapshot {
        let positions: PositionSnapshot = entries
            .iter()
            .map(|(symbol, size, price)| Position::new(*symbol, *size, *price, *price))
            .collect();
        AccountSnapshot::new(equity, positions)
    }

    fn config(min_diff: Decimal, max_util: Decimal) -> RebalanceConfig {
        RebalanceConfig {
            min_rebalance_diff: min_diff,
            max_utilization: max_util,
        }
    }

    #[test]
    fn test_target_utilization_is_capped() {
        // Signal: $5000 notional on $10000 equity → 50%
        let signal = account(dec!(10000), &[("BTC", dec!(0.1), dec!(50000))]);
        let follower = account(dec!(1000), &[]);

        let plan = compute_rebalance(&signal, &follower, &HashSet::new(), &config(dec!(0.05), dec!(0.3)));
        assert_eq!(plan.target_utilization, dec!(0.3));
        assert_eq!(plan.target_total_value, dec!(300));

        assert_eq!(plan.actions.len(), 1);
        let open = &plan.actions[0];
        assert_eq!(open.kind, ActionKind::Open);
        assert_eq!(open.target_value, dec!(300));
        assert_eq!(open.direction, Direction::Long);
    }

    #[test]
    fn test_proportional_allocation() {
        // BTC $3000, ETH short $1000 on $8000 equity → 50% utilization
        let signal = account(
            dec!(8000),
            &[("BTC", dec!(0.05), dec!(60000)), ("ETH", dec!(-0.5), dec!(2000))],
        );
        let follower = account(dec!(2000), &[]);

        let plan = compute_rebalance(&signal, &follower, &HashSet::new(), &config(dec!(0.05), dec!(1)));
        assert_eq!(plan.target_total_value, dec!(1000));

        let btc = plan.actions.iter().find(|a| a.symbol == "BTC").unwrap();
        let eth = plan.actions.iter().find(|a| a.symbol == "ETH").unwrap();
        assert_eq!(btc.target_value, dec!(750));
        assert_eq!(eth.target_value, dec!(250));
        assert_eq!(eth.direction, Direction::Short);
    }

    #[test]
    fn test_hysteresis_band() {
        // Follower holds $100 of ETH; signal is 100% ETH.
        // Target = follower equity × utilization, tuned to 104 then 106.
        let signal = account(dec!(1000), &[("ETH", dec!(0.5), dec!(1000))]); // 50%
        let follower_equity_for = |target: Decimal| target / dec!(0.5);

        let follower = account(follower_equity_for(dec!(104)), &[("ETH", dec!(0.1), dec!(1000))]);
        let plan = compute_rebalance(&signal, &follower, &HashSet::new(), &config(dec!(0.05), dec!(1)));
        assert!(plan.actions.is_empty());

        let follower = account(follower_equity_for(dec!(106)), &[("ETH", dec!(0.1), dec!(1000))]);
        let plan = compute_rebalance(&signal, &follower, &HashSet::new(), &config(dec!(0.05), dec!(1)));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::Increase);
        assert_eq!(plan.actions[0].current_value, dec!(100));
        assert_eq!(plan.actions[0].target_value, dec!(106));
        assert_eq!(plan.actions[0].value_delta, dec!(6));
    }

    #[test]
    fn test_decrease() {
        let signal = account(dec!(1000), &[("ETH", dec!(0.1), dec!(1000))]); // 10%
        let follower = account(dec!(1000), &[("ETH", dec!(0.5), dec!(1000))]);
        let plan = compute_rebalance(&signal, &follower, &HashSet::new(), &config(dec!(0.05), dec!(1)));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::Decrease);
        assert_eq!(plan.actions[0].target_value, dec!(100));
    }

    #[test]
    fn test_close_ignores_threshold() {
        let signal = account(dec!(1000), &[]);
        let follower = account(dec!(1000), &[("ETH", dec!(1), dec!(3000))]);

        let plan = compute_rebalance(&signal, &follower, &HashSet::new(), &config(dec!(10), dec!(1)));
        assert_eq!(plan.actions.len(), 1);
        let close = &plan.actions[0];
        assert_eq!(close.kind, ActionKind::Close);
        assert_eq!(close.target_value, Decimal::ZERO);
        assert_eq!(close.current_value, dec!(3000));
        assert_eq!(close.direction, Direction::Long);
    }

    #[test]
    fn test_baseline_never_opened() {
        let signal = account(dec!(1000), &[("BTC", dec!(0.01), dec!(50000)), ("SOL", dec!(2), dec!(100))]);
        let baseline = baseline_from(&signal);
        assert!(baseline.contains("BTC"));

        // Signal grows BTC and adds ETH after startup
        let signal = account(
            dec!(1000),
            &[
                ("BTC", dec!(0.02), dec!(50000)),
                ("SOL", dec!(2), dec!(100)),
                ("ETH", dec!(0.1), dec!(2000)),
            ],
        );
        let follower = account(dec!(1000), &[]);
        let plan = compute_rebalance(&signal, &follower, &baseline, &config(dec!(0.05), dec!(1)));

        let symbols: Vec<_> = plan.actions.iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ETH"]);
        assert_eq!(plan.actions[0].kind, ActionKind::Open);
    }

    #[test]
    fn test_baseline_symbol_adjusted_once_follower_holds_it() {
        let signal = account(dec!(1000), &[("BTC", dec!(0.01), dec!(50000))]); // 50%
        let baseline = baseline_from(&signal);
        let follower = account(dec!(1000), &[("BTC", dec!(0.002), dec!(50000))]); // $100

        let plan = compute_rebalance(&signal, &follower, &baseline, &config(dec!(0.05), dec!(1)));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::Increase);
        assert_eq!(plan.actions[0].target_value, dec!(500));
    }

    #[test]
    fn test_direction_mismatch_forces_adjustment() {
        let signal = account(dec!(1000), &[("ETH", dec!(-0.1), dec!(1000))]); // 10% short
        let follower = account(dec!(1000), &[("ETH", dec!(0.1), dec!(1000))]); // same value, long

        let plan = compute_rebalance(&signal, &follower, &HashSet::new(), &config(dec!(0.05), dec!(1)));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].direction, Direction::Short);
    }

    #[test]
    fn test_action_order() {
        let signal = account(
            dec!(1000),
            &[("BTC", dec!(0.004), dec!(50000)), ("SOL", dec!(1), dec!(100))],
        );
        let follower = account(
            dec!(1000),
            &[("DOGE", dec!(100), dec!(0.1)), ("SOL", dec!(5), dec!(100))],
        );

        let plan = compute_rebalance(&signal, &follower, &HashSet::new(), &config(dec!(0.05), dec!(1)));
        let kinds: Vec<_> = plan.actions.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Close, ActionKind::Decrease, ActionKind::Open]);
    }

    #[test]
    fn test_empty_signal_and_follower() {
        let plan = compute_rebalance(
            &account(dec!(0), &[]),
            &account(dec!(1000), &[]),
            &HashSet::new(),
            &config(dec!(0.05), dec!(1)),
        );
        assert!(plan.actions.is_empty());
        assert_eq!(plan.target_total_value, Decimal::ZERO);
    }

    #[test]
    fn test_percent_diff() {
        assert_eq!(percent_diff(dec!(100), dec!(104)), dec!(0.04));
        assert_eq!(percent_diff(Decimal::ZERO, dec!(5)), Decimal::ONE);
        assert_eq!(percent_diff(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }
}
