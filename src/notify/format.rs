//! Human-readable notification messages.

use rust_decimal::Decimal;

use crate::executor::ExecutionOutcome;
use crate::models::{Position, RebalanceAction};
use crate::trading::{PositionChange, RebalancePlan, SizingMethod};

fn short_address(address: &str) -> String {
    if address.len() > 12 && address.is_char_boundary(6) && address.is_char_boundary(address.len() - 4) {
        format!("{}...{}", &address[..6], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}

fn usd(value: Decimal) -> String {
    format!("${:.2}", value)
}

fn pct(fraction: Decimal) -> String {
    format!("{:.1}%", fraction * Decimal::ONE_HUNDRED)
}

pub fn startup(signal: &str, follower: &str, method: SizingMethod, dry_run: bool) -> String {
    let mode = if method == SizingMethod::PortfolioMirror {
        "portfolio mirror"
    } else {
        "copy trading"
    };
    let mut msg = format!(
        "🚀 Copier started ({})\nSignal: {}\nFollower: {}\nSizing: {}",
        mode,
        short_address(signal),
        short_address(follower),
        method
    );
    if dry_run {
        msg.push_str("\nDRY RUN: no orders will be executed");
    }
    msg
}

pub fn monitoring(position_count: usize, baseline: Option<usize>) -> String {
    match baseline {
        Some(n) => format!(
            "👀 Monitoring {} signal positions ({} pre-existing, excluded from mirroring)",
            position_count, n
        ),
        None => format!("👀 Monitoring {} signal positions", position_count),
    }
}

pub fn shutdown(cycles: u64) -> String {
    format!("🛑 Copier stopped after {} cycles", cycles)
}

pub fn position_opened(position: &Position) -> String {
    format!(
        "🟢 NEW {} {}\nSize: {}\nEntry: {}\nValue: {}",
        position.direction(),
        position.symbol,
        position.size.abs().normalize(),
        position.entry_price.normalize(),
        usd(position.value())
    )
}

pub fn position_changed(change: &PositionChange) -> String {
    format!(
        "🔄 {} {} {}\nSize: {} → {} ({:+})\nMark: {}",
        change.kind().as_str(),
        change.current.direction(),
        change.symbol(),
        change.previous.size.normalize(),
        change.current.size.normalize(),
        change.delta().normalize(),
        change.current.mark_price.normalize()
    )
}

pub fn position_closed(position: &Position) -> String {
    format!(
        "🔴 CLOSED {} {}\nSize: {}\nLast PnL: {}",
        position.direction(),
        position.symbol,
        position.size.abs().normalize(),
        usd(position.unrealized_pnl)
    )
}

pub fn execution(symbol: &str, size: Decimal, action: &str, outcome: &ExecutionOutcome) -> String {
    let head = format!("{} {} {}", action, size.normalize(), symbol);
    match outcome {
        ExecutionOutcome::Filled {
            filled_size,
            avg_price,
            order_id,
        } => {
            let mut msg = format!("✅ Executed {}", head);
            if let Some(filled) = filled_size {
                msg.push_str(&format!("\nFilled: {}", filled.normalize()));
            }
            if let Some(price) = avg_price {
                msg.push_str(&format!("\nAvg price: {}", price.normalize()));
            }
            if let Some(id) = order_id {
                msg.push_str(&format!("\nOrder: {}", id));
            }
            msg
        }
        ExecutionOutcome::Skipped(reason) => format!("⏭️ Skipped {}\n{}", head, reason),
        ExecutionOutcome::Failed(reason) => format!("❌ Failed {}\n{}", head, reason),
        ExecutionOutcome::DryRun => format!("📝 Would execute {}", head),
    }
}

pub fn trade_blocked(symbol: &str, reason: &str) -> String {
    format!("⛔ {} trade blocked: {}", symbol, reason)
}

fn action_line(action: &RebalanceAction, outcome: &ExecutionOutcome) -> String {
    let status = match outcome {
        ExecutionOutcome::Filled { .. } => "✅".to_string(),
        ExecutionOutcome::DryRun => "📝".to_string(),
        ExecutionOutcome::Skipped(reason) => format!("⏭️ {}", reason),
        ExecutionOutcome::Failed(reason) => format!("❌ {}", reason),
    };
    format!(
        "{} {} {}: {} → {} {}",
        action.kind,
        action.direction,
        action.symbol,
        usd(action.current_value),
        usd(action.target_value),
        status
    )
}

pub fn rebalance_summary(plan: &RebalancePlan, outcomes: &[ExecutionOutcome]) -> String {
    let failed = outcomes.iter().filter(|o| o.is_failure()).count();
    let mut msg = format!(
        "⚖️ Rebalance: {} actions, {} failed\nTarget utilization: {}\nTarget exposure: {}",
        plan.actions.len(),
        failed,
        pct(plan.target_utilization),
        usd(plan.target_total_value)
    );
    for (action, outcome) in plan.actions.iter().zip(outcomes) {
        msg.push('\n');
        msg.push_str(&action_line(action, outcome));
    }
    msg
}

pub fn cycle_error(error: &anyhow::Error, consecutive: u32, ceiling: u32) -> String {
    format!("⚠️ Poll failed ({}/{}): {:#}", consecutive, ceiling, error)
}

pub fn fatal_stop(consecutive: u32) -> String {
    format!(
        "🚨 Stopping after {} consecutive errors. Restart the copier once the venue is reachable.",
        consecutive
    )
}
