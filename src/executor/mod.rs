//! Delegated trade execution.
//!
//! Orders are never signed here; an external executor process receives the
//! order on its command line and prints a JSON result.

mod command;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::models::Direction;

pub use command::CommandExecutor;

/// Copy-mode order action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Open,
    Increase,
    Decrease,
    Close,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Open => "OPEN",
            OrderAction::Increase => "INCREASE",
            OrderAction::Decrease => "DECREASE",
            OrderAction::Close => "CLOSE",
        }
    }
}

/// Copy-mode order: trade `size` (signed) of `symbol`.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyOrder {
    pub symbol: String,
    pub size: Decimal,
    pub action: OrderAction,
}

/// Portfolio-mode order: bring `symbol` to `target_value` USD on `direction`.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceOrder {
    pub symbol: String,
    pub target_value: Decimal,
    pub price: Decimal,
    pub direction: Direction,
}

/// JSON result printed by the executor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionReport {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub filled_size: Option<Decimal>,
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// What happened to one mirrored order.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Filled {
        filled_size: Option<Decimal>,
        avg_price: Option<Decimal>,
        order_id: Option<String>,
    },
    Skipped(String),
    Failed(String),
    DryRun,
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed(_))
    }
}

impl From<Result<ExecutionReport>> for ExecutionOutcome {
    fn from(result: Result<ExecutionReport>) -> Self {
        match result {
            Ok(report) if report.success => ExecutionOutcome::Filled {
                filled_size: report.filled_size,
                avg_price: report.avg_price,
                order_id: report.order_id,
            },
            Ok(report) if report.skipped => {
                ExecutionOutcome::Skipped(report.error.unwrap_or_else(|| "skipped by executor".to_string()))
            }
            Ok(report) => {
                ExecutionOutcome::Failed(report.error.unwrap_or_else(|| "unknown executor error".to_string()))
            }
            Err(e) => ExecutionOutcome::Failed(format!("{:#}", e)),
        }
    }
}

/// Executes mirrored orders on the follower account.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn copy_trade(&self, order: &CopyOrder) -> Result<ExecutionReport>;

    async fn rebalance(&self, order: &RebalanceOrder) -> Result<ExecutionReport>;
}
