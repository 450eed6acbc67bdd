//! Trading logic: snapshot diffing, position sizing, rebalancing, limits.

mod config;
mod differ;
mod limiter;
mod position_sizer;
mod rebalancer;

pub use config::TradingConfig;
pub use differ::{diff_snapshots, ChangeKind, PositionChange, SnapshotDiff};
pub use limiter::PositionLimiter;
pub use position_sizer::{PositionSizer, SizingContext, SizingMethod};
pub use rebalancer::{baseline_from, compute_rebalance, RebalanceConfig, RebalancePlan};
