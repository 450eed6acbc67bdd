//! Data models for positions, account snapshots, and rebalance actions.

mod position;
mod rebalance;

pub use position::{AccountSnapshot, Direction, Position, PositionSnapshot};
pub use rebalance::{ActionKind, RebalanceAction};
