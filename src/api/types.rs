//! Wire types for the Hyperliquid `/info` endpoint.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{AccountSnapshot, Position, PositionSnapshot};

/// Request body for `/info`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InfoRequest<'a> {
    ClearinghouseState { user: &'a str },
    AllMids,
}

/// Response for `clearinghouseState`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    pub margin_summary: MarginSummary,
    #[serde(default)]
    pub asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    pub account_value: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: PositionData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub coin: String,
    /// Signed size
    pub szi: Decimal,
    #[serde(default)]
    pub entry_px: Option<Decimal>,
    #[serde(default)]
    pub position_value: Decimal,
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    #[serde(default)]
    pub margin_used: Decimal,
    #[serde(default)]
    pub liquidation_px: Option<Decimal>,
}

impl PositionData {
    fn into_position(self) -> Position {
        let mark_price = if self.szi.is_zero() {
            Decimal::ZERO
        } else {
            self.position_value / self.szi.abs()
        };
        Position {
            symbol: self.coin,
            size: self.szi,
            entry_price: self.entry_px.unwrap_or(mark_price),
            mark_price,
            unrealized_pnl: self.unrealized_pnl,
            margin_used: self.margin_used,
            liquidation_price: self.liquidation_px,
        }
    }
}

impl From<ClearinghouseState> for AccountSnapshot {
    fn from(state: ClearinghouseState) -> Self {
        let positions: PositionSnapshot = state
            .asset_positions
            .into_iter()
            .map(|p| p.position.into_position())
            .collect();
        AccountSnapshot::new(state.margin_summary.account_value, positions)
    }
}

/// Response for `allMids`: symbol → mid price.
pub type AllMids = HashMap<String, Decimal>;
