//! Hyperliquid API client for account snapshots and prices.

mod info_client;
mod types;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::AccountSnapshot;

pub use info_client::{InfoClient, HYPERLIQUID_API_URL};

/// Read access to a trading venue.
#[async_trait]
pub trait Venue: Send + Sync {
    /// Equity and open positions of an account.
    async fn account_snapshot(&self, address: &str) -> Result<AccountSnapshot>;

    /// Current mid price, `None` when the venue does not list the symbol.
    async fn mid_price(&self, symbol: &str) -> Result<Option<Decimal>>;
}
