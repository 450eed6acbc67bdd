//! Hyperliquid Info API client for account state and mid prices.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::models::AccountSnapshot;

use super::types::*;
use super::Venue;

pub const HYPERLIQUID_API_URL: &str = "https://api.hyperliquid.xyz";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(5);

/// Client for the read-only `/info` endpoint.
pub struct InfoClient {
    client: Client,
    base_url: String,
}

impl InfoClient {
    /// Create a client against `base_url` (mainnet, testnet or a local stub).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST a request to `/info`, retrying connection failures and 5xx/429.
    async fn post_info<T: DeserializeOwned>(&self, request: &InfoRequest<'_>, what: &str) -> Result<T> {
        let url = format!("{}/info", self.base_url);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_elapsed_time(Some(MAX_RETRY_ELAPSED))
            .build();

        debug!(url = %url, request = what, "Posting info request");

        let client = &self.client;
        let url = url.as_str();
        let response = backoff::future::retry(policy, || async move {
            let response = client
                .post(url)
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    let err = anyhow!(e).context(format!("Failed to fetch {}", what));
                    if is_transient_transport(&err) {
                        warn!(request = what, error = %err, "Transient info request failure, retrying");
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let err = anyhow!("{} request failed: {} - {}", what, status, body);
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                warn!(request = what, status = %status, "Info API unavailable, retrying");
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            }
        })
        .await?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    /// Fetch all mid prices.
    pub async fn all_mids(&self) -> Result<AllMids> {
        self.post_info(&InfoRequest::AllMids, "allMids").await
    }
}

fn is_transient_transport(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .map(|e| e.is_connect())
        .unwrap_or(false)
}

#[async_trait]
impl Venue for InfoClient {
    async fn account_snapshot(&self, address: &str) -> Result<AccountSnapshot> {
        let state: ClearinghouseState = self
            .post_info(&InfoRequest::ClearinghouseState { user: address }, "clearinghouseState")
            .await?;
        Ok(state.into())
    }

    async fn mid_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        let mids = self.all_mids().await?;
        Ok(mids.get(symbol).copied())
    }
}
