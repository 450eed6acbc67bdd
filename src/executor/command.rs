//! Executor backed by an external command that prints a JSON result.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CopyOrder, ExecutionReport, RebalanceOrder, TradeExecutor};

/// Runs `<copy_cmd> SYMBOL SIZE ACTION` and `<portfolio_cmd> SYMBOL TARGET PRICE DIRECTION`.
pub struct CommandExecutor {
    copy_cmd: Option<Vec<String>>,
    portfolio_cmd: Option<Vec<String>>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(copy_cmd: Option<Vec<String>>, portfolio_cmd: Option<Vec<String>>, timeout: Duration) -> Self {
        Self {
            copy_cmd: copy_cmd.filter(|c| !c.is_empty()),
            portfolio_cmd: portfolio_cmd.filter(|c| !c.is_empty()),
            timeout,
        }
    }

    /// Split a configured command line on whitespace.
    pub fn parse_command(line: &str) -> Option<Vec<String>> {
        let parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts)
        }
    }

    async fn run(&self, base: &[String], args: Vec<String>) -> Result<ExecutionReport> {
        let (program, base_args) = base
            .split_first()
            .ok_or_else(|| anyhow!("Executor command is empty"))?;
        let request_id = Uuid::new_v4().to_string();

        info!(
            request_id = %request_id,
            program = %program,
            args = ?args,
            "Invoking trade executor"
        );

        let child = Command::new(program)
            .args(base_args)
            .args(&args)
            .env("COPIER_REQUEST_ID", &request_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn executor '{}'", program))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("Executor timed out after {}s", self.timeout.as_secs_f64()))?
            .context("Failed to wait for executor")?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(request_id = %request_id, stderr = %stderr.trim(), "Executor diagnostics");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = parse_report(&stdout).with_context(|| {
            format!(
                "Executor returned unreadable output (status {}): {}",
                output.status,
                stdout.trim()
            )
        })?;

        if !report.success && !report.skipped {
            warn!(
                request_id = %request_id,
                status = %output.status,
                error = ?report.error,
                "Executor reported failure"
            );
        }

        Ok(report)
    }
}

/// Parse the executor's stdout, tolerating log lines before the JSON object.
fn parse_report(stdout: &str) -> Result<ExecutionReport> {
    let trimmed = stdout.trim();
    if let Ok(report) = serde_json::from_str(trimmed) {
        return Ok(report);
    }
    match trimmed.find('{') {
        Some(start) => serde_json::from_str(&trimmed[start..]).context("Invalid executor JSON"),
        None => bail!("No JSON object in executor output"),
    }
}

#[async_trait]
impl TradeExecutor for CommandExecutor {
    async fn copy_trade(&self, order: &CopyOrder) -> Result<ExecutionReport> {
        let base = self
            .copy_cmd
            .as_ref()
            .ok_or_else(|| anyhow!("No copy-trade executor configured"))?;
        let args = vec![
            order.symbol.clone(),
            order.size.normalize().to_string(),
            order.action.as_str().to_string(),
        ];
        self.run(base, args).await
    }

    async fn rebalance(&self, order: &RebalanceOrder) -> Result<ExecutionReport> {
        let base = self
            .portfolio_cmd
            .as_ref()
            .ok_or_else(|| anyhow!("No portfolio executor configured"))?;
        let args = vec![
            order.symbol.clone(),
            order.target_value.round_dp(2).normalize().to_string(),
            order.price.normalize().to_string(),
            order.direction.as_str().to_string(),
        ];
        self.run(base, args).await
    }
}
