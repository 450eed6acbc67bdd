//! Hyperliquid Copy-Trading Bot
//!
//! Mirrors a signal provider's perpetual positions onto a follower account,
//! either trade by trade or by rebalancing toward the provider's allocation.

mod api;
mod bot;
mod executor;
mod models;
mod notify;
mod trading;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{InfoClient, Venue, HYPERLIQUID_API_URL};
use crate::bot::{Bot, BotConfig};
use crate::executor::{CommandExecutor, TradeExecutor};
use crate::models::AccountSnapshot;
use crate::notify::{LogNotifier, Notifier, QueuedNotifier, TelegramConfig, TelegramTransport};
use crate::trading::{compute_rebalance, RebalanceConfig, SizingMethod, TradingConfig};

/// Delay between two chat messages.
const NOTIFY_DELAY: Duration = Duration::from_secs(1);

/// How long to wait for queued notifications on exit.
const NOTIFY_FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

/// Hyperliquid copy-trading bot CLI.
#[derive(Parser)]
#[command(name = "hlcopier")]
#[command(about = "Mirror a Hyperliquid trader's positions onto your account", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the copier
    Run(RunArgs),

    /// Show the effective configuration
    Config(RunArgs),

    /// Show an account's equity and open positions
    Snapshot {
        /// Wallet address
        address: String,

        /// Hyperliquid API base URL
        #[arg(long, env = "HYPERLIQUID_API_URL", default_value = HYPERLIQUID_API_URL)]
        api_url: String,
    },

    /// Compute one rebalance plan from live accounts without executing it
    Plan {
        #[command(flatten)]
        accounts: AccountArgs,

        #[command(flatten)]
        trading: TradingArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct AccountArgs {
    /// Address of the trader to copy
    #[arg(long, env = "SIGNAL_PROVIDER_ADDRESS")]
    signal: String,

    /// Address of your own account
    #[arg(long, env = "FOLLOWER_ADDRESS")]
    follower: String,

    /// Hyperliquid API base URL
    #[arg(long, env = "HYPERLIQUID_API_URL", default_value = HYPERLIQUID_API_URL)]
    api_url: String,
}

#[derive(Args, Debug, Clone)]
struct TradingArgs {
    /// fixed_ratio, fixed_size, percentage, wallet_percentage, wallet_fixed or portfolio_mirror
    #[arg(long, env = "SIZING_METHOD", default_value = "fixed_ratio")]
    sizing_method: SizingMethod,

    /// Follower/signal size ratio (fixed_ratio)
    #[arg(long, env = "ACCOUNT_RATIO", default_value = "0.1")]
    account_ratio: Decimal,

    /// Largest follower delta in coins
    #[arg(long, env = "MAX_POSITION_SIZE")]
    max_position_size: Option<Decimal>,

    /// Follower size per trade in coins (fixed_size)
    #[arg(long, env = "FIXED_SIZE", default_value = "1")]
    fixed_size: Decimal,

    /// Multiplier on the signal delta (percentage)
    #[arg(long, env = "PERCENTAGE_MULTIPLIER", default_value = "0.1")]
    percentage_multiplier: Decimal,

    /// Fraction of follower equity per trade (wallet_percentage)
    #[arg(long, env = "WALLET_PERCENTAGE", default_value = "0.1")]
    wallet_percentage: Decimal,

    /// USD per trade (wallet_fixed)
    #[arg(long, env = "WALLET_FIXED_AMOUNT", default_value = "10")]
    wallet_fixed_amount: Decimal,

    /// Relative gap before a held position is rebalanced
    #[arg(long, env = "MIN_REBALANCE_DIFF", default_value = "0.05")]
    min_rebalance_diff: Decimal,

    /// Ceiling on the follower's utilization
    #[arg(long, env = "MAX_UTILIZATION", default_value = "0.8")]
    max_utilization: Decimal,

    /// Maximum trades per symbol per hour
    #[arg(long, env = "MAX_TRADES_PER_COIN_HOURLY", default_value = "3")]
    max_trades_per_coin_hourly: usize,

    /// Minimum seconds between trades on one symbol
    #[arg(long, env = "MIN_SECONDS_BETWEEN_TRADES", default_value = "30")]
    min_seconds_between_trades: i64,

    /// Maximum share of equity committed to one symbol
    #[arg(long, env = "MAX_POSITION_PERCENT", default_value = "0.25")]
    max_position_percent: Decimal,

    /// Smallest order notional in USD
    #[arg(long, env = "MIN_ORDER_VALUE", default_value = "10")]
    min_order_value: Decimal,
}

impl TradingArgs {
    fn to_config(&self) -> Result<TradingConfig> {
        let config = TradingConfig {
            sizing_method: self.sizing_method,
            account_ratio: self.account_ratio,
            max_position_size: self.max_position_size,
            fixed_size: self.fixed_size,
            percentage_multiplier: self.percentage_multiplier,
            wallet_percentage: self.wallet_percentage,
            wallet_fixed_amount: self.wallet_fixed_amount,
            min_rebalance_diff: self.min_rebalance_diff,
            max_utilization: self.max_utilization,
            min_order_value: self.min_order_value,
            max_trades_per_symbol_hourly: self.max_trades_per_coin_hourly,
            min_seconds_between_trades: self.min_seconds_between_trades,
            max_position_percent: self.max_position_percent,
        };
        config.validate().context("Invalid trading configuration")?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    accounts: AccountArgs,

    #[command(flatten)]
    trading: TradingArgs,

    /// Polling interval in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "5000")]
    poll_interval_ms: u64,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_bot_token: Option<String>,

    /// Telegram chat id
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    telegram_chat_id: Option<String>,

    /// Command executing copy trades: `<cmd> SYMBOL SIZE ACTION`
    #[arg(long, env = "EXECUTOR_CMD")]
    executor_cmd: Option<String>,

    /// Command executing rebalances: `<cmd> SYMBOL TARGET_USD PRICE DIRECTION`
    #[arg(long, env = "PORTFOLIO_EXECUTOR_CMD")]
    portfolio_executor_cmd: Option<String>,

    /// Executor timeout in seconds
    #[arg(long, env = "EXECUTOR_TIMEOUT_SECS", default_value = "30")]
    executor_timeout_secs: u64,

    /// Dry run (report trades without executing them)
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,
}

impl RunArgs {
    fn bot_config(&self) -> Result<BotConfig> {
        if self.poll_interval_ms == 0 {
            bail!("poll interval must be positive");
        }
        Ok(BotConfig {
            signal_address: self.accounts.signal.clone(),
            follower_address: self.accounts.follower.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            dry_run: self.dry_run,
            trading: self.trading.to_config()?,
        })
    }

    fn executor(&self) -> Option<Arc<dyn TradeExecutor>> {
        let copy_cmd = self.executor_cmd.as_deref().and_then(CommandExecutor::parse_command);
        let portfolio_cmd = self
            .portfolio_executor_cmd
            .as_deref()
            .and_then(CommandExecutor::parse_command);
        if copy_cmd.is_none() && portfolio_cmd.is_none() {
            return None;
        }
        let executor: Arc<dyn TradeExecutor> = Arc::new(CommandExecutor::new(
            copy_cmd,
            portfolio_cmd,
            Duration::from_secs(self.executor_timeout_secs),
        ));
        Some(executor)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => {
            let config = args.bot_config()?;
            let venue: Arc<dyn Venue> = Arc::new(InfoClient::with_base_url(args.accounts.api_url.clone())?);

            let (notifier, worker) = match TelegramConfig::from_parts(
                args.telegram_bot_token.clone(),
                args.telegram_chat_id.clone(),
            ) {
                Some(telegram) => {
                    let transport = Arc::new(TelegramTransport::new(telegram)?);
                    let (queue, worker) = QueuedNotifier::spawn(transport, NOTIFY_DELAY);
                    let notifier: Arc<dyn Notifier> = Arc::new(queue);
                    (notifier, Some(worker))
                }
                None => {
                    warn!("Telegram not configured, notifications go to the log");
                    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
                    (notifier, None)
                }
            };

            let executor = args.executor();
            if executor.is_none() && !config.dry_run {
                warn!("No executor configured, trades will only be reported");
            }

            println!("\n=== Hyperliquid Copy-Trading Bot ===");
            println!("Signal:   {}", config.signal_address);
            println!("Follower: {}", config.follower_address);
            println!("Method:   {}", config.trading.sizing_method);
            println!("Interval: {}ms", args.poll_interval_ms);
            println!(
                "Mode:     {}",
                if config.dry_run { "DRY RUN (no real trades)" } else { "LIVE TRADING" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            let mut bot = Bot::new(config, venue, notifier, executor);
            let result = bot.run().await;
            drop(bot);

            // Let queued messages (including the shutdown notice) go out
            if let Some(worker) = worker {
                if tokio::time::timeout(NOTIFY_FLUSH_TIMEOUT, worker).await.is_err() {
                    warn!("Timed out flushing notifications");
                }
            }

            if let Err(e) = result {
                tracing::error!(error = %format!("{:#}", e), "Bot error");
                return Err(e);
            }
        }

        Commands::Config(args) => {
            let config = args.bot_config()?;
            let t = &config.trading;

            println!("\n=== Copier Configuration ===\n");
            println!("Accounts:");
            println!("  Signal:               {}", config.signal_address);
            println!("  Follower:             {}", config.follower_address);
            println!("  API:                  {}", args.accounts.api_url);

            println!("\nPosition Sizing:");
            println!("  Method:               {}", t.sizing_method);
            println!("  Account Ratio:        {}", t.account_ratio);
            match t.max_position_size {
                Some(max) => println!("  Max Position Size:    {}", max),
                None => println!("  Max Position Size:    unlimited"),
            }
            println!("  Fixed Size:           {}", t.fixed_size);
            println!("  Percentage Mult.:     {}", t.percentage_multiplier);
            println!("  Wallet Percentage:    {}%", t.wallet_percentage * Decimal::from(100));
            println!("  Wallet Fixed Amount:  ${}", t.wallet_fixed_amount);
            println!("  Min Order Value:      ${}", t.min_order_value);

            println!("\nPortfolio Mirror:");
            println!("  Min Rebalance Diff:   {}%", t.min_rebalance_diff * Decimal::from(100));
            println!("  Max Utilization:      {}%", t.max_utilization * Decimal::from(100));

            println!("\nTrade Limits:");
            println!("  Max Trades/Coin/Hour: {}", t.max_trades_per_symbol_hourly);
            println!("  Min Seconds Between:  {}", t.min_seconds_between_trades);
            println!("  Max Position Share:   {}%", t.max_position_percent * Decimal::from(100));

            println!("\nRuntime:");
            println!("  Poll Interval:        {}ms", args.poll_interval_ms);
            println!("  Dry Run:              {}", config.dry_run);
            println!(
                "  Telegram:             {}",
                if TelegramConfig::from_parts(args.telegram_bot_token.clone(), args.telegram_chat_id.clone()).is_some() {
                    "configured"
                } else {
                    "not configured (log only)"
                }
            );
            println!("  Copy Executor:        {}", args.executor_cmd.as_deref().unwrap_or("none"));
            println!(
                "  Portfolio Executor:   {}",
                args.portfolio_executor_cmd.as_deref().unwrap_or("none")
            );
            println!("  Executor Timeout:     {}s", args.executor_timeout_secs);
        }

        Commands::Snapshot { address, api_url } => {
            let client = InfoClient::with_base_url(api_url)?;
            info!(address = %address, "Fetching account snapshot");
            let account = client.account_snapshot(&address).await?;

            println!("\n=== Account: {} ===", address);
            print_account(&account);
        }

        Commands::Plan { accounts, trading } => {
            let config = trading.to_config()?;
            let client = InfoClient::with_base_url(accounts.api_url.clone())?;

            let (signal, follower) = futures::future::try_join(
                client.account_snapshot(&accounts.signal),
                client.account_snapshot(&accounts.follower),
            )
            .await?;

            println!("\n=== Signal: {} ===", accounts.signal);
            print_account(&signal);
            println!("\n=== Follower: {} ===", accounts.follower);
            print_account(&follower);

            let plan = compute_rebalance(&signal, &follower, &HashSet::new(), &RebalanceConfig::from(&config));

            println!("\n=== Rebalance Plan ===");
            println!("Target Utilization: {:.1}%", plan.target_utilization * Decimal::from(100));
            println!("Target Exposure:    ${:.2}", plan.target_total_value);

            if plan.actions.is_empty() {
                println!("\nNo actions needed.");
            } else {
                println!(
                    "\n{:<10} {:<10} {:<6} {:>14} {:>14} {:>14}",
                    "ACTION", "SYMBOL", "SIDE", "CURRENT", "TARGET", "DELTA"
                );
                println!("{}", "-".repeat(73));
                for action in &plan.actions {
                    println!(
                        "{:<10} {:<10} {:<6} {:>14} {:>14} {:>14}",
                        action.kind.as_str(),
                        action.symbol,
                        action.direction.as_str(),
                        format!("${:.2}", action.current_value),
                        format!("${:.2}", action.target_value),
                        format!("${:.2}", action.value_delta),
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_account(account: &AccountSnapshot) {
    println!("Equity:      ${:.2}", account.equity);
    println!("Exposure:    ${:.2}", account.total_position_value());
    println!("Utilization: {:.1}%", account.utilization() * Decimal::from(100));

    if account.positions.is_empty() {
        println!("\nNo open positions.");
        return;
    }

    println!(
        "\n{:<10} {:<6} {:>14} {:>12} {:>12} {:>12} {:>12} {:>8}",
        "SYMBOL", "SIDE", "SIZE", "ENTRY", "MARK", "VALUE", "PNL", "ROE"
    );
    println!("{}", "-".repeat(94));
    for p in account.positions.iter() {
        println!(
            "{:<10} {:<6} {:>14} {:>12} {:>12} {:>12} {:>12} {:>8}",
            p.symbol,
            p.direction().as_str(),
            p.size.abs().normalize().to_string(),
            p.entry_price.normalize().to_string(),
            p.mark_price.normalize().to_string(),
            format!("${:.2}", p.value()),
            format!("${:.2}", p.unrealized_pnl),
            format!("{:.1}%", p.return_on_margin() * Decimal::from(100)),
        );
    }
}
