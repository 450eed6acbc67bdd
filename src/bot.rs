//! Bot runner: the polling loop.
//!
//! Handles:
//! - Polling the signal provider's positions on a fixed interval
//! - Mirroring opens, size changes and closes onto the follower (copy mode)
//! - Rebalancing the follower toward the signal allocation (portfolio mode)
//! - Stopping after too many consecutive failed cycles

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::Venue;
use crate::executor::{CopyOrder, ExecutionOutcome, OrderAction, RebalanceOrder, TradeExecutor};
use crate::models::{AccountSnapshot, PositionSnapshot, RebalanceAction};
use crate::notify::{format, Notifier};
use crate::trading::{
    baseline_from, compute_rebalance, diff_snapshots, ChangeKind, PositionLimiter, PositionSizer,
    RebalanceConfig, SizingContext, SnapshotDiff, TradingConfig,
};

/// Consecutive failed cycles after which the loop stops itself.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Account whose positions are mirrored
    pub signal_address: String,

    /// Account that executes the mirrored trades
    pub follower_address: String,

    /// Time between polls
    pub poll_interval: Duration,

    /// Whether to actually execute trades or just report them
    pub dry_run: bool,

    /// Sizing, rebalancing and limit configuration
    pub trading: TradingConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            signal_address: String::new(),
            follower_address: String::new(),
            poll_interval: Duration::from_millis(5000),
            dry_run: true,
            trading: TradingConfig::default(),
        }
    }
}

/// Lifecycle of the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Stopped,
    Starting,
    Running,
}

/// What one successful cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub opened: usize,
    pub changed: usize,
    pub closed: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Rebalance actions computed this cycle (portfolio mode only)
    pub actions: Vec<RebalanceAction>,
}

impl CycleReport {
    fn from_diff(diff: &SnapshotDiff) -> Self {
        Self {
            opened: diff.opened.len(),
            changed: diff.changed.len(),
            closed: diff.closed.len(),
            ..Default::default()
        }
    }

    fn tally(&mut self, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Filled { .. } => self.executed += 1,
            ExecutionOutcome::Failed(_) => self.failed += 1,
            ExecutionOutcome::Skipped(_) | ExecutionOutcome::DryRun => self.skipped += 1,
        }
    }
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    venue: Arc<dyn Venue>,
    notifier: Arc<dyn Notifier>,
    executor: Option<Arc<dyn TradeExecutor>>,
    sizer: PositionSizer,
    limiter: PositionLimiter,

    // Runtime state, owned by the loop
    state: BotState,
    previous: Option<PositionSnapshot>,
    baseline: Option<HashSet<String>>,
    consecutive_errors: u32,
    cycles: u64,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        venue: Arc<dyn Venue>,
        notifier: Arc<dyn Notifier>,
        executor: Option<Arc<dyn TradeExecutor>>,
    ) -> Self {
        let sizer = PositionSizer::new(config.trading.clone());
        let limiter = PositionLimiter::new(&config.trading);

        Self {
            config,
            venue,
            notifier,
            executor,
            sizer,
            limiter,
            state: BotState::Stopped,
            previous: None,
            baseline: None,
            consecutive_errors: 0,
            cycles: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> BotState {
        self.state
    }

    #[cfg(test)]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    fn portfolio_mode(&self) -> bool {
        self.config.trading.is_portfolio_mirror()
    }

    /// Announce, take the initial snapshot and enter `Running`.
    pub async fn start(&mut self) -> Result<()> {
        self.state = BotState::Starting;
        self.shutdown.store(false, Ordering::SeqCst);

        info!(
            signal = %self.config.signal_address,
            follower = %self.config.follower_address,
            method = %self.sizer.method(),
            dry_run = self.config.dry_run,
            "Starting copier"
        );
        self.notify(format::startup(
            &self.config.signal_address,
            &self.config.follower_address,
            self.sizer.method(),
            self.config.dry_run,
        ))
        .await;

        let signal = match self.venue.account_snapshot(&self.config.signal_address).await {
            Ok(signal) => signal,
            Err(e) => {
                self.state = BotState::Stopped;
                return Err(e.context("Failed to fetch initial signal snapshot"));
            }
        };

        let baseline_len = if self.portfolio_mode() {
            let baseline = baseline_from(&signal);
            info!(symbols = ?baseline, "Recorded baseline positions");
            let len = baseline.len();
            self.baseline = Some(baseline);
            Some(len)
        } else {
            None
        };

        self.notify(format::monitoring(signal.positions.len(), baseline_len)).await;
        self.previous = Some(signal.positions);
        self.consecutive_errors = 0;
        self.state = BotState::Running;

        Ok(())
    }

    /// Main run loop: poll until Ctrl+C or the error ceiling.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => {
                    warn!(error = %e, "Unable to listen for Ctrl+C");
                    std::future::pending::<()>().await
                }
            }
        })
        .await
    }

    /// Start, poll until `shutdown` resolves or the error ceiling is hit, stop.
    ///
    /// `shutdown` is awaited on its own task for the whole run, so a request
    /// arriving mid-cycle is kept and honored once that cycle finishes.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start().await?;

        let wake = Arc::new(Notify::new());
        let shutdown_task = {
            let flag = self.shutdown.clone();
            let wake = wake.clone();
            tokio::spawn(async move {
                shutdown.await;
                flag.store(true, Ordering::SeqCst);
                wake.notify_one();
            })
        };

        let period = self.config.poll_interval;
        info!(poll_interval_ms = period.as_millis() as u64, "Starting poll loop");

        let mut poll_interval = interval(period);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately; the initial snapshot was just taken
        poll_interval.tick().await;

        while self.state == BotState::Running && !self.shutdown.load(Ordering::SeqCst) {
            tokio::select! {
                _ = poll_interval.tick() => {}
                _ = wake.notified() => {}
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let started = Instant::now();
            self.tick().await;
            let elapsed = started.elapsed();
            if elapsed > period {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    poll_interval_ms = period.as_millis() as u64,
                    "Cycle overran the poll interval, skipping missed ticks"
                );
            }
        }

        shutdown_task.abort();
        self.stop().await;

        if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            bail!("Stopped after {} consecutive errors", self.consecutive_errors);
        }
        Ok(())
    }

    /// Run one cycle and account for its result.
    ///
    /// Returns the cycle report on success. Failures are counted; reaching
    /// [`MAX_CONSECUTIVE_ERRORS`] stops the bot.
    pub async fn tick(&mut self) -> Option<CycleReport> {
        if self.state != BotState::Running {
            debug!(state = ?self.state, "Tick ignored, bot not running");
            return None;
        }

        match self.run_cycle().await {
            Ok(report) => {
                self.consecutive_errors = 0;
                self.cycles += 1;
                if report.opened + report.changed + report.closed + report.actions.len() > 0 {
                    info!(
                        opened = report.opened,
                        changed = report.changed,
                        closed = report.closed,
                        actions = report.actions.len(),
                        executed = report.executed,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Cycle complete"
                    );
                }
                Some(report)
            }
            Err(e) => {
                self.consecutive_errors += 1;
                error!(
                    error = %format!("{:#}", e),
                    consecutive = self.consecutive_errors,
                    "Cycle failed"
                );
                self.notify(format::cycle_error(&e, self.consecutive_errors, MAX_CONSECUTIVE_ERRORS))
                    .await;

                if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    error!("Too many consecutive errors, stopping");
                    self.notify(format::fatal_stop(self.consecutive_errors)).await;
                    self.stop().await;
                }
                None
            }
        }
    }

    /// One diff-or-rebalance cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        if self.portfolio_mode() {
            self.portfolio_cycle().await
        } else {
            self.copy_cycle().await
        }
    }

    /// Disarm the loop and send a best-effort final notification. Idempotent.
    pub async fn stop(&mut self) {
        if self.state == BotState::Stopped {
            return;
        }
        self.state = BotState::Stopped;
        self.shutdown.store(true, Ordering::SeqCst);

        info!(cycles = self.cycles, "Bot stopped");
        self.notify(format::shutdown(self.cycles)).await;
    }

    async fn notify(&self, message: String) {
        if let Err(e) = self.notifier.send_message(&message).await {
            warn!(error = %e, "Failed to send notification");
        }
    }

    fn diff_against_previous(&self, current: &PositionSnapshot) -> SnapshotDiff {
        match &self.previous {
            Some(previous) => diff_snapshots(previous, current),
            None => diff_snapshots(&PositionSnapshot::new(), current),
        }
    }

    async fn fetch(&self, address: &str, role: &str) -> Result<AccountSnapshot> {
        self.venue
            .account_snapshot(address)
            .await
            .with_context(|| format!("Failed to fetch {} account", role))
    }

    // ==================== Copy mode ====================

    async fn copy_cycle(&mut self) -> Result<CycleReport> {
        let signal = self.fetch(&self.config.signal_address, "signal").await?;
        let diff = self.diff_against_previous(&signal.positions);
        let mut report = CycleReport::from_diff(&diff);

        if !diff.is_empty() {
            debug!(events = diff.event_count(), "Signal positions changed");
            // Before any side effect so a failure leaves the previous snapshot in place
            let follower = self.fetch(&self.config.follower_address, "follower").await?;

            for position in &diff.opened {
                info!(symbol = %position.symbol, size = %position.size, "Signal opened position");
                self.notify(format::position_opened(position)).await;
                self.mirror(&position.symbol, position.size, position.mark_price, OrderAction::Open, &follower, &mut report)
                    .await;
            }

            for change in &diff.changed {
                info!(
                    symbol = %change.symbol(),
                    from = %change.previous.size,
                    to = %change.current.size,
                    kind = change.kind().as_str(),
                    "Signal changed position"
                );
                self.notify(format::position_changed(change)).await;
                let action = match change.kind() {
                    ChangeKind::Increase | ChangeKind::Flip => OrderAction::Increase,
                    ChangeKind::Decrease => OrderAction::Decrease,
                };
                self.mirror(change.symbol(), change.delta(), change.current.mark_price, action, &follower, &mut report)
                    .await;
            }

            for position in &diff.closed {
                info!(symbol = %position.symbol, "Signal closed position");
                self.notify(format::position_closed(position)).await;
                self.limiter.reset(&position.symbol);

                let Some(own) = follower.positions.get(&position.symbol) else {
                    info!(symbol = %position.symbol, "Follower holds no position, nothing to close");
                    report.skipped += 1;
                    continue;
                };

                let order = CopyOrder {
                    symbol: position.symbol.clone(),
                    size: -own.size,
                    action: OrderAction::Close,
                };
                let outcome = self.execute_copy(&order).await;
                report.tally(&outcome);
                self.notify(format::execution(&order.symbol, order.size, order.action.as_str(), &outcome))
                    .await;
            }
        }

        self.previous = Some(signal.positions);
        Ok(report)
    }

    /// Size, check and execute one opened or changed position.
    async fn mirror(
        &mut self,
        symbol: &str,
        signal_delta: Decimal,
        price: Decimal,
        action: OrderAction,
        follower: &AccountSnapshot,
        report: &mut CycleReport,
    ) {
        let ctx = SizingContext {
            follower_equity: follower.equity,
            price,
        };
        let mut size = self.sizer.follower_delta_with(signal_delta, ctx);
        if size.is_zero() {
            debug!(symbol = %symbol, signal_delta = %signal_delta, "Sized to zero, nothing to mirror");
            report.skipped += 1;
            return;
        }

        if action == OrderAction::Decrease {
            // A decrease only ever shrinks the follower's own position toward zero
            let held = follower.positions.get(symbol).map(|p| p.size).unwrap_or(Decimal::ZERO);
            let reducible = if !held.is_zero() && held.is_sign_negative() != size.is_sign_negative() {
                held.abs()
            } else {
                Decimal::ZERO
            };
            if reducible.is_zero() {
                info!(symbol = %symbol, held = %held, "Follower holds nothing to decrease");
                let outcome = ExecutionOutcome::Skipped(format!("No {} position to decrease", symbol));
                report.tally(&outcome);
                self.notify(format::execution(symbol, size, action.as_str(), &outcome)).await;
                return;
            }
            if size.abs() > reducible {
                debug!(symbol = %symbol, sized = %size, held = %held, "Capping decrease at follower size");
                size = -held;
            }
        }

        let notional = size.abs() * price;
        let min_order_value = self.config.trading.min_order_value;
        if notional < min_order_value {
            let outcome = ExecutionOutcome::Skipped(format!(
                "Order value ${:.2} below minimum ${:.2}",
                notional, min_order_value
            ));
            report.tally(&outcome);
            self.notify(format::execution(symbol, size, action.as_str(), &outcome)).await;
            return;
        }

        let now = Utc::now();
        let adds_exposure = matches!(action, OrderAction::Open | OrderAction::Increase);
        if adds_exposure {
            let decision = self.limiter.check(symbol, notional, follower.equity, now);
            if !decision.allowed {
                warn!(
                    symbol = %symbol,
                    reason = %decision.reason,
                    recent_trades = self.limiter.recent_trades(symbol, now),
                    "Trade blocked by limiter"
                );
                report.skipped += 1;
                self.notify(format::trade_blocked(symbol, &decision.reason)).await;
                return;
            }
        }

        let order = CopyOrder {
            symbol: symbol.to_string(),
            size,
            action,
        };
        let outcome = self.execute_copy(&order).await;
        if adds_exposure && matches!(outcome, ExecutionOutcome::Filled { .. }) {
            self.limiter.record(symbol, notional, now);
        }
        report.tally(&outcome);
        self.notify(format::execution(symbol, size, action.as_str(), &outcome)).await;
    }

    async fn execute_copy(&self, order: &CopyOrder) -> ExecutionOutcome {
        match (&self.executor, self.config.dry_run) {
            (Some(executor), false) => {
                let outcome = ExecutionOutcome::from(executor.copy_trade(order).await);
                if let ExecutionOutcome::Failed(reason) = &outcome {
                    warn!(symbol = %order.symbol, action = order.action.as_str(), error = %reason, "Copy trade failed");
                }
                outcome
            }
            _ => {
                info!(symbol = %order.symbol, size = %order.size, action = order.action.as_str(), "Would copy trade");
                ExecutionOutcome::DryRun
            }
        }
    }

    // ==================== Portfolio mode ====================

    async fn portfolio_cycle(&mut self) -> Result<CycleReport> {
        let (signal, follower) = futures::future::try_join(
            self.fetch(&self.config.signal_address, "signal"),
            self.fetch(&self.config.follower_address, "follower"),
        )
        .await?;

        let diff = self.diff_against_previous(&signal.positions);
        let mut report = CycleReport::from_diff(&diff);

        for position in &diff.opened {
            self.notify(format::position_opened(position)).await;
        }
        for change in &diff.changed {
            self.notify(format::position_changed(change)).await;
        }
        for position in &diff.closed {
            self.notify(format::position_closed(position)).await;
        }

        let empty = HashSet::new();
        let baseline = self.baseline.as_ref().unwrap_or(&empty);
        let plan = compute_rebalance(&signal, &follower, baseline, &RebalanceConfig::from(&self.config.trading));

        debug!(
            signal_utilization = %signal.utilization(),
            target_utilization = %plan.target_utilization,
            target_total = %plan.target_total_value,
            actions = plan.actions.len(),
            "Computed rebalance plan"
        );

        if !plan.actions.is_empty() {
            let mut outcomes = Vec::with_capacity(plan.actions.len());
            for action in &plan.actions {
                let outcome = self.execute_rebalance(action).await;
                report.tally(&outcome);
                outcomes.push(outcome);
            }
            self.notify(format::rebalance_summary(&plan, &outcomes)).await;
        }

        report.actions = plan.actions;
        self.previous = Some(signal.positions);
        Ok(report)
    }

    async fn execute_rebalance(&self, action: &RebalanceAction) -> ExecutionOutcome {
        info!(
            symbol = %action.symbol,
            kind = action.kind.as_str(),
            direction = action.direction.as_str(),
            current = %action.current_value.round_dp(2),
            target = %action.target_value.round_dp(2),
            "Rebalance action"
        );

        let executor = match (&self.executor, self.config.dry_run) {
            (Some(executor), false) => executor,
            _ => return ExecutionOutcome::DryRun,
        };

        let price = match self.venue.mid_price(&action.symbol).await {
            Ok(Some(price)) if price > Decimal::ZERO => price,
            Ok(_) => return ExecutionOutcome::Failed(format!("No mid price for {}", action.symbol)),
            Err(e) => return ExecutionOutcome::Failed(format!("{:#}", e)),
        };

        let order = RebalanceOrder {
            symbol: action.symbol.clone(),
            target_value: action.target_value,
            price,
            direction: action.direction,
        };
        let outcome = ExecutionOutcome::from(executor.rebalance(&order).await);
        if let ExecutionOutcome::Failed(reason) = &outcome {
            warn!(symbol = %action.symbol, error = %reason, "Rebalance action failed");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionReport;
    use crate::models::{ActionKind, Direction, Position};
    use crate::trading::SizingMethod;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    const SIGNAL: &str = "0xsignal";
    const FOLLOWER: &str = "0xfollower";

    /// Venue replaying scripted snapshots per address; the last entry repeats.
    #[derive(Default)]
    struct ScriptedVenue {
        accounts: Mutex<HashMap<String, VecDeque<Option<AccountSnapshot>>>>,
    }

    impl ScriptedVenue {
        fn script(self, address: &str, steps: Vec<Option<AccountSnapshot>>) -> Self {
            self.accounts
                .lock()
                .unwrap()
                .insert(address.to_string(), steps.into_iter().collect());
            self
        }
    }

    #[async_trait]
    impl Venue for ScriptedVenue {
        async fn account_snapshot(&self, address: &str) -> Result<AccountSnapshot> {
            let mut accounts = self.accounts.lock().unwrap();
            let steps = accounts
                .get_mut(address)
                .ok_or_else(|| anyhow!("unknown address {}", address))?;
            let step = if steps.len() > 1 {
                steps.pop_front().flatten()
            } else {
                steps.front().cloned().flatten()
            };
            step.ok_or_else(|| anyhow!("connection timed out"))
        }

        async fn mid_price(&self, symbol: &str) -> Result<Option<Decimal>> {
            Ok(match symbol {
                "BTC" => Some(dec!(60000)),
                "ETH" => Some(dec!(3000)),
                _ => None,
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_message(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(anyhow!("chat unreachable"));
            }
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Records orders; fails any symbol in `failing`.
    #[derive(Default)]
    struct ScriptedExecutor {
        copies: Mutex<Vec<CopyOrder>>,
        rebalances: Mutex<Vec<RebalanceOrder>>,
        failing: HashSet<String>,
    }

    impl ScriptedExecutor {
        fn report(&self, symbol: &str) -> Result<ExecutionReport> {
            if self.failing.contains(symbol) {
                return Ok(ExecutionReport {
                    success: false,
                    error: Some("Insufficient margin".to_string()),
                    ..Default::default()
                });
            }
            Ok(ExecutionReport {
                success: true,
                order_id: Some("1".to_string()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl TradeExecutor for ScriptedExecutor {
        async fn copy_trade(&self, order: &CopyOrder) -> Result<ExecutionReport> {
            self.copies.lock().unwrap().push(order.clone());
            self.report(&order.symbol)
        }

        async fn rebalance(&self, order: &RebalanceOrder) -> Result<ExecutionReport> {
            self.rebalances.lock().unwrap().push(order.clone());
            self.report(&order.symbol)
        }
    }

    fn account(equity: Decimal, positions: &[(&str, Decimal, Decimal)]) -> Option<AccountSnapshot> {
        let positions = positions
            .iter()
            .map(|(symbol, size, mark)| Position::new(*symbol, *size, *mark, *mark))
            .collect();
        Some(AccountSnapshot::new(equity, positions))
    }

    fn config(method: SizingMethod) -> BotConfig {
        BotConfig {
            signal_address: SIGNAL.to_string(),
            follower_address: FOLLOWER.to_string(),
            poll_interval: Duration::from_millis(1),
            dry_run: false,
            trading: TradingConfig {
                sizing_method: method,
                ..Default::default()
            },
        }
    }

    fn bot(
        config: BotConfig,
        venue: ScriptedVenue,
        notifier: Arc<RecordingNotifier>,
        executor: Arc<ScriptedExecutor>,
    ) -> Bot {
        let executor: Arc<dyn TradeExecutor> = executor;
        Bot::new(config, Arc::new(venue), notifier, Some(executor))
    }

    #[tokio::test]
    async fn test_copy_mode_opens_scaled_position() {
        let venue = ScriptedVenue::default()
            .script(SIGNAL, vec![account(dec!(500000), &[]), account(dec!(500000), &[("BTC", dec!(2), dec!(60000))])])
            .script(FOLLOWER, vec![account(dec!(100000), &[])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier.clone(), executor.clone());

        bot.start().await.unwrap();
        assert_eq!(bot.state(), BotState::Running);

        let report = bot.tick().await.unwrap();
        assert_eq!(report.opened, 1);
        assert_eq!(report.executed, 1);

        let copies = executor.copies.lock().unwrap();
        assert_eq!(
            *copies,
            vec![CopyOrder {
                symbol: "BTC".to_string(),
                size: dec!(0.2),
                action: OrderAction::Open,
            }]
        );
        assert!(notifier.messages().iter().any(|m| m.contains("NEW LONG BTC")));
        assert!(notifier.messages().iter().any(|m| m.contains("Executed OPEN 0.2 BTC")));
    }

    #[tokio::test]
    async fn test_copy_mode_close_uses_follower_size() {
        let venue = ScriptedVenue::default()
            .script(SIGNAL, vec![account(dec!(10000), &[("ETH", dec!(10), dec!(3000))]), account(dec!(10000), &[])])
            .script(FOLLOWER, vec![account(dec!(5000), &[("ETH", dec!(1.3), dec!(3000))])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier, executor.clone());

        bot.start().await.unwrap();
        let report = bot.tick().await.unwrap();
        assert_eq!(report.closed, 1);

        let copies = executor.copies.lock().unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].size, dec!(-1.3));
        assert_eq!(copies[0].action, OrderAction::Close);
    }

    #[tokio::test]
    async fn test_decrease_skipped_without_follower_position() {
        let venue = ScriptedVenue::default()
            .script(
                SIGNAL,
                vec![account(dec!(10000), &[("ETH", dec!(10), dec!(3000))]), account(dec!(10000), &[("ETH", dec!(5), dec!(3000))])],
            )
            .script(FOLLOWER, vec![account(dec!(100000), &[])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier.clone(), executor.clone());

        tokio_test::assert_ok!(bot.start().await);
        let report = bot.tick().await.unwrap();

        assert_eq!(report.changed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.executed, 0);
        assert!(executor.copies.lock().unwrap().is_empty());
        assert!(notifier.messages().iter().any(|m| m.contains("No ETH position to decrease")));
    }

    #[tokio::test]
    async fn test_decrease_capped_at_follower_size() {
        let venue = ScriptedVenue::default()
            .script(
                SIGNAL,
                vec![account(dec!(10000), &[("ETH", dec!(10), dec!(3000))]), account(dec!(10000), &[("ETH", dec!(0.5), dec!(3000))])],
            )
            .script(FOLLOWER, vec![account(dec!(100000), &[("ETH", dec!(0.4), dec!(3000))])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier, executor.clone());

        tokio_test::assert_ok!(bot.start().await);
        let report = bot.tick().await.unwrap();
        assert_eq!(report.executed, 1);

        // 0.1 x -9.5 would sell 0.95, more than the 0.4 held
        let copies = executor.copies.lock().unwrap();
        assert_eq!(
            *copies,
            vec![CopyOrder {
                symbol: "ETH".to_string(),
                size: dec!(-0.4),
                action: OrderAction::Decrease,
            }]
        );
    }

    #[tokio::test]
    async fn test_small_order_skipped() {
        let venue = ScriptedVenue::default()
            .script(SIGNAL, vec![account(dec!(1000), &[]), account(dec!(1000), &[("DOGE", dec!(100), dec!(0.1))])])
            .script(FOLLOWER, vec![account(dec!(1000), &[])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier.clone(), executor.clone());

        bot.start().await.unwrap();
        let report = bot.tick().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert!(executor.copies.lock().unwrap().is_empty());
        assert!(notifier.messages().iter().any(|m| m.contains("below minimum")));
    }

    #[tokio::test]
    async fn test_error_keeps_previous_snapshot() {
        let venue = ScriptedVenue::default()
            .script(
                SIGNAL,
                vec![
                    account(dec!(10000), &[("BTC", dec!(1), dec!(60000))]),
                    None,
                    account(dec!(10000), &[("BTC", dec!(1), dec!(60000)), ("ETH", dec!(5), dec!(3000))]),
                ],
            )
            .script(FOLLOWER, vec![account(dec!(100000), &[])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier.clone(), executor);

        bot.start().await.unwrap();
        assert!(bot.tick().await.is_none());
        assert_eq!(bot.consecutive_errors(), 1);
        assert!(bot.previous.as_ref().unwrap().contains("BTC"));
        assert!(notifier.messages().iter().any(|m| m.contains("(1/10)")));

        let report = bot.tick().await.unwrap();
        assert_eq!(report.opened, 1);
        assert_eq!(bot.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn test_error_ceiling_stops_bot() {
        let venue = ScriptedVenue::default()
            .script(SIGNAL, vec![account(dec!(1000), &[]), None])
            .script(FOLLOWER, vec![account(dec!(1000), &[])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier.clone(), executor);

        bot.start().await.unwrap();
        for _ in 0..MAX_CONSECUTIVE_ERRORS - 1 {
            bot.tick().await;
        }
        assert_eq!(bot.state(), BotState::Running);

        bot.tick().await;
        assert_eq!(bot.state(), BotState::Stopped);
        assert!(bot.shutdown.load(Ordering::SeqCst));

        let messages = notifier.messages();
        assert!(messages.iter().any(|m| m.contains("10 consecutive errors")));
        assert!(messages.last().unwrap().contains("Copier stopped"));

        // Further ticks are ignored
        assert!(bot.tick().await.is_none());
        assert_eq!(bot.consecutive_errors(), MAX_CONSECUTIVE_ERRORS);
    }

    #[tokio::test]
    async fn test_run_returns_error_at_ceiling() {
        let venue = ScriptedVenue::default()
            .script(SIGNAL, vec![account(dec!(1000), &[]), None])
            .script(FOLLOWER, vec![account(dec!(1000), &[])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier, executor);

        tokio_test::assert_err!(bot.run_until(std::future::pending()).await);
        assert_eq!(bot.state(), BotState::Stopped);
    }

    #[tokio::test]
    async fn test_notifier_failure_not_counted() {
        let venue = ScriptedVenue::default()
            .script(SIGNAL, vec![account(dec!(500000), &[]), account(dec!(500000), &[("BTC", dec!(2), dec!(60000))])])
            .script(FOLLOWER, vec![account(dec!(100000), &[])]);
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier, executor.clone());

        tokio_test::assert_ok!(bot.start().await);
        let report = bot.tick().await.unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(bot.consecutive_errors(), 0);
        assert_eq!(executor.copies.lock().unwrap().len(), 1);
        assert!(bot.previous.as_ref().unwrap().contains("BTC"));
    }

    #[tokio::test]
    async fn test_dry_run_never_executes() {
        let venue = ScriptedVenue::default()
            .script(SIGNAL, vec![account(dec!(500000), &[]), account(dec!(500000), &[("BTC", dec!(2), dec!(60000))])])
            .script(FOLLOWER, vec![account(dec!(100000), &[])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut cfg = config(SizingMethod::FixedRatio);
        cfg.dry_run = true;
        let mut bot = bot(cfg, venue, notifier.clone(), executor.clone());

        bot.start().await.unwrap();
        let report = bot.tick().await.unwrap();
        assert_eq!(report.executed, 0);
        assert!(executor.copies.lock().unwrap().is_empty());
        assert!(notifier.messages().iter().any(|m| m.contains("Would execute OPEN 0.2 BTC")));
    }

    #[tokio::test]
    async fn test_portfolio_opens_and_closes() {
        let venue = ScriptedVenue::default()
            .script(SIGNAL, vec![account(dec!(1000), &[]), account(dec!(1000), &[("BTC", dec!(0.005), dec!(60000))])])
            .script(FOLLOWER, vec![account(dec!(1000), &[("ETH", dec!(0.1), dec!(3000))])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::PortfolioMirror), venue, notifier.clone(), executor.clone());

        bot.start().await.unwrap();
        let report = bot.tick().await.unwrap();

        // Signal utilization 0.3: BTC gets the whole $300 target, ETH closes
        let kinds: Vec<_> = report.actions.iter().map(|a| (a.symbol.as_str(), a.kind)).collect();
        assert_eq!(kinds, vec![("ETH", ActionKind::Close), ("BTC", ActionKind::Open)]);
        assert_eq!(report.actions[0].target_value, Decimal::ZERO);
        assert_eq!(report.actions[0].direction, Direction::Long);
        assert_eq!(report.actions[1].target_value, dec!(300));

        let rebalances = executor.rebalances.lock().unwrap();
        assert_eq!(rebalances.len(), 2);
        assert_eq!(rebalances[1].price, dec!(60000));
        assert!(notifier.messages().iter().any(|m| m.contains("Rebalance: 2 actions, 0 failed")));
    }

    #[tokio::test]
    async fn test_baseline_suppresses_open() {
        let venue = ScriptedVenue::default()
            .script(
                SIGNAL,
                vec![
                    account(dec!(1000), &[("BTC", dec!(0.005), dec!(60000))]),
                    account(dec!(1000), &[("BTC", dec!(0.008), dec!(60000)), ("ETH", dec!(0.1), dec!(3000))]),
                ],
            )
            .script(FOLLOWER, vec![account(dec!(1000), &[])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::PortfolioMirror), venue, notifier, executor);

        bot.start().await.unwrap();
        let report = bot.tick().await.unwrap();

        let symbols: Vec<_> = report.actions.iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ETH"]);
        assert_eq!(report.actions[0].kind, ActionKind::Open);
    }

    #[tokio::test]
    async fn test_executor_failure_does_not_abort_siblings() {
        let venue = ScriptedVenue::default()
            .script(SIGNAL, vec![
                account(dec!(1000), &[]),
                account(dec!(1000), &[("BTC", dec!(0.005), dec!(60000)), ("ETH", dec!(0.1), dec!(3000))]),
            ])
            .script(FOLLOWER, vec![account(dec!(1000), &[])]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor {
            failing: ["BTC".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let mut bot = bot(config(SizingMethod::PortfolioMirror), venue, notifier.clone(), executor.clone());

        bot.start().await.unwrap();
        let report = bot.tick().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(executor.rebalances.lock().unwrap().len(), 2);
        assert_eq!(bot.consecutive_errors(), 0);
        assert!(notifier
            .messages()
            .iter()
            .any(|m| m.contains("1 failed") && m.contains("Insufficient margin")));
    }

    #[tokio::test]
    async fn test_start_failure_leaves_bot_stopped() {
        let venue = ScriptedVenue::default().script(SIGNAL, vec![None]);
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let mut bot = bot(config(SizingMethod::FixedRatio), venue, notifier, executor);

        assert!(bot.start().await.is_err());
        assert_eq!(bot.state(), BotState::Stopped);
    }

    /// Empty accounts served after a fixed delay; tracks overlapping fetches.
    struct SlowVenue {
        delay: Duration,
        signal_fetches: Mutex<Vec<Instant>>,
        in_flight: std::sync::atomic::AtomicUsize,
        max_in_flight: std::sync::atomic::AtomicUsize,
    }

    impl SlowVenue {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                signal_fetches: Mutex::new(Vec::new()),
                in_flight: Default::default(),
                max_in_flight: Default::default(),
            }
        }
    }

    #[async_trait]
    impl Venue for SlowVenue {
        async fn account_snapshot(&self, address: &str) -> Result<AccountSnapshot> {
            if address == SIGNAL {
                self.signal_fetches.lock().unwrap().push(Instant::now());
            }
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(AccountSnapshot::new(dec!(1000), PositionSnapshot::new()))
        }

        async fn mid_price(&self, _symbol: &str) -> Result<Option<Decimal>> {
            Ok(None)
        }
    }

    fn slow_bot(venue: Arc<SlowVenue>, notifier: Arc<RecordingNotifier>, interval: Duration) -> Bot {
        let mut cfg = config(SizingMethod::FixedRatio);
        cfg.poll_interval = interval;
        Bot::new(cfg, venue, notifier, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_never_overlap() {
        let venue = Arc::new(SlowVenue::new(Duration::from_millis(300)));
        let notifier = Arc::new(RecordingNotifier::default());
        let mut bot = slow_bot(venue.clone(), notifier, Duration::from_millis(100));

        tokio_test::assert_ok!(bot.run_until(tokio::time::sleep(Duration::from_secs(3))).await);

        assert_eq!(venue.max_in_flight.load(Ordering::SeqCst), 1);
        let fetches = venue.signal_fetches.lock().unwrap().clone();
        // Missed ticks are dropped instead of queued up behind the slow cycle
        assert!(fetches.len() >= 5 && fetches.len() < 15, "{} cycles", fetches.len());
        for pair in fetches.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_cycle_stops_after_it() {
        let venue = Arc::new(SlowVenue::new(Duration::from_millis(300)));
        let notifier = Arc::new(RecordingNotifier::default());
        let mut bot = slow_bot(venue.clone(), notifier.clone(), Duration::from_millis(100));

        let began = Instant::now();
        let requested_at = Duration::from_millis(850);
        tokio_test::assert_ok!(bot.run_until(tokio::time::sleep(requested_at)).await);

        assert!(began.elapsed() < Duration::from_millis(1500));
        assert_eq!(bot.state(), BotState::Stopped);
        assert!(bot.shutdown.load(Ordering::SeqCst));

        // The request landed mid-cycle; no cycle began after it
        let fetches = venue.signal_fetches.lock().unwrap().clone();
        assert!(fetches.len() >= 2);
        assert!(fetches.iter().all(|t| *t - began <= requested_at));
        assert!(notifier.messages().last().unwrap().contains("Copier stopped"));
    }
}
