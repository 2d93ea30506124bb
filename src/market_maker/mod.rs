//! Per-market driver (§4.4): one cooperative task per market, message-passing
//! event loop, trailing debounce, rebalance cycle, exit reasons.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::errors::AgentError;
use crate::gateway::exchange::{ExchangeClient, PlaceOrderRequest};
use crate::gateway::settlement::SettlementClient;
use crate::persistence;
use crate::quote::{generate_quotes, should_rebalance};
use crate::tracker::PositionTracker;
use crate::types::{ActiveQuotes, ExitReason, Fill, Market, MarketEvent, OrderSide, Outcome};

#[derive(Clone, Copy, Debug)]
pub struct MarketMakerConfig {
    pub spread_fraction: f64,
    pub order_size: f64,
    pub rebalance_threshold: f64,
    pub debounce_ms: u64,
    pub fallback_ms: u64,
    pub merge_enabled: bool,
    pub min_merge_amount: f64,
}

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            spread_fraction: 0.5,
            order_size: 20.0,
            rebalance_threshold: 0.01,
            debounce_ms: 50,
            fallback_ms: 5_000,
            merge_enabled: true,
            min_merge_amount: 1.0,
        }
    }
}

/// Query the supervisor asks of the orchestrator each switch-check tick.
#[async_trait::async_trait]
pub trait SwitchObserver: Send + Sync {
    async fn has_pending_switch(&self) -> bool;
}

/// Attributes live order ids back to an outcome so cancellation and fill
/// handling work regardless of which token id the upstream event names.
#[derive(Default)]
struct OrderTracker {
    yes_order_id: Option<String>,
    no_order_id: Option<String>,
}

impl OrderTracker {
    fn record(&mut self, outcome: Outcome, order_id: String) {
        match outcome {
            Outcome::Yes => self.yes_order_id = Some(order_id),
            Outcome::No => self.no_order_id = Some(order_id),
        }
    }

    fn clear(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Yes => self.yes_order_id = None,
            Outcome::No => self.no_order_id = None,
        }
    }
}

/// Runs one market to completion, returning the reason the supervisor should
/// act on. Never returns on a single transient error; only on `Shutdown`,
/// `Neutral`, `PositionLimit`, `Timeout`, or an unrecoverable `Error`.
///
/// `data_dir`/`fill_history` let the fill ledger be persisted atomically after
/// every fill and every rebalance cycle (§4.2, §5), not just once at session
/// exit, so a crash mid-session never loses more than the in-flight event.
#[allow(clippy::too_many_arguments)]
pub async fn run_market_maker(
    market: Market,
    mut tracker: PositionTracker,
    exchange: Arc<dyn ExchangeClient>,
    settlement: Arc<dyn SettlementClient>,
    switch_observer: Arc<dyn SwitchObserver>,
    config: MarketMakerConfig,
    mut events: mpsc::Receiver<MarketEvent>,
    deadline: Option<tokio::time::Instant>,
    data_dir: &Path,
    mut fill_history: Vec<Fill>,
) -> (ExitReason, PositionTracker) {
    eprintln!(
        "[MM] starting market_maker for {} (order_size={})",
        market.condition_id, config.order_size
    );

    let mut active = ActiveQuotes::default();
    let mut order_tracker = OrderTracker::default();
    let mut last_midpoint: Option<f64> = None;
    let mut debounce_deadline: Option<tokio::time::Instant> = None;
    let mut pending_forced = false;

    loop {
        let sleep_until_debounce = async {
            match debounce_deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let deadline_hit = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = deadline_hit => {
                eprintln!("[MM] {} timed out", market.condition_id);
                return (ExitReason::Timeout, tracker);
            }
            _ = sleep_until_debounce => {
                debounce_deadline = None;
                if let Some(mid) = last_midpoint {
                    match rebalance_cycle(
                        &market, mid, &mut tracker, &exchange, &settlement,
                        &mut active, &mut order_tracker, &config, pending_forced,
                    ).await {
                        Ok(()) => {}
                        Err(e) => eprintln!("[MM] rebalance error: {e}"),
                    }
                    persist_ledger(data_dir, &market, &tracker, &fill_history);
                    pending_forced = false;
                    if tracker.net_exposure() == 0.0 && switch_observer.has_pending_switch().await {
                        return (ExitReason::Neutral, tracker);
                    }
                    if !tracker.can_buy_yes() && !tracker.can_buy_no() {
                        return (ExitReason::PositionLimit, tracker);
                    }
                }
            }
            event = events.recv() => {
                match event {
                    None | Some(MarketEvent::Shutdown) => {
                        eprintln!("[MM] {} shutting down", market.condition_id);
                        return (ExitReason::Shutdown, tracker);
                    }
                    Some(MarketEvent::MidpointUpdate(mid)) => {
                        last_midpoint = Some(mid);
                        debounce_deadline = Some(tokio::time::Instant::now() + Duration::from_millis(config.debounce_ms));
                    }
                    Some(MarketEvent::Fill(fill)) => {
                        let was_limited = tracker.exposure_status().is_limit_reached;
                        let blocked_before = tracker.exposure_status().blocked_side;
                        if tracker.process_fill(fill.clone()) {
                            fill_history.push(fill);
                            persist_ledger(data_dir, &market, &tracker, &fill_history);
                        }
                        let now_limited = tracker.exposure_status().is_limit_reached;
                        let blocked_after = tracker.exposure_status().blocked_side;
                        if now_limited != was_limited || blocked_after != blocked_before {
                            pending_forced = true;
                            debounce_deadline = Some(tokio::time::Instant::now());
                        }
                    }
                    Some(MarketEvent::Tick(mid)) => {
                        // REST fallback poll driven midpoint refresh, while the WS feed is down
                        last_midpoint = Some(mid);
                        debounce_deadline = Some(tokio::time::Instant::now() + Duration::from_millis(config.debounce_ms));
                    }
                    Some(MarketEvent::CheckSwitch) => {
                        if tracker.net_exposure() == 0.0 && switch_observer.has_pending_switch().await {
                            return (ExitReason::Neutral, tracker);
                        }
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn rebalance_cycle(
    market: &Market,
    mid: f64,
    tracker: &mut PositionTracker,
    exchange: &Arc<dyn ExchangeClient>,
    settlement: &Arc<dyn SettlementClient>,
    active: &mut ActiveQuotes,
    order_tracker: &mut OrderTracker,
    config: &MarketMakerConfig,
    forced: bool,
) -> Result<(), AgentError> {
    let neutral = tracker.neutral_position();
    if config.merge_enabled && neutral > config.min_merge_amount {
        let amount = (neutral * 100.0).floor() / 100.0;
        match settlement.merge(&market.condition_id, amount).await {
            Ok(result) if result.ok => {
                tracker.merge(amount)?;
                eprintln!("[MM] merged {amount} shares on {}", market.condition_id);
            }
            Ok(result) => eprintln!("[MM] merge rejected: {:?}", result.err),
            Err(e) => eprintln!("[MM] merge call failed: {e}"),
        }
    }

    eprintln!(
        "[MM] {} exposure={:.2} realized_pnl={:.4} unrealized_pnl={:.4}",
        market.condition_id,
        tracker.net_exposure(),
        tracker.realized_pnl(),
        tracker.unrealized_pnl(mid),
    );

    let rebalance = should_rebalance(active.last_midpoint, mid, config.rebalance_threshold, forced);
    if !rebalance {
        return Ok(());
    }

    cancel_all(market, exchange, active, order_tracker).await;

    let quotes = generate_quotes(market, mid, tracker, config.spread_fraction, config.order_size);
    for quote in quotes {
        if active.get(quote.outcome).is_some() {
            // cancel_all verified the old order is still open; skip to avoid a duplicate (§4.4/§7)
            continue;
        }
        let req = PlaceOrderRequest {
            token_id: market.token_id(quote.outcome).to_string(),
            side: OrderSide::Buy,
            price: quote.price,
            size: quote.size,
            tick_size: market.tick_size,
            neg_risk: market.neg_risk,
        };
        match exchange.place_order(req).await {
            Ok(result) if result.ok => {
                if let Some(id) = result.order_id {
                    active.set(
                        quote.outcome,
                        Some(crate::types::LiveOrder {
                            order_id: id.clone(),
                            price: quote.price,
                        }),
                    );
                    order_tracker.record(quote.outcome, id);
                }
            }
            Ok(result) => {
                eprintln!("[MM] order rejected on {:?}: {:?}", quote.outcome, result.err_msg);
            }
            Err(e) => eprintln!("[MM] place_order failed on {:?}: {e}", quote.outcome),
        }
    }
    active.last_midpoint = Some(mid);
    Ok(())
}

async fn cancel_all(
    market: &Market,
    exchange: &Arc<dyn ExchangeClient>,
    active: &mut ActiveQuotes,
    order_tracker: &mut OrderTracker,
) {
    for outcome in [Outcome::Yes, Outcome::No] {
        if let Some(order) = active.get(outcome).cloned() {
            match exchange.cancel_order(&order.order_id).await {
                Ok(()) => {
                    active.set(outcome, None);
                    order_tracker.clear(outcome);
                }
                Err(e) => {
                    eprintln!(
                        "[MM] cancel failed for {} {:?} order {}: {e}, verifying open orders",
                        market.condition_id, outcome, order.order_id
                    );
                    let still_open = exchange
                        .get_open_orders(Some(market.token_id(outcome)))
                        .await
                        .map(|orders| orders.iter().any(|o| o.order_id == order.order_id))
                        .unwrap_or(true);
                    if !still_open {
                        active.set(outcome, None);
                        order_tracker.clear(outcome);
                    }
                }
            }
        }
    }
}

/// Persists the fill ledger after every fill and every rebalance cycle (§4.2,
/// §5), not only at session exit. Logs and continues on failure rather than
/// tearing down the market maker over a single write error.
fn persist_ledger(data_dir: &Path, market: &Market, tracker: &PositionTracker, fills: &[Fill]) {
    if let Err(e) = persistence::persist_tracker(data_dir, market, tracker, fills) {
        eprintln!("[MM] {} ledger persist failed: {e}", market.condition_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: constructing the default market maker config.
    /// Expected: debounce defaults to 50ms per the documented default.
    #[test]
    fn test_default_debounce_is_50ms() {
        let config = MarketMakerConfig::default();
        assert_eq!(config.debounce_ms, 50);
    }
}
