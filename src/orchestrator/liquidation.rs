//! Liquidation sub-system: break-even ceiling, passive-stage price selection,
//! and the persisted queue of markets being wound down (§4.5).

use std::path::Path;

use crate::errors::AgentError;
use crate::gateway::exchange::{ExchangeClient, PlaceOrderRequest};
use crate::persistence::{self, LiquidationEntry, LiquidationQueueFile};
use crate::tracker::PositionTracker;
use crate::types::{LiquidationStage, Market, Outcome, OrderSide};

const NEUTRAL_THRESHOLD: f64 = 0.1;
const REPRICE_THRESHOLD: f64 = 0.005;

/// A market moved into liquidation after hitting its exposure cap.
pub struct LiquidationMarket {
    pub market: Market,
    pub tracker: PositionTracker,
    pub started_at: i64,
    pub stage: LiquidationStage,
    pub active_order_id: Option<String>,
    pub last_quote_price: Option<f64>,
    pub max_buy_price: Option<f64>,
}

/// Break-even ceiling (§4.5): the price above which closing the position
/// would lock a loss. `None` if the held side's average cost is unknown.
pub fn compute_max_buy_price(tracker: &PositionTracker) -> Option<f64> {
    let net = tracker.net_exposure();
    if net > 0.0 {
        tracker.avg_cost(Outcome::Yes).map(|avg| 1.0 - avg)
    } else if net < 0.0 {
        tracker.avg_cost(Outcome::No).map(|avg| 1.0 - avg)
    } else {
        None
    }
}

/// Which token to sell and the cost-basis floor for that side.
fn held_side(tracker: &PositionTracker) -> Option<(Outcome, f64)> {
    let net = tracker.net_exposure();
    if net > 0.0 {
        Some((Outcome::Yes, tracker.avg_cost(Outcome::Yes).unwrap_or(0.0)))
    } else if net < 0.0 {
        Some((Outcome::No, tracker.avg_cost(Outcome::No).unwrap_or(0.0)))
    } else {
        None
    }
}

fn round_to_tick(price: f64, tick: f64) -> f64 {
    (price / tick).round() * tick
}

fn clamp(price: f64, tick: f64) -> f64 {
    price.max(tick).min(1.0 - tick)
}

/// One liquidation-manager tick for a single market (§4.5 steps 1-5). Sells
/// the held side down toward neutral, never below the cost-basis floor.
///
/// Re-reads the authoritative token balances from the exchange before acting
/// (§3: "ground truth is the exchange balance") so the tracker reflects SELL
/// fills that have already landed and liquidation can actually converge.
pub async fn tick(
    entry: &mut LiquidationMarket,
    exchange: &dyn ExchangeClient,
    now_ms: i64,
) -> Result<bool, AgentError> {
    let yes_balance = exchange.get_balance(&entry.market.yes_token_id).await?;
    let no_balance = exchange.get_balance(&entry.market.no_token_id).await?;
    entry.tracker.adjust(yes_balance.balance, no_balance.balance, now_ms);

    let net_exposure = entry.tracker.net_exposure();
    if net_exposure.abs() < NEUTRAL_THRESHOLD {
        if let Some(order_id) = entry.active_order_id.take() {
            exchange.cancel_order(&order_id).await.ok();
        }
        return Ok(true);
    }

    let Some((outcome, floor)) = held_side(&entry.tracker) else {
        return Ok(false);
    };
    let size = net_exposure.abs();
    let target = exchange.get_midpoint(entry.market.token_id(outcome)).await?;
    let sell_price = round_to_tick(clamp(target.max(floor), entry.market.tick_size), entry.market.tick_size);

    let needs_reprice = entry.active_order_id.is_none()
        || entry
            .last_quote_price
            .map(|last| (sell_price - last).abs() > REPRICE_THRESHOLD)
            .unwrap_or(true);

    if needs_reprice {
        if let Some(order_id) = entry.active_order_id.take() {
            if exchange.cancel_order(&order_id).await.is_err() {
                let still_open = exchange
                    .get_open_orders(Some(entry.market.token_id(outcome)))
                    .await
                    .map(|orders| orders.iter().any(|o| o.order_id == order_id))
                    .unwrap_or(true);
                if still_open {
                    entry.active_order_id = Some(order_id);
                    return Ok(false);
                }
            }
        }

        let req = PlaceOrderRequest {
            token_id: entry.market.token_id(outcome).to_string(),
            side: OrderSide::Sell,
            price: sell_price,
            size,
            tick_size: entry.market.tick_size,
            neg_risk: entry.market.neg_risk,
        };
        match exchange.place_order(req).await {
            Ok(result) if result.ok => {
                entry.active_order_id = result.order_id;
                entry.last_quote_price = Some(sell_price);
            }
            Ok(result) => eprintln!("[LIQ] sell rejected on {}: {:?}", entry.market.condition_id, result.err_msg),
            Err(e) => eprintln!("[LIQ] place_order failed on {}: {e}", entry.market.condition_id),
        }
    }

    Ok(false)
}

pub fn load_queue(data_dir: &Path) -> Result<LiquidationQueueFile, AgentError> {
    persistence::load_liquidation_queue(data_dir).map_err(AgentError::Persistence)
}

pub fn save_queue(data_dir: &Path, entries: &[LiquidationMarket], now_ms: i64) -> Result<(), AgentError> {
    let file = LiquidationQueueFile {
        version: 1,
        last_updated: now_ms,
        markets: entries
            .iter()
            .map(|e| LiquidationEntry {
                condition_id: e.market.condition_id.clone(),
                started_at: e.started_at,
                stage: e.stage,
            })
            .collect(),
    };
    persistence::save_liquidation_queue(data_dir, &file).map_err(AgentError::Persistence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Limits;
    use crate::types::{Fill, FillStatus};

    fn limits() -> Limits {
        Limits {
            max_net_exposure: 50.0,
            warn_threshold: 0.8,
        }
    }

    /// Scenario: §8 scenario 6 — yes_tokens=50, avg_yes_cost=0.60, no_tokens=0.
    /// Expected: max_buy_price (mirrored ceiling) is 1 - 0.60 = 0.40.
    #[test]
    fn test_max_buy_price_scenario_6() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        t.process_fill(Fill {
            id: "f1".into(),
            token_id: "yes".into(),
            side: OrderSide::Buy,
            price: 0.60,
            size: 50.0,
            timestamp_ms: 0,
            status: FillStatus::Confirmed,
        });
        let ceiling = compute_max_buy_price(&t).unwrap();
        assert!((ceiling - 0.40).abs() < 1e-9);
    }

    /// Scenario: net_exposure is exactly zero (no directional holding).
    /// Expected: the break-even ceiling is undefined (`None`).
    #[test]
    fn test_max_buy_price_none_when_flat() {
        let t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        assert!(compute_max_buy_price(&t).is_none());
    }

    /// Scenario: long NO instead of YES.
    /// Expected: ceiling mirrors off avg_no_cost, not avg_yes_cost.
    #[test]
    fn test_max_buy_price_long_no_side() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        t.process_fill(Fill {
            id: "f1".into(),
            token_id: "no".into(),
            side: OrderSide::Buy,
            price: 0.70,
            size: 20.0,
            timestamp_ms: 0,
            status: FillStatus::Confirmed,
        });
        let ceiling = compute_max_buy_price(&t).unwrap();
        assert!((ceiling - 0.30).abs() < 1e-9);
    }
}
