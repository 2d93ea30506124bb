//! Quote generation: turns a midpoint into a pair of strictly-inside-midpoint
//! buy quotes, respecting tick size and the tracker's exposure gates (§4.3).

use crate::tracker::PositionTracker;
use crate::types::{Market, Outcome, Quote};

/// Rounds `price` to the nearest multiple of `tick`.
fn round_to_tick(price: f64, tick: f64) -> f64 {
    (price / tick).round() * tick
}

fn clamp(price: f64, tick: f64) -> f64 {
    price.max(tick).min(1.0 - tick)
}

/// Half the reward band, scaled by `spread_fraction`, is how far inside the
/// midpoint each quote sits — matching the earnings estimate's "assumed
/// spread v/2" convention in the reward math.
fn offset(max_spread_cents: f64, spread_fraction: f64) -> f64 {
    (max_spread_cents / 2.0 / 100.0) * spread_fraction
}

/// Computes the (rounded, clamped, strictly-inside-midpoint) raw quote prices
/// for both sides, before exposure gating.
fn raw_prices(market: &Market, mid: f64, spread_fraction: f64) -> (f64, f64) {
    let off = offset(market.max_spread_cents, spread_fraction);
    let tick = market.tick_size;

    let yes_raw = round_to_tick(mid - off, tick);
    let yes_capped = yes_raw.min(mid - tick);
    let yes_price = clamp(yes_capped, tick);

    let no_raw = round_to_tick(1.0 - (mid + off), tick);
    let no_capped = no_raw.min((1.0 - mid) - tick);
    let no_price = clamp(no_capped, tick);

    (yes_price, no_price)
}

/// Produces the quotes market making wants live, filtered by what the
/// tracker's exposure gates currently allow.
pub fn generate_quotes(
    market: &Market,
    mid: f64,
    tracker: &PositionTracker,
    spread_fraction: f64,
    order_size: f64,
) -> Vec<Quote> {
    let (yes_price, no_price) = raw_prices(market, mid, spread_fraction);
    let mut quotes = Vec::with_capacity(2);
    if tracker.can_buy_yes() {
        quotes.push(Quote {
            outcome: Outcome::Yes,
            price: yes_price,
            size: order_size,
        });
    }
    if tracker.can_buy_no() {
        quotes.push(Quote {
            outcome: Outcome::No,
            price: no_price,
            size: order_size,
        });
    }
    quotes
}

/// Refresh if there are no live quotes, a forced reason applies (limit state
/// changed, a merge executed), or the midpoint moved past the threshold.
pub fn should_rebalance(
    last_midpoint: Option<f64>,
    mid: f64,
    rebalance_threshold: f64,
    forced: bool,
) -> bool {
    if forced {
        return true;
    }
    match last_midpoint {
        None => true,
        Some(last) => (mid - last).abs() >= rebalance_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Limits;

    fn sample_market() -> Market {
        Market {
            condition_id: "c1".into(),
            question: "q".into(),
            yes_token_id: "yes".into(),
            no_token_id: "no".into(),
            tick_size: 0.01,
            neg_risk: false,
            min_order_size: 5.0,
            max_spread_cents: 4.0,
            reward_rate_per_day: 100.0,
            market_competitiveness: 50.0,
            midpoint: 0.50,
        }
    }

    fn open_tracker() -> PositionTracker {
        PositionTracker::new_fresh(
            "c1",
            "yes",
            "no",
            0.0,
            0.0,
            0,
            Limits {
                max_net_exposure: 1000.0,
                warn_threshold: 0.8,
            },
        )
    }

    /// Scenario: §8 scenario 3 — mp=0.50, max_spread=4c, spread_fraction=0.5,
    /// tick=0.01, order_size=20.
    /// Expected: both quotes sit at 0.49, size 20 each.
    #[test]
    fn test_quote_generation_scenario_3() {
        let market = sample_market();
        let tracker = open_tracker();
        let quotes = generate_quotes(&market, 0.50, &tracker, 0.5, 20.0);
        assert_eq!(quotes.len(), 2);
        for q in &quotes {
            assert!((q.price - 0.49).abs() < 1e-9);
            assert_eq!(q.size, 20.0);
        }
    }

    /// Scenario: exposure gate blocks buying YES (already at the cap).
    /// Expected: only the NO quote is emitted.
    #[test]
    fn test_generate_quotes_respects_blocked_side() {
        let market = sample_market();
        let mut tracker = open_tracker();
        tracker.limits.max_net_exposure = 10.0;
        tracker.process_fill(crate::types::Fill {
            id: "f1".into(),
            token_id: "yes".into(),
            side: crate::types::OrderSide::Buy,
            price: 0.5,
            size: 10.0,
            timestamp_ms: 0,
            status: crate::types::FillStatus::Confirmed,
        });
        let quotes = generate_quotes(&market, 0.50, &tracker, 0.5, 20.0);
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].outcome, Outcome::No);
    }

    /// Scenario: no live quotes yet.
    /// Expected: rebalance is always triggered regardless of threshold.
    #[test]
    fn test_should_rebalance_no_prior_quotes() {
        assert!(should_rebalance(None, 0.5, 0.05, false));
    }

    /// Scenario: midpoint moved less than the threshold, not forced.
    /// Expected: no rebalance.
    #[test]
    fn test_should_rebalance_small_move_no_trigger() {
        assert!(!should_rebalance(Some(0.50), 0.51, 0.05, false));
    }

    /// Scenario: midpoint moved past the threshold.
    /// Expected: rebalance triggers.
    #[test]
    fn test_should_rebalance_large_move_triggers() {
        assert!(should_rebalance(Some(0.50), 0.56, 0.05, false));
    }

    /// Scenario: midpoint unchanged but a forced reason applies (e.g. a merge
    /// just executed or the limit state flipped).
    /// Expected: rebalance triggers regardless of midpoint distance.
    #[test]
    fn test_should_rebalance_forced_overrides_threshold() {
        assert!(should_rebalance(Some(0.50), 0.50, 0.05, true));
    }

    /// Scenario: an extreme midpoint near 1 with a wide offset.
    /// Expected: the YES price is still clamped strictly below the midpoint
    /// and within [tick, 1-tick].
    #[test]
    fn test_raw_prices_clamped_near_boundary() {
        let mut market = sample_market();
        market.max_spread_cents = 50.0;
        let (yes_price, no_price) = raw_prices(&market, 0.98, 1.0);
        assert!(yes_price < 0.98);
        assert!(yes_price >= market.tick_size);
        assert!(no_price <= 1.0 - market.tick_size);
    }
}
