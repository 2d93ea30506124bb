//! Quadratic scoring formula, two-sided policy, and earnings estimation (§4.1).
//! Pure functions, no I/O — mirrors the teacher's `math/pricing.rs` style of
//! small `#[inline]` free functions with explicit degenerate-input guards.

use crate::types::{BookLevel, Market, OrderBook, Outcome};

/// Reward scaling factor in the two-sided policy (§4.1). A module constant
/// rather than a per-market override: the metadata schema has no field for it
/// (see SPEC_FULL.md open questions).
pub const TWO_SIDED_SCALE: f64 = 3.0;

/// Two-sided policy applies when midpoint sits inside this band; outside it,
/// only the thinner side is required.
const TWO_SIDED_LOW: f64 = 0.10;
const TWO_SIDED_HIGH: f64 = 0.90;

/// `S(v, s, size) = ((v - s) / v)^2 * size` if `s < v` and `size >= min_size`; else 0.
#[inline]
pub fn score_order(max_spread_cents: f64, spread_cents: f64, size: f64, min_size: f64) -> f64 {
    if max_spread_cents <= 0.0 || spread_cents >= max_spread_cents || size < min_size {
        return 0.0;
    }
    let ratio = (max_spread_cents - spread_cents) / max_spread_cents;
    ratio * ratio * size
}

/// Score a single order at `price` against `midpoint`, in market-native units
/// (spread expressed in cents, per §4.1's `s = |price - midpoint| * 100`).
#[inline]
pub fn score_quote(max_spread_cents: f64, midpoint: f64, price: f64, size: f64, min_size: f64) -> f64 {
    let spread_cents = (price - midpoint).abs() * 100.0;
    score_order(max_spread_cents, spread_cents, size, min_size)
}

/// Aggregate reward score over one side of a book (bids contribute to `Q_one`,
/// asks to `Q_two`), filtering by `min_size`.
pub fn aggregate_score(
    levels: &[BookLevel],
    max_spread_cents: f64,
    midpoint: f64,
    min_size: f64,
) -> f64 {
    levels
        .iter()
        .map(|l| score_quote(max_spread_cents, midpoint, l.price, l.size, min_size))
        .sum()
}

/// `Q_one`/`Q_two` for an order book: bids score as `Q_one`, asks as `Q_two`.
pub fn book_scores(book: &OrderBook, max_spread_cents: f64, midpoint: f64, min_size: f64) -> (f64, f64) {
    let q_one = aggregate_score(&book.bids, max_spread_cents, midpoint, min_size);
    let q_two = aggregate_score(&book.asks, max_spread_cents, midpoint, min_size);
    (q_one, q_two)
}

/// Two-sided combination policy (§4.1): inside `[0.10, 0.90]` both sides are
/// required (with a softened floor at `max(Q_one,Q_two)/c`); outside it only
/// the thinner side counts.
pub fn q_min(q_one: f64, q_two: f64, midpoint: f64) -> f64 {
    if (TWO_SIDED_LOW..=TWO_SIDED_HIGH).contains(&midpoint) {
        let floor = (q_one / TWO_SIDED_SCALE).max(q_two / TWO_SIDED_SCALE);
        q_one.min(q_two).max(floor)
    } else {
        q_one.min(q_two)
    }
}

/// Earning fraction: our share of the combined reward score on a market.
pub fn earning_fraction(our_q: f64, others_q: f64) -> f64 {
    let total = our_q + others_q;
    if total <= 0.0 {
        0.0
    } else {
        our_q / total
    }
}

/// Daily USD earning given a fraction and the market's reward pool.
pub fn daily_usd(fraction: f64, reward_rate_per_day: f64) -> f64 {
    fraction * reward_rate_per_day
}

/// Which side of the aggregate score a user order contributes to: a buy on the
/// primary token or a sell on the secondary contributes to `Q_one`; the mirror
/// contributes to `Q_two` (§4.1, mirrored YES/NO book duality).
pub fn contributes_to_q_one(order_outcome: Outcome, side: crate::types::OrderSide, primary: Outcome) -> bool {
    use crate::types::OrderSide::*;
    match (side, order_outcome == primary) {
        (Buy, true) => true,
        (Sell, false) => true,
        _ => false,
    }
}

/// Result of an earnings-feasibility estimate for a candidate market.
#[derive(Clone, Debug, PartialEq)]
pub struct EarningsEstimate {
    pub compatible: bool,
    pub reason: Option<String>,
    pub usd_per_day: f64,
    pub our_q: f64,
}

impl EarningsEstimate {
    fn infeasible(reason: &str) -> Self {
        Self {
            compatible: false,
            reason: Some(reason.to_string()),
            usd_per_day: 0.0,
            our_q: 0.0,
        }
    }
}

/// Estimate daily USD earnings for quoting `liquidity_usd` on `market`,
/// assuming a spread of `max_spread_cents / 2` (half the reward band), per
/// §4.1's "Earnings estimate used for market ranking".
pub fn estimate_earnings(market: &Market, liquidity_usd: f64) -> EarningsEstimate {
    let mp = market.midpoint;
    if mp <= 0.0 || mp >= 1.0 {
        return EarningsEstimate::infeasible("midpoint out of range");
    }
    let spread_cents = market.max_spread_cents / 2.0;
    let two_sided_required = !(TWO_SIDED_LOW..=TWO_SIDED_HIGH).contains(&mp);

    let (q_one, q_two) = if two_sided_required {
        let half = liquidity_usd / 2.0;
        let yes_shares = half / mp;
        let no_shares = half / (1.0 - mp);
        if yes_shares < market.min_order_size || no_shares < market.min_order_size {
            return EarningsEstimate::infeasible("liquidity split below min_order_size");
        }
        let s_yes = score_order(market.max_spread_cents, spread_cents, yes_shares, market.min_order_size);
        let s_no = score_order(market.max_spread_cents, spread_cents, no_shares, market.min_order_size);
        (s_yes, s_no)
    } else {
        let shares = liquidity_usd / mp;
        if shares < market.min_order_size {
            return EarningsEstimate::infeasible("liquidity below min_order_size");
        }
        let s = score_order(market.max_spread_cents, spread_cents, shares, market.min_order_size);
        (s, s)
    };

    let our_q = q_min(q_one, q_two, mp);
    let fraction = earning_fraction(our_q, market.market_competitiveness);
    let usd_per_day = daily_usd(fraction, market.reward_rate_per_day);

    EarningsEstimate {
        compatible: true,
        reason: None,
        usd_per_day,
        our_q,
    }
}

/// Ease score used as a ranking tie-breaker: wider spreads and smaller minimum
/// sizes are easier to earn against, each capped at 50.
pub fn ease_score(market: &Market) -> f64 {
    let spread_component = market.max_spread_cents.min(50.0);
    let size_component = (50.0 - market.min_order_size).max(0.0).min(50.0);
    spread_component + size_component
}

/// Rank candidate markets by estimated daily USD, falling back to ease score
/// on ties. Returns the best feasible candidate, if any.
pub fn rank_best<'a>(
    markets: &'a [Market],
    liquidity_usd: f64,
) -> Option<(&'a Market, EarningsEstimate)> {
    markets
        .iter()
        .filter_map(|m| {
            let est = estimate_earnings(m, liquidity_usd);
            if est.compatible {
                Some((m, est))
            } else {
                None
            }
        })
        .max_by(|(ma, ea), (mb, eb)| {
            ea.usd_per_day
                .partial_cmp(&eb.usd_per_day)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    ease_score(ma)
                        .partial_cmp(&ease_score(mb))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    /// Scenario: the six literal (v, s, size) triples from §8 scenario 1.
    /// Expected: each score matches the documented value within 0.01.
    #[test]
    fn test_score_order_scenario_1() {
        assert!(approx(score_order(3.0, 1.0, 100.0, 0.0), 44.44, 0.01));
        assert!(approx(score_order(3.0, 2.0, 200.0, 0.0), 22.22, 0.01));
        assert!(approx(score_order(3.0, 1.5, 100.0, 0.0), 25.00, 0.01));
        assert!(approx(score_order(3.0, 0.5, 200.0, 0.0), 138.89, 0.01));
        assert_eq!(score_order(3.0, 3.0, 100.0, 0.0), 0.0);
        assert_eq!(score_order(3.0, 5.0, 100.0, 0.0), 0.0);
    }

    /// Scenario: size below the min-size filter.
    /// Expected: score is zero regardless of spread.
    #[test]
    fn test_score_order_below_min_size() {
        assert_eq!(score_order(3.0, 1.0, 5.0, 10.0), 0.0);
    }

    /// Scenario: spread fixed at s=1 inside the band v=3; size varies.
    /// Expected: score scales linearly with size (doubling size doubles score).
    #[test]
    fn test_score_order_linear_in_size() {
        let s1 = score_order(3.0, 1.0, 50.0, 0.0);
        let s2 = score_order(3.0, 1.0, 100.0, 0.0);
        assert!(approx(s2, s1 * 2.0, 1e-9));
    }

    /// Scenario: spread held just inside the band at increasing distances from midpoint.
    /// Expected: score strictly decreases as spread approaches the band edge.
    #[test]
    fn test_score_order_strictly_decreasing_in_spread() {
        let s0 = score_order(3.0, 0.0, 100.0, 0.0);
        let s1 = score_order(3.0, 1.0, 100.0, 0.0);
        let s2 = score_order(3.0, 2.0, 100.0, 0.0);
        let s3 = score_order(3.0, 2.9, 100.0, 0.0);
        assert!(s0 > s1 && s1 > s2 && s2 > s3);
    }

    /// Scenario: §8 scenario 2, mp=0.50 two-sided band, Q_one=100, Q_two=0, c=3.
    /// Expected: Q_min = 33.33 (the softened floor wins over the raw min of 0).
    #[test]
    fn test_q_min_two_sided_scenario_2_inside_band() {
        let qm = q_min(100.0, 0.0, 0.50);
        assert!(approx(qm, 33.33, 0.01));
    }

    /// Scenario: §8 scenario 2, mp=0.95 outside the two-sided band, same Q_one/Q_two.
    /// Expected: Q_min = 0 (the raw min of the two sides, no floor applied).
    #[test]
    fn test_q_min_outside_band_scenario_2() {
        let qm = q_min(100.0, 0.0, 0.95);
        assert_eq!(qm, 0.0);
    }

    /// Scenario: midpoint exactly at each inclusive band boundary (0.10 and 0.90).
    /// Expected: both boundaries are treated as inside the two-sided band.
    #[test]
    fn test_q_min_band_boundaries_inclusive() {
        assert!(q_min(100.0, 0.0, 0.10) > 0.0);
        assert!(q_min(100.0, 0.0, 0.90) > 0.0);
    }

    /// Scenario: no competing liquidity on the market.
    /// Expected: earning_fraction is 1.0 (we get the whole pool).
    #[test]
    fn test_earning_fraction_sole_maker() {
        assert_eq!(earning_fraction(10.0, 0.0), 1.0);
    }

    /// Scenario: zero total reward score (no maker on either side).
    /// Expected: fraction is 0.0, not NaN from a 0/0 division.
    #[test]
    fn test_earning_fraction_zero_total() {
        assert_eq!(earning_fraction(0.0, 0.0), 0.0);
    }

    fn sample_market(midpoint: f64) -> Market {
        Market {
            condition_id: "c1".into(),
            question: "q".into(),
            yes_token_id: "yes".into(),
            no_token_id: "no".into(),
            tick_size: 0.01,
            neg_risk: false,
            min_order_size: 5.0,
            max_spread_cents: 3.0,
            reward_rate_per_day: 100.0,
            market_competitiveness: 50.0,
            midpoint,
        }
    }

    /// Scenario: midpoint inside [0.1,0.9], ample liquidity, no competition.
    /// Expected: estimate is compatible, with positive usd_per_day.
    #[test]
    fn test_estimate_earnings_two_sided_feasible() {
        let m = sample_market(0.5);
        let est = estimate_earnings(&m, 1000.0);
        assert!(est.compatible);
        assert!(est.usd_per_day > 0.0);
    }

    /// Scenario: midpoint inside the band but liquidity so small that each
    /// half-side's implied share count falls below min_order_size.
    /// Expected: estimate reports infeasible with a reason.
    #[test]
    fn test_estimate_earnings_below_min_size_infeasible() {
        let m = sample_market(0.5);
        let est = estimate_earnings(&m, 1.0);
        assert!(!est.compatible);
        assert!(est.reason.is_some());
    }

    /// Scenario: midpoint outside [0.1, 0.9] (single-sided regime).
    /// Expected: estimate still compatible using the single-sided share formula.
    #[test]
    fn test_estimate_earnings_single_sided() {
        let m = sample_market(0.95);
        let est = estimate_earnings(&m, 1000.0);
        assert!(est.compatible);
    }

    /// Scenario: midpoint at the degenerate boundary (0.0).
    /// Expected: estimate is infeasible (division by the midpoint is undefined).
    #[test]
    fn test_estimate_earnings_degenerate_midpoint() {
        let m = sample_market(0.0);
        let est = estimate_earnings(&m, 1000.0);
        assert!(!est.compatible);
    }

    /// Scenario: two markets, one offering a clearly higher daily estimate.
    /// Expected: rank_best selects the higher-earning market.
    #[test]
    fn test_rank_best_picks_higher_earner() {
        let mut cheap = sample_market(0.5);
        cheap.reward_rate_per_day = 10.0;
        let mut rich = sample_market(0.5);
        rich.condition_id = "c2".into();
        rich.reward_rate_per_day = 1000.0;
        let (best, _) = rank_best(&[cheap, rich], 1000.0).unwrap();
        assert_eq!(best.condition_id, "c2");
    }

    /// Scenario: all candidate markets are infeasible at the given liquidity.
    /// Expected: rank_best returns None.
    #[test]
    fn test_rank_best_all_infeasible() {
        let m = sample_market(0.0);
        assert!(rank_best(&[m], 1000.0).is_none());
    }

    /// Scenario: a buy on the primary outcome, and a sell on the secondary outcome.
    /// Expected: both contribute to Q_one per the mirrored book duality rule.
    #[test]
    fn test_contributes_to_q_one_mirroring() {
        use crate::types::OrderSide::*;
        assert!(contributes_to_q_one(Outcome::Yes, Buy, Outcome::Yes));
        assert!(contributes_to_q_one(Outcome::No, Sell, Outcome::Yes));
        assert!(!contributes_to_q_one(Outcome::Yes, Sell, Outcome::Yes));
        assert!(!contributes_to_q_one(Outcome::No, Buy, Outcome::Yes));
    }
}
