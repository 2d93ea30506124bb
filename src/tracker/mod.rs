//! Per-market position ledger: holdings, cost basis, realized/unrealized P&L,
//! exposure gating, and reconciliation against exchange ground truth (§4.2).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::types::{Fill, FillStatus, Outcome};

/// Balances observed at first initialization (or after an `adjust`), used to
/// reconstruct expected balances by replaying fills on resume.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct InitialPosition {
    pub yes: f64,
    pub no: f64,
    pub timestamp_ms: i64,
}

/// Running economic sums. Every field but `realized_pnl` is monotonic
/// non-decreasing across the life of the tracker.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Economics {
    pub yes_bought: f64,
    pub yes_cost: f64,
    pub yes_sold: f64,
    pub yes_proceeds: f64,
    pub no_bought: f64,
    pub no_cost: f64,
    pub no_sold: f64,
    pub no_proceeds: f64,
    pub realized_pnl: f64,
}

/// Exposure limit configuration.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_net_exposure: f64,
    pub warn_threshold: f64,
}

/// Which side, if any, is currently blocked by the exposure cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockedSide {
    Yes,
    No,
    None,
}

#[derive(Clone, Copy, Debug)]
pub struct ExposureStatus {
    pub utilization: f64,
    pub is_warning: bool,
    pub is_limit_reached: bool,
    pub blocked_side: BlockedSide,
}

/// A reconciliation event emitted by initialization when replayed fills don't
/// match the authoritative exchange balance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconciliationWarning {
    pub yes_discrepancy: f64,
    pub no_discrepancy: f64,
}

const RECONCILIATION_TOLERANCE: f64 = 1e-3;

/// Per-`condition_id` ledger. Mutated only by the owning Market Maker or
/// Liquidator; persisted after every fill by the caller.
#[derive(Clone, Debug)]
pub struct PositionTracker {
    pub condition_id: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub yes_tokens: f64,
    pub no_tokens: f64,
    pub economics: Economics,
    pub initial_cost_basis: Option<(Option<f64>, Option<f64>)>,
    pub initial_position: InitialPosition,
    pub processed_fill_ids: HashSet<String>,
    pub limits: Limits,
    pub needs_cost_basis: bool,
}

impl PositionTracker {
    /// Fresh tracker: `(yes_balance, no_balance)` become `initial_position` verbatim.
    pub fn new_fresh(
        condition_id: impl Into<String>,
        yes_token_id: impl Into<String>,
        no_token_id: impl Into<String>,
        yes_balance: f64,
        no_balance: f64,
        now_ms: i64,
        limits: Limits,
    ) -> Self {
        let needs_cost_basis = yes_balance > RECONCILIATION_TOLERANCE || no_balance > RECONCILIATION_TOLERANCE;
        Self {
            condition_id: condition_id.into(),
            yes_token_id: yes_token_id.into(),
            no_token_id: no_token_id.into(),
            yes_tokens: yes_balance,
            no_tokens: no_balance,
            economics: Economics::default(),
            initial_cost_basis: None,
            initial_position: InitialPosition {
                yes: yes_balance,
                no: no_balance,
                timestamp_ms: now_ms,
            },
            processed_fill_ids: HashSet::new(),
            limits,
            needs_cost_basis,
        }
    }

    /// Resumed tracker: replay `persisted_fills` against `initial_position`,
    /// then reconcile the implied balance against the authoritative
    /// `(yes_balance, no_balance)`. If they differ beyond tolerance, the
    /// actual balance wins and `initial_position` absorbs the discrepancy so
    /// the fill history stays intact.
    pub fn resume(
        condition_id: impl Into<String>,
        yes_token_id: impl Into<String>,
        no_token_id: impl Into<String>,
        initial_position: InitialPosition,
        initial_cost_basis: Option<(Option<f64>, Option<f64>)>,
        persisted_fills: &[Fill],
        yes_balance: f64,
        no_balance: f64,
        limits: Limits,
    ) -> (Self, Option<ReconciliationWarning>) {
        let mut tracker = Self {
            condition_id: condition_id.into(),
            yes_token_id: yes_token_id.into(),
            no_token_id: no_token_id.into(),
            yes_tokens: initial_position.yes,
            no_tokens: initial_position.no,
            economics: Economics::default(),
            initial_cost_basis,
            initial_position,
            processed_fill_ids: HashSet::new(),
            limits,
            needs_cost_basis: false,
        };
        for fill in persisted_fills {
            tracker.process_fill(fill.clone());
        }

        let yes_discrepancy = yes_balance - tracker.yes_tokens;
        let no_discrepancy = no_balance - tracker.no_tokens;
        let warning = if yes_discrepancy.abs() > RECONCILIATION_TOLERANCE
            || no_discrepancy.abs() > RECONCILIATION_TOLERANCE
        {
            tracker.initial_position.yes += yes_discrepancy;
            tracker.initial_position.no += no_discrepancy;
            tracker.yes_tokens = yes_balance;
            tracker.no_tokens = no_balance;
            Some(ReconciliationWarning {
                yes_discrepancy,
                no_discrepancy,
            })
        } else {
            None
        };

        (tracker, warning)
    }

    pub fn net_exposure(&self) -> f64 {
        self.yes_tokens - self.no_tokens
    }

    pub fn neutral_position(&self) -> f64 {
        self.yes_tokens.min(self.no_tokens)
    }

    /// Apply a fill idempotently. Returns `true` if it changed state, `false`
    /// if it was a dedup, a failed fill, or for an unrecognized token.
    pub fn process_fill(&mut self, fill: Fill) -> bool {
        if self.processed_fill_ids.contains(&fill.id) {
            return false;
        }
        if fill.status == FillStatus::Failed {
            self.processed_fill_ids.insert(fill.id);
            return false;
        }
        let outcome = if fill.token_id == self.yes_token_id {
            Outcome::Yes
        } else if fill.token_id == self.no_token_id {
            Outcome::No
        } else {
            self.processed_fill_ids.insert(fill.id);
            return false;
        };

        self.processed_fill_ids.insert(fill.id.clone());

        use crate::types::OrderSide::*;
        match (outcome, fill.side) {
            (Outcome::Yes, Buy) => {
                self.yes_tokens += fill.size;
                self.economics.yes_bought += fill.size;
                self.economics.yes_cost += fill.size * fill.price;
            }
            (Outcome::Yes, Sell) => {
                let avg = self.avg_cost(Outcome::Yes).unwrap_or(0.0);
                self.economics.realized_pnl += (fill.price - avg) * fill.size;
                self.yes_tokens -= fill.size;
                self.economics.yes_sold += fill.size;
                self.economics.yes_proceeds += fill.size * fill.price;
            }
            (Outcome::No, Buy) => {
                self.no_tokens += fill.size;
                self.economics.no_bought += fill.size;
                self.economics.no_cost += fill.size * fill.price;
            }
            (Outcome::No, Sell) => {
                let avg = self.avg_cost(Outcome::No).unwrap_or(0.0);
                self.economics.realized_pnl += (fill.price - avg) * fill.size;
                self.no_tokens -= fill.size;
                self.economics.no_sold += fill.size;
                self.economics.no_proceeds += fill.size * fill.price;
            }
        }
        true
    }

    /// Merge `amount` of YES+NO back into collateral. Requires both sides to
    /// hold at least `amount`; reduces cost bases proportionally so average
    /// cost is preserved.
    pub fn merge(&mut self, amount: f64) -> Result<(), AgentError> {
        if amount <= 0.0 || self.yes_tokens < amount || self.no_tokens < amount {
            return Err(AgentError::InsufficientMergeBalance {
                requested: amount,
                available: self.yes_tokens.min(self.no_tokens),
            });
        }
        if self.yes_tokens > 0.0 {
            let frac = amount / self.yes_tokens;
            self.economics.yes_bought -= self.economics.yes_bought * frac;
            self.economics.yes_cost -= self.economics.yes_cost * frac;
        }
        if self.no_tokens > 0.0 {
            let frac = amount / self.no_tokens;
            self.economics.no_bought -= self.economics.no_bought * frac;
            self.economics.no_cost -= self.economics.no_cost * frac;
        }
        self.yes_tokens -= amount;
        self.no_tokens -= amount;
        Ok(())
    }

    /// Administrative override: sets absolute balances and rewrites
    /// `initial_position`, e.g. after an on-chain split or external transfer.
    pub fn adjust(&mut self, yes_balance: f64, no_balance: f64, now_ms: i64) {
        self.yes_tokens = yes_balance;
        self.no_tokens = no_balance;
        self.initial_position = InitialPosition {
            yes: yes_balance,
            no: no_balance,
            timestamp_ms: now_ms,
        };
    }

    pub fn can_buy_yes(&self) -> bool {
        self.net_exposure() < self.limits.max_net_exposure
    }

    pub fn can_buy_no(&self) -> bool {
        self.net_exposure() > -self.limits.max_net_exposure
    }

    pub fn exposure_status(&self) -> ExposureStatus {
        let utilization = if self.limits.max_net_exposure > 0.0 {
            (self.net_exposure().abs() / self.limits.max_net_exposure).min(1.0)
        } else {
            0.0
        };
        let is_limit_reached = !self.can_buy_yes() || !self.can_buy_no();
        let blocked_side = if !self.can_buy_yes() {
            BlockedSide::Yes
        } else if !self.can_buy_no() {
            BlockedSide::No
        } else {
            BlockedSide::None
        };
        ExposureStatus {
            utilization,
            is_warning: utilization >= self.limits.warn_threshold,
            is_limit_reached,
            blocked_side,
        }
    }

    /// Weighted-average cost for `side`, including any user-provided initial
    /// cost basis weighted by the initial token balance. `None` if never bought.
    pub fn avg_cost(&self, side: Outcome) -> Option<f64> {
        let (bought, cost, initial_tokens, initial_avg) = match side {
            Outcome::Yes => (
                self.economics.yes_bought,
                self.economics.yes_cost,
                self.initial_position.yes,
                self.initial_cost_basis.and_then(|b| b.0),
            ),
            Outcome::No => (
                self.economics.no_bought,
                self.economics.no_cost,
                self.initial_position.no,
                self.initial_cost_basis.and_then(|b| b.1),
            ),
        };
        let (total_tokens, total_cost) = match initial_avg {
            Some(avg) if initial_tokens > 0.0 => (bought + initial_tokens, cost + initial_tokens * avg),
            _ => (bought, cost),
        };
        if total_tokens <= 0.0 {
            None
        } else {
            Some(total_cost / total_tokens)
        }
    }

    /// `yes_tokens·(mid − avg_yes) + no_tokens·((1−mid) − avg_no)`, treating
    /// a missing average cost as zero.
    pub fn unrealized_pnl(&self, mid: f64) -> f64 {
        let avg_yes = self.avg_cost(Outcome::Yes).unwrap_or(0.0);
        let avg_no = self.avg_cost(Outcome::No).unwrap_or(0.0);
        self.yes_tokens * (mid - avg_yes) + self.no_tokens * ((1.0 - mid) - avg_no)
    }

    pub fn realized_pnl(&self) -> f64 {
        self.economics.realized_pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    fn limits() -> Limits {
        Limits {
            max_net_exposure: 100.0,
            warn_threshold: 0.8,
        }
    }

    fn confirmed_fill(id: &str, token_id: &str, side: OrderSide, price: f64, size: f64) -> Fill {
        Fill {
            id: id.to_string(),
            token_id: token_id.to_string(),
            side,
            price,
            size,
            timestamp_ms: 0,
            status: FillStatus::Confirmed,
        }
    }

    /// Scenario: fresh tracker over a flat starting balance.
    /// Expected: net_exposure is zero and no cost basis flag is raised.
    #[test]
    fn test_new_fresh_flat_start() {
        let t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        assert_eq!(t.net_exposure(), 0.0);
        assert!(!t.needs_cost_basis);
    }

    /// Scenario: fresh tracker discovers a pre-existing YES balance on the exchange.
    /// Expected: `needs_cost_basis` is raised so the operator can supply one.
    #[test]
    fn test_new_fresh_nonzero_start_flags_cost_basis() {
        let t = PositionTracker::new_fresh("c1", "yes", "no", 50.0, 0.0, 0, limits());
        assert!(t.needs_cost_basis);
    }

    /// Scenario: buy 100 YES at 0.40, then sell 40 YES at 0.55.
    /// Expected: realized P&L on the sell is (0.55-0.40)*40 = 6.0, remaining
    /// position is 60 YES, and the dedup set grows by exactly 2.
    #[test]
    fn test_process_fill_buy_then_sell_realizes_pnl() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        t.process_fill(confirmed_fill("f1", "yes", OrderSide::Buy, 0.40, 100.0));
        t.process_fill(confirmed_fill("f2", "yes", OrderSide::Sell, 0.55, 40.0));
        assert!((t.realized_pnl() - 6.0).abs() < 1e-9);
        assert_eq!(t.yes_tokens, 60.0);
        assert_eq!(t.processed_fill_ids.len(), 2);
    }

    /// Scenario: the same fill id is applied twice.
    /// Expected: the second application is a no-op (idempotent).
    #[test]
    fn test_process_fill_dedup_by_id() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        let applied1 = t.process_fill(confirmed_fill("f1", "yes", OrderSide::Buy, 0.40, 100.0));
        let applied2 = t.process_fill(confirmed_fill("f1", "yes", OrderSide::Buy, 0.40, 100.0));
        assert!(applied1);
        assert!(!applied2);
        assert_eq!(t.yes_tokens, 100.0);
    }

    /// Scenario: a fill reported with status Failed.
    /// Expected: it is dropped without altering holdings.
    #[test]
    fn test_process_fill_drops_failed() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        let fill = Fill {
            status: FillStatus::Failed,
            ..confirmed_fill("f1", "yes", OrderSide::Buy, 0.40, 100.0)
        };
        let applied = t.process_fill(fill);
        assert!(!applied);
        assert_eq!(t.yes_tokens, 0.0);
    }

    /// Scenario: a fill whose token_id matches neither YES nor NO.
    /// Expected: dropped without altering holdings.
    #[test]
    fn test_process_fill_unknown_token_dropped() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        let applied = t.process_fill(confirmed_fill("f1", "other-token", OrderSide::Buy, 0.40, 100.0));
        assert!(!applied);
        assert_eq!(t.yes_tokens, 0.0);
        assert_eq!(t.no_tokens, 0.0);
    }

    /// Scenario: resume with a persisted fill history whose implied balance
    /// matches the authoritative exchange balance exactly.
    /// Expected: no reconciliation warning is emitted.
    #[test]
    fn test_resume_matching_balance_no_warning() {
        let fills = vec![confirmed_fill("f1", "yes", OrderSide::Buy, 0.40, 100.0)];
        let (t, warning) = PositionTracker::resume(
            "c1",
            "yes",
            "no",
            InitialPosition { yes: 0.0, no: 0.0, timestamp_ms: 0 },
            None,
            &fills,
            100.0,
            0.0,
            limits(),
        );
        assert!(warning.is_none());
        assert_eq!(t.yes_tokens, 100.0);
    }

    /// Scenario: resume where the exchange balance differs from the replayed
    /// implied balance by more than the 1e-3 tolerance (e.g. an external transfer).
    /// Expected: a reconciliation warning is emitted, and the tracker truths the
    /// actual balance while the fill history is preserved.
    #[test]
    fn test_resume_discrepancy_truths_actual_balance() {
        let fills = vec![confirmed_fill("f1", "yes", OrderSide::Buy, 0.40, 100.0)];
        let (t, warning) = PositionTracker::resume(
            "c1",
            "yes",
            "no",
            InitialPosition { yes: 0.0, no: 0.0, timestamp_ms: 0 },
            None,
            &fills,
            110.0,
            0.0,
            limits(),
        );
        let w = warning.unwrap();
        assert!((w.yes_discrepancy - 10.0).abs() < 1e-9);
        assert_eq!(t.yes_tokens, 110.0);
        assert_eq!(t.processed_fill_ids.len(), 1);
    }

    /// Scenario: §8 merge scenario — yes_tokens=no_tokens=30, merge 30.
    /// Expected: both sides drop to zero and the merge reports success.
    #[test]
    fn test_merge_full_neutral_position() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        t.process_fill(confirmed_fill("f1", "yes", OrderSide::Buy, 0.40, 30.0));
        t.process_fill(confirmed_fill("f2", "no", OrderSide::Buy, 0.60, 30.0));
        assert_eq!(t.neutral_position(), 30.0);
        t.merge(30.0).unwrap();
        assert_eq!(t.yes_tokens, 0.0);
        assert_eq!(t.no_tokens, 0.0);
    }

    /// Scenario: merge requested for more than the held neutral position.
    /// Expected: returns an error and leaves balances unchanged.
    #[test]
    fn test_merge_insufficient_balance_errors_and_leaves_state() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        t.process_fill(confirmed_fill("f1", "yes", OrderSide::Buy, 0.40, 10.0));
        let err = t.merge(20.0);
        assert!(err.is_err());
        assert_eq!(t.yes_tokens, 10.0);
    }

    /// Scenario: merge preserves average cost per side by scaling cost basis
    /// proportionally to the merged fraction.
    /// Expected: avg_cost(Yes) is unchanged after a partial merge.
    #[test]
    fn test_merge_preserves_avg_cost() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        t.process_fill(confirmed_fill("f1", "yes", OrderSide::Buy, 0.40, 100.0));
        t.process_fill(confirmed_fill("f2", "no", OrderSide::Buy, 0.60, 100.0));
        let before = t.avg_cost(Outcome::Yes).unwrap();
        t.merge(50.0).unwrap();
        let after = t.avg_cost(Outcome::Yes).unwrap();
        assert!((before - after).abs() < 1e-9);
    }

    /// Scenario: net_exposure sits right at the configured cap.
    /// Expected: `can_buy_yes` is false (strictly less-than), `can_buy_no` is true.
    #[test]
    fn test_exposure_gating_at_cap() {
        let mut t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        t.process_fill(confirmed_fill("f1", "yes", OrderSide::Buy, 0.50, 100.0));
        assert!(!t.can_buy_yes());
        assert!(t.can_buy_no());
        assert_eq!(t.exposure_status().blocked_side, BlockedSide::Yes);
    }

    /// Scenario: never bought on a side.
    /// Expected: `avg_cost` returns `None`, and unrealized_pnl treats it as zero.
    #[test]
    fn test_avg_cost_none_when_never_bought() {
        let t = PositionTracker::new_fresh("c1", "yes", "no", 0.0, 0.0, 0, limits());
        assert!(t.avg_cost(Outcome::Yes).is_none());
        assert_eq!(t.unrealized_pnl(0.5), 0.0);
    }

    /// Scenario: initial cost basis supplied for pre-existing YES inventory,
    /// then an additional buy at a different price.
    /// Expected: avg_cost blends the initial and newly bought tokens by weight.
    #[test]
    fn test_avg_cost_blends_initial_cost_basis() {
        let mut t = PositionTracker::resume(
            "c1",
            "yes",
            "no",
            InitialPosition { yes: 50.0, no: 0.0, timestamp_ms: 0 },
            Some((Some(0.30), None)),
            &[],
            50.0,
            0.0,
            limits(),
        )
        .0;
        t.process_fill(confirmed_fill("f1", "yes", OrderSide::Buy, 0.50, 50.0));
        let avg = t.avg_cost(Outcome::Yes).unwrap();
        assert!((avg - 0.40).abs() < 1e-9);
    }
}
