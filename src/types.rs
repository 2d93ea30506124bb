//! Shared data types for the reward-maker agent: the market descriptor, quotes,
//! fills, and the small enums threaded between components.

use serde::{Deserialize, Serialize};

/// One of the two mirrored outcome tokens in a binary market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn other(self) -> Outcome {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

/// Which side of the book an order sits on. Market making only ever buys;
/// liquidation only ever sells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Immutable per-market descriptor. Lives for one Market Maker session or
/// one liquidation; rebuilt at discovery or on resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: String,
    pub question: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub tick_size: f64,
    pub neg_risk: bool,
    pub min_order_size: f64,
    pub max_spread_cents: f64,
    pub reward_rate_per_day: f64,
    pub market_competitiveness: f64,
    pub midpoint: f64,
}

impl Market {
    /// Validates the invariants from the data model: positive tick size,
    /// positive min order size, positive max spread, distinct token ids.
    pub fn validate(&self) -> Result<(), crate::errors::AgentError> {
        if self.tick_size <= 0.0 {
            return Err(crate::errors::AgentError::InvalidMarket {
                condition_id: self.condition_id.clone(),
                reason: "tick_size must be positive".into(),
            });
        }
        if self.min_order_size <= 0.0 {
            return Err(crate::errors::AgentError::InvalidMarket {
                condition_id: self.condition_id.clone(),
                reason: "min_order_size must be positive".into(),
            });
        }
        if self.max_spread_cents <= 0.0 {
            return Err(crate::errors::AgentError::InvalidMarket {
                condition_id: self.condition_id.clone(),
                reason: "max_spread_cents must be positive".into(),
            });
        }
        if self.yes_token_id == self.no_token_id {
            return Err(crate::errors::AgentError::InvalidMarket {
                condition_id: self.condition_id.clone(),
                reason: "yes_token_id and no_token_id must differ".into(),
            });
        }
        Ok(())
    }

    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Yes => &self.yes_token_id,
            Outcome::No => &self.no_token_id,
        }
    }

    /// Which outcome a token id belongs to, if either.
    pub fn outcome_of(&self, token_id: &str) -> Option<Outcome> {
        if token_id == self.yes_token_id {
            Some(Outcome::Yes)
        } else if token_id == self.no_token_id {
            Some(Outcome::No)
        } else {
            None
        }
    }
}

/// A single quote the engine wants live on the book: always a buy, on one outcome.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quote {
    pub outcome: Outcome,
    pub price: f64,
    pub size: f64,
}

/// A single outstanding quote's exchange-assigned identity, tracked so we know
/// what to cancel and what to compare the next midpoint against.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveOrder {
    pub order_id: String,
    pub price: f64,
}

/// The pair of (at most) live buy orders market-making holds on a market.
#[derive(Clone, Debug, Default)]
pub struct ActiveQuotes {
    pub yes: Option<LiveOrder>,
    pub no: Option<LiveOrder>,
    pub last_midpoint: Option<f64>,
}

impl ActiveQuotes {
    pub fn get(&self, outcome: Outcome) -> Option<&LiveOrder> {
        match outcome {
            Outcome::Yes => self.yes.as_ref(),
            Outcome::No => self.no.as_ref(),
        }
    }

    pub fn set(&mut self, outcome: Outcome, order: Option<LiveOrder>) {
        match outcome {
            Outcome::Yes => self.yes = order,
            Outcome::No => self.no = order,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.yes.is_none() && self.no.is_none()
    }
}

/// Confirmation state of a fill event from the user-trade stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStatus {
    Confirmed,
    Failed,
}

/// A single fill as reported by the user-trade stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub timestamp_ms: i64,
    pub status: FillStatus,
}

/// One level of a one-sided order book, used for reward-score aggregation and
/// midpoint computation.
#[derive(Clone, Debug, Default)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Clone, Debug, Default)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// Exit reasons a Market Maker task reports back to the Orchestrator.
#[derive(Clone, Debug)]
pub enum ExitReason {
    /// `net_exposure == 0` and a switch is pending.
    Neutral,
    /// A hard exposure cap was hit and could not be relieved by refusing one side.
    PositionLimit,
    /// Cooperative shutdown was requested.
    Shutdown,
    /// An unrecoverable error for this market (rare; most errors are transient).
    Error(String),
    /// The market window elapsed without a cleaner exit.
    Timeout,
}

/// Inbound events driving the per-market task's event loop (see DESIGN NOTES:
/// message-passing replaces the promise/callback model of the original).
#[derive(Clone, Debug)]
pub enum MarketEvent {
    MidpointUpdate(f64),
    Fill(Fill),
    /// A midpoint refreshed by the REST fallback poller while the WS feed is down.
    Tick(f64),
    CheckSwitch,
    Shutdown,
}

/// Liquidation escalation stage. Only `Passive` is implemented; the others are
/// reserved for future time-based escalation (see §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStage {
    Passive,
    Skewed,
    Aggressive,
    Market,
}
