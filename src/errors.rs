//! Typed error taxonomy (§7). Call sites match on kind rather than parse
//! message strings; adapter errors (exchange/metadata/settlement/persistence)
//! are wrapped so a boundary failure still carries its originating component.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("market {condition_id} invalid: {reason}")]
    InvalidMarket {
        condition_id: String,
        reason: String,
    },

    #[error("configuration invalid: {0}")]
    Config(String),

    #[error("insufficient collateral: have {have:.2}, need {need:.2}")]
    InsufficientCollateral { have: f64, need: f64 },

    #[error("no eligible markets found")]
    NoEligibleMarkets,

    #[error("merge failed: requested {requested:.4}, available {available:.4}")]
    InsufficientMergeBalance { requested: f64, available: f64 },

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("settlement error: {0}")]
    Settlement(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("transient I/O: {0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state file {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported state file version {found} at {path} (expected {expected})")]
    UnsupportedVersion {
        path: String,
        found: u32,
        expected: u32,
    },
}
