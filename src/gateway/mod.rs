//! Adapters to external systems: the CLOB exchange, the Polygon settlement
//! contract, and their shared signer wiring.

pub mod exchange;
pub mod settlement;

use std::str::FromStr;

use polymarket_client_sdk::auth::LocalSigner;
use polymarket_client_sdk::POLYGON;

use crate::errors::AgentError;

/// Builds the shared order-signing key from a hex private key, chained to
/// Polygon the way the teacher's order gateway does.
pub fn load_signer(private_key: &str) -> Result<LocalSigner, AgentError> {
    LocalSigner::from_str(private_key)
        .map(|s| s.with_chain_id(Some(POLYGON)))
        .map_err(|e| AgentError::Config(format!("invalid private key: {e}")))
}
