//! `SettlementClient`: on-chain split/merge against the Polymarket Conditional
//! Tokens Framework contract (§6). `AlloySettlementClient` shares the same
//! signer used for order signing.

use std::str::FromStr;

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;

use crate::errors::AgentError;

sol! {
    #[sol(rpc)]
    interface ConditionalTokens {
        function splitPosition(address collateralToken, bytes32 parentCollectionId, bytes32 conditionId, uint256[] partition, uint256 amount) external;
        function mergePositions(address collateralToken, bytes32 parentCollectionId, bytes32 conditionId, uint256[] partition, uint256 amount) external;
    }
}

#[derive(Clone, Debug)]
pub struct SettlementResult {
    pub ok: bool,
    pub tx_hash: Option<String>,
    pub err: Option<String>,
}

/// `split` mints 1 YES + 1 NO per 1 USD collateral; `merge` is the inverse.
/// Both are atomic from the agent's perspective: either the transaction lands
/// or it doesn't.
#[async_trait]
pub trait SettlementClient: Send + Sync {
    async fn split(&self, condition_id: &str, usd_amount: f64) -> Result<SettlementResult, AgentError>;
    async fn merge(&self, condition_id: &str, amount: f64) -> Result<SettlementResult, AgentError>;
}

pub struct AlloySettlementClient {
    rpc_url: String,
    collateral_token: Address,
    ctf_address: Address,
    signer: PrivateKeySigner,
    dry_run: bool,
}

impl AlloySettlementClient {
    pub fn new(
        rpc_url: impl Into<String>,
        collateral_token: &str,
        ctf_address: &str,
        private_key: &str,
        dry_run: bool,
    ) -> Result<Self, AgentError> {
        let collateral_token = collateral_token
            .parse()
            .map_err(|e| AgentError::Config(format!("invalid collateral token address: {e}")))?;
        let ctf_address = ctf_address
            .parse()
            .map_err(|e| AgentError::Config(format!("invalid CTF contract address: {e}")))?;
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| AgentError::Config(format!("invalid private key: {e}")))?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            collateral_token,
            ctf_address,
            signer,
            dry_run,
        })
    }

    fn condition_id_bytes(condition_id: &str) -> Result<[u8; 32], AgentError> {
        let hex = condition_id.trim_start_matches("0x");
        let bytes = alloy::hex::decode(hex).map_err(|e| AgentError::Settlement(format!("bad condition_id: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| AgentError::Settlement("condition_id must be 32 bytes".into()))
    }

    async fn provider(&self) -> Result<impl Provider, AgentError> {
        ProviderBuilder::new()
            .wallet(self.signer.clone())
            .connect(&self.rpc_url)
            .await
            .map_err(|e| AgentError::Settlement(format!("provider connect: {e}")))
    }
}

#[async_trait]
impl SettlementClient for AlloySettlementClient {
    async fn split(&self, condition_id: &str, usd_amount: f64) -> Result<SettlementResult, AgentError> {
        if self.dry_run {
            eprintln!("[SETTLE] DRY_RUN split {usd_amount} USD on {condition_id}");
            return Ok(SettlementResult {
                ok: true,
                tx_hash: None,
                err: None,
            });
        }
        let provider = self.provider().await?;
        let contract = ConditionalTokens::new(self.ctf_address, provider);
        let condition = Self::condition_id_bytes(condition_id)?;
        let amount = U256::from((usd_amount * 1e6) as u128);
        let partition = vec![U256::from(1u8), U256::from(2u8)];

        let pending = contract
            .splitPosition(self.collateral_token, [0u8; 32].into(), condition.into(), partition, amount)
            .send()
            .await
            .map_err(|e| AgentError::Settlement(format!("split tx: {e}")))?;
        let hash = format!("{:?}", pending.tx_hash());
        Ok(SettlementResult {
            ok: true,
            tx_hash: Some(hash),
            err: None,
        })
    }

    async fn merge(&self, condition_id: &str, amount: f64) -> Result<SettlementResult, AgentError> {
        if self.dry_run {
            eprintln!("[SETTLE] DRY_RUN merge {amount} shares on {condition_id}");
            return Ok(SettlementResult {
                ok: true,
                tx_hash: None,
                err: None,
            });
        }
        let provider = self.provider().await?;
        let contract = ConditionalTokens::new(self.ctf_address, provider);
        let condition = Self::condition_id_bytes(condition_id)?;
        let shares = U256::from((amount * 1e6) as u128);
        let partition = vec![U256::from(1u8), U256::from(2u8)];

        let pending = contract
            .mergePositions(self.collateral_token, [0u8; 32].into(), condition.into(), partition, shares)
            .send()
            .await
            .map_err(|e| AgentError::Settlement(format!("merge tx: {e}")))?;
        let hash = format!("{:?}", pending.tx_hash());
        Ok(SettlementResult {
            ok: true,
            tx_hash: Some(hash),
            err: None,
        })
    }
}
