//! `ExchangeClient`: the CLOB boundary (§6). `PolymarketExchangeClient`
//! follows the teacher's `gateway/order.rs` authentication and
//! build/sign/post idiom, converting our `f64` price/size into the SDK's
//! `Decimal`/`U256` types.

use std::str::FromStr;

use async_trait::async_trait;
use polymarket_client_sdk::auth::{LocalSigner, Signer};
use polymarket_client_sdk::clob::types::{OrderStatusType, SignatureType, Side as ClobSide};
use polymarket_client_sdk::clob::{Client as ClobClient, Config as ClobConfig};
use polymarket_client_sdk::types::{Decimal, U256};

use crate::errors::AgentError;
use crate::types::{BookLevel, OrderBook, OrderSide};

#[derive(Clone, Copy, Debug)]
pub struct Balance {
    pub balance: f64,
    pub allowance: f64,
}

#[derive(Clone, Debug)]
pub struct OpenOrder {
    pub order_id: String,
    pub token_id: String,
    pub price: f64,
    pub size: f64,
}

#[derive(Clone, Debug)]
pub struct PlaceOrderRequest {
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub tick_size: f64,
    pub neg_risk: bool,
}

#[derive(Clone, Debug)]
pub struct PlaceOrderResult {
    pub ok: bool,
    pub order_id: Option<String>,
    pub err_msg: Option<String>,
}

/// The CLOB boundary market making and liquidation both quote and trade
/// through. A trait so `dry_run` and tests can substitute an in-memory fake
/// without touching the signing path.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_midpoint(&self, token_id: &str) -> Result<f64, AgentError>;
    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, AgentError>;
    async fn get_open_orders(&self, token_id: Option<&str>) -> Result<Vec<OpenOrder>, AgentError>;
    async fn get_balance(&self, asset: &str) -> Result<Balance, AgentError>;
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResult, AgentError>;
    async fn cancel_order(&self, order_id: &str) -> Result<(), AgentError>;
    async fn cancel_orders_for_token(&self, token_id: &str) -> Result<(), AgentError>;
    async fn get_reward_percentages(&self) -> Result<std::collections::HashMap<String, f64>, AgentError>;
}

fn tick_decimals(tick_size: f64) -> usize {
    if tick_size >= 0.1 {
        1
    } else if tick_size >= 0.01 {
        2
    } else if tick_size >= 0.001 {
        3
    } else {
        4
    }
}

/// Live adapter over `polymarket-client-sdk`'s CLOB client. `dry_run` skips
/// authentication entirely and simulates immediate acceptance, mirroring the
/// teacher's `order_gateway`'s `Option<(client, signer)>` split.
pub struct PolymarketExchangeClient {
    live: Option<(ClobClient, LocalSigner)>,
    dry_run: bool,
}

impl PolymarketExchangeClient {
    pub async fn connect(
        clob_url: &str,
        private_key: Option<&str>,
        signature_type: u8,
        funder_address: Option<&str>,
        dry_run: bool,
    ) -> Result<Self, AgentError> {
        if dry_run {
            eprintln!("[GW] exchange client in dry_run mode, skipping authentication");
            return Ok(Self { live: None, dry_run: true });
        }

        let pk = private_key.ok_or_else(|| {
            AgentError::Config("private key required when dry_run is disabled".into())
        })?;
        let signer = super::load_signer(pk)?;

        let sig_type = match signature_type {
            1 => SignatureType::Proxy,
            2 => SignatureType::GnosisSafe,
            _ => SignatureType::Eoa,
        };

        let mut auth_builder = ClobClient::new(clob_url, ClobConfig::default())
            .map_err(|e| AgentError::Exchange(format!("client init: {e}")))?
            .authentication_builder(&signer)
            .signature_type(sig_type);

        if let Some(funder) = funder_address {
            let addr = funder
                .parse()
                .map_err(|e| AgentError::Config(format!("invalid funder address: {e}")))?;
            auth_builder = auth_builder.funder(addr);
        }

        let client = auth_builder
            .authenticate()
            .await
            .map_err(|e| AgentError::Exchange(format!("authentication failed: {e}")))?;

        eprintln!("[GW] CLOB client authenticated, address={}", client.address());
        Ok(Self {
            live: Some((client, signer)),
            dry_run: false,
        })
    }
}

#[async_trait]
impl ExchangeClient for PolymarketExchangeClient {
    async fn get_midpoint(&self, token_id: &str) -> Result<f64, AgentError> {
        let (client, _) = self
            .live
            .as_ref()
            .ok_or_else(|| AgentError::Exchange("get_midpoint unavailable in dry_run".into()))?;
        let id = U256::from_str(token_id)
            .map_err(|e| AgentError::Exchange(format!("bad token_id: {e}")))?;
        let mid = client
            .get_midpoint(id)
            .await
            .map_err(|e| AgentError::Transient(format!("get_midpoint: {e}")))?;
        Ok(mid)
    }

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, AgentError> {
        let (client, _) = self
            .live
            .as_ref()
            .ok_or_else(|| AgentError::Exchange("get_order_book unavailable in dry_run".into()))?;
        let id = U256::from_str(token_id)
            .map_err(|e| AgentError::Exchange(format!("bad token_id: {e}")))?;
        let book = client
            .get_order_book(id)
            .await
            .map_err(|e| AgentError::Transient(format!("get_order_book: {e}")))?;
        Ok(OrderBook {
            bids: book
                .bids
                .iter()
                .map(|l| BookLevel {
                    price: l.price.to_f64().unwrap_or(0.0),
                    size: l.size.to_f64().unwrap_or(0.0),
                })
                .collect(),
            asks: book
                .asks
                .iter()
                .map(|l| BookLevel {
                    price: l.price.to_f64().unwrap_or(0.0),
                    size: l.size.to_f64().unwrap_or(0.0),
                })
                .collect(),
        })
    }

    async fn get_open_orders(&self, token_id: Option<&str>) -> Result<Vec<OpenOrder>, AgentError> {
        let (client, _) = self
            .live
            .as_ref()
            .ok_or_else(|| AgentError::Exchange("get_open_orders unavailable in dry_run".into()))?;
        let orders = client
            .get_open_orders(token_id)
            .await
            .map_err(|e| AgentError::Transient(format!("get_open_orders: {e}")))?;
        Ok(orders
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.id,
                token_id: o.token_id.to_string(),
                price: o.price.to_f64().unwrap_or(0.0),
                size: o.size.to_f64().unwrap_or(0.0),
            })
            .collect())
    }

    async fn get_balance(&self, asset: &str) -> Result<Balance, AgentError> {
        let (client, _) = self
            .live
            .as_ref()
            .ok_or_else(|| AgentError::Exchange("get_balance unavailable in dry_run".into()))?;
        let bal = client
            .get_balance(asset)
            .await
            .map_err(|e| AgentError::Transient(format!("get_balance: {e}")))?;
        Ok(Balance {
            balance: bal.balance.to_f64().unwrap_or(0.0),
            allowance: bal.allowance.to_f64().unwrap_or(0.0),
        })
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResult, AgentError> {
        if self.dry_run {
            eprintln!(
                "[GW] DRY_RUN order: {:?} {} @ {:.4} x {:.2}",
                req.side, req.token_id, req.price, req.size
            );
            return Ok(PlaceOrderResult {
                ok: true,
                order_id: Some(format!("dry-{}", chrono::Utc::now().timestamp_millis())),
                err_msg: None,
            });
        }

        let (client, signer) = self.live.as_ref().expect("live client required outside dry_run");
        let prec = tick_decimals(req.tick_size);

        let price_dec = Decimal::from_str(&format!("{:.prec$}", req.price, prec = prec))
            .map_err(|e| AgentError::Exchange(format!("bad price: {e}")))?;
        let size_dec = Decimal::from_str(&format!("{:.2}", req.size))
            .map_err(|e| AgentError::Exchange(format!("bad size: {e}")))?;
        let token_id = U256::from_str(&req.token_id)
            .map_err(|e| AgentError::Exchange(format!("bad token_id: {e}")))?;
        let side = match req.side {
            OrderSide::Buy => ClobSide::Buy,
            OrderSide::Sell => ClobSide::Sell,
        };

        let result = async {
            let signable = client
                .limit_order()
                .token_id(token_id)
                .price(price_dec)
                .size(size_dec)
                .side(side)
                .build()
                .await
                .map_err(|e| format!("build: {e}"))?;
            let signed = client.sign(signer, signable).await.map_err(|e| format!("sign: {e}"))?;
            client.post_order(signed).await.map_err(|e| format!("post: {e}"))
        }
        .await;

        match result {
            Ok(resp) => Ok(PlaceOrderResult {
                ok: matches!(
                    resp.status,
                    OrderStatusType::Matched | OrderStatusType::Live | OrderStatusType::Delayed
                ),
                order_id: Some(resp.order_id),
                err_msg: None,
            }),
            Err(e) => Ok(PlaceOrderResult {
                ok: false,
                order_id: None,
                err_msg: Some(e),
            }),
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), AgentError> {
        if self.dry_run {
            return Ok(());
        }
        let (client, _) = self.live.as_ref().expect("live client required outside dry_run");
        client
            .cancel_order(order_id)
            .await
            .map_err(|e| AgentError::Transient(format!("cancel_order: {e}")))?;
        Ok(())
    }

    async fn cancel_orders_for_token(&self, token_id: &str) -> Result<(), AgentError> {
        if self.dry_run {
            return Ok(());
        }
        let (client, _) = self.live.as_ref().expect("live client required outside dry_run");
        let id = U256::from_str(token_id)
            .map_err(|e| AgentError::Exchange(format!("bad token_id: {e}")))?;
        client
            .cancel_orders_for_token(id)
            .await
            .map_err(|e| AgentError::Transient(format!("cancel_orders_for_token: {e}")))?;
        Ok(())
    }

    async fn get_reward_percentages(&self) -> Result<std::collections::HashMap<String, f64>, AgentError> {
        if self.dry_run {
            return Ok(std::collections::HashMap::new());
        }
        let (client, _) = self.live.as_ref().expect("live client required outside dry_run");
        let pcts = client
            .get_reward_percentages()
            .await
            .map_err(|e| AgentError::Transient(format!("get_reward_percentages: {e}")))?;
        Ok(pcts
            .into_iter()
            .map(|(k, v)| (k, v.to_f64().unwrap_or(0.0)))
            .collect())
    }
}
