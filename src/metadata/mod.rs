//! `MetadataClient`: the Gamma metadata feed (§6). `GammaMetadataClient`
//! follows `market/discovery.rs`'s defensive `serde_json::Value` parsing,
//! tolerant of shape variance between single- and multi-market events.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AgentError;

/// One rewarded market as reported by the metadata feed, before the
/// mandatory slug-based `neg_risk` refresh.
#[derive(Clone, Debug)]
pub struct RewardedMarket {
    pub condition_id: String,
    pub question: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub reward_rate_per_day: f64,
    pub max_spread_cents: f64,
    pub min_order_size: f64,
    pub market_competitiveness: f64,
    /// Known-stale; must be refreshed by slug before any order is signed.
    pub neg_risk: bool,
    pub tick_size: f64,
    pub slug: String,
}

#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn list_rewarded_markets(&self) -> Result<Vec<RewardedMarket>, AgentError>;
    /// Authoritative, fresh `neg_risk` for a market, fetched by slug.
    async fn refresh_neg_risk(&self, slug: &str) -> Result<bool, AgentError>;
}

pub struct GammaMetadataClient {
    http: reqwest::Client,
    gamma_api_url: String,
}

impl GammaMetadataClient {
    pub fn new(gamma_api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            gamma_api_url: gamma_api_url.into(),
        }
    }
}

#[async_trait]
impl MetadataClient for GammaMetadataClient {
    async fn list_rewarded_markets(&self) -> Result<Vec<RewardedMarket>, AgentError> {
        let url = format!(
            "{}/markets?active=true&closed=false&enableOrderBook=true",
            self.gamma_api_url
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("gamma markets fetch: {e}")))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::Metadata(format!("gamma markets decode: {e}")))?;

        let entries = body.as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            if let Some(m) = parse_rewarded_market(entry) {
                out.push(m);
            } else {
                eprintln!("[METADATA] skipped unparseable market entry");
            }
        }
        Ok(out)
    }

    async fn refresh_neg_risk(&self, slug: &str) -> Result<bool, AgentError> {
        let url = format!("{}/events?slug={}", self.gamma_api_url, slug);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("gamma event fetch: {e}")))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::Metadata(format!("gamma event decode: {e}")))?;

        let event = body
            .as_array()
            .and_then(|a| a.first())
            .or(Some(&body))
            .cloned()
            .ok_or_else(|| AgentError::Metadata(format!("event not found for slug {slug}")))?;

        let neg_risk = event
            .get("negRisk")
            .and_then(|v| v.as_bool())
            .or_else(|| {
                event
                    .get("markets")
                    .and_then(|m| m.as_array())
                    .and_then(|a| a.first())
                    .and_then(|m| m.get("negRisk"))
                    .and_then(|v| v.as_bool())
            })
            .unwrap_or(false);
        Ok(neg_risk)
    }
}

/// Defensive extraction tolerant of shape variance: token ids/prices may
/// arrive as a nested `tokens` array or as parallel `clobTokenIds`/`outcomePrices`
/// JSON-array-encoded strings, mirroring the teacher's `extract_token_ids`.
fn parse_rewarded_market(entry: &Value) -> Option<RewardedMarket> {
    let condition_id = entry.get("conditionId").and_then(|v| v.as_str())?.to_string();
    let question = entry
        .get("question")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let slug = entry
        .get("slug")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let (yes_token_id, no_token_id, yes_price, no_price) = if let Some(tokens) = entry.get("tokens").and_then(|v| v.as_array()) {
        let mut yes = None;
        let mut no = None;
        for t in tokens {
            let outcome = t.get("outcome").and_then(|v| v.as_str()).unwrap_or("");
            let token_id = t.get("token_id").and_then(|v| v.as_str())?.to_string();
            let price = parse_flexible_f64(t.get("price"))?;
            if outcome.eq_ignore_ascii_case("yes") {
                yes = Some((token_id, price));
            } else if outcome.eq_ignore_ascii_case("no") {
                no = Some((token_id, price));
            }
        }
        let (yes_id, yes_p) = yes?;
        let (no_id, no_p) = no?;
        (yes_id, no_id, yes_p, no_p)
    } else {
        let ids = parse_json_array_string(entry.get("clobTokenIds")?)?;
        let prices = parse_json_array_string(entry.get("outcomePrices")?)?;
        if ids.len() < 2 || prices.len() < 2 {
            return None;
        }
        let p0: f64 = prices[0].parse().ok()?;
        let p1: f64 = prices[1].parse().ok()?;
        (ids[0].clone(), ids[1].clone(), p0, p1)
    };

    let rewards = entry.get("rewardsConfig").and_then(|v| v.as_array()).and_then(|a| a.first());
    let reward_rate_per_day = rewards
        .and_then(|r| r.get("rate_per_day"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    let max_spread_cents = entry
        .get("rewardsMaxSpread")
        .and_then(|v| v.as_f64())
        .unwrap_or(3.0);
    let min_order_size = entry
        .get("rewardsMinSize")
        .and_then(|v| v.as_f64())
        .unwrap_or(5.0);
    let market_competitiveness = entry
        .get("marketCompetitiveness")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let neg_risk = entry.get("negRisk").and_then(|v| v.as_bool()).unwrap_or(false);
    let tick_size = entry
        .get("orderPriceMinTickSize")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.01);

    Some(RewardedMarket {
        condition_id,
        question,
        yes_token_id,
        no_token_id,
        yes_price,
        no_price,
        reward_rate_per_day,
        max_spread_cents,
        min_order_size,
        market_competitiveness,
        neg_risk,
        tick_size,
        slug,
    })
}

fn parse_flexible_f64(v: Option<&Value>) -> Option<f64> {
    match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Gamma encodes some list fields as a JSON array serialized into a string,
/// e.g. `"[\"123\",\"456\"]"`.
fn parse_json_array_string(v: &Value) -> Option<Vec<String>> {
    let s = v.as_str()?;
    let parsed: Value = serde_json::from_str(s).ok()?;
    parsed
        .as_array()?
        .iter()
        .map(|e| e.as_str().map(|s| s.to_string()))
        .collect()
}
