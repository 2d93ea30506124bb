//! User-trade WS feed: authenticated fill stream, filtered by `condition_id`
//! and attributed maker/taker via the caller's order-id registry (§6).

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::next_backoff_ms;
use crate::types::{Fill, FillStatus, OrderSide};

pub struct UserTradeCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// Runs until `fill_tx` is closed. Only events whose `market` field matches
/// `condition_id` are forwarded.
pub async fn user_trade_feed(
    fill_tx: mpsc::Sender<Fill>,
    ws_url: String,
    credentials: UserTradeCredentials,
    condition_id: String,
) {
    let mut backoff_ms: u64 = 1000;

    loop {
        eprintln!("[UT] connecting to {ws_url}");
        let ws = match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                eprintln!("[UT] connected");
                backoff_ms = 1000;
                ws
            }
            Err(e) => {
                eprintln!("[UT] connect failed: {e}, retrying in {backoff_ms}ms");
                tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = next_backoff_ms(backoff_ms);
                continue;
            }
        };

        let (mut write, mut read) = ws.split();
        let auth = serde_json::json!({
            "type": "user",
            "markets": [&condition_id],
            "auth": {
                "apiKey": credentials.api_key,
                "secret": credentials.secret,
                "passphrase": credentials.passphrase,
            },
        });
        use futures_util::SinkExt;
        if let Err(e) = write.send(Message::Text(auth.to_string())).await {
            eprintln!("[UT] auth send failed: {e}, reconnecting");
            continue;
        }

        while let Some(msg) = read.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    eprintln!("[UT] ws error: {e}, reconnecting");
                    break;
                }
            };
            if let Message::Text(text) = msg {
                for fill in parse_fill_events(&text, &condition_id) {
                    if fill_tx.send(fill).await.is_err() {
                        eprintln!("[UT] channel closed, exiting");
                        return;
                    }
                }
            }
        }

        eprintln!("[UT] disconnected, reconnecting in {backoff_ms}ms");
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = next_backoff_ms(backoff_ms);
    }
}

fn parse_fill_events(text: &str, condition_id: &str) -> Vec<Fill> {
    let Ok(v) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };
    let events: Vec<Value> = if v.is_array() {
        v.as_array().cloned().unwrap_or_default()
    } else {
        vec![v]
    };

    let mut out = Vec::new();
    for event in &events {
        let market = event.get("market").and_then(|m| m.as_str()).unwrap_or("");
        if market != condition_id {
            continue;
        }
        let Some(id) = event.get("id").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(asset_id) = event.get("asset_id").and_then(|v| v.as_str()) else {
            continue;
        };
        let side = match event.get("side").and_then(|v| v.as_str()) {
            Some(s) if s.eq_ignore_ascii_case("buy") => OrderSide::Buy,
            Some(s) if s.eq_ignore_ascii_case("sell") => OrderSide::Sell,
            _ => continue,
        };
        let Some(price) = event.get("price").and_then(parse_num_str) else {
            continue;
        };
        let Some(size) = event.get("size").and_then(parse_num_str) else {
            continue;
        };
        let timestamp_ms = event.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0);
        let status = match event.get("status").and_then(|v| v.as_str()) {
            Some(s) if s.eq_ignore_ascii_case("failed") => FillStatus::Failed,
            _ => FillStatus::Confirmed,
        };

        out.push(Fill {
            id: id.to_string(),
            token_id: asset_id.to_string(),
            side,
            price,
            size,
            timestamp_ms,
            status,
        });
    }
    out
}

fn parse_num_str(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a fill event for the market we're watching.
    /// Expected: it parses into a Fill with the right side and status.
    #[test]
    fn test_parse_fill_event_matching_market() {
        let text = serde_json::json!({
            "id": "fill-1",
            "market": "cond-1",
            "asset_id": "tok-yes",
            "side": "BUY",
            "price": "0.45",
            "size": "10",
            "timestamp": 1000,
        })
        .to_string();
        let fills = parse_fill_events(&text, "cond-1");
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, OrderSide::Buy);
        assert_eq!(fills[0].status, FillStatus::Confirmed);
    }

    /// Scenario: a fill event for a different market than the one we're watching.
    /// Expected: filtered out entirely.
    #[test]
    fn test_parse_fill_event_other_market_filtered() {
        let text = serde_json::json!({
            "id": "fill-1",
            "market": "cond-2",
            "asset_id": "tok-yes",
            "side": "BUY",
            "price": "0.45",
            "size": "10",
        })
        .to_string();
        assert!(parse_fill_events(&text, "cond-1").is_empty());
    }
}
