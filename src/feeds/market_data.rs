//! Market-data WS feed: subscribes to a set of token ids, emits midpoint
//! updates. Mirrors `feeds/polymarket.rs`'s reconnect loop, generalized to
//! jittered backoff and an arbitrary token-id set (§6).

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::next_backoff_ms;

const SPREAD_CROSSOVER_CENTS: f64 = 10.0;

#[derive(Clone, Debug)]
pub struct MidpointUpdate {
    pub token_id: String,
    pub midpoint: f64,
}

/// Connection-state-aware event the bridge reacts to: a parsed update, or a
/// disconnect the caller should cover with REST fallback polling until the
/// next `Update` arrives (§4.4 item 3, §7).
#[derive(Clone, Debug)]
pub enum MarketDataEvent {
    Update(MidpointUpdate),
    Disconnected,
}

/// Runs until `update_tx` is closed. Reconnects with jittered exponential
/// backoff and auto-resubscribes to `token_ids` on every reopen. Emits
/// `Disconnected` the moment the stream drops so the caller can start
/// fallback polling immediately, per §4.4/§7.
pub async fn market_data_feed(
    update_tx: mpsc::Sender<MarketDataEvent>,
    ws_url: String,
    token_ids: Vec<String>,
) {
    let mut backoff_ms: u64 = 1000;

    loop {
        eprintln!("[MD] connecting to {ws_url}");
        let ws = match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                eprintln!("[MD] connected");
                backoff_ms = 1000;
                ws
            }
            Err(e) => {
                eprintln!("[MD] connect failed: {e}, retrying in {backoff_ms}ms");
                let _ = update_tx.send(MarketDataEvent::Disconnected).await;
                tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = next_backoff_ms(backoff_ms);
                continue;
            }
        };

        let (mut write, mut read) = ws.split();
        let sub = serde_json::json!({
            "assets_ids": token_ids,
            "type": "market",
            "custom_feature_enabled": true,
        });
        if let Err(e) = write.send(Message::Text(sub.to_string())).await {
            eprintln!("[MD] subscribe failed: {e}, reconnecting");
            let _ = update_tx.send(MarketDataEvent::Disconnected).await;
            continue;
        }

        let mut ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        loop {
            tokio::select! {
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            eprintln!("[MD] ws error: {e}, reconnecting");
                            break;
                        }
                        None => {
                            eprintln!("[MD] stream ended, reconnecting");
                            break;
                        }
                    };
                    if let Message::Text(text) = msg {
                        for update in parse_midpoint_updates(&text) {
                            if update_tx.send(MarketDataEvent::Update(update)).await.is_err() {
                                eprintln!("[MD] channel closed, exiting");
                                return;
                            }
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    let _ = write.send(Message::Text("PING".to_string())).await;
                }
            }
        }

        let _ = update_tx.send(MarketDataEvent::Disconnected).await;
        eprintln!("[MD] disconnected, reconnecting in {backoff_ms}ms");
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = next_backoff_ms(backoff_ms);
    }
}

fn flexible_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    match v {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Parses `best_bid_ask`/`price_change`/`book`/`last_trade_price` events into
/// midpoint updates: `(bid+ask)/2` when spread ≤ 10c, else last trade price.
fn parse_midpoint_updates(text: &str) -> Vec<MidpointUpdate> {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(text) else {
        return Vec::new();
    };
    let events: Vec<serde_json::Value> = if v.is_array() {
        v.as_array().cloned().unwrap_or_default()
    } else if v.is_object() {
        vec![v]
    } else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for event in &events {
        let event_type = event.get("event_type").and_then(|e| e.as_str()).unwrap_or("");
        let Some(token_id) = event.get("asset_id").and_then(|a| a.as_str()) else {
            continue;
        };

        let midpoint = match event_type {
            "best_bid_ask" | "price_change" | "book" => {
                let bid = flexible_f64(event.get("best_bid").or_else(|| event.get("bid")));
                let ask = flexible_f64(event.get("best_ask").or_else(|| event.get("ask")));
                match (bid, ask) {
                    (Some(b), Some(a)) if (a - b) * 100.0 <= SPREAD_CROSSOVER_CENTS => Some((b + a) / 2.0),
                    _ => flexible_f64(event.get("last_trade_price")),
                }
            }
            "last_trade_price" => flexible_f64(event.get("price")),
            _ => None,
        };

        if let Some(mid) = midpoint {
            out.push(MidpointUpdate {
                token_id: token_id.to_string(),
                midpoint: mid,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a best_bid_ask event with a tight spread (2 cents).
    /// Expected: midpoint is the simple average of bid and ask.
    #[test]
    fn test_parse_tight_spread_uses_average() {
        let text = serde_json::json!({
            "event_type": "best_bid_ask",
            "asset_id": "tok1",
            "best_bid": "0.48",
            "best_ask": "0.50",
        })
        .to_string();
        let updates = parse_midpoint_updates(&text);
        assert_eq!(updates.len(), 1);
        assert!((updates[0].midpoint - 0.49).abs() < 1e-9);
    }

    /// Scenario: a best_bid_ask event with a wide spread (20 cents) and a last trade price.
    /// Expected: midpoint falls back to the last trade price, not the average.
    #[test]
    fn test_parse_wide_spread_falls_back_to_last_trade() {
        let text = serde_json::json!({
            "event_type": "best_bid_ask",
            "asset_id": "tok1",
            "best_bid": "0.30",
            "best_ask": "0.50",
            "last_trade_price": "0.42",
        })
        .to_string();
        let updates = parse_midpoint_updates(&text);
        assert_eq!(updates.len(), 1);
        assert!((updates[0].midpoint - 0.42).abs() < 1e-9);
    }

    /// Scenario: a malformed/non-JSON message.
    /// Expected: parsing returns no updates rather than panicking.
    #[test]
    fn test_parse_malformed_message_returns_empty() {
        assert!(parse_midpoint_updates("not json").is_empty());
    }
}
