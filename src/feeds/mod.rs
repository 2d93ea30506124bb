pub mod market_data;
pub mod user_trade;

/// Exponential backoff with roughly 10% jitter, from 1s up to 30s, shared by
/// both WS feeds (§6). Jitter is derived from the system clock's sub-second
/// component rather than a dedicated RNG crate.
pub fn next_backoff_ms(current_ms: u64) -> u64 {
    let doubled = (current_ms * 2).min(30_000);
    let jitter_span = (doubled as f64 * 0.10) as i64;
    if jitter_span == 0 {
        return doubled;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0) as i64;
    let offset = (nanos % (2 * jitter_span + 1)) - jitter_span;
    (doubled as i64 + offset).max(1000) as u64
}
