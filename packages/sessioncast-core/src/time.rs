//! Wall-clock timestamp helper shared by every component that stamps an
//! event or frame with "now" in epoch milliseconds. Distinct from
//! `tokio::time::Instant`, which several components (`capture`, `transport`)
//! use separately for paused-clock-compatible scheduling math.

/// Current time as milliseconds since the Unix epoch, saturating to 0 on a
/// clock error rather than panicking.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
