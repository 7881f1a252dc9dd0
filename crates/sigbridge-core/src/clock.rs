//! Wall-clock helpers. All envelope timestamps are Unix epoch milliseconds.

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
