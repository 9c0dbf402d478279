use chrono::Utc;

/// Current wall clock as unix seconds. Heartbeats and last-seen stamps all
/// use this so timestamps from different proxies are comparable.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}
