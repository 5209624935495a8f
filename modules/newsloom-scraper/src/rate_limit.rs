use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum gap between requests to the same domain. Waiting, not
/// rejecting: callers are delayed until their slot.
#[derive(Default)]
pub struct RateLimiter {
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, domain: &str, min_gap_secs: f64) {
        let wait = {
            let mut last = self.last_request.lock().await;
            let now = Instant::now();
            let gap = Duration::from_secs_f64(min_gap_secs.max(0.0));
            let wait = match last.get(domain) {
                Some(prev) => gap.saturating_sub(now.duration_since(*prev)),
                None => Duration::ZERO,
            };
            // Reserve the slot before sleeping so concurrent callers queue up.
            last.insert(domain.to_string(), now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
