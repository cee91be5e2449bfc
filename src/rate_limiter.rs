use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter: at most `max_requests` grants per `window`.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    max_requests: u32,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        Self {
            name: name.into(),
            max_requests: max_requests.max(1),
            window,
            grants: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until a request slot is available and claims it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                while let Some(front) = grants.front() {
                    if now.duration_since(*front) >= self.window {
                        grants.pop_front();
                    } else {
                        break;
                    }
                }

                if (grants.len() as u32) < self.max_requests {
                    grants.push_back(now);
                    return;
                }

                // Oldest grant decides when the next slot frees up.
                match grants.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            tracing::debug!("Rate limiter '{}' waiting {:?}", self.name, wait);
            tokio::time::sleep(wait).await;
        }
    }
}
