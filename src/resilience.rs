//! Per-source composition of rate limiting, retry and circuit breaking.
//!
//! Every network call a scraper makes goes through its source's
//! [`SourceGuard`]. Each attempt waits for a rate-limit slot and then runs
//! through the shared breaker; breaker rejections and timeouts come back as
//! retryable [`ScrapeError`]s so the retry loop treats them like any other
//! transient failure.

use crate::circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
use crate::config::ScraperConfig;
use crate::errors::ScrapeError;
use crate::models::LeadSource;
use crate::rate_limiter::RateLimiter;
use crate::retry::{retry, RetryPolicy};
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SourceGuard {
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl SourceGuard {
    pub fn new(breaker: Arc<CircuitBreaker>, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            breaker,
            limiter,
            retry,
        }
    }

    pub fn from_config(source: LeadSource, config: &ScraperConfig) -> Self {
        Self::named(source.as_str(), config)
    }

    /// Guard for a non-scraper collaborator (enrichment, verification).
    pub fn named(name: &str, config: &ScraperConfig) -> Self {
        let breaker = CircuitBreaker::new(name, config.breaker.clone());
        breaker.on_event(|name, event| {
            tracing::debug!("Circuit '{}' event: {:?}", name, event);
        });
        let limiter = RateLimiter::new(name, config.rate_limit.max_requests, config.rate_limit.window);
        Self::new(Arc::new(breaker), Arc::new(limiter), config.retry.clone())
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Runs `op` with rate limiting, circuit breaking and retry.
    pub async fn run<F, Fut, T>(&self, label: &str, mut op: F) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        retry(&self.retry, label, || {
            let attempt = op();
            async move {
                self.limiter.acquire().await;
                self.breaker
                    .call(|| attempt)
                    .await
                    .map_err(|e| self.lift(e))
            }
        })
        .await
    }

    fn lift(&self, err: BreakerError<ScrapeError>) -> ScrapeError {
        match err {
            BreakerError::Rejected => ScrapeError::CircuitOpen(self.breaker.name().to_string()),
            BreakerError::Timeout(after) => ScrapeError::Timeout(after),
            BreakerError::Inner(e) => e,
        }
    }
}
