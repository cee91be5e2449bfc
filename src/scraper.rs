//! Contract between the orchestrator and per-source scrapers.

use crate::config::{Config, ScraperConfig};
use crate::errors::{Retryable, ScrapeError};
use crate::google_places::GooglePlacesScraper;
use crate::models::{LeadSource, RawLead, ScrapeQuery};
use crate::resilience::SourceGuard;
use crate::yelp::YelpScraper;
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Lazy, finite, non-restartable sequence of observations from one source.
pub type LeadStream<'a> = BoxStream<'a, Result<RawLead, ScrapeError>>;

/// A source of raw leads.
///
/// Implementations route their own network calls through a
/// [`SourceGuard`]; the orchestrator only drives the stream.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn source(&self) -> LeadSource;

    fn is_enabled(&self) -> bool;

    fn needs_proxy(&self) -> bool;

    /// Cheap connectivity check run before scraping.
    async fn test_connection(&self) -> bool;

    /// Yields leads until the source is exhausted or `query.max_results`
    /// is reached. An `Err` item ends the stream.
    fn scrape<'a>(&'a self, query: &'a ScrapeQuery) -> LeadStream<'a>;

    /// Releases held resources. Called once per run, after scraping.
    async fn cleanup(&self) {}
}

/// Builds a scraper for one source from its config and guard.
pub type ScraperFactory =
    Arc<dyn Fn(&ScraperConfig, SourceGuard) -> Box<dyn Scraper> + Send + Sync>;

/// Source → scraper factory.
#[derive(Clone, Default)]
pub struct ScraperRegistry {
    factories: HashMap<LeadSource, ScraperFactory>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, source: LeadSource, factory: F) -> &mut Self
    where
        F: Fn(&ScraperConfig, SourceGuard) -> Box<dyn Scraper> + Send + Sync + 'static,
    {
        self.factories.insert(source, Arc::new(factory));
        self
    }

    /// Registry with the Google Places and Yelp API scrapers.
    pub fn with_api_sources(config: &Config) -> Self {
        let mut registry = Self::new();

        let base_url = config.google_places_base_url.clone();
        let api_key = config.google_places_api_key.clone();
        let proxy = config.proxy_url.clone();
        registry.register(LeadSource::GoogleMaps, move |scraper_config, guard| {
            let client = http_client(scraper_config.breaker.timeout, proxy.as_deref());
            Box::new(GooglePlacesScraper::new(
                client,
                base_url.clone(),
                api_key.clone(),
                scraper_config,
                guard,
            ))
        });

        let base_url = config.yelp_base_url.clone();
        let api_key = config.yelp_api_key.clone();
        let proxy = config.proxy_url.clone();
        registry.register(LeadSource::Yelp, move |scraper_config, guard| {
            let client = http_client(scraper_config.breaker.timeout, proxy.as_deref());
            Box::new(YelpScraper::new(
                client,
                base_url.clone(),
                api_key.clone(),
                scraper_config,
                guard,
            ))
        });

        registry
    }

    pub fn contains(&self, source: LeadSource) -> bool {
        self.factories.contains_key(&source)
    }

    pub fn sources(&self) -> Vec<LeadSource> {
        let mut sources: Vec<_> = self.factories.keys().copied().collect();
        sources.sort();
        sources
    }

    /// Instantiates the scraper for `source`, if one is registered.
    pub fn create(
        &self,
        source: LeadSource,
        config: &ScraperConfig,
        guard: SourceGuard,
    ) -> Option<Box<dyn Scraper>> {
        self.factories.get(&source).map(|factory| factory(config, guard))
    }
}

impl std::fmt::Debug for ScraperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

/// HTTP client shared by the API scrapers, routed through `proxy` when set.
pub fn http_client(timeout: Duration, proxy: Option<&str>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy_url) = proxy {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => tracing::warn!("Ignoring invalid proxy URL: {}", e),
        }
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!("Failed to build HTTP client ({}), using defaults", e);
        reqwest::Client::new()
    })
}

/// Turns non-success responses into [`ScrapeError`]s. 429 honors a
/// `Retry-After` given in seconds.
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ScrapeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ScrapeError::RateLimited { retry_after });
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ScrapeError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Search-level failures a scraper skips past.
///
/// Transient failures (exhausted retries on 5xx, timeouts, network) end only
/// the current search term and are summarized when the stream finishes.
/// Anything that would fail every later search too ends the scrape at once.
#[derive(Debug, Default)]
pub struct SearchFailures {
    attempted: usize,
    failed: Vec<String>,
}

impl SearchFailures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one search (term or trade) about to be issued.
    pub fn attempt(&mut self) {
        self.attempted += 1;
    }

    /// Records `err` for `search`, or hands it back when it should end the
    /// scrape: non-retryable errors (auth, bad request, config) and an open
    /// circuit.
    pub fn record(&mut self, search: &str, err: ScrapeError) -> Result<(), ScrapeError> {
        if matches!(err, ScrapeError::CircuitOpen(_)) || !err.is_retryable() {
            return Err(err);
        }
        tracing::warn!("Search {} failed, continuing with the next one: {}", search, err);
        self.failed.push(format!("{}: {}", search, err));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }

    /// One summary error when any search was skipped.
    pub fn finish(self) -> Result<(), ScrapeError> {
        match self.failed.first() {
            None => Ok(()),
            Some(first) => Err(ScrapeError::SearchesFailed {
                failed: self.failed.len(),
                attempted: self.attempted.max(self.failed.len()),
                first: first.clone(),
            }),
        }
    }
}

/// Lookup key for per-trade tables: lowercase, words joined by `_`.
pub fn trade_key(trade: &str) -> String {
    trade
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
