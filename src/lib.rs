//! Lead Collection Library
//!
//! Scrapes contractor leads from several directory sources, deduplicates them
//! against the stored lead base, merges corroborating observations and scores
//! each lead for outreach. Leads can then be enriched with emails, verified
//! and exported as CSV.
//!
//! # Modules
//!
//! - `circuit_breaker`: Per-source circuit breaker state machine.
//! - `config`: Configuration management.
//! - `db`: Database connection, schema and statement breaker.
//! - `db_storage`: Postgres lead store.
//! - `dedup`: Duplicate matching and lead merging.
//! - `email_scraper`: Email discovery on business websites.
//! - `enrichment`: Email enrichment waterfall.
//! - `errors`: Error handling types.
//! - `export`: CSV export.
//! - `google_places`: Google Places scraper.
//! - `handlers`: HTTP request handlers.
//! - `hunter`: Hunter.io domain search.
//! - `memory_storage`: In-memory lead store with JSON snapshots.
//! - `models`: Core data models.
//! - `normalize`: Name, phone, address and domain normalization.
//! - `orchestrator`: Multi-source scrape runs.
//! - `rate_limiter`: Sliding-window request limiter.
//! - `resilience`: Rate limit, breaker and retry composed per source.
//! - `retry`: Exponential backoff with jitter.
//! - `scoring`: Lead scoring.
//! - `scraper`: Scraper trait and registry.
//! - `storage`: Lead store trait.
//! - `verification`: ZeroBounce email and Twilio phone checks.
//! - `yelp`: Yelp Fusion scraper.

pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod dedup;
pub mod email_scraper;
pub mod enrichment;
pub mod errors;
pub mod export;
pub mod google_places;
pub mod handlers;
pub mod hunter;
pub mod memory_storage;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod rate_limiter;
pub mod resilience;
pub mod retry;
pub mod scoring;
pub mod scraper;
pub mod storage;
pub mod verification;
pub mod yelp;
