//! Drives one scrape run across sources: scrape, deduplicate, merge or
//! insert, score, persist.
//!
//! Sources are processed strictly one after another and each source's
//! stream is consumed item by item, so the [`DuplicateMatcher`] only ever
//! has a single writer. A failing source is recorded in the result and the
//! run moves on; only failing to load the dedup snapshot aborts a run.

use crate::config::ScraperConfig;
use crate::dedup::{merge_observation, DuplicateMatcher};
use crate::errors::{ScrapeError, StorageError};
use crate::models::{LeadFilter, LeadPatch, LeadSource, LocationFilter, RawLead, ScrapeQuery};
use crate::resilience::SourceGuard;
use crate::scoring::score_lead;
use crate::scraper::ScraperRegistry;
use crate::storage::LeadStore;
use futures::StreamExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub const SKIP_NOT_REGISTERED: &str = "No scraper registered";
pub const SKIP_DISABLED: &str = "Scraper disabled";
pub const SKIP_PROXY_REQUIRED: &str = "Proxy required but not configured";
pub const CONNECTION_TEST_FAILED: &str = "Connection test failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Starting,
    Scraping,
    Completed,
    /// Finished, but some searches failed and were skipped.
    Partial,
    Failed,
    Skipped,
}

/// Snapshot of one source's progress, handed to the progress callback.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeProgress {
    pub source: LeadSource,
    pub status: ProgressStatus,
    #[serde(flatten)]
    pub stats: SourceStats,
    pub message: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(&ScrapeProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub found: usize,
    pub saved: usize,
    pub duplicates: usize,
    /// Leads that could not be persisted.
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    pub source: LeadSource,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeRunResult {
    pub total_found: usize,
    pub total_saved: usize,
    pub total_duplicates: usize,
    pub by_source: BTreeMap<LeadSource, SourceStats>,
    pub errors: Vec<SourceError>,
    pub cancelled: bool,
    /// Set when the final flush failed; per-lead writes already happened.
    pub persist_error: Option<String>,
    pub duration_ms: u64,
}

impl fmt::Display for ScrapeRunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found={} saved={} duplicates={} failed_sources={}{} in {}ms",
            self.total_found,
            self.total_saved,
            self.total_duplicates,
            self.errors.len(),
            if self.cancelled { " (cancelled)" } else { "" },
            self.duration_ms
        )
    }
}

/// Inputs for one run.
#[derive(Clone, Default)]
pub struct ScrapeOptions {
    pub sources: Vec<LeadSource>,
    pub trades: Vec<String>,
    pub location: LocationFilter,
    pub max_results_per_source: Option<usize>,
    pub skip_deduplication: bool,
    pub progress: Option<ProgressCallback>,
    pub cancel: CancellationToken,
}

impl ScrapeOptions {
    fn emit(&self, source: LeadSource, status: ProgressStatus, stats: SourceStats, message: Option<&str>) {
        if let Some(callback) = &self.progress {
            callback(&ScrapeProgress {
                source,
                status,
                stats,
                message: message.map(str::to_string),
            });
        }
    }
}

enum LeadOutcome {
    Saved,
    Merged,
}

/// How a source's iteration ended.
enum SourceEnd {
    Completed,
    Cancelled,
    Partial(String),
    Failed(String),
}

pub struct ScrapeOrchestrator {
    store: Arc<dyn LeadStore>,
    registry: ScraperRegistry,
    configs: HashMap<LeadSource, ScraperConfig>,
    /// One guard per source, shared across runs so breaker state persists.
    guards: HashMap<LeadSource, SourceGuard>,
    proxy_configured: bool,
}

impl ScrapeOrchestrator {
    pub fn new(
        store: Arc<dyn LeadStore>,
        registry: ScraperRegistry,
        configs: HashMap<LeadSource, ScraperConfig>,
        proxy_configured: bool,
    ) -> Self {
        let mut configs = configs;
        for source in LeadSource::ALL {
            configs
                .entry(source)
                .or_insert_with(|| ScraperConfig::defaults_for(source));
        }
        let guards = configs
            .iter()
            .map(|(source, config)| (*source, SourceGuard::from_config(*source, config)))
            .collect();

        Self {
            store,
            registry,
            configs,
            guards,
            proxy_configured,
        }
    }

    pub fn store(&self) -> &Arc<dyn LeadStore> {
        &self.store
    }

    pub fn guard(&self, source: LeadSource) -> Option<&SourceGuard> {
        self.guards.get(&source)
    }

    /// Runs every requested source in order and returns the aggregate.
    pub async fn run(&self, options: &ScrapeOptions) -> Result<ScrapeRunResult, StorageError> {
        let started = Instant::now();
        let mut result = ScrapeRunResult::default();

        let mut matcher = if options.skip_deduplication {
            tracing::info!("Deduplication skipped for this run");
            None
        } else {
            let snapshot = self.store.find_leads(&LeadFilter::live()).await?;
            tracing::info!("Loaded {} existing leads for deduplication", snapshot.len());
            Some(DuplicateMatcher::new(snapshot))
        };

        let query = ScrapeQuery {
            trades: options.trades.clone(),
            location: options.location.clone(),
            max_results: options.max_results_per_source,
        };

        let mut sources = options.sources.clone();
        let mut seen = Vec::with_capacity(sources.len());
        sources.retain(|s| {
            let first = !seen.contains(s);
            seen.push(*s);
            first
        });

        for source in sources {
            if options.cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let (stats, end) = self
                .run_source(source, &query, options, matcher.as_mut(), &mut result.errors)
                .await;

            result.total_found += stats.found;
            result.total_saved += stats.saved;
            result.total_duplicates += stats.duplicates;
            result.by_source.insert(source, stats);

            if matches!(end, SourceEnd::Cancelled) {
                result.cancelled = true;
                break;
            }
        }

        if let Err(e) = self.store.persist_changes().await {
            tracing::error!("Failed to persist changes: {}", e);
            result.persist_error = Some(e.to_string());
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!("Scrape run finished: {}", result);
        Ok(result)
    }

    async fn run_source(
        &self,
        source: LeadSource,
        query: &ScrapeQuery,
        options: &ScrapeOptions,
        mut matcher: Option<&mut DuplicateMatcher>,
        errors: &mut Vec<SourceError>,
    ) -> (SourceStats, SourceEnd) {
        let mut stats = SourceStats::default();
        options.emit(source, ProgressStatus::Starting, stats, None);

        let skip = |reason: &str, errors: &mut Vec<SourceError>| {
            tracing::warn!("Skipping {}: {}", source, reason);
            errors.push(SourceError {
                source,
                error: reason.to_string(),
            });
            options.emit(source, ProgressStatus::Skipped, stats, Some(reason));
            (stats, SourceEnd::Failed(reason.to_string()))
        };

        let config = match self.configs.get(&source) {
            Some(config) => config.clone(),
            None => ScraperConfig::defaults_for(source),
        };
        let guard = match self.guards.get(&source) {
            Some(guard) => guard.clone(),
            None => SourceGuard::from_config(source, &config),
        };
        let Some(scraper) = self.registry.create(source, &config, guard) else {
            return skip(SKIP_NOT_REGISTERED, errors);
        };
        if !config.enabled || !scraper.is_enabled() {
            return skip(SKIP_DISABLED, errors);
        }
        if (config.proxy_required || scraper.needs_proxy()) && !self.proxy_configured {
            return skip(SKIP_PROXY_REQUIRED, errors);
        }

        if !scraper.test_connection().await {
            tracing::error!("{}: connection test failed", source);
            errors.push(SourceError {
                source,
                error: CONNECTION_TEST_FAILED.to_string(),
            });
            scraper.cleanup().await;
            options.emit(source, ProgressStatus::Failed, stats, Some(CONNECTION_TEST_FAILED));
            return (stats, SourceEnd::Failed(CONNECTION_TEST_FAILED.to_string()));
        }

        tracing::info!("Scraping {} for {:?}", source, query.trades);
        let mut end = SourceEnd::Completed;
        {
            let mut stream = scraper.scrape(query);
            loop {
                if query.cap_reached(stats.found) {
                    tracing::debug!("{}: reached max results", source);
                    break;
                }
                let item = tokio::select! {
                    biased;
                    _ = options.cancel.cancelled() => {
                        tracing::warn!("{}: run cancelled, stopping scrape", source);
                        end = SourceEnd::Cancelled;
                        break;
                    }
                    item = stream.next() => item,
                };

                let raw = match item {
                    None => break,
                    Some(Ok(raw)) => raw,
                    Some(Err(e)) => {
                        errors.push(SourceError {
                            source,
                            error: e.to_string(),
                        });
                        end = match e {
                            ScrapeError::SearchesFailed { .. } => {
                                tracing::warn!("{}: finished with failed searches: {}", source, e);
                                SourceEnd::Partial(e.to_string())
                            }
                            _ => {
                                tracing::error!("{}: scraper failed: {}", source, e);
                                SourceEnd::Failed(e.to_string())
                            }
                        };
                        break;
                    }
                };

                stats.found += 1;
                options.emit(source, ProgressStatus::Scraping, stats, None);

                match self.process_lead(raw, matcher.as_deref_mut()).await {
                    Ok(LeadOutcome::Saved) => stats.saved += 1,
                    Ok(LeadOutcome::Merged) => stats.duplicates += 1,
                    Err(e) => {
                        tracing::warn!("{}: failed to persist lead: {}", source, e);
                        stats.errors += 1;
                    }
                }
            }
        }

        scraper.cleanup().await;

        match &end {
            SourceEnd::Failed(message) => {
                options.emit(source, ProgressStatus::Failed, stats, Some(message.as_str()))
            }
            SourceEnd::Partial(message) => {
                options.emit(source, ProgressStatus::Partial, stats, Some(message.as_str()))
            }
            _ => options.emit(source, ProgressStatus::Completed, stats, None),
        }
        tracing::info!(
            "{}: found={} saved={} duplicates={} errors={}",
            source,
            stats.found,
            stats.saved,
            stats.duplicates,
            stats.errors
        );
        (stats, end)
    }

    /// Merges `raw` into its duplicate or inserts it as a new lead.
    async fn process_lead(
        &self,
        raw: RawLead,
        mut matcher: Option<&mut DuplicateMatcher>,
    ) -> Result<LeadOutcome, StorageError> {
        if let Some(found) = matcher.as_deref().and_then(|m| m.find_duplicate(&raw)) {
            let canonical = found.lead;
            let mut merged = merge_observation(&canonical, &raw);
            if canonical.lead_score.is_some() {
                merged.lead_score = Some(score_lead(&merged));
            }

            self.store
                .update_lead(canonical.id, LeadPatch::between(&canonical, &merged))
                .await?;
            tracing::debug!(
                "Merged '{}' into {} ({}, confidence {:.2})",
                raw.company_name,
                canonical.id,
                found.reason.as_str(),
                found.confidence
            );
            if let Some(m) = matcher.as_deref_mut() {
                m.update_lead(merged);
            }
            return Ok(LeadOutcome::Merged);
        }

        let mut lead = self.store.create_lead(raw).await?;
        let score = score_lead(&lead);
        match self.store.update_lead(lead.id, LeadPatch::score(score)).await {
            Ok(()) => lead.lead_score = Some(score),
            Err(e) => tracing::warn!("Failed to score new lead {}: {}", lead.id, e),
        }
        tracing::debug!("Saved new lead {} ({})", lead.id, lead.company_name);

        if let Some(m) = matcher {
            m.add_lead(lead);
        }
        Ok(LeadOutcome::Saved)
    }
}
