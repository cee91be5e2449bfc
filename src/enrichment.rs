//! Email enrichment: a waterfall of email finders run over leads that have
//! a website but no email.
//!
//! Providers are tried in order. The first personal address at or above
//! [`ACCEPT_CONFIDENCE`] wins outright; otherwise the first address any
//! provider returned is used. Provider failures are logged and the next
//! provider is tried.

use crate::config::Config;
use crate::email_scraper::WebsiteEmailScraper;
use crate::errors::{ScrapeError, StorageError};
use crate::hunter::HunterClient;
use crate::models::{Lead, LeadFilter, LeadPatch, LeadStatus};
use crate::normalize::identity_domain;
use crate::resilience::SourceGuard;
use crate::scoring::score_lead;
use crate::scraper::http_client;
use crate::storage::LeadStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Minimum confidence for a personal address to end the waterfall.
pub const ACCEPT_CONFIDENCE: u8 = 70;

/// Default number of leads enriched per run.
pub const DEFAULT_ENRICH_LIMIT: usize = 100;

/// An address a provider believes belongs to the business.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoundEmail {
    pub email: String,
    /// 0-100.
    pub confidence: u8,
    /// Role mailbox such as `info@`.
    pub generic: bool,
    pub contact_name: Option<String>,
    pub position: Option<String>,
}

/// One step of the enrichment waterfall.
#[async_trait]
pub trait EmailFinder: Send + Sync {
    /// Provider name recorded on enriched leads.
    fn name(&self) -> &'static str;

    /// Looks up an address for `lead`, whose website is on `domain`.
    async fn find_email(&self, lead: &Lead, domain: &str) -> Result<Option<FoundEmail>, ScrapeError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichmentStats {
    pub total: usize,
    pub enriched: usize,
    /// Every provider answered, none found an address.
    pub skipped: usize,
    /// No provider could answer.
    pub failed: usize,
    /// No website, or only a page on a shared platform.
    pub no_website: usize,
    pub by_provider: BTreeMap<String, usize>,
}

pub struct EmailEnricher {
    finders: Vec<Box<dyn EmailFinder>>,
}

impl EmailEnricher {
    pub fn new(finders: Vec<Box<dyn EmailFinder>>) -> Self {
        Self { finders }
    }

    /// Website scraping always, Hunter when `HUNTER_API_KEY` is set.
    pub fn from_config(config: &Config) -> Self {
        let policy = &config.providers;
        let mut finders: Vec<Box<dyn EmailFinder>> = vec![Box::new(WebsiteEmailScraper::new(
            http_client(policy.breaker.timeout, config.proxy_url.as_deref()),
            SourceGuard::named("website", policy),
        ))];

        if let Some(key) = &config.hunter_api_key {
            finders.push(Box::new(HunterClient::new(
                http_client(policy.breaker.timeout, None),
                config.hunter_base_url.clone(),
                key.clone(),
                SourceGuard::named("hunter", policy),
            )));
        }
        Self::new(finders)
    }

    pub fn providers(&self) -> Vec<&'static str> {
        self.finders.iter().map(|f| f.name()).collect()
    }

    /// Runs the waterfall for one lead. `Err` only when nothing was found
    /// and at least one provider failed.
    pub async fn find(
        &self,
        lead: &Lead,
        domain: &str,
    ) -> Result<Option<(&'static str, FoundEmail)>, ScrapeError> {
        let mut fallback = None;
        let mut last_error = None;

        for finder in &self.finders {
            match finder.find_email(lead, domain).await {
                Ok(Some(found)) if !found.generic && found.confidence >= ACCEPT_CONFIDENCE => {
                    return Ok(Some((finder.name(), found)));
                }
                Ok(Some(found)) => {
                    fallback.get_or_insert((finder.name(), found));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("{} lookup for {} failed: {}", finder.name(), domain, e);
                    last_error = Some(e);
                }
            }
        }

        match (fallback, last_error) {
            (Some(found), _) => Ok(Some(found)),
            (None, Some(e)) => Err(e),
            (None, None) => Ok(None),
        }
    }

    /// Enriches live leads without an email that match `filter`.
    pub async fn enrich_leads<S>(&self, store: &S, filter: &LeadFilter) -> Result<EnrichmentStats, StorageError>
    where
        S: LeadStore + ?Sized,
    {
        let filter = LeadFilter {
            has_email: Some(false),
            exclude_duplicates: true,
            limit: Some(filter.limit.unwrap_or(DEFAULT_ENRICH_LIMIT)),
            ..filter.clone()
        };
        let leads = store.find_leads(&filter).await?;
        let mut stats = EnrichmentStats {
            total: leads.len(),
            ..EnrichmentStats::default()
        };
        tracing::info!(
            "Enriching {} leads via {:?}",
            stats.total,
            self.providers()
        );

        for lead in &leads {
            let Some(domain) = lead.website.as_deref().and_then(identity_domain) else {
                stats.no_website += 1;
                continue;
            };

            match self.find(lead, &domain).await {
                Ok(Some((provider, found))) => {
                    tracing::debug!("{}: {} via {}", lead.company_name, found.email, provider);
                    let enriched = apply_found_email(lead, provider, &found);
                    store
                        .update_lead(lead.id, LeadPatch::between(lead, &enriched))
                        .await?;
                    stats.enriched += 1;
                    *stats.by_provider.entry(provider.to_string()).or_default() += 1;
                }
                Ok(None) => stats.skipped += 1,
                Err(_) => stats.failed += 1,
            }
        }

        store.persist_changes().await?;
        tracing::info!(
            "Enrichment done: {} enriched, {} skipped, {} failed, {} without website",
            stats.enriched,
            stats.skipped,
            stats.failed,
            stats.no_website
        );
        Ok(stats)
    }
}

/// `lead` with `found` applied: email, contact name when unknown, status
/// and provenance. Scored leads are rescored.
pub fn apply_found_email(lead: &Lead, provider: &str, found: &FoundEmail) -> Lead {
    let mut enriched = lead.clone();
    enriched.email = Some(found.email.clone());
    if enriched.contact_name.is_none() {
        enriched.contact_name = found.contact_name.clone();
    }
    if enriched.status == LeadStatus::New {
        enriched.status = LeadStatus::Enriched;
    }

    let extra = &mut enriched.metadata.extra;
    extra.insert("enrichment_provider".to_string(), json!(provider));
    extra.insert("enrichment_confidence".to_string(), json!(found.confidence));
    extra.insert("enriched_at".to_string(), json!(Utc::now().to_rfc3339()));
    if let Some(position) = &found.position {
        extra.insert("contact_position".to_string(), json!(position));
    }

    if enriched.lead_score.is_some() {
        enriched.lead_score = Some(score_lead(&enriched));
    }
    enriched
}
