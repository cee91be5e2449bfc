/// End-to-end orchestration tests with in-process fake scrapers
/// Covers dedup across sources, skips, connection failures, cancellation and stream errors
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rust_leadflow::config::ScraperConfig;
use rust_leadflow::errors::ScrapeError;
use rust_leadflow::memory_storage::MemoryLeadStore;
use rust_leadflow::models::{Lead, LeadFilter, LeadSource, LeadStatus, RawLead, ScrapeQuery};
use rust_leadflow::orchestrator::{
    ProgressStatus, ScrapeOptions, ScrapeOrchestrator, ScrapeProgress, CONNECTION_TEST_FAILED,
    SKIP_NOT_REGISTERED, SKIP_PROXY_REQUIRED,
};
use rust_leadflow::resilience::SourceGuard;
use rust_leadflow::scraper::{LeadStream, Scraper, ScraperRegistry};
use rust_leadflow::storage::LeadStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone)]
enum Item {
    Lead(RawLead),
    Fail(&'static str),
    /// Summary of searches the scraper skipped, emitted as its last item.
    SkippedSearches(usize),
}

#[derive(Clone)]
struct FakeScraper {
    source: LeadSource,
    items: Vec<Item>,
    connects: bool,
    needs_proxy: bool,
    /// Keep the stream open after the last item.
    hang: bool,
    cleanups: Arc<AtomicUsize>,
}

impl FakeScraper {
    fn new(source: LeadSource, leads: Vec<RawLead>) -> Self {
        Self {
            source,
            items: leads.into_iter().map(Item::Lead).collect(),
            connects: true,
            needs_proxy: false,
            hang: false,
            cleanups: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    fn source(&self) -> LeadSource {
        self.source
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn needs_proxy(&self) -> bool {
        self.needs_proxy
    }

    async fn test_connection(&self) -> bool {
        self.connects
    }

    fn scrape<'a>(&'a self, _query: &'a ScrapeQuery) -> LeadStream<'a> {
        let items = stream::iter(self.items.clone()).map(|item| match item {
            Item::Lead(raw) => Ok(raw),
            Item::Fail(message) => Err(ScrapeError::Other {
                message: message.to_string(),
                retryable: false,
            }),
            Item::SkippedSearches(failed) => Err(ScrapeError::SearchesFailed {
                failed,
                attempted: 3,
                first: "\"plumber in White Plains, NY\": HTTP 503: unavailable".to_string(),
            }),
        });
        if self.hang {
            items.chain(stream::pending()).boxed()
        } else {
            items.boxed()
        }
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

fn registry(scrapers: Vec<FakeScraper>) -> ScraperRegistry {
    let mut registry = ScraperRegistry::new();
    for scraper in scrapers {
        let source = scraper.source;
        registry.register(source, move |_: &ScraperConfig, _: SourceGuard| {
            Box::new(scraper.clone()) as Box<dyn Scraper>
        });
    }
    registry
}

fn orchestrator(store: Arc<MemoryLeadStore>, scrapers: Vec<FakeScraper>) -> ScrapeOrchestrator {
    ScrapeOrchestrator::new(store, registry(scrapers), HashMap::new(), false)
}

fn options(sources: &[LeadSource]) -> ScrapeOptions {
    ScrapeOptions {
        sources: sources.to_vec(),
        trades: vec!["plumbing".to_string()],
        ..ScrapeOptions::default()
    }
}

fn raw(name: &str, source: LeadSource) -> RawLead {
    let mut raw = RawLead::new(name, "plumbing", source);
    raw.city = Some("White Plains".to_string());
    raw.state = Some("NY".to_string());
    raw
}

fn existing_lead() -> Lead {
    let mut seed = raw("Acme Plumbing", LeadSource::GoogleMaps);
    seed.phone = Some("(914) 555-0134".to_string());
    seed.source_id = Some("place-acme".to_string());
    Lead::from_raw(Uuid::new_v4(), seed)
}

#[tokio::test]
async fn test_duplicate_is_merged_and_new_lead_saved() {
    let existing = existing_lead();
    let store = Arc::new(MemoryLeadStore::with_leads(vec![existing.clone()]));

    let mut same_phone = raw("ACME Plumbing & Heating", LeadSource::Yelp);
    same_phone.phone = Some("914-555-0134".to_string());
    same_phone.source_id = Some("acme-yelp".to_string());
    same_phone.rating = Some(4.8);

    let google = FakeScraper::new(LeadSource::GoogleMaps, vec![raw("Zephyr Roofing", LeadSource::GoogleMaps)]);
    let yelp = FakeScraper::new(LeadSource::Yelp, vec![same_phone]);

    let orchestrator = orchestrator(store.clone(), vec![google, yelp]);
    let result = orchestrator
        .run(&options(&[LeadSource::GoogleMaps, LeadSource::Yelp]))
        .await
        .unwrap();

    assert_eq!(result.total_found, 2);
    assert_eq!(result.total_saved, 1);
    assert_eq!(result.total_duplicates, 1);
    assert!(result.errors.is_empty());
    assert!(!result.cancelled);
    assert_eq!(result.by_source[&LeadSource::Yelp].duplicates, 1);
    assert_eq!(result.by_source[&LeadSource::GoogleMaps].saved, 1);

    let merged = store.get_lead(existing.id).await.unwrap().unwrap();
    assert_eq!(merged.metadata.merged_from, vec!["Yelp:acme-yelp".to_string()]);
    assert!(merged.metadata.sources.contains(&LeadSource::Yelp));
    assert_eq!(merged.rating, Some(4.8));
    assert_eq!(merged.company_name, "Acme Plumbing");
    assert!(merged.notes.contains("Also found on Yelp"));

    let leads = store.find_leads(&LeadFilter::default()).await.unwrap();
    assert_eq!(leads.len(), 2);
    let new_lead = leads.iter().find(|l| l.company_name == "Zephyr Roofing").unwrap();
    assert!(new_lead.lead_score.is_some());
    assert_eq!(new_lead.status, LeadStatus::New);
}

#[tokio::test]
async fn test_duplicates_within_one_run_merge_into_first() {
    let store = Arc::new(MemoryLeadStore::new());
    let mut first = raw("Beacon Electric", LeadSource::GoogleMaps);
    first.website = Some("https://www.beaconelectric.com/contact".to_string());
    let mut second = raw("Beacon Electrical Services", LeadSource::Yelp);
    second.website = Some("http://beaconelectric.com".to_string());

    let orchestrator = orchestrator(
        store.clone(),
        vec![
            FakeScraper::new(LeadSource::GoogleMaps, vec![first]),
            FakeScraper::new(LeadSource::Yelp, vec![second]),
        ],
    );
    let result = orchestrator
        .run(&options(&[LeadSource::GoogleMaps, LeadSource::Yelp]))
        .await
        .unwrap();

    assert_eq!(result.total_saved, 1);
    assert_eq!(result.total_duplicates, 1);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_skip_deduplication_saves_everything() {
    let store = Arc::new(MemoryLeadStore::with_leads(vec![existing_lead()]));
    let mut same = raw("Acme Plumbing", LeadSource::GoogleMaps);
    same.source_id = Some("place-acme".to_string());

    let orchestrator = orchestrator(store.clone(), vec![FakeScraper::new(LeadSource::GoogleMaps, vec![same])]);
    let result = orchestrator
        .run(&ScrapeOptions {
            skip_deduplication: true,
            ..options(&[LeadSource::GoogleMaps])
        })
        .await
        .unwrap();

    assert_eq!(result.total_saved, 1);
    assert_eq!(result.total_duplicates, 0);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_proxy_required_source_is_skipped() {
    let store = Arc::new(MemoryLeadStore::new());
    let mut google = FakeScraper::new(LeadSource::GoogleMaps, vec![raw("Needs Proxy Co", LeadSource::GoogleMaps)]);
    google.needs_proxy = true;
    let cleanups = google.cleanups.clone();
    let yelp = FakeScraper::new(LeadSource::Yelp, vec![raw("Open Source Plumbing", LeadSource::Yelp)]);

    let orchestrator = orchestrator(store.clone(), vec![google, yelp]);
    let result = orchestrator
        .run(&options(&[LeadSource::GoogleMaps, LeadSource::Yelp]))
        .await
        .unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].source, LeadSource::GoogleMaps);
    assert_eq!(result.errors[0].error, SKIP_PROXY_REQUIRED);
    assert_eq!(result.by_source[&LeadSource::GoogleMaps].found, 0);
    assert_eq!(result.by_source[&LeadSource::Yelp].saved, 1);
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unregistered_source_is_reported() {
    let store = Arc::new(MemoryLeadStore::new());
    let orchestrator = orchestrator(store, vec![]);
    let result = orchestrator.run(&options(&[LeadSource::Yelp])).await.unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error, SKIP_NOT_REGISTERED);
    assert_eq!(result.total_found, 0);
}

#[tokio::test]
async fn test_failed_connection_test_skips_scraping() {
    let store = Arc::new(MemoryLeadStore::new());
    let mut yelp = FakeScraper::new(LeadSource::Yelp, vec![raw("Never Seen Co", LeadSource::Yelp)]);
    yelp.connects = false;
    let cleanups = yelp.cleanups.clone();

    let events: Arc<Mutex<Vec<ProgressStatus>>> = Arc::default();
    let seen = events.clone();
    let orchestrator = orchestrator(store.clone(), vec![yelp]);
    let result = orchestrator
        .run(&ScrapeOptions {
            progress: Some(Arc::new(move |p: &ScrapeProgress| {
                seen.lock().unwrap().push(p.status);
            })),
            ..options(&[LeadSource::Yelp])
        })
        .await
        .unwrap();

    assert_eq!(result.errors[0].error, CONNECTION_TEST_FAILED);
    assert_eq!(result.total_found, 0);
    assert!(store.is_empty().await);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(
        *events.lock().unwrap(),
        vec![ProgressStatus::Starting, ProgressStatus::Failed]
    );
}

#[tokio::test]
async fn test_stream_error_keeps_earlier_leads() {
    let store = Arc::new(MemoryLeadStore::new());
    let mut google = FakeScraper::new(LeadSource::GoogleMaps, vec![raw("First Co", LeadSource::GoogleMaps)]);
    google.items.push(Item::Fail("upstream exploded"));
    google.items.push(Item::Lead(raw("Never Reached Co", LeadSource::GoogleMaps)));
    let yelp = FakeScraper::new(LeadSource::Yelp, vec![raw("Still Runs Co", LeadSource::Yelp)]);

    let orchestrator = orchestrator(store.clone(), vec![google, yelp]);
    let result = orchestrator
        .run(&options(&[LeadSource::GoogleMaps, LeadSource::Yelp]))
        .await
        .unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error, "upstream exploded");
    assert_eq!(result.by_source[&LeadSource::GoogleMaps].saved, 1);
    assert_eq!(result.by_source[&LeadSource::Yelp].saved, 1);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_max_results_caps_each_source() {
    let store = Arc::new(MemoryLeadStore::new());
    let leads = (0..5)
        .map(|i| raw(&format!("Company Number {}", i * 7919), LeadSource::Yelp))
        .collect();

    let orchestrator = orchestrator(store.clone(), vec![FakeScraper::new(LeadSource::Yelp, leads)]);
    let result = orchestrator
        .run(&ScrapeOptions {
            max_results_per_source: Some(2),
            skip_deduplication: true,
            ..options(&[LeadSource::Yelp])
        })
        .await
        .unwrap();

    assert_eq!(result.total_found, 2);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_zero_max_results_pulls_nothing() {
    let store = Arc::new(MemoryLeadStore::new());
    let google = FakeScraper::new(LeadSource::GoogleMaps, vec![raw("Not Pulled Co", LeadSource::GoogleMaps)]);
    let yelp = FakeScraper::new(LeadSource::Yelp, vec![raw("Also Not Pulled Co", LeadSource::Yelp)]);

    let orchestrator = orchestrator(store.clone(), vec![google, yelp]);
    let result = orchestrator
        .run(&ScrapeOptions {
            max_results_per_source: Some(0),
            ..options(&[LeadSource::GoogleMaps, LeadSource::Yelp])
        })
        .await
        .unwrap();

    assert_eq!(result.total_found, 0);
    assert_eq!(result.total_saved, 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_skipped_searches_are_reported_as_partial() {
    let store = Arc::new(MemoryLeadStore::new());
    let mut yelp = FakeScraper::new(LeadSource::Yelp, vec![raw("Found Anyway Co", LeadSource::Yelp)]);
    yelp.items.push(Item::SkippedSearches(1));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let orchestrator = orchestrator(store.clone(), vec![yelp]);
    let result = orchestrator
        .run(&ScrapeOptions {
            progress: Some(Arc::new(move |p: &ScrapeProgress| {
                if p.status != ProgressStatus::Scraping {
                    sink.lock().unwrap().push(p.status);
                }
            })),
            ..options(&[LeadSource::Yelp])
        })
        .await
        .unwrap();

    assert_eq!(result.total_saved, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].source, LeadSource::Yelp);
    assert!(result.errors[0].error.starts_with("1 of 3 searches failed"));
    assert_eq!(
        *events.lock().unwrap(),
        vec![ProgressStatus::Starting, ProgressStatus::Partial]
    );
}

#[tokio::test]
async fn test_cancellation_stops_run_and_keeps_partial_work() {
    let store = Arc::new(MemoryLeadStore::new());
    let mut google = FakeScraper::new(LeadSource::GoogleMaps, vec![raw("Only One Co", LeadSource::GoogleMaps)]);
    google.hang = true;
    let yelp = FakeScraper::new(LeadSource::Yelp, vec![raw("Skipped Co", LeadSource::Yelp)]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let orchestrator = orchestrator(store.clone(), vec![google, yelp]);
    let result = orchestrator
        .run(&ScrapeOptions {
            cancel,
            progress: Some(Arc::new(move |p: &ScrapeProgress| {
                if p.status == ProgressStatus::Scraping {
                    trigger.cancel();
                }
            })),
            ..options(&[LeadSource::GoogleMaps, LeadSource::Yelp])
        })
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.total_found, 1);
    assert_eq!(result.total_saved, 1);
    assert!(!result.by_source.contains_key(&LeadSource::Yelp));
    assert_eq!(store.len().await, 1);
}
