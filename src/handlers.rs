use crate::enrichment::{EmailEnricher, EnrichmentStats};
use crate::errors::{AppError, ResultExt};
use crate::export::{export_filter, write_csv};
use crate::models::{LeadFilter, LeadSource, LeadStats, LeadStatus, LocationFilter};
use crate::orchestrator::{ScrapeOptions, ScrapeOrchestrator, ScrapeRunResult};
use crate::scoring::{score_all_leads, ScoringStats};
use crate::storage::LeadStore;
use crate::verification::{LeadVerifier, VerificationStats, VerifyOptions};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How long an identical scrape request is answered from cache.
pub const RECENT_RUN_TTL: Duration = Duration::from_secs(300);

/// Default cap on leads rescored by one request.
const DEFAULT_SCORE_LIMIT: usize = 10_000;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator owning the lead store and per-source guards.
    pub orchestrator: Arc<ScrapeOrchestrator>,
    /// Serializes scrape and scoring runs so the dedup snapshot has one writer.
    pub run_lock: Arc<Mutex<()>>,
    /// Recent run results keyed by request fingerprint.
    pub recent_runs: Cache<String, ScrapeRunResult>,
    pub enricher: Arc<EmailEnricher>,
    pub verifier: Arc<LeadVerifier>,
}

impl AppState {
    /// State with no enrichment providers or verifiers configured.
    pub fn new(orchestrator: Arc<ScrapeOrchestrator>) -> Self {
        Self {
            orchestrator,
            run_lock: Arc::new(Mutex::new(())),
            recent_runs: Cache::builder()
                .time_to_live(RECENT_RUN_TTL)
                .max_capacity(100)
                .build(),
            enricher: Arc::new(EmailEnricher::new(Vec::new())),
            verifier: Arc::new(LeadVerifier::new(None, None)),
        }
    }

    pub fn with_providers(mut self, enricher: EmailEnricher, verifier: LeadVerifier) -> Self {
        self.enricher = Arc::new(enricher);
        self.verifier = Arc::new(verifier);
        self
    }
}

/// Location accepted either as free text ("White Plains, NY") or structured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocationInput {
    Text(String),
    Structured(LocationFilter),
}

impl LocationInput {
    fn into_filter(self) -> LocationFilter {
        match self {
            LocationInput::Text(text) => LocationFilter::parse(&text),
            LocationInput::Structured(filter) => filter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default = "all_sources")]
    pub sources: Vec<LeadSource>,
    pub trades: Vec<String>,
    #[serde(default)]
    pub location: Option<LocationInput>,
    #[serde(default)]
    pub max_results_per_source: Option<usize>,
    #[serde(default)]
    pub skip_deduplication: bool,
}

fn all_sources() -> Vec<LeadSource> {
    LeadSource::ALL.to_vec()
}

impl ScrapeRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.sources.is_empty() {
            return Err(AppError::BadRequest("at least one source is required".to_string()));
        }
        if self.trades.iter().all(|t| t.trim().is_empty()) {
            return Err(AppError::BadRequest("at least one trade is required".to_string()));
        }
        if self.max_results_per_source == Some(0) {
            return Err(AppError::BadRequest(
                "max_results_per_source must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// SHA-256 of the request's JSON form.
    pub fn fingerprint(&self) -> Result<String, AppError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| AppError::InternalError(format!("failed to encode request: {}", e)))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    fn into_options(self) -> ScrapeOptions {
        ScrapeOptions {
            sources: self.sources,
            trades: self
                .trades
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            location: self.location.map(LocationInput::into_filter).unwrap_or_default(),
            max_results_per_source: self.max_results_per_source,
            skip_deduplication: self.skip_deduplication,
            ..ScrapeOptions::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoreRequest {
    #[serde(default)]
    pub trades: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Body of the enrichment and verification endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadBatchRequest {
    #[serde(default)]
    pub trades: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Which checks to run; verification only.
    #[serde(flatten)]
    pub checks: VerifyOptions,
}

/// Query string of the export endpoint. List values are comma separated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportQuery {
    pub trades: Option<String>,
    pub sources: Option<String>,
    pub statuses: Option<String>,
    pub has_email: Option<bool>,
    pub min_score: Option<u8>,
}

fn split_list(value: Option<&str>) -> impl Iterator<Item = &str> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_list<T: std::str::FromStr<Err = String>>(value: Option<&str>) -> Result<Vec<T>, AppError> {
    split_list(value)
        .map(|v| v.parse::<T>().map_err(AppError::BadRequest))
        .collect()
}

impl ExportQuery {
    fn into_filter(self) -> Result<LeadFilter, AppError> {
        Ok(export_filter(LeadFilter {
            trades: split_list(self.trades.as_deref()).map(str::to_string).collect(),
            sources: parse_list(self.sources.as_deref())?,
            statuses: parse_list(self.statuses.as_deref())?,
            has_email: self.has_email,
            min_score: self.min_score,
            ..LeadFilter::default()
        }))
    }
}

/// Health check endpoint.
///
/// Reports service version and the circuit state of every source.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let circuits: serde_json::Map<String, serde_json::Value> = LeadSource::ALL
        .iter()
        .filter_map(|source| {
            state
                .orchestrator
                .guard(*source)
                .map(|guard| (source.to_string(), json!(guard.circuit_state())))
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-leadflow",
            "version": env!("CARGO_PKG_VERSION"),
            "circuits": circuits,
        })),
    )
}

/// POST /api/v1/scrape
///
/// Runs one scrape across the requested sources. Identical requests within
/// [`RECENT_RUN_TTL`] return the earlier result without scraping again.
pub async fn scrape(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<ScrapeRunResult>, AppError> {
    request.validate()?;
    let key = request.fingerprint()?;

    if let Some(cached) = state.recent_runs.get(&key).await {
        tracing::info!("Returning cached scrape result {}", &key[..12]);
        return Ok(Json(cached));
    }

    let _running = state.run_lock.lock().await;
    // A concurrent identical request may have finished while we waited.
    if let Some(cached) = state.recent_runs.get(&key).await {
        return Ok(Json(cached));
    }

    tracing::info!(
        "Starting scrape: sources={:?} trades={:?}",
        request.sources,
        request.trades
    );
    let sources = request.sources.clone();
    let result = state
        .orchestrator
        .run(&request.into_options())
        .await
        .with_context(|| format!("Scrape run over {:?} failed", sources))?;

    state.recent_runs.insert(key, result.clone()).await;
    Ok(Json(result))
}

/// POST /api/v1/leads/score
pub async fn score_leads(
    State(state): State<AppState>,
    Json(request): Json<ScoreRequest>,
) -> Result<Json<ScoringStats>, AppError> {
    let filter = LeadFilter {
        trades: request.trades,
        limit: Some(request.limit.unwrap_or(DEFAULT_SCORE_LIMIT)),
        ..LeadFilter::live()
    };

    let _running = state.run_lock.lock().await;
    let stats = score_all_leads(state.orchestrator.store().as_ref(), &filter, None)
        .await
        .context("Scoring failed")?;
    Ok(Json(stats))
}

/// GET /api/v1/leads/stats
pub async fn lead_stats(State(state): State<AppState>) -> Result<Json<LeadStats>, AppError> {
    let stats = state
        .orchestrator
        .store()
        .lead_stats()
        .await
        .context("Loading lead statistics failed")?;
    Ok(Json(stats))
}

/// POST /api/v1/leads/enrich
///
/// Looks up emails for live leads that have a website but no email.
pub async fn enrich_leads(
    State(state): State<AppState>,
    Json(request): Json<LeadBatchRequest>,
) -> Result<Json<EnrichmentStats>, AppError> {
    let filter = LeadFilter {
        trades: request.trades,
        limit: request.limit,
        ..LeadFilter::live()
    };

    let _running = state.run_lock.lock().await;
    let stats = state
        .enricher
        .enrich_leads(state.orchestrator.store().as_ref(), &filter)
        .await
        .with_context(|| format!("Enrichment via {:?} failed", state.enricher.providers()))?;
    Ok(Json(stats))
}

/// POST /api/v1/leads/verify
pub async fn verify_leads(
    State(state): State<AppState>,
    Json(request): Json<LeadBatchRequest>,
) -> Result<Json<VerificationStats>, AppError> {
    let filter = LeadFilter {
        trades: request.trades,
        limit: request.limit,
        ..LeadFilter::live()
    };
    let checks = request.checks;

    let _running = state.run_lock.lock().await;
    let stats = state
        .verifier
        .verify_leads(state.orchestrator.store().as_ref(), &filter, checks)
        .await
        .context("Verification failed")?;
    Ok(Json(stats))
}

/// GET /api/v1/leads/export
///
/// Matching leads as a CSV attachment.
pub async fn export_leads(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.into_filter()?;
    let leads = state
        .orchestrator
        .store()
        .find_leads(&filter)
        .await
        .context("Loading leads for export failed")?;

    let mut body = Vec::new();
    let count = write_csv(&mut body, &leads)
        .map_err(|e| AppError::InternalError(format!("CSV encoding failed: {}", e)))?;
    tracing::info!("Exporting {} leads as CSV", count);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"leads.csv\""),
        ],
        body,
    ))
}
