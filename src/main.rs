use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_leadflow::config::Config;
use rust_leadflow::enrichment::EmailEnricher;
use rust_leadflow::handlers::{self, AppState};
use rust_leadflow::orchestrator::ScrapeOrchestrator;
use rust_leadflow::scraper::ScraperRegistry;
use rust_leadflow::storage::open_store;
use rust_leadflow::verification::LeadVerifier;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the lead store, the scraper registry,
/// the orchestrator and the enrichment providers, then serves the HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_leadflow=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store = open_store(&config).await?;

    let registry = ScraperRegistry::with_api_sources(&config);
    tracing::info!("Registered scrapers: {:?}", registry.sources());

    let orchestrator = ScrapeOrchestrator::new(
        store,
        registry,
        config.scrapers.clone(),
        config.proxy_url.is_some(),
    );
    let enricher = EmailEnricher::from_config(&config);
    tracing::info!("Enrichment providers: {:?}", enricher.providers());
    let app_state = AppState::new(Arc::new(orchestrator))
        .with_providers(enricher, LeadVerifier::from_config(&config));

    // Scrape runs are expensive: 2 req/s per IP, bursts of 5
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(5)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/api/v1/scrape", post(handlers::scrape))
        .route("/api/v1/leads/score", post(handlers::score_leads))
        .route("/api/v1/leads/enrich", post(handlers::enrich_leads))
        .route("/api/v1/leads/verify", post(handlers::verify_leads))
        .route("/api/v1/leads/stats", get(handlers::lead_stats))
        .route("/api/v1/leads/export", get(handlers::export_leads))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
