use crate::circuit_breaker::BreakerConfig;
use crate::models::LeadSource;
use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Max requests per sliding window.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

/// Per-source scraping policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ScraperConfig {
    pub enabled: bool,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub proxy_required: bool,
    pub browser_required: bool,
}

impl ScraperConfig {
    /// Built-in policy for `source`, before env overrides.
    pub fn defaults_for(source: LeadSource) -> Self {
        match source {
            LeadSource::GoogleMaps => Self {
                enabled: true,
                rate_limit: RateLimitConfig {
                    max_requests: 10,
                    window: Duration::from_secs(1),
                },
                retry: RetryPolicy::default(),
                breaker: BreakerConfig {
                    timeout: Duration::from_secs(30),
                    error_threshold_percentage: 50.0,
                    reset_timeout: Duration::from_secs(30),
                    volume_threshold: 5,
                    ..BreakerConfig::default()
                },
                proxy_required: false,
                browser_required: false,
            },
            LeadSource::Yelp => Self {
                enabled: true,
                rate_limit: RateLimitConfig {
                    max_requests: 5,
                    window: Duration::from_secs(1),
                },
                retry: RetryPolicy::default(),
                breaker: BreakerConfig {
                    timeout: Duration::from_secs(10),
                    error_threshold_percentage: 50.0,
                    reset_timeout: Duration::from_secs(60),
                    volume_threshold: 5,
                    ..BreakerConfig::default()
                },
                proxy_required: false,
                browser_required: false,
            },
        }
    }

    /// Policy shared by the enrichment and verification providers.
    pub fn provider_defaults() -> Self {
        Self {
            enabled: true,
            rate_limit: RateLimitConfig {
                max_requests: 5,
                window: Duration::from_secs(1),
            },
            retry: RetryPolicy {
                max_retries: 2,
                ..RetryPolicy::default()
            },
            breaker: BreakerConfig {
                timeout: Duration::from_secs(10),
                error_threshold_percentage: 50.0,
                reset_timeout: Duration::from_secs(30),
                volume_threshold: 5,
                ..BreakerConfig::default()
            },
            proxy_required: false,
            browser_required: false,
        }
    }

    /// Defaults for every known source.
    pub fn all_defaults() -> HashMap<LeadSource, ScraperConfig> {
        LeadSource::ALL
            .iter()
            .map(|s| (*s, Self::defaults_for(*s)))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    pub port: u16,
    pub proxy_url: Option<String>,
    pub google_places_api_key: Option<String>,
    pub yelp_api_key: Option<String>,
    pub google_places_base_url: String,
    pub yelp_base_url: String,
    pub scrapers: HashMap<LeadSource, ScraperConfig>,
    pub hunter_api_key: Option<String>,
    pub hunter_base_url: String,
    pub zerobounce_api_key: Option<String>,
    pub zerobounce_base_url: String,
    pub twilio: Option<TwilioCredentials>,
    pub twilio_lookup_base_url: String,
    /// Directory CSV exports are written to.
    pub export_path: PathBuf,
    pub providers: ScraperConfig,
}

/// Account credentials for the Twilio Lookup API.
#[derive(Debug, Clone, PartialEq)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
}

pub const DEFAULT_GOOGLE_PLACES_BASE_URL: &str = "https://places.googleapis.com/v1";
pub const DEFAULT_YELP_BASE_URL: &str = "https://api.yelp.com/v3";
pub const DEFAULT_HUNTER_BASE_URL: &str = "https://api.hunter.io/v2";
pub const DEFAULT_ZEROBOUNCE_BASE_URL: &str = "https://api.zerobounce.net/v2";
pub const DEFAULT_TWILIO_LOOKUP_BASE_URL: &str = "https://lookups.twilio.com";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        match config.database_url {
            Some(ref url) => tracing::debug!("Database URL: {}...", &url[..20.min(url.len())]),
            None => tracing::info!("DATABASE_URL not set, using in-memory lead store"),
        }
        tracing::debug!("Server Port: {}", config.port);
        if config.proxy_url.is_some() {
            tracing::info!("Proxy configured");
        }
        if config.hunter_api_key.is_none() {
            tracing::info!("HUNTER_API_KEY not set, enrichment limited to website scraping");
        }
        if config.zerobounce_api_key.is_none() {
            tracing::info!("ZEROBOUNCE_API_KEY not set, email verification disabled");
        }
        if config.twilio.is_none() {
            tracing::info!("Twilio credentials not set, phone validation disabled");
        }
        for (source, scraper) in &config.scrapers {
            tracing::debug!(
                "{}: enabled={} proxy_required={}",
                source,
                scraper.enabled,
                scraper.proxy_required
            );
        }

        Ok(config)
    }

    /// Builds the config from an arbitrary variable lookup.
    pub fn from_lookup<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let database_url = non_empty("DATABASE_URL")
            .map(|url| {
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                }
                Ok(url)
            })
            .transpose()?;

        let port = non_empty("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let base_url = |key: &str, default: &str| -> anyhow::Result<String> {
            let url = non_empty(key).unwrap_or_else(|| default.to_string());
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", key);
            }
            Ok(url.trim_end_matches('/').to_string())
        };

        let mut scrapers = ScraperConfig::all_defaults();
        for (source, scraper) in scrapers.iter_mut() {
            let prefix = source.env_prefix();
            if let Some(v) = non_empty(&format!("{}_ENABLED", prefix)) {
                scraper.enabled = parse_bool(&format!("{}_ENABLED", prefix), &v)?;
            }
            if let Some(v) = non_empty(&format!("{}_PROXY_REQUIRED", prefix)) {
                scraper.proxy_required = parse_bool(&format!("{}_PROXY_REQUIRED", prefix), &v)?;
            }
        }

        let twilio = match (non_empty("TWILIO_ACCOUNT_SID"), non_empty("TWILIO_AUTH_TOKEN")) {
            (Some(account_sid), Some(auth_token)) => Some(TwilioCredentials {
                account_sid,
                auth_token,
            }),
            (None, None) => None,
            _ => anyhow::bail!("TWILIO_ACCOUNT_SID and TWILIO_AUTH_TOKEN must be set together"),
        };

        Ok(Self {
            database_url,
            snapshot_path: non_empty("LEADS_SNAPSHOT_PATH").map(PathBuf::from),
            port,
            proxy_url: non_empty("PROXY_URL"),
            google_places_api_key: non_empty("GOOGLE_PLACES_API_KEY"),
            yelp_api_key: non_empty("YELP_API_KEY"),
            google_places_base_url: base_url(
                "GOOGLE_PLACES_BASE_URL",
                DEFAULT_GOOGLE_PLACES_BASE_URL,
            )?,
            yelp_base_url: base_url("YELP_BASE_URL", DEFAULT_YELP_BASE_URL)?,
            scrapers,
            hunter_api_key: non_empty("HUNTER_API_KEY"),
            hunter_base_url: base_url("HUNTER_BASE_URL", DEFAULT_HUNTER_BASE_URL)?,
            zerobounce_api_key: non_empty("ZEROBOUNCE_API_KEY"),
            zerobounce_base_url: base_url("ZEROBOUNCE_BASE_URL", DEFAULT_ZEROBOUNCE_BASE_URL)?,
            twilio,
            twilio_lookup_base_url: base_url(
                "TWILIO_LOOKUP_BASE_URL",
                DEFAULT_TWILIO_LOOKUP_BASE_URL,
            )?,
            export_path: non_empty("EXPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./exports")),
            providers: ScraperConfig::provider_defaults(),
        })
    }
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got '{}'", key, other),
    }
}
