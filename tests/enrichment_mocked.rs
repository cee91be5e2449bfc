/// Integration tests for enrichment and verification providers
/// Mock servers stand in for business websites, Hunter, ZeroBounce and Twilio
use rust_leadflow::config::{Config, ScraperConfig, TwilioCredentials};
use rust_leadflow::email_scraper::WebsiteEmailScraper;
use rust_leadflow::enrichment::{EmailEnricher, EmailFinder};
use rust_leadflow::errors::ScrapeError;
use rust_leadflow::hunter::HunterClient;
use rust_leadflow::memory_storage::MemoryLeadStore;
use rust_leadflow::models::{Lead, LeadFilter, LeadSource, LeadStatus, PhoneType, RawLead};
use rust_leadflow::resilience::SourceGuard;
use rust_leadflow::retry::RetryPolicy;
use rust_leadflow::scoring::score_lead;
use rust_leadflow::scraper::http_client;
use rust_leadflow::storage::LeadStore;
use rust_leadflow::verification::{
    EmailVerifier, LeadVerifier, PhoneValidator, TwilioLookup, VerifyOptions, ZeroBounceVerifier,
};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{basic_auth, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn guard(name: &str) -> SourceGuard {
    let mut config = ScraperConfig::provider_defaults();
    config.retry = RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    SourceGuard::named(name, &config)
}

fn client() -> reqwest::Client {
    http_client(Duration::from_secs(5), None)
}

fn lead_with_website(website: &str) -> Lead {
    let mut raw = RawLead::new("Acme Plumbing", "plumbing", LeadSource::GoogleMaps);
    raw.website = Some(website.to_string());
    raw.phone = Some("(914) 555-0134".to_string());
    Lead::from_raw(Uuid::new_v4(), raw)
}

fn hunter_body() -> serde_json::Value {
    json!({
        "data": {
            "domain": "acmeplumbing.com",
            "emails": [
                {"value": "info@acmeplumbing.com", "type": "generic", "confidence": 96},
                {"value": "jane@acmeplumbing.com", "type": "personal", "confidence": 91,
                 "first_name": "Jane", "last_name": "Doe", "position": "Owner"}
            ]
        }
    })
}

#[tokio::test]
async fn test_website_scraper_finds_email_on_contact_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Acme Plumbing</h1>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contact"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="mailto:Jane@AcmePlumbing.com">Jane</a> <img src="team@2x.png">"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let scraper = WebsiteEmailScraper::new(client(), guard("website"));
    let lead = lead_with_website(&server.uri());
    let found = scraper
        .find_email(&lead, "acmeplumbing.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.email, "jane@acmeplumbing.com");
    assert!(!found.generic);
}

#[tokio::test]
async fn test_website_scraper_unreachable_site_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let scraper = WebsiteEmailScraper::new(client(), guard("website"));
    let err = scraper
        .find_email(&lead_with_website(&server.uri()), "acmeplumbing.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::Http { status: 404, .. }));
}

#[tokio::test]
async fn test_hunter_prefers_personal_email() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domain-search"))
        .and(query_param("domain", "acmeplumbing.com"))
        .and(query_param("api_key", "hunter-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hunter_body()))
        .expect(1)
        .mount(&server)
        .await;

    let hunter = HunterClient::new(client(), server.uri(), "hunter-key", guard("hunter"));
    let found = hunter
        .find_email(&lead_with_website("https://acmeplumbing.com"), "acmeplumbing.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.email, "jane@acmeplumbing.com");
    assert_eq!(found.confidence, 91);
    assert_eq!(found.contact_name.as_deref(), Some("Jane Doe"));
}

#[tokio::test]
async fn test_hunter_rejected_key_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domain-search"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let hunter = HunterClient::new(client(), server.uri(), "bad-key", guard("hunter"));
    let err = hunter
        .find_email(&lead_with_website("https://acmeplumbing.com"), "acmeplumbing.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::Http { status: 401, .. }));
}

#[tokio::test]
async fn test_zerobounce_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .and(query_param("email", "jane@acmeplumbing.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "valid"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .and(query_param("email", "old@acmeplumbing.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "invalid"})))
        .mount(&server)
        .await;

    let verifier = ZeroBounceVerifier::new(client(), server.uri(), "zb-key", guard("zerobounce"));
    let check = verifier.verify_email("jane@acmeplumbing.com").await.unwrap();
    assert!(check.valid);
    let check = verifier.verify_email("old@acmeplumbing.com").await.unwrap();
    assert!(!check.valid);
    assert_eq!(check.status, "invalid");
}

#[tokio::test]
async fn test_twilio_lookup_uses_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/PhoneNumbers/+19145550134"))
        .and(query_param("Fields", "line_type_intelligence"))
        .and(basic_auth("AC123", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "phone_number": "+19145550134",
            "valid": true,
            "line_type_intelligence": {"type": "landline", "carrier_name": "Verizon"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = TwilioCredentials {
        account_sid: "AC123".to_string(),
        auth_token: "secret".to_string(),
    };
    let lookup = TwilioLookup::new(client(), server.uri(), credentials, guard("twilio"));
    let check = lookup.lookup_phone("+19145550134").await.unwrap();
    assert!(check.valid);
    assert_eq!(check.phone_type, PhoneType::Landline);
    assert_eq!(check.carrier.as_deref(), Some("Verizon"));
}

/// Enrichment then verification from config, ending with a rescored lead
/// whose email, contact and phone signals all count.
#[tokio::test]
async fn test_configured_enrich_and_verify_raise_score() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Write to info@acmeplumbing.com"))
        .mount(&site)
        .await;

    let apis = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domain-search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hunter_body()))
        .expect(1)
        .mount(&apis)
        .await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "valid"})))
        .expect(1)
        .mount(&apis)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/PhoneNumbers/+19145550134"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "line_type_intelligence": {"type": "mobile", "carrier_name": "T-Mobile"}
        })))
        .expect(1)
        .mount(&apis)
        .await;

    let vars: HashMap<&str, String> = HashMap::from([
        ("HUNTER_API_KEY", "hunter-key".to_string()),
        ("HUNTER_BASE_URL", apis.uri()),
        ("ZEROBOUNCE_API_KEY", "zb-key".to_string()),
        ("ZEROBOUNCE_BASE_URL", apis.uri()),
        ("TWILIO_ACCOUNT_SID", "AC123".to_string()),
        ("TWILIO_AUTH_TOKEN", "secret".to_string()),
        ("TWILIO_LOOKUP_BASE_URL", apis.uri()),
    ]);
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();

    let mut lead = lead_with_website(&site.uri());
    lead.lead_score = Some(score_lead(&lead));
    let initial_score = lead.lead_score;
    let store = MemoryLeadStore::with_leads(vec![lead.clone()]);

    let enricher = EmailEnricher::from_config(&config);
    assert_eq!(enricher.providers(), vec!["website", "hunter"]);
    let stats = enricher.enrich_leads(&store, &LeadFilter::default()).await.unwrap();
    assert_eq!(stats.enriched, 1);
    assert_eq!(stats.by_provider["hunter"], 1);

    let verifier = LeadVerifier::from_config(&config);
    let stats = verifier
        .verify_leads(&store, &LeadFilter::default(), VerifyOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.email.verified, 1);
    assert_eq!(stats.phone.mobile, 1);

    let stored = store.get_lead(lead.id).await.unwrap().unwrap();
    assert_eq!(stored.email.as_deref(), Some("jane@acmeplumbing.com"));
    assert_eq!(stored.contact_name.as_deref(), Some("Jane Doe"));
    assert_eq!(stored.email_verified, Some(true));
    assert_eq!(stored.phone_type, Some(PhoneType::Mobile));
    assert_eq!(stored.status, LeadStatus::Verified);
    assert_eq!(stored.lead_score, Some(score_lead(&stored)));
    // Verified email, contact name, personal email and mobile phone.
    assert_eq!(stored.lead_score.unwrap() - initial_score.unwrap(), 25 + 10 + 5 + 5);

    let quality = store.lead_stats().await.unwrap().quality;
    assert_eq!(quality.verified, 1);
    assert_eq!(quality.enriched, 1);
    assert_eq!(quality.enrichable, 0);
}
