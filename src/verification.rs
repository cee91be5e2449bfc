//! Email deliverability and phone line-type checks.

use crate::config::{Config, TwilioCredentials};
use crate::errors::{ScrapeError, StorageError};
use crate::models::{Lead, LeadFilter, LeadPatch, LeadStatus, PhoneType};
use crate::resilience::SourceGuard;
use crate::scoring::score_lead;
use crate::scraper::{check_response, http_client};
use crate::storage::LeadStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Default number of leads verified per run.
pub const DEFAULT_VERIFY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailCheck {
    pub valid: bool,
    /// Provider status, e.g. `valid`, `invalid`, `catch-all`.
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneCheck {
    pub valid: bool,
    pub phone_type: PhoneType,
    pub carrier: Option<String>,
}

#[async_trait]
pub trait EmailVerifier: Send + Sync {
    async fn verify_email(&self, email: &str) -> Result<EmailCheck, ScrapeError>;
}

#[async_trait]
pub trait PhoneValidator: Send + Sync {
    /// Looks up an E.164 number.
    async fn lookup_phone(&self, e164: &str) -> Result<PhoneCheck, ScrapeError>;
}

// ============ ZeroBounce ============

#[derive(Debug, Deserialize)]
struct ZeroBounceResponse {
    #[serde(default)]
    status: String,
}

pub struct ZeroBounceVerifier {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    guard: SourceGuard,
}

impl ZeroBounceVerifier {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        guard: SourceGuard,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            guard,
        }
    }
}

#[async_trait]
impl EmailVerifier for ZeroBounceVerifier {
    async fn verify_email(&self, email: &str) -> Result<EmailCheck, ScrapeError> {
        let url = &format!("{}/validate", self.base_url);
        let response: ZeroBounceResponse = self
            .guard
            .run("zerobounce validate", || async move {
                let response = self
                    .client
                    .get(url)
                    .query(&[("api_key", self.api_key.as_str()), ("email", email)])
                    .send()
                    .await?;
                let response = check_response(response).await?;
                response
                    .json::<ZeroBounceResponse>()
                    .await
                    .map_err(|e| ScrapeError::Parse(e.to_string()))
            })
            .await?;

        let status = response.status.trim().to_lowercase();
        Ok(EmailCheck {
            valid: status == "valid",
            status,
        })
    }
}

// ============ Twilio Lookup ============

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    valid: bool,
    line_type_intelligence: Option<LineTypeIntelligence>,
}

#[derive(Debug, Deserialize)]
struct LineTypeIntelligence {
    #[serde(rename = "type")]
    kind: Option<String>,
    carrier_name: Option<String>,
}

/// Twilio's `line_type_intelligence.type` as a [`PhoneType`].
pub fn phone_type_from_twilio(kind: Option<&str>) -> PhoneType {
    match kind {
        Some("mobile") => PhoneType::Mobile,
        Some("landline") => PhoneType::Landline,
        Some("fixedVoip") | Some("nonFixedVoip") => PhoneType::Voip,
        _ => PhoneType::Unknown,
    }
}

pub struct TwilioLookup {
    client: reqwest::Client,
    base_url: String,
    credentials: TwilioCredentials,
    guard: SourceGuard,
}

impl TwilioLookup {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        credentials: TwilioCredentials,
        guard: SourceGuard,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            credentials,
            guard,
        }
    }
}

#[async_trait]
impl PhoneValidator for TwilioLookup {
    async fn lookup_phone(&self, e164: &str) -> Result<PhoneCheck, ScrapeError> {
        let url = &format!("{}/v2/PhoneNumbers/{}", self.base_url, e164);
        let response: LookupResponse = self
            .guard
            .run("twilio lookup", || async move {
                let response = self
                    .client
                    .get(url)
                    .basic_auth(
                        &self.credentials.account_sid,
                        Some(&self.credentials.auth_token),
                    )
                    .query(&[("Fields", "line_type_intelligence")])
                    .send()
                    .await?;
                let response = check_response(response).await?;
                response
                    .json::<LookupResponse>()
                    .await
                    .map_err(|e| ScrapeError::Parse(e.to_string()))
            })
            .await?;

        let intelligence = response.line_type_intelligence;
        Ok(PhoneCheck {
            valid: response.valid,
            phone_type: phone_type_from_twilio(
                intelligence.as_ref().and_then(|i| i.kind.as_deref()),
            ),
            carrier: intelligence.and_then(|i| i.carrier_name),
        })
    }
}

// ============ Batch verification ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VerifyOptions {
    #[serde(default = "enabled")]
    pub email: bool,
    #[serde(default = "enabled")]
    pub phone: bool,
}

fn enabled() -> bool {
    true
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            email: true,
            phone: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmailVerificationStats {
    pub verified: usize,
    pub invalid: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhoneValidationStats {
    pub validated: usize,
    pub mobile: usize,
    pub landline: usize,
    pub voip: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationStats {
    pub email: EmailVerificationStats,
    pub phone: PhoneValidationStats,
    /// Checks requested but not configured.
    pub skipped: Vec<String>,
}

pub struct LeadVerifier {
    email: Option<Box<dyn EmailVerifier>>,
    phone: Option<Box<dyn PhoneValidator>>,
}

impl LeadVerifier {
    pub fn new(email: Option<Box<dyn EmailVerifier>>, phone: Option<Box<dyn PhoneValidator>>) -> Self {
        Self { email, phone }
    }

    pub fn from_config(config: &Config) -> Self {
        let policy = &config.providers;
        let email = config.zerobounce_api_key.as_ref().map(|key| {
            Box::new(ZeroBounceVerifier::new(
                http_client(policy.breaker.timeout, None),
                config.zerobounce_base_url.clone(),
                key.clone(),
                SourceGuard::named("zerobounce", policy),
            )) as Box<dyn EmailVerifier>
        });
        let phone = config.twilio.as_ref().map(|credentials| {
            Box::new(TwilioLookup::new(
                http_client(policy.breaker.timeout, None),
                config.twilio_lookup_base_url.clone(),
                credentials.clone(),
                SourceGuard::named("twilio", policy),
            )) as Box<dyn PhoneValidator>
        });
        Self::new(email, phone)
    }

    /// Verifies emails and classifies phones of leads matching `filter`
    /// that have not been checked yet.
    pub async fn verify_leads<S>(
        &self,
        store: &S,
        filter: &LeadFilter,
        options: VerifyOptions,
    ) -> Result<VerificationStats, StorageError>
    where
        S: LeadStore + ?Sized,
    {
        let mut stats = VerificationStats::default();
        let email = self.email.as_deref().filter(|_| options.email);
        let phone = self.phone.as_deref().filter(|_| options.phone);
        if options.email && email.is_none() {
            stats.skipped.push("email: ZEROBOUNCE_API_KEY not set".to_string());
        }
        if options.phone && phone.is_none() {
            stats.skipped.push("phone: TWILIO_ACCOUNT_SID/TWILIO_AUTH_TOKEN not set".to_string());
        }
        if email.is_none() && phone.is_none() {
            return Ok(stats);
        }

        let limit = filter.limit.unwrap_or(DEFAULT_VERIFY_LIMIT);
        let lookup = LeadFilter {
            exclude_duplicates: true,
            limit: None,
            offset: None,
            ..filter.clone()
        };
        let candidates: Vec<Lead> = store
            .find_leads(&lookup)
            .await?
            .into_iter()
            .filter(|lead| {
                (email.is_some() && needs_email_check(lead)) || (phone.is_some() && needs_phone_check(lead))
            })
            .skip(filter.offset.unwrap_or(0))
            .take(limit)
            .collect();
        tracing::info!("Verifying {} leads", candidates.len());

        for lead in &candidates {
            let mut checked = lead.clone();

            if let (Some(verifier), Some(address)) = (email, lead.email.as_deref()) {
                if needs_email_check(lead) {
                    match verifier.verify_email(address).await {
                        Ok(check) => {
                            record_email_check(&mut checked, &check);
                            if check.valid {
                                stats.email.verified += 1;
                            } else {
                                stats.email.invalid += 1;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Email verification failed for {}: {}", lead.company_name, e);
                            stats.email.errors += 1;
                        }
                    }
                }
            }

            if let (Some(validator), Some(e164)) = (phone, lead.normalized_phone.as_deref()) {
                if needs_phone_check(lead) {
                    match validator.lookup_phone(e164).await {
                        Ok(check) => {
                            stats.phone.validated += 1;
                            match check.phone_type {
                                PhoneType::Mobile => stats.phone.mobile += 1,
                                PhoneType::Landline => stats.phone.landline += 1,
                                PhoneType::Voip => stats.phone.voip += 1,
                                PhoneType::Unknown => {}
                            }
                            record_phone_check(&mut checked, &check);
                        }
                        Err(e) => {
                            tracing::warn!("Phone lookup failed for {}: {}", lead.company_name, e);
                            stats.phone.errors += 1;
                        }
                    }
                }
            }

            if checked.lead_score.is_some() {
                checked.lead_score = Some(score_lead(&checked));
            }
            let patch = LeadPatch::between(lead, &checked);
            if !patch.is_empty() {
                store.update_lead(lead.id, patch).await?;
            }
        }

        store.persist_changes().await?;
        tracing::info!(
            "Verification done: {} valid / {} invalid emails, {} phones classified",
            stats.email.verified,
            stats.email.invalid,
            stats.phone.validated
        );
        Ok(stats)
    }
}

fn needs_email_check(lead: &Lead) -> bool {
    lead.email_verified.is_none() && lead.email.as_deref().is_some_and(|e| !e.trim().is_empty())
}

fn needs_phone_check(lead: &Lead) -> bool {
    lead.phone_type.is_none() && lead.normalized_phone.is_some()
}

fn record_email_check(lead: &mut Lead, check: &EmailCheck) {
    lead.email_verified = Some(check.valid);
    if check.valid && matches!(lead.status, LeadStatus::New | LeadStatus::Enriched) {
        lead.status = LeadStatus::Verified;
    }
    lead.metadata
        .extra
        .insert("email_verification_status".to_string(), json!(check.status));
}

fn record_phone_check(lead: &mut Lead, check: &PhoneCheck) {
    lead.phone_type = Some(check.phone_type);
    let extra = &mut lead.metadata.extra;
    extra.insert("phone_valid".to_string(), json!(check.valid));
    if let Some(carrier) = &check.carrier {
        extra.insert("phone_carrier".to_string(), json!(carrier));
    }
}
