use crate::normalize::{extract_domain, normalize_address, normalize_company_name, normalize_phone};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============ Enumerations ============

/// Upstream data source a lead was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LeadSource {
    /// Google Places API (listed as "Google Maps" to users).
    #[serde(rename = "Google Maps", alias = "google", alias = "google_maps")]
    GoogleMaps,
    /// Yelp Fusion API.
    #[serde(rename = "Yelp", alias = "yelp")]
    Yelp,
}

impl LeadSource {
    /// All sources the pipeline knows how to configure.
    pub const ALL: [LeadSource; 2] = [LeadSource::GoogleMaps, LeadSource::Yelp];

    /// Display label, also used as the persisted value.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadSource::GoogleMaps => "Google Maps",
            LeadSource::Yelp => "Yelp",
        }
    }

    /// Prefix used for per-source environment overrides.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            LeadSource::GoogleMaps => "GOOGLE_MAPS",
            LeadSource::Yelp => "YELP",
        }
    }
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google maps" | "google" | "google_maps" => Ok(LeadSource::GoogleMaps),
            "yelp" => Ok(LeadSource::Yelp),
            other => Err(format!("unknown lead source: {}", other)),
        }
    }
}

/// Workflow status of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LeadStatus {
    #[default]
    New,
    Enriched,
    Verified,
    Exported,
    Duplicate,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "New",
            LeadStatus::Enriched => "Enriched",
            LeadStatus::Verified => "Verified",
            LeadStatus::Exported => "Exported",
            LeadStatus::Duplicate => "Duplicate",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(LeadStatus::New),
            "Enriched" => Ok(LeadStatus::Enriched),
            "Verified" => Ok(LeadStatus::Verified),
            "Exported" => Ok(LeadStatus::Exported),
            "Duplicate" => Ok(LeadStatus::Duplicate),
            other => Err(format!("unknown lead status: {}", other)),
        }
    }
}

/// Line classification produced by phone verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhoneType {
    Mobile,
    Landline,
    Voip,
    Unknown,
}

impl PhoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneType::Mobile => "mobile",
            PhoneType::Landline => "landline",
            PhoneType::Voip => "voip",
            PhoneType::Unknown => "unknown",
        }
    }
}

impl FromStr for PhoneType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile" => Ok(PhoneType::Mobile),
            "landline" => Ok(PhoneType::Landline),
            "voip" => Ok(PhoneType::Voip),
            "unknown" => Ok(PhoneType::Unknown),
            other => Err(format!("unknown phone type: {}", other)),
        }
    }
}

// ============ Leads ============

/// An unpersisted observation of a business produced by one source.
///
/// Carries no stable identifier; one is assigned only when the orchestrator
/// inserts it through the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLead {
    /// Business name as listed by the source.
    pub company_name: String,
    /// Owner or contact person, when the source exposes one.
    pub contact_name: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// Phone number in whatever format the source returned.
    pub phone: Option<String>,
    /// Business website URL.
    pub website: Option<String>,
    /// Street address line.
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    /// Trade / category the lead was searched under.
    pub trade: String,
    /// Source the observation came from.
    pub source: LeadSource,
    /// Listing URL on the source.
    pub source_url: Option<String>,
    /// Source-native identifier (place id, business id).
    pub source_id: Option<String>,
    /// Average rating on the source.
    pub rating: Option<f64>,
    /// Number of reviews on the source.
    pub review_count: Option<u32>,
    /// When the observation was scraped.
    pub scraped_at: DateTime<Utc>,
}

impl RawLead {
    /// Minimal observation, used by scrapers and tests as a starting point.
    pub fn new(company_name: impl Into<String>, trade: impl Into<String>, source: LeadSource) -> Self {
        Self {
            company_name: company_name.into(),
            contact_name: None,
            email: None,
            phone: None,
            website: None,
            address: None,
            city: None,
            state: None,
            zip_code: None,
            trade: trade.into(),
            source,
            source_url: None,
            source_id: None,
            rating: None,
            review_count: None,
            scraped_at: Utc::now(),
        }
    }

    /// Reference recorded in `merged_from` when this observation is absorbed
    /// without ever being persisted.
    pub fn origin_ref(&self) -> String {
        match &self.source_id {
            Some(id) => format!("{}:{}", self.source.as_str(), id),
            None => format!(
                "{}:{}",
                self.source.as_str(),
                normalize_company_name(&self.company_name)
            ),
        }
    }
}

/// Bookkeeping attached to every persisted lead.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LeadMetadata {
    /// References of every record absorbed into this one, in merge order.
    #[serde(default)]
    pub merged_from: Vec<String>,
    /// Sources that have confirmed this lead, in confirmation order.
    #[serde(default)]
    pub sources: Vec<LeadSource>,
    /// Free-form extras written by other pipeline stages.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The canonical, persisted lead record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Stable identifier assigned on insert.
    pub id: Uuid,
    pub company_name: String,
    /// Lowercased, legal-suffix and punctuation stripped company name.
    pub normalized_name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// E.164 form of `phone`.
    pub normalized_phone: Option<String>,
    pub website: Option<String>,
    /// Root domain extracted from `website`.
    pub website_domain: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    /// Normalized full postal address.
    pub normalized_address: Option<String>,
    pub trade: String,
    pub source: LeadSource,
    pub source_url: Option<String>,
    pub source_id: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub status: LeadStatus,
    pub notes: String,
    pub metadata: LeadMetadata,
    /// Composite 0-100 score, `None` until scored.
    pub lead_score: Option<u8>,
    pub email_verified: Option<bool>,
    pub phone_type: Option<PhoneType>,
    pub scraped_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Builds a fresh canonical record from an observation.
    pub fn from_raw(id: Uuid, raw: RawLead) -> Self {
        let now = Utc::now();
        let mut lead = Self {
            id,
            normalized_name: normalize_company_name(&raw.company_name),
            company_name: raw.company_name,
            contact_name: raw.contact_name,
            email: raw.email,
            phone: raw.phone,
            normalized_phone: None,
            website: raw.website,
            website_domain: None,
            address: raw.address,
            city: raw.city,
            state: raw.state,
            zip_code: raw.zip_code,
            normalized_address: None,
            trade: raw.trade,
            source: raw.source,
            source_url: raw.source_url,
            source_id: raw.source_id,
            rating: raw.rating,
            review_count: raw.review_count,
            status: LeadStatus::New,
            notes: String::new(),
            metadata: LeadMetadata {
                sources: vec![raw.source],
                ..LeadMetadata::default()
            },
            lead_score: None,
            email_verified: None,
            phone_type: None,
            scraped_at: raw.scraped_at,
            created_at: now,
            updated_at: now,
        };
        lead.refresh_normalized();
        lead
    }

    /// Recomputes every derived field from the current raw fields.
    pub fn refresh_normalized(&mut self) {
        self.normalized_name = normalize_company_name(&self.company_name);
        self.normalized_phone = self.phone.as_deref().and_then(normalize_phone);
        self.website_domain = self.website.as_deref().and_then(extract_domain);
        self.normalized_address = full_address(self).as_deref().and_then(normalize_address);
    }
}

/// Read access to the scalar identity fields shared by `Lead` and `RawLead`.
pub trait LeadFields {
    fn company_name(&self) -> &str;
    fn contact_name(&self) -> Option<&str>;
    fn email(&self) -> Option<&str>;
    fn phone(&self) -> Option<&str>;
    fn website(&self) -> Option<&str>;
    fn address(&self) -> Option<&str>;
    fn city(&self) -> Option<&str>;
    fn state(&self) -> Option<&str>;
    fn zip_code(&self) -> Option<&str>;
    fn source(&self) -> LeadSource;
    fn source_id(&self) -> Option<&str>;
    fn source_url(&self) -> Option<&str>;
    fn rating(&self) -> Option<f64>;
    fn review_count(&self) -> Option<u32>;
}

macro_rules! impl_lead_fields {
    ($ty:ty) => {
        impl LeadFields for $ty {
            fn company_name(&self) -> &str {
                &self.company_name
            }
            fn contact_name(&self) -> Option<&str> {
                self.contact_name.as_deref()
            }
            fn email(&self) -> Option<&str> {
                self.email.as_deref()
            }
            fn phone(&self) -> Option<&str> {
                self.phone.as_deref()
            }
            fn website(&self) -> Option<&str> {
                self.website.as_deref()
            }
            fn address(&self) -> Option<&str> {
                self.address.as_deref()
            }
            fn city(&self) -> Option<&str> {
                self.city.as_deref()
            }
            fn state(&self) -> Option<&str> {
                self.state.as_deref()
            }
            fn zip_code(&self) -> Option<&str> {
                self.zip_code.as_deref()
            }
            fn source(&self) -> LeadSource {
                self.source
            }
            fn source_id(&self) -> Option<&str> {
                self.source_id.as_deref()
            }
            fn source_url(&self) -> Option<&str> {
                self.source_url.as_deref()
            }
            fn rating(&self) -> Option<f64> {
                self.rating
            }
            fn review_count(&self) -> Option<u32> {
                self.review_count
            }
        }
    };
}

impl_lead_fields!(Lead);
impl_lead_fields!(RawLead);

/// Joins street, city, state and zip into one address line.
pub fn full_address<L: LeadFields + ?Sized>(lead: &L) -> Option<String> {
    let parts: Vec<&str> = [lead.address(), lead.city(), lead.state(), lead.zip_code()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

// ============ Storage DTOs ============

/// Selection criteria for `LeadStore::find_leads`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadFilter {
    #[serde(default)]
    pub trades: Vec<String>,
    #[serde(default)]
    pub sources: Vec<LeadSource>,
    #[serde(default)]
    pub statuses: Vec<LeadStatus>,
    /// Exclude leads marked as duplicates.
    #[serde(default)]
    pub exclude_duplicates: bool,
    pub has_email: Option<bool>,
    pub has_phone: Option<bool>,
    pub has_website: Option<bool>,
    pub min_score: Option<u8>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl LeadFilter {
    /// Everything that is not already a known duplicate.
    pub fn live() -> Self {
        Self {
            exclude_duplicates: true,
            ..Self::default()
        }
    }

    /// In-memory evaluation of the filter, shared by non-SQL stores.
    pub fn matches(&self, lead: &Lead) -> bool {
        fn present(v: &Option<String>) -> bool {
            v.as_deref().is_some_and(|s| !s.trim().is_empty())
        }

        if !self.trades.is_empty() && !self.trades.iter().any(|t| t.eq_ignore_ascii_case(&lead.trade)) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.contains(&lead.source) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&lead.status) {
            return false;
        }
        if self.exclude_duplicates && lead.status == LeadStatus::Duplicate {
            return false;
        }
        if let Some(want) = self.has_email {
            if present(&lead.email) != want {
                return false;
            }
        }
        if let Some(want) = self.has_phone {
            if present(&lead.phone) != want {
                return false;
            }
        }
        if let Some(want) = self.has_website {
            if present(&lead.website) != want {
                return false;
            }
        }
        if let Some(min) = self.min_score {
            if lead.lead_score.unwrap_or(0) < min {
                return false;
            }
        }
        true
    }
}

/// Partial update for a persisted lead. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadPatch {
    pub company_name: Option<String>,
    pub normalized_name: Option<String>,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub normalized_phone: Option<String>,
    pub website: Option<String>,
    pub website_domain: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub normalized_address: Option<String>,
    pub source_url: Option<String>,
    pub source_id: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub status: Option<LeadStatus>,
    pub notes: Option<String>,
    pub metadata: Option<LeadMetadata>,
    pub lead_score: Option<u8>,
    pub email_verified: Option<bool>,
    pub phone_type: Option<PhoneType>,
}

macro_rules! diff_opt {
    ($patch:ident, $old:ident, $new:ident, $($field:ident),+) => {
        $(
            if $new.$field != $old.$field {
                $patch.$field = $new.$field.clone();
            }
        )+
    };
}

macro_rules! apply_opt {
    ($patch:ident, $lead:ident, $($field:ident),+) => {
        $(
            if let Some(v) = &$patch.$field {
                $lead.$field = Some(v.clone());
            }
        )+
    };
}

impl LeadPatch {
    /// Patch that turns `old` into `new`. Fields cleared in `new` are not
    /// representable and are left untouched.
    pub fn between(old: &Lead, new: &Lead) -> Self {
        let mut patch = LeadPatch::default();
        if new.company_name != old.company_name {
            patch.company_name = Some(new.company_name.clone());
        }
        if new.normalized_name != old.normalized_name {
            patch.normalized_name = Some(new.normalized_name.clone());
        }
        diff_opt!(
            patch, old, new, contact_name, email, phone, normalized_phone, website,
            website_domain, address, city, state, zip_code, normalized_address, source_url,
            source_id, rating, review_count, lead_score, email_verified, phone_type
        );
        if new.status != old.status {
            patch.status = Some(new.status);
        }
        if new.notes != old.notes {
            patch.notes = Some(new.notes.clone());
        }
        if new.metadata != old.metadata {
            patch.metadata = Some(new.metadata.clone());
        }
        patch
    }

    /// Patch that only sets the lead score.
    pub fn score(score: u8) -> Self {
        Self {
            lead_score: Some(score),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == LeadPatch::default()
    }

    /// Applies the patch in place and bumps `updated_at`.
    pub fn apply(&self, lead: &mut Lead) {
        if let Some(v) = &self.company_name {
            lead.company_name = v.clone();
        }
        if let Some(v) = &self.normalized_name {
            lead.normalized_name = v.clone();
        }
        apply_opt!(
            self, lead, contact_name, email, phone, normalized_phone, website, website_domain,
            address, city, state, zip_code, normalized_address, source_url, source_id, rating,
            review_count, lead_score, email_verified, phone_type
        );
        if let Some(v) = self.status {
            lead.status = v;
        }
        if let Some(v) = &self.notes {
            lead.notes = v.clone();
        }
        if let Some(v) = &self.metadata {
            lead.metadata = v.clone();
        }
        lead.updated_at = Utc::now();
    }
}

// ============ Statistics ============

/// Completeness counters over the stored lead base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub with_email: usize,
    pub with_phone: usize,
    pub with_address: usize,
    pub with_website: usize,
    pub duplicates: usize,
    /// Status Enriched or any later stage.
    pub enriched: usize,
    /// Leads whose email verified as deliverable.
    pub verified: usize,
    pub scored: usize,
    /// Mean over scored leads only, one decimal.
    pub average_score: f64,
    /// Live leads with a website but no email yet.
    pub enrichable: usize,
}

/// Counts by status, source and trade plus data quality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub by_trade: BTreeMap<String, usize>,
    pub quality: DataQuality,
}

impl LeadStats {
    pub fn from_leads<'a>(leads: impl IntoIterator<Item = &'a Lead>) -> Self {
        fn present(v: &Option<String>) -> bool {
            v.as_deref().is_some_and(|s| !s.trim().is_empty())
        }

        let mut stats = LeadStats::default();
        let mut score_sum = 0u64;

        for lead in leads {
            stats.total += 1;
            *stats.by_status.entry(lead.status.as_str().to_string()).or_default() += 1;
            *stats.by_source.entry(lead.source.as_str().to_string()).or_default() += 1;
            *stats.by_trade.entry(lead.trade.clone()).or_default() += 1;

            let q = &mut stats.quality;
            let has_email = present(&lead.email);
            let has_website = present(&lead.website);
            q.with_email += has_email as usize;
            q.with_phone += present(&lead.phone) as usize;
            q.with_address += present(&lead.address) as usize;
            q.with_website += has_website as usize;
            q.verified += (lead.email_verified == Some(true)) as usize;
            match lead.status {
                LeadStatus::Duplicate => q.duplicates += 1,
                LeadStatus::Enriched | LeadStatus::Verified | LeadStatus::Exported => q.enriched += 1,
                LeadStatus::New => {}
            }
            if lead.status != LeadStatus::Duplicate && has_website && !has_email {
                q.enrichable += 1;
            }
            if let Some(score) = lead.lead_score {
                q.scored += 1;
                score_sum += u64::from(score);
            }
        }

        if stats.quality.scored > 0 {
            let mean = score_sum as f64 / stats.quality.scored as f64;
            stats.quality.average_score = (mean * 10.0).round() / 10.0;
        }
        stats
    }
}

// ============ Scrape query ============

/// Geographic restriction for a scrape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationFilter {
    pub city: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    /// Search radius in miles.
    pub radius_miles: Option<f64>,
}

impl LocationFilter {
    /// Human-readable location used in search queries.
    pub fn describe(&self) -> String {
        let parts: Vec<&str> = [&self.city, &self.county, &self.state, &self.zip_code]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.trim().is_empty())
            .collect();

        if parts.is_empty() {
            "Westchester County, NY".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Parses "City, ST" / "Some County, ST" style input.
    pub fn parse(input: &str) -> Self {
        let parts: Vec<&str> = input
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let mut location = LocationFilter::default();

        match parts.as_slice() {
            [] => {}
            [single] => location.city = Some(single.to_string()),
            [first, .., last] => {
                if last.len() == 2 {
                    location.state = Some(last.to_string());
                }
                if first.to_lowercase().contains("county") {
                    location.county = Some(first.to_string());
                } else {
                    location.city = Some(first.to_string());
                }
            }
        }

        location
    }
}

/// What a scraper is asked to collect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeQuery {
    pub trades: Vec<String>,
    pub location: LocationFilter,
    /// Per-source result cap.
    pub max_results: Option<usize>,
}

impl ScrapeQuery {
    /// True once `count` results satisfy the cap. Checked before pulling or
    /// yielding another item, so a cap of 0 yields nothing.
    pub fn cap_reached(&self, count: usize) -> bool {
        self.max_results.is_some_and(|max| count >= max)
    }
}
