//! Duplicate detection and record merging.
//!
//! A [`DuplicateMatcher`] is built once per orchestration run from a
//! snapshot of live leads. Exact identity signals (source id, phone,
//! website domain) are answered from hash indexes; company names fall back
//! to a fuzzy index corroborated by address similarity.

use crate::models::{full_address, Lead, LeadFields, LeadSource, RawLead};
use crate::normalize::{
    identity_domain, is_shared_host, normalize_address, normalize_company_name, normalize_phone,
};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Fuzzy candidates must score at least this to be accepted.
pub const FUZZY_MIN_CONFIDENCE: f64 = 0.7;
/// Address similarity above this corroborates a fuzzy name match.
pub const ADDRESS_CORROBORATION_THRESHOLD: f64 = 0.6;
/// Maximum fuzzy candidates inspected per lookup.
pub const FUZZY_CANDIDATE_LIMIT: usize = 5;

const CORROBORATION_BOOST: f64 = 0.1;
const CORROBORATED_CAP: f64 = 0.95;

/// Relative weight of the address field inside the fuzzy index.
const ADDRESS_KEY_WEIGHT: f64 = 0.5;

/// Why a candidate was judged a duplicate, strongest signal first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExactSourceId,
    ExactPhone,
    ExactWebsite,
    FuzzyMatchCorroborated,
    FuzzyNameOnly,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::ExactSourceId => "exact_source_id",
            MatchReason::ExactPhone => "exact_phone",
            MatchReason::ExactWebsite => "exact_website",
            MatchReason::FuzzyMatchCorroborated => "fuzzy_match_corroborated",
            MatchReason::FuzzyNameOnly => "fuzzy_name_only",
        }
    }
}

/// A positive duplicate lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateResult {
    /// The canonical lead the candidate duplicates.
    pub lead: Lead,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub reason: MatchReason,
}

/// Bigram (Sørensen-Dice) similarity between two strings.
///
/// Case-insensitive; every shared character pair is counted once per
/// occurrence. Identical strings score 1 and strings shorter than two
/// characters score 0.
pub fn bigram_similarity(s1: &str, s2: &str) -> f64 {
    let a: Vec<char> = s1.to_lowercase().chars().collect();
    let b: Vec<char> = s2.to_lowercase().chars().collect();

    if a == b {
        return 1.0;
    }
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }

    let mut pairs: HashMap<(char, char), usize> = HashMap::new();
    for w in a.windows(2) {
        *pairs.entry((w[0], w[1])).or_insert(0) += 1;
    }

    let mut intersection = 0usize;
    for w in b.windows(2) {
        if let Some(count) = pairs.get_mut(&(w[0], w[1])) {
            if *count > 0 {
                *count -= 1;
                intersection += 1;
            }
        }
    }

    let total = (a.len() - 1 + b.len() - 1) as f64;
    (2.0 * intersection as f64 / total).clamp(0.0, 1.0)
}

struct FuzzyEntry {
    slot: usize,
    name: String,
    address: Option<String>,
}

/// Build-once approximate index over normalized names and addresses.
///
/// Scores are normalized Levenshtein similarity. The name key carries full
/// weight and the address key half weight, so an address-only hit can never
/// reach [`FUZZY_MIN_CONFIDENCE`] on its own.
struct FuzzyIndex {
    entries: Vec<FuzzyEntry>,
}

impl FuzzyIndex {
    fn build(leads: &[Lead]) -> Self {
        let entries = leads
            .iter()
            .enumerate()
            .filter(|(_, lead)| !lead.normalized_name.is_empty())
            .map(|(slot, lead)| FuzzyEntry {
                slot,
                name: lead.normalized_name.clone(),
                address: lead.normalized_address.clone(),
            })
            .collect();
        Self { entries }
    }

    /// Best `limit` candidates with a score of at least `min_score`, best first.
    fn search(&self, query: &str, limit: usize, min_score: f64) -> Vec<(usize, f64)> {
        if query.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<(usize, f64)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let name_score = strsim::normalized_levenshtein(query, &entry.name);
                let address_score = entry
                    .address
                    .as_deref()
                    .map(|a| strsim::normalized_levenshtein(query, a) * ADDRESS_KEY_WEIGHT)
                    .unwrap_or(0.0);
                let score = name_score.max(address_score);
                (score >= min_score).then_some((entry.slot, score))
            })
            .collect();

        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }
}

/// Exact and fuzzy duplicate lookup over a snapshot of leads.
///
/// Not safe for concurrent mutation; callers own it from a single task.
pub struct DuplicateMatcher {
    leads: Vec<Lead>,
    by_id: HashMap<Uuid, usize>,
    by_phone: HashMap<String, usize>,
    by_domain: HashMap<String, usize>,
    by_source_id: HashMap<(LeadSource, String), usize>,
    fuzzy: FuzzyIndex,
}

impl DuplicateMatcher {
    /// Indexes a snapshot of existing leads.
    pub fn new(snapshot: Vec<Lead>) -> Self {
        let fuzzy = FuzzyIndex::build(&snapshot);
        let mut matcher = Self {
            leads: Vec::with_capacity(snapshot.len()),
            by_id: HashMap::new(),
            by_phone: HashMap::new(),
            by_domain: HashMap::new(),
            by_source_id: HashMap::new(),
            fuzzy,
        };

        for lead in snapshot {
            matcher.insert(lead);
        }

        tracing::debug!(
            "Duplicate matcher indexed {} leads ({} phones, {} domains, {} source ids)",
            matcher.leads.len(),
            matcher.by_phone.len(),
            matcher.by_domain.len(),
            matcher.by_source_id.len()
        );
        matcher
    }

    pub fn len(&self) -> usize {
        self.leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }

    fn insert(&mut self, lead: Lead) {
        let slot = self.leads.len();
        self.by_id.insert(lead.id, slot);
        self.index_exact_keys(&lead, slot);
        self.leads.push(lead);
    }

    /// First lead to claim a key keeps it.
    fn index_exact_keys(&mut self, lead: &Lead, slot: usize) {
        if let Some(phone) = &lead.normalized_phone {
            self.by_phone.entry(phone.clone()).or_insert(slot);
        }
        if let Some(domain) = lead.website_domain.as_ref().filter(|d| !is_shared_host(d)) {
            self.by_domain.entry(domain.clone()).or_insert(slot);
        }
        if let Some(source_id) = &lead.source_id {
            self.by_source_id
                .entry((lead.source, source_id.clone()))
                .or_insert(slot);
        }
    }

    /// Registers a lead inserted during the current run.
    ///
    /// Only the exact-match indexes learn about it; the fuzzy index keeps
    /// the snapshot it was built from.
    pub fn add_lead(&mut self, lead: Lead) {
        if let Some(&slot) = self.by_id.get(&lead.id) {
            self.index_exact_keys(&lead, slot);
            self.leads[slot] = lead;
        } else {
            self.insert(lead);
        }
    }

    /// Replaces the stored copy of an already indexed lead after a merge,
    /// so later merges in the same run build on it. New exact keys the
    /// merge contributed are indexed as well.
    pub fn update_lead(&mut self, lead: Lead) {
        self.add_lead(lead);
    }

    /// Looks up a duplicate for an incoming observation.
    pub fn find_duplicate(&self, candidate: &RawLead) -> Option<DuplicateResult> {
        if let Some(source_id) = candidate.source_id.as_deref().filter(|s| !s.is_empty()) {
            if let Some(&slot) = self
                .by_source_id
                .get(&(candidate.source, source_id.to_string()))
            {
                return Some(self.hit(slot, 1.0, MatchReason::ExactSourceId));
            }
        }

        if let Some(phone) = candidate.phone.as_deref().and_then(normalize_phone) {
            if let Some(&slot) = self.by_phone.get(&phone) {
                return Some(self.hit(slot, 0.95, MatchReason::ExactPhone));
            }
        }

        if let Some(domain) = candidate.website.as_deref().and_then(identity_domain) {
            if let Some(&slot) = self.by_domain.get(&domain) {
                return Some(self.hit(slot, 0.90, MatchReason::ExactWebsite));
            }
        }

        let name = normalize_company_name(&candidate.company_name);
        let candidate_address = full_address(candidate).as_deref().and_then(normalize_address);

        // Candidates arrive best first and all clear FUZZY_MIN_CONFIDENCE,
        // so the first one decides.
        let (slot, confidence) = self
            .fuzzy
            .search(&name, FUZZY_CANDIDATE_LIMIT, FUZZY_MIN_CONFIDENCE)
            .into_iter()
            .next()?;

        let existing = &self.leads[slot];
        if let (Some(ours), Some(theirs)) = (
            candidate_address.as_deref(),
            existing.normalized_address.as_deref(),
        ) {
            if bigram_similarity(ours, theirs) > ADDRESS_CORROBORATION_THRESHOLD {
                let boosted = (confidence + CORROBORATION_BOOST).min(CORROBORATED_CAP);
                return Some(self.hit(slot, boosted, MatchReason::FuzzyMatchCorroborated));
            }
        }
        Some(self.hit(slot, confidence, MatchReason::FuzzyNameOnly))
    }

    fn hit(&self, slot: usize, confidence: f64, reason: MatchReason) -> DuplicateResult {
        DuplicateResult {
            lead: self.leads[slot].clone(),
            confidence,
            reason,
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn prefer(canonical: &Option<String>, fallback: Option<&str>) -> Option<String> {
    if is_blank(canonical.as_deref()) {
        fallback
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
            .or_else(|| canonical.clone())
    } else {
        canonical.clone()
    }
}

fn merge_fields<D: LeadFields>(canonical: &Lead, duplicate: &D, origin: String) -> Lead {
    let mut merged = canonical.clone();

    if merged.company_name.trim().is_empty() {
        merged.company_name = duplicate.company_name().to_string();
    }
    merged.contact_name = prefer(&canonical.contact_name, duplicate.contact_name());
    merged.email = prefer(&canonical.email, duplicate.email());
    merged.phone = prefer(&canonical.phone, duplicate.phone());
    merged.website = prefer(&canonical.website, duplicate.website());
    merged.address = prefer(&canonical.address, duplicate.address());
    merged.city = prefer(&canonical.city, duplicate.city());
    merged.state = prefer(&canonical.state, duplicate.state());
    merged.zip_code = prefer(&canonical.zip_code, duplicate.zip_code());
    merged.source_url = prefer(&canonical.source_url, duplicate.source_url());

    merged.rating = match (canonical.rating, duplicate.rating()) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    merged.review_count = match (canonical.review_count, duplicate.review_count()) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (a, b) => a.or(b),
    };

    let note = format!("Also found on {}", duplicate.source());
    merged.notes = if merged.notes.trim().is_empty() {
        note
    } else {
        format!("{}\n{}", merged.notes, note)
    };

    merged.metadata.merged_from.push(origin);
    merged.metadata.sources.push(duplicate.source());

    merged.refresh_normalized();
    merged
}

/// Merges a persisted duplicate into the canonical lead.
///
/// Canonical scalar fields win whenever they are non-empty. Rating takes the
/// maximum, review counts are summed, and `merged_from` / `sources` are
/// appended to, never rewritten.
pub fn merge_leads(canonical: &Lead, duplicate: &Lead) -> Lead {
    merge_fields(canonical, duplicate, duplicate.id.to_string())
}

/// Merges a not-yet-persisted observation into the canonical lead.
///
/// Same rules as [`merge_leads`]; the observation is referenced in
/// `merged_from` by [`RawLead::origin_ref`].
pub fn merge_observation(canonical: &Lead, observation: &RawLead) -> Lead {
    merge_fields(canonical, observation, observation.origin_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(name: &str, source: LeadSource) -> Lead {
        let mut raw = RawLead::new(name, "plumbing", source);
        raw.city = Some("White Plains".to_string());
        raw.state = Some("NY".to_string());
        Lead::from_raw(Uuid::new_v4(), raw)
    }

    #[test]
    fn test_bigram_basics() {
        assert_eq!(bigram_similarity("night", "night"), 1.0);
        assert_eq!(bigram_similarity("", "x"), 0.0);
        assert_eq!(bigram_similarity("a", "b"), 0.0);
        assert_eq!(bigram_similarity("abc", "xyz"), 0.0);
        // ni ig gh ht vs na ac ch ht: one shared pair out of 8
        assert!((bigram_similarity("night", "nacht") - 0.25).abs() < 1e-9);
        assert_eq!(bigram_similarity("ABC", "abc"), 1.0);
    }

    #[test]
    fn test_bigram_counts_repeated_pairs_once() {
        // "aa" x3 in the first, once in the second
        let s = bigram_similarity("aaaa", "aa");
        assert!((s - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_exact_source_id_wins() {
        let mut existing = lead("Acme Plumbing", LeadSource::GoogleMaps);
        existing.source_id = Some("place-1".to_string());
        let matcher = DuplicateMatcher::new(vec![existing.clone()]);

        let mut candidate = RawLead::new("Totally Different", "hvac", LeadSource::GoogleMaps);
        candidate.source_id = Some("place-1".to_string());

        let result = matcher.find_duplicate(&candidate).unwrap();
        assert_eq!(result.lead.id, existing.id);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.reason, MatchReason::ExactSourceId);
    }

    #[test]
    fn test_same_source_id_on_other_source_is_not_exact() {
        let mut existing = lead("Acme Plumbing", LeadSource::GoogleMaps);
        existing.source_id = Some("abc".to_string());
        let matcher = DuplicateMatcher::new(vec![existing]);

        let mut candidate = RawLead::new("Zeta Roofing", "roofing", LeadSource::Yelp);
        candidate.source_id = Some("abc".to_string());
        assert!(matcher.find_duplicate(&candidate).is_none());
    }

    #[test]
    fn test_website_domain_match() {
        let mut raw = RawLead::new("Acme", "plumbing", LeadSource::GoogleMaps);
        raw.website = Some("https://www.acme-plumbing.com".to_string());
        let existing = Lead::from_raw(Uuid::new_v4(), raw);
        let matcher = DuplicateMatcher::new(vec![existing]);

        let mut candidate = RawLead::new("Zeta Roofing", "roofing", LeadSource::Yelp);
        candidate.website = Some("acme-plumbing.com/about".to_string());
        let result = matcher.find_duplicate(&candidate).unwrap();
        assert_eq!(result.reason, MatchReason::ExactWebsite);
        assert!((result.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_shared_platform_pages_do_not_match() {
        let mut raw = RawLead::new("Acme Plumbing", "plumbing", LeadSource::GoogleMaps);
        raw.website = Some("https://www.facebook.com/acmeplumbing".to_string());
        let matcher = DuplicateMatcher::new(vec![Lead::from_raw(Uuid::new_v4(), raw)]);

        let mut candidate = RawLead::new("Zeta Roofing", "roofing", LeadSource::Yelp);
        candidate.website = Some("https://facebook.com/zetaroofing".to_string());
        assert!(matcher.find_duplicate(&candidate).is_none());

        candidate.website = Some("https://m.facebook.com/acmeplumbing".to_string());
        assert!(matcher.find_duplicate(&candidate).is_none());
    }

    #[test]
    fn test_fuzzy_name_only_and_corroborated() {
        let mut raw = RawLead::new("Hudson Valley Plumbing", "plumbing", LeadSource::GoogleMaps);
        raw.address = Some("12 Main Street".to_string());
        raw.city = Some("White Plains".to_string());
        raw.state = Some("NY".to_string());
        let existing = Lead::from_raw(Uuid::new_v4(), raw);
        let matcher = DuplicateMatcher::new(vec![existing.clone()]);

        let mut corroborated = RawLead::new("Hudson Valley Plumbing Inc", "plumbing", LeadSource::Yelp);
        corroborated.address = Some("12 Main St".to_string());
        corroborated.city = Some("White Plains".to_string());
        corroborated.state = Some("NY".to_string());
        let result = matcher.find_duplicate(&corroborated).unwrap();
        assert_eq!(result.reason, MatchReason::FuzzyMatchCorroborated);
        assert!(result.confidence <= 0.95);

        let name_only = RawLead::new("Hudson Valley Plumbers", "plumbing", LeadSource::Yelp);
        let result = matcher.find_duplicate(&name_only).unwrap();
        assert_eq!(result.reason, MatchReason::FuzzyNameOnly);
        assert!(result.confidence >= FUZZY_MIN_CONFIDENCE);
        assert!(result.confidence < 1.0);
    }

    #[test]
    fn test_unrelated_name_is_not_a_duplicate() {
        let matcher = DuplicateMatcher::new(vec![lead("Hudson Valley Plumbing", LeadSource::GoogleMaps)]);
        let candidate = RawLead::new("Westchester Dental Group", "dental", LeadSource::Yelp);
        assert!(matcher.find_duplicate(&candidate).is_none());
    }

    #[test]
    fn test_add_lead_registers_exact_keys_only() {
        let mut matcher = DuplicateMatcher::new(Vec::new());
        let mut raw = RawLead::new("Fresh Leaf Landscaping", "landscaping", LeadSource::GoogleMaps);
        raw.phone = Some("914-555-0199".to_string());
        let inserted = Lead::from_raw(Uuid::new_v4(), raw);
        matcher.add_lead(inserted.clone());
        assert_eq!(matcher.len(), 1);

        let mut by_phone = RawLead::new("Other Name", "landscaping", LeadSource::Yelp);
        by_phone.phone = Some("(914) 555-0199".to_string());
        assert_eq!(
            matcher.find_duplicate(&by_phone).unwrap().reason,
            MatchReason::ExactPhone
        );

        // The fuzzy index is build-once, so a near-identical name is not seen.
        let by_name = RawLead::new("Fresh Leaf Landscaping", "landscaping", LeadSource::Yelp);
        assert!(matcher.find_duplicate(&by_name).is_none());
    }

    #[test]
    fn test_merge_prefers_canonical_fields() {
        let mut canonical = lead("Acme Plumbing", LeadSource::GoogleMaps);
        canonical.phone = Some("914-555-0134".to_string());
        canonical.rating = Some(4.2);
        canonical.review_count = Some(10);

        let mut dup = RawLead::new("Acme Plumbing Co", "plumbing", LeadSource::Yelp);
        dup.phone = Some("212-555-0100".to_string());
        dup.email = Some("owner@acme.com".to_string());
        dup.rating = Some(4.8);
        dup.review_count = Some(5);
        dup.source_id = Some("yelp-1".to_string());

        let merged = merge_observation(&canonical, &dup);
        assert_eq!(merged.phone, canonical.phone);
        assert_eq!(merged.email.as_deref(), Some("owner@acme.com"));
        assert_eq!(merged.rating, Some(4.8));
        assert_eq!(merged.review_count, Some(15));
        assert_eq!(merged.metadata.merged_from, vec!["Yelp:yelp-1".to_string()]);
        assert_eq!(
            merged.metadata.sources,
            vec![LeadSource::GoogleMaps, LeadSource::Yelp]
        );
        assert!(merged.notes.contains("Yelp"));
        assert_eq!(merged.id, canonical.id);
    }

    #[test]
    fn test_merge_leads_records_duplicate_id() {
        let canonical = lead("Acme Plumbing", LeadSource::GoogleMaps);
        let mut dup = lead("Acme Plumbing", LeadSource::Yelp);
        dup.contact_name = Some("Jane Doe".to_string());

        let merged = merge_leads(&canonical, &dup);
        assert_eq!(merged.metadata.merged_from, vec![dup.id.to_string()]);
        assert_eq!(merged.contact_name.as_deref(), Some("Jane Doe"));

        let twice = merge_leads(&merged, &dup);
        assert_eq!(twice.contact_name, merged.contact_name);
        assert_eq!(twice.metadata.merged_from.len(), 2);
    }
}
