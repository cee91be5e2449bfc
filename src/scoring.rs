//! Deterministic 0-100 lead score from weighted data-quality signals.

use crate::errors::StorageError;
use crate::models::{Lead, LeadFilter, LeadPatch, PhoneType};
use crate::normalize::is_generic_email;
use crate::storage::LeadStore;
use serde::Serialize;

pub const VERIFIED_EMAIL_POINTS: u8 = 25;
pub const PHONE_POINTS: u8 = 15;
pub const WEBSITE_POINTS: u8 = 10;
pub const HIGH_RATING_POINTS: u8 = 10;
pub const MANY_REVIEWS_POINTS: u8 = 10;
pub const FULL_ADDRESS_POINTS: u8 = 5;
pub const CONTACT_NAME_POINTS: u8 = 10;
pub const PERSONAL_EMAIL_POINTS: u8 = 5;
pub const MOBILE_PHONE_POINTS: u8 = 5;
pub const MULTI_SOURCE_POINTS: u8 = 5;

const HIGH_RATING: f64 = 4.0;
const MANY_REVIEWS: u32 = 50;

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Scores one lead. Always in `0..=100`.
pub fn score_lead(lead: &Lead) -> u8 {
    let has_email = present(&lead.email);
    let signals = [
        (
            has_email && lead.email_verified == Some(true),
            VERIFIED_EMAIL_POINTS,
        ),
        (present(&lead.phone), PHONE_POINTS),
        (present(&lead.website), WEBSITE_POINTS),
        (
            lead.rating.is_some_and(|r| r >= HIGH_RATING),
            HIGH_RATING_POINTS,
        ),
        (
            lead.review_count.is_some_and(|c| c > MANY_REVIEWS),
            MANY_REVIEWS_POINTS,
        ),
        (
            present(&lead.address) && present(&lead.city) && present(&lead.state),
            FULL_ADDRESS_POINTS,
        ),
        (present(&lead.contact_name), CONTACT_NAME_POINTS),
        (
            lead.email
                .as_deref()
                .is_some_and(|e| !e.trim().is_empty() && !is_generic_email(e)),
            PERSONAL_EMAIL_POINTS,
        ),
        (
            lead.phone_type == Some(PhoneType::Mobile),
            MOBILE_PHONE_POINTS,
        ),
        (
            !lead.metadata.merged_from.is_empty(),
            MULTI_SOURCE_POINTS,
        ),
    ];

    let total: u32 = signals
        .iter()
        .filter(|(hit, _)| *hit)
        .map(|(_, points)| u32::from(*points))
        .sum();
    total.min(100) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBucket {
    pub range: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringStats {
    pub scored: usize,
    /// Rounded to one decimal.
    pub average_score: f64,
    pub distribution: Vec<ScoreBucket>,
}

const BUCKETS: [(&str, u8, u8); 5] = [
    ("0-20", 0, 20),
    ("21-40", 21, 40),
    ("41-60", 41, 60),
    ("61-80", 61, 80),
    ("81-100", 81, 100),
];

impl ScoringStats {
    pub fn from_scores(scores: &[u8]) -> Self {
        let mut distribution: Vec<ScoreBucket> = BUCKETS
            .iter()
            .map(|(range, _, _)| ScoreBucket {
                range: *range,
                count: 0,
            })
            .collect();
        for score in scores {
            if let Some(i) = BUCKETS
                .iter()
                .position(|(_, lo, hi)| (*lo..=*hi).contains(score))
            {
                distribution[i].count += 1;
            }
        }

        let average_score = if scores.is_empty() {
            0.0
        } else {
            let sum: u64 = scores.iter().map(|s| u64::from(*s)).sum();
            (sum as f64 / scores.len() as f64 * 10.0).round() / 10.0
        };

        Self {
            scored: scores.len(),
            average_score,
            distribution,
        }
    }
}

/// Rescores every lead matching `filter`. Only changed scores are written;
/// `progress` receives `(done, total)` after each lead.
pub async fn score_all_leads<S>(
    store: &S,
    filter: &LeadFilter,
    progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
) -> Result<ScoringStats, StorageError>
where
    S: LeadStore + ?Sized,
{
    let leads = store.find_leads(filter).await?;
    let total = leads.len();
    tracing::info!("Scoring {} leads", total);

    let mut scores = Vec::with_capacity(total);
    let mut updated = 0usize;
    for (i, lead) in leads.iter().enumerate() {
        let score = score_lead(lead);
        if lead.lead_score != Some(score) {
            store.update_lead(lead.id, LeadPatch::score(score)).await?;
            updated += 1;
        }
        scores.push(score);
        if let Some(report) = progress {
            report(i + 1, total);
        }
    }

    store.persist_changes().await?;
    let stats = ScoringStats::from_scores(&scores);
    tracing::info!(
        "Scored {} leads ({} changed), average {}",
        stats.scored,
        updated,
        stats.average_score
    );
    Ok(stats)
}
