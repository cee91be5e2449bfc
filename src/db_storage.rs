//! Postgres-backed lead store.

use crate::db::{create_db_circuit_breaker, DbCircuitBreaker};
use crate::errors::StorageError;
use crate::models::{
    DataQuality, Lead, LeadFilter, LeadMetadata, LeadPatch, LeadSource, LeadStats, LeadStatus, PhoneType,
    RawLead,
};
use crate::storage::LeadStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker;
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{PgPool, QueryBuilder, Row};
use std::collections::BTreeMap;
use std::future::Future;
use uuid::Uuid;

const LEAD_COLUMNS: &str = "id, company_name, normalized_name, contact_name, email, phone, \
normalized_phone, website, website_domain, address, city, state, zip_code, normalized_address, \
trade, source, source_url, source_id, rating, review_count, status, notes, metadata, lead_score, \
email_verified, phone_type, scraped_at, created_at, updated_at";

pub struct PgLeadStore {
    pool: PgPool,
    breaker: DbCircuitBreaker,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            breaker: create_db_circuit_breaker(),
        }
    }

    /// Runs a statement through the database circuit breaker.
    async fn guarded<T, F>(&self, statement: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match self.breaker.call(statement).await {
            Ok(value) => Ok(value),
            Err(failsafe::Error::Inner(e)) => Err(StorageError::Database(e)),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Database circuit breaker open, rejecting statement");
                Err(StorageError::CircuitOpen)
            }
        }
    }
}

fn decode_err(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

fn row_to_lead(row: &PgRow) -> Result<Lead, sqlx::Error> {
    let source: String = row.try_get("source")?;
    let status: String = row.try_get("status")?;
    let phone_type: Option<String> = row.try_get("phone_type")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let review_count: Option<i32> = row.try_get("review_count")?;
    let lead_score: Option<i16> = row.try_get("lead_score")?;

    Ok(Lead {
        id: row.try_get("id")?,
        company_name: row.try_get("company_name")?,
        normalized_name: row.try_get("normalized_name")?,
        contact_name: row.try_get("contact_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        normalized_phone: row.try_get("normalized_phone")?,
        website: row.try_get("website")?,
        website_domain: row.try_get("website_domain")?,
        address: row.try_get("address")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        zip_code: row.try_get("zip_code")?,
        normalized_address: row.try_get("normalized_address")?,
        trade: row.try_get("trade")?,
        source: source
            .parse::<LeadSource>()
            .map_err(|e| decode_err("source", e))?,
        source_url: row.try_get("source_url")?,
        source_id: row.try_get("source_id")?,
        rating: row.try_get("rating")?,
        review_count: review_count.map(|c| c.max(0) as u32),
        status: status
            .parse::<LeadStatus>()
            .map_err(|e| decode_err("status", e))?,
        notes: row.try_get("notes")?,
        metadata: serde_json::from_value::<LeadMetadata>(metadata)
            .map_err(|e| decode_err("metadata", e.to_string()))?,
        lead_score: lead_score.map(|s| s.clamp(0, 100) as u8),
        email_verified: row.try_get("email_verified")?,
        phone_type: phone_type
            .map(|p| p.parse::<PhoneType>())
            .transpose()
            .map_err(|e| decode_err("phone_type", e))?,
        scraped_at: row.try_get::<DateTime<Utc>, _>("scraped_at")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn metadata_json(metadata: &LeadMetadata) -> Result<serde_json::Value, StorageError> {
    Ok(serde_json::to_value(metadata)?)
}

/// Appends the WHERE clause for `filter`.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &LeadFilter) {
    qb.push(" WHERE TRUE");
    if !filter.trades.is_empty() {
        let trades: Vec<String> = filter.trades.iter().map(|t| t.to_lowercase()).collect();
        qb.push(" AND lower(trade) = ANY(").push_bind(trades).push(")");
    }
    if !filter.sources.is_empty() {
        let sources: Vec<String> = filter.sources.iter().map(|s| s.as_str().to_string()).collect();
        qb.push(" AND source = ANY(").push_bind(sources).push(")");
    }
    if !filter.statuses.is_empty() {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        qb.push(" AND status = ANY(").push_bind(statuses).push(")");
    }
    if filter.exclude_duplicates {
        qb.push(" AND status <> 'Duplicate'");
    }
    for (column, wanted) in [
        ("email", filter.has_email),
        ("phone", filter.has_phone),
        ("website", filter.has_website),
    ] {
        match wanted {
            Some(true) => {
                qb.push(format!(" AND COALESCE(btrim({}), '') <> ''", column));
            }
            Some(false) => {
                qb.push(format!(" AND COALESCE(btrim({}), '') = ''", column));
            }
            None => {}
        }
    }
    if let Some(min) = filter.min_score {
        qb.push(" AND COALESCE(lead_score, 0) >= ")
            .push_bind(i16::from(min));
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn find_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, StorageError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM leads", LEAD_COLUMNS));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        if let Some(offset) = filter.offset {
            qb.push(" OFFSET ").push_bind(offset as i64);
        }

        let rows = self.guarded(qb.build().fetch_all(&self.pool)).await?;
        let leads = rows
            .iter()
            .map(row_to_lead)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!("Loaded {} leads", leads.len());
        Ok(leads)
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, StorageError> {
        let sql = format!("SELECT {} FROM leads WHERE id = $1", LEAD_COLUMNS);
        let row = self
            .guarded(sqlx::query(&sql).bind(id).fetch_optional(&self.pool))
            .await?;
        row.as_ref()
            .map(row_to_lead)
            .transpose()
            .map_err(StorageError::from)
    }

    async fn create_lead(&self, raw: RawLead) -> Result<Lead, StorageError> {
        let lead = Lead::from_raw(Uuid::new_v4(), raw);
        let metadata = metadata_json(&lead.metadata)?;

        let sql = format!(
            "INSERT INTO leads ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
             $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29)",
            LEAD_COLUMNS
        );
        let insert = sqlx::query(&sql)
            .bind(lead.id)
            .bind(&lead.company_name)
            .bind(&lead.normalized_name)
            .bind(&lead.contact_name)
            .bind(&lead.email)
            .bind(&lead.phone)
            .bind(&lead.normalized_phone)
            .bind(&lead.website)
            .bind(&lead.website_domain)
            .bind(&lead.address)
            .bind(&lead.city)
            .bind(&lead.state)
            .bind(&lead.zip_code)
            .bind(&lead.normalized_address)
            .bind(&lead.trade)
            .bind(lead.source.as_str())
            .bind(&lead.source_url)
            .bind(&lead.source_id)
            .bind(lead.rating)
            .bind(lead.review_count.map(|c| c.min(i32::MAX as u32) as i32))
            .bind(lead.status.as_str())
            .bind(&lead.notes)
            .bind(metadata)
            .bind(lead.lead_score.map(i16::from))
            .bind(lead.email_verified)
            .bind(lead.phone_type.map(|p| p.as_str()))
            .bind(lead.scraped_at)
            .bind(lead.created_at)
            .bind(lead.updated_at)
            .execute(&self.pool);
        self.guarded(insert).await?;

        tracing::debug!("Inserted lead {} ({})", lead.id, lead.company_name);
        Ok(lead)
    }

    async fn update_lead(&self, id: Uuid, patch: LeadPatch) -> Result<(), StorageError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE leads SET updated_at = now()");
        macro_rules! set_text {
            ($($field:ident),+) => {
                $(
                    if let Some(v) = &patch.$field {
                        qb.push(concat!(", ", stringify!($field), " = ")).push_bind(v.clone());
                    }
                )+
            };
        }
        set_text!(
            company_name, normalized_name, contact_name, email, phone, normalized_phone, website,
            website_domain, address, city, state, zip_code, normalized_address, source_url,
            source_id, notes
        );
        if let Some(rating) = patch.rating {
            qb.push(", rating = ").push_bind(rating);
        }
        if let Some(count) = patch.review_count {
            qb.push(", review_count = ")
                .push_bind(count.min(i32::MAX as u32) as i32);
        }
        if let Some(status) = patch.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(metadata) = &patch.metadata {
            qb.push(", metadata = ").push_bind(metadata_json(metadata)?);
        }
        if let Some(score) = patch.lead_score {
            qb.push(", lead_score = ").push_bind(i16::from(score));
        }
        if let Some(verified) = patch.email_verified {
            qb.push(", email_verified = ").push_bind(verified);
        }
        if let Some(phone_type) = patch.phone_type {
            qb.push(", phone_type = ").push_bind(phone_type.as_str());
        }
        qb.push(" WHERE id = ").push_bind(id);

        let result = self.guarded(qb.build().execute(&self.pool)).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    async fn persist_changes(&self) -> Result<(), StorageError> {
        // Statements autocommit; nothing is buffered.
        tracing::debug!("Postgres store has no buffered changes");
        Ok(())
    }

    async fn lead_stats(&self) -> Result<LeadStats, StorageError> {
        let by_status = self.count_by("status").await?;
        let by_source = self.count_by("source").await?;
        let by_trade = self.count_by("trade").await?;

        let row = self
            .guarded(sqlx::query(QUALITY_SQL).fetch_one(&self.pool))
            .await?;
        let count = |column: &str| -> Result<usize, StorageError> {
            let n: i64 = row.try_get(column)?;
            Ok(n.max(0) as usize)
        };
        let average: Option<f64> = row.try_get("average_score")?;

        Ok(LeadStats {
            total: count("total")?,
            by_status,
            by_source,
            by_trade,
            quality: DataQuality {
                with_email: count("with_email")?,
                with_phone: count("with_phone")?,
                with_address: count("with_address")?,
                with_website: count("with_website")?,
                duplicates: count("duplicates")?,
                enriched: count("enriched")?,
                verified: count("verified")?,
                scored: count("scored")?,
                average_score: average.map(|a| (a * 10.0).round() / 10.0).unwrap_or(0.0),
                enrichable: count("enrichable")?,
            },
        })
    }
}

const QUALITY_SQL: &str = r#"
SELECT
    COUNT(*) AS total,
    COUNT(*) FILTER (WHERE COALESCE(TRIM(email), '') <> '') AS with_email,
    COUNT(*) FILTER (WHERE COALESCE(TRIM(phone), '') <> '') AS with_phone,
    COUNT(*) FILTER (WHERE COALESCE(TRIM(address), '') <> '') AS with_address,
    COUNT(*) FILTER (WHERE COALESCE(TRIM(website), '') <> '') AS with_website,
    COUNT(*) FILTER (WHERE status = 'Duplicate') AS duplicates,
    COUNT(*) FILTER (WHERE status IN ('Enriched', 'Verified', 'Exported')) AS enriched,
    COUNT(*) FILTER (WHERE email_verified) AS verified,
    COUNT(lead_score) AS scored,
    AVG(lead_score)::float8 AS average_score,
    COUNT(*) FILTER (
        WHERE status <> 'Duplicate'
          AND COALESCE(TRIM(website), '') <> ''
          AND COALESCE(TRIM(email), '') = ''
    ) AS enrichable
FROM leads
"#;

impl PgLeadStore {
    /// `column -> count`, for one of the fixed grouping columns.
    async fn count_by(&self, column: &'static str) -> Result<BTreeMap<String, usize>, StorageError> {
        let sql = format!("SELECT {column} AS key, COUNT(*) AS n FROM leads GROUP BY {column}");
        let rows = self.guarded(sqlx::query(&sql).fetch_all(&self.pool)).await?;
        rows.iter()
            .map(|row| -> Result<(String, usize), StorageError> {
                let key: String = row.try_get("key")?;
                let n: i64 = row.try_get("n")?;
                Ok((key, n.max(0) as usize))
            })
            .collect()
    }
}
