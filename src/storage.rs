use crate::config::Config;
use crate::db::Database;
use crate::db_storage::PgLeadStore;
use crate::errors::StorageError;
use crate::memory_storage::MemoryLeadStore;
use crate::models::{Lead, LeadFilter, LeadPatch, LeadStats, RawLead};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Persistence used by the orchestrator and the scorer.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Leads matching `filter`, newest first.
    async fn find_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, StorageError>;

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, StorageError>;

    /// Persists a new lead, assigning its id and normalized fields.
    async fn create_lead(&self, raw: RawLead) -> Result<Lead, StorageError>;

    /// Applies `patch` to an existing lead.
    async fn update_lead(&self, id: Uuid, patch: LeadPatch) -> Result<(), StorageError>;

    /// Flushes buffered writes. Called once at the end of a run.
    async fn persist_changes(&self) -> Result<(), StorageError>;

    /// Counts by status, source and trade, plus data-quality totals.
    async fn lead_stats(&self) -> Result<LeadStats, StorageError>;
}

#[async_trait]
impl<S: LeadStore + ?Sized> LeadStore for Arc<S> {
    async fn find_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, StorageError> {
        (**self).find_leads(filter).await
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, StorageError> {
        (**self).get_lead(id).await
    }

    async fn create_lead(&self, raw: RawLead) -> Result<Lead, StorageError> {
        (**self).create_lead(raw).await
    }

    async fn update_lead(&self, id: Uuid, patch: LeadPatch) -> Result<(), StorageError> {
        (**self).update_lead(id, patch).await
    }

    async fn persist_changes(&self) -> Result<(), StorageError> {
        (**self).persist_changes().await
    }

    async fn lead_stats(&self) -> Result<LeadStats, StorageError> {
        (**self).lead_stats().await
    }
}

/// Opens the store `config` selects: Postgres when `DATABASE_URL` is set,
/// otherwise memory, snapshotted to `LEADS_SNAPSHOT_PATH` when given.
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn LeadStore>> {
    if let Some(url) = &config.database_url {
        let db = Database::new(url).await?;
        db.ensure_schema().await?;
        tracing::info!("Database connection pool established");
        return Ok(Arc::new(PgLeadStore::new(db.pool)));
    }

    let store = match &config.snapshot_path {
        Some(path) => MemoryLeadStore::load(path).await?,
        None => {
            tracing::warn!("No database or snapshot path configured, leads will not survive restart");
            MemoryLeadStore::new()
        }
    };
    Ok(Arc::new(store))
}
