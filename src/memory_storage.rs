//! In-process lead store with optional JSON snapshots on disk.

use crate::errors::StorageError;
use crate::models::{Lead, LeadFilter, LeadPatch, LeadStats, RawLead};
use crate::storage::LeadStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryLeadStore {
    /// Newest first.
    leads: RwLock<Vec<Lead>>,
    snapshot_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `leads`, kept in the given order.
    pub fn with_leads(leads: Vec<Lead>) -> Self {
        Self {
            leads: RwLock::new(leads),
            ..Self::default()
        }
    }

    /// Loads `path` if it exists; `persist_changes` writes back to it.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let leads = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<Lead>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No lead snapshot at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Loaded {} leads from {}", leads.len(), path.display());

        Ok(Self {
            leads: RwLock::new(leads),
            snapshot_path: Some(path),
            dirty: AtomicBool::new(false),
        })
    }

    pub async fn len(&self) -> usize {
        self.leads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.leads.read().await.is_empty()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn find_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, StorageError> {
        let leads = self.leads.read().await;
        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(leads
            .iter()
            .filter(|lead| filter.matches(lead))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, StorageError> {
        let leads = self.leads.read().await;
        Ok(leads.iter().find(|l| l.id == id).cloned())
    }

    async fn create_lead(&self, raw: RawLead) -> Result<Lead, StorageError> {
        let lead = Lead::from_raw(Uuid::new_v4(), raw);
        self.leads.write().await.insert(0, lead.clone());
        self.dirty.store(true, Ordering::Release);
        Ok(lead)
    }

    async fn update_lead(&self, id: Uuid, patch: LeadPatch) -> Result<(), StorageError> {
        let mut leads = self.leads.write().await;
        let lead = leads
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(StorageError::NotFound(id))?;
        patch.apply(lead);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn persist_changes(&self) -> Result<(), StorageError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let bytes = {
            let leads = self.leads.read().await;
            serde_json::to_vec_pretty(&*leads)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Replace atomically.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::info!("Persisted lead snapshot to {}", path.display());
        Ok(())
    }

    async fn lead_stats(&self) -> Result<LeadStats, StorageError> {
        let leads = self.leads.read().await;
        Ok(LeadStats::from_leads(leads.iter()))
    }
}
