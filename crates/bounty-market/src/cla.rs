use crate::types::ContributorId;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Read-only CLA acceptance check consumed by the claim service.
///
/// Whatever signs the CLA owns the write side; the claim service only asks
/// whether a contributor has accepted. Implementations may be backed by a
/// remote service: an `Err` from [`has_accepted`] means acceptance could not
/// be confirmed, and the claim service fails closed.
///
/// [`has_accepted`]: ClaRegistry::has_accepted
#[async_trait]
pub trait ClaRegistry: Send + Sync {
    /// Epoch second the contributor accepted the CLA, or `None`.
    async fn accepted_at(&self, contributor_id: &ContributorId) -> Result<Option<i64>>;

    async fn has_accepted(&self, contributor_id: &ContributorId) -> Result<bool> {
        Ok(self.accepted_at(contributor_id).await?.is_some())
    }
}

/// In-memory CLA registry.
pub struct InMemoryClaRegistry {
    accepted: Arc<RwLock<HashMap<ContributorId, i64>>>,
}

impl InMemoryClaRegistry {
    pub fn new() -> Self {
        Self {
            accepted: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a CLA acceptance. Re-accepting keeps the original timestamp.
    pub async fn accept(&self, contributor_id: ContributorId) -> i64 {
        let mut accepted = self.accepted.write().await;
        let at = *accepted
            .entry(contributor_id.clone())
            .or_insert_with(|| Utc::now().timestamp());
        info!(contributor_id = %contributor_id, accepted_at = at, "CLA accepted");
        at
    }
}

impl Default for InMemoryClaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClaRegistry for InMemoryClaRegistry {
    async fn accepted_at(&self, contributor_id: &ContributorId) -> Result<Option<i64>> {
        Ok(self.accepted.read().await.get(contributor_id).copied())
    }
}
