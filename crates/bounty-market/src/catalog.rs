use crate::error::{MarketError, Result};
use crate::types::{Job, JobId};
use bounty_economics::TokenAmount;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Read-mostly catalog of jobs.
///
/// Seeded at startup; later jobs may be added by the admin path. Jobs are
/// never deleted, only marked withdrawn. Reward immutability once a contract
/// exists is enforced by [`ClaimService::update_job_reward`], which is the
/// only caller of [`set_reward`].
///
/// [`ClaimService::update_job_reward`]: crate::claim::ClaimService::update_job_reward
/// [`set_reward`]: JobCatalog::set_reward
pub struct JobCatalog {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed the catalog with an initial job list.
    pub async fn seed(&self, jobs: Vec<Job>) -> Result<()> {
        for job in jobs {
            self.add(job).await?;
        }
        Ok(())
    }

    /// Add a new job. Duplicate ids and zero rewards are rejected.
    pub async fn add(&self, job: Job) -> Result<()> {
        if job.reward.is_zero() {
            return Err(MarketError::InvalidReward(job.id.clone()));
        }

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(MarketError::DuplicateJob(job.id));
        }

        info!(
            job_id = %job.id,
            reward = %job.reward,
            category = ?job.category,
            "Job added to catalog"
        );
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub async fn get(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// All catalog entries, withdrawn included (history is retained).
    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Mark a job withdrawn. Withdrawn jobs stop being claimable but keep
    /// their catalog entry.
    pub async fn withdraw(&self, job_id: &JobId) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| MarketError::JobNotFound(job_id.clone()))?;

        if !job.withdrawn {
            job.withdrawn = true;
            info!(job_id = %job_id, "Job withdrawn from catalog");
        }
        Ok(())
    }

    /// Raw reward setter; the claim service guards it with the
    /// no-contract-references-this-job check.
    pub(crate) async fn set_reward(&self, job_id: &JobId, reward: TokenAmount) -> Result<()> {
        if reward.is_zero() {
            return Err(MarketError::InvalidReward(job_id.clone()));
        }

        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| MarketError::JobNotFound(job_id.clone()))?;

        info!(
            job_id = %job_id,
            old_reward = %job.reward,
            new_reward = %reward,
            "Job reward updated"
        );
        job.reward = reward;
        Ok(())
    }
}

impl Default for JobCatalog {
    fn default() -> Self {
        Self::new()
    }
}
