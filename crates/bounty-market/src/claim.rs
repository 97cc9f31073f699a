//! Claim Service
//!
//! The coordination core of the marketplace and the single writer of
//! contract and ledger state:
//! 1. Claim admission (CLA gate, per-job mutual exclusion, pool reservation)
//! 2. Contract lifecycle transitions (review, settlement, cancellation)
//! 3. Read API for any frontend (jobs, contracts, ledger summary)
//!
//! Claim admission on one job is serialized by a per-job lock, so two
//! concurrent claims yield exactly one winner and never a double
//! reservation. No external I/O happens while the lock is held; the CLA
//! check runs before it and the ledger reservation is itself atomic.

use crate::catalog::JobCatalog;
use crate::cla::ClaRegistry;
use crate::error::{MarketError, Result};
use crate::types::{
    Contract, ContractId, ContractState, Contributor, ContributorId, Job, JobId, MarketEvent,
};
use bounty_economics::{LedgerError, LedgerSummary, TokenAmount, TokenPoolLedger};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

/// Contract counts by state, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketStats {
    pub total_contracts: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub under_review: usize,
    pub completed: usize,
    pub cancelled: usize,
}

pub struct ClaimService {
    catalog: Arc<JobCatalog>,
    cla: Arc<dyn ClaRegistry>,
    ledger: Arc<TokenPoolLedger>,
    contributors: Arc<RwLock<HashMap<ContributorId, Contributor>>>,
    contracts: Arc<RwLock<HashMap<ContractId, Contract>>>,
    // One admission lock per job id; entries are created lazily and never
    // removed (the set of jobs is small and append-only)
    job_locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
    next_contract_id: AtomicU64,
    event_tx: Option<mpsc::UnboundedSender<MarketEvent>>,
}

impl ClaimService {
    pub fn new(
        catalog: Arc<JobCatalog>,
        cla: Arc<dyn ClaRegistry>,
        ledger: Arc<TokenPoolLedger>,
    ) -> Self {
        Self {
            catalog,
            cla,
            ledger,
            contributors: Arc::new(RwLock::new(HashMap::new())),
            contracts: Arc::new(RwLock::new(HashMap::new())),
            job_locks: Mutex::new(HashMap::new()),
            next_contract_id: AtomicU64::new(1),
            event_tx: None,
        }
    }

    /// Create a claim service that emits a [`MarketEvent`] after every
    /// successful mutation, for read-model refresh or any other listener.
    pub fn with_events(
        catalog: Arc<JobCatalog>,
        cla: Arc<dyn ClaRegistry>,
        ledger: Arc<TokenPoolLedger>,
    ) -> (Self, mpsc::UnboundedReceiver<MarketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut service = Self::new(catalog, cla, ledger);
        service.event_tx = Some(tx);
        (service, rx)
    }

    // ========== Claim admission ==========

    /// Claim a job for a contributor.
    ///
    /// Fails fast with a specific reason: `JobNotFound`, `JobWithdrawn`,
    /// `ClaNotAccepted` (fail closed when the registry is unreachable),
    /// `JobAlreadyClaimed` or `PoolExhausted`. On success the contract is
    /// created in `InProgress` with the job's reward copied and locked.
    pub async fn claim_job(
        &self,
        job_id: JobId,
        contributor_id: ContributorId,
    ) -> Result<Contract> {
        let job = self
            .catalog
            .get(&job_id)
            .await
            .ok_or_else(|| MarketError::JobNotFound(job_id.clone()))?;

        if job.withdrawn {
            return Err(MarketError::JobWithdrawn(job_id));
        }

        // CLA gate, before taking the admission lock. An unreachable
        // registry fails closed: a claim is never admitted on unconfirmed
        // acceptance.
        let cla_accepted_at = match self.cla.accepted_at(&contributor_id).await {
            Ok(at) => at,
            Err(e) => {
                warn!(
                    contributor_id = %contributor_id,
                    error = %e,
                    "CLA registry unreachable; failing closed"
                );
                None
            }
        };
        let Some(cla_accepted_at) = cla_accepted_at else {
            return Err(MarketError::ClaNotAccepted(contributor_id));
        };

        let admission = self.job_lock(&job_id).await;
        let _guard = admission.lock().await;

        // Re-read the job under the admission lock: an admin edit may have
        // landed between the early snapshot and here, and the reserved
        // amount must match the reward current at admission time
        let job = self
            .catalog
            .get(&job_id)
            .await
            .ok_or_else(|| MarketError::JobNotFound(job_id.clone()))?;
        if job.withdrawn {
            return Err(MarketError::JobWithdrawn(job_id));
        }

        if let Some(existing) = self.blocking_contract_for_job(&job_id).await {
            info!(
                job_id = %job_id,
                contract_id = existing.id,
                holder = %existing.contributor_id,
                rejected = %contributor_id,
                "Claim rejected: job already claimed"
            );
            return Err(MarketError::JobAlreadyClaimed(job_id));
        }

        let contract_id = self.next_contract_id.fetch_add(1, Ordering::SeqCst);

        // Reserve before creating the contract; a failed reservation must
        // leave no trace
        self.ledger
            .reserve(job.reward, Some(contract_id))
            .await
            .map_err(|e| match e {
                LedgerError::InsufficientSupply {
                    required,
                    available,
                } => MarketError::PoolExhausted {
                    required,
                    available,
                },
                other => MarketError::Ledger(other),
            })?;

        let contract = Contract::new(contract_id, &job, contributor_id.clone());
        self.contracts
            .write()
            .await
            .insert(contract_id, contract.clone());

        self.note_contributor(&contributor_id, cla_accepted_at).await;

        info!(
            contract_id = contract_id,
            job_id = %job_id,
            contributor_id = %contributor_id,
            reward_locked = %contract.reward_locked,
            "📋 Contract claimed"
        );

        self.emit(MarketEvent::ContractClaimed {
            contract_id,
            job_id,
            contributor_id,
            reward_locked: contract.reward_locked,
        });

        Ok(contract)
    }

    // ========== Lifecycle transitions ==========

    /// Link a pull request and move the contract to `UnderReview`.
    /// Valid only from `InProgress`.
    pub async fn submit_for_review(
        &self,
        contract_id: ContractId,
        pr_reference: impl Into<String>,
    ) -> Result<Contract> {
        let pr_reference = pr_reference.into();
        let mut contracts = self.contracts.write().await;
        let contract = contracts
            .get_mut(&contract_id)
            .ok_or(MarketError::ContractNotFound(contract_id))?;

        contract.transition_to(ContractState::UnderReview)?;
        contract.pr_reference = Some(pr_reference.clone());

        info!(
            contract_id = contract_id,
            job_id = %contract.job_id,
            pr_reference = %pr_reference,
            "Contract submitted for review"
        );

        let contract = contract.clone();
        drop(contracts);

        self.emit(MarketEvent::ContractSubmitted {
            contract_id,
            pr_reference,
        });
        Ok(contract)
    }

    /// Settle a contract: pay the locked reward and mark it `Completed`.
    ///
    /// Called by the settlement watcher after external verification. Valid
    /// from `UnderReview` or `InProgress` (an authoritative merge event may
    /// arrive before an explicit review submission). Idempotent: completing
    /// an already-completed contract pays nothing and returns it unchanged.
    ///
    /// The payout and the state flip happen under the contract store's write
    /// lock, so no reader ever observes one without the other.
    pub async fn complete(
        &self,
        contract_id: ContractId,
        payment_reference: impl Into<String>,
        pr_reference: Option<String>,
    ) -> Result<Contract> {
        let payment_reference = payment_reference.into();
        let mut contracts = self.contracts.write().await;
        let contract = contracts
            .get_mut(&contract_id)
            .ok_or(MarketError::ContractNotFound(contract_id))?;

        // Duplicate settlement signal: safe no-op, never a double payment
        if contract.state == ContractState::Completed {
            info!(
                contract_id = contract_id,
                "Duplicate completion ignored; contract already settled"
            );
            return Ok(contract.clone());
        }

        if !contract.state.can_transition_to(&ContractState::Completed) {
            return Err(MarketError::InvalidStateTransition {
                from: contract.state,
                to: ContractState::Completed,
            });
        }

        // Settlement needs somewhere to send the tokens. The contract stays
        // in its current state; the caller retries once a handle is set.
        let handle_present = {
            let contributors = self.contributors.read().await;
            contributors
                .get(&contract.contributor_id)
                .map(|c| c.payment_handle.is_some())
                .unwrap_or(false)
        };
        if !handle_present {
            return Err(MarketError::MissingPaymentHandle(
                contract.contributor_id.clone(),
            ));
        }

        self.ledger
            .pay(contract.reward_locked, Some(contract_id))
            .await?;
        contract.transition_to(ContractState::Completed)?;
        contract.completed_at = Some(Utc::now().timestamp());
        contract.payment_reference = Some(payment_reference.clone());
        if let Some(pr) = pr_reference {
            if let Some(existing) = &contract.pr_reference {
                if existing != &pr {
                    warn!(
                        contract_id = contract_id,
                        linked = %existing,
                        merged = %pr,
                        "Merged PR differs from the linked one; settling on the merge event"
                    );
                }
            }
            contract.pr_reference = Some(pr);
        }

        info!(
            contract_id = contract_id,
            job_id = %contract.job_id,
            amount_paid = %contract.reward_locked,
            payment_reference = %payment_reference,
            "✅ Contract completed"
        );

        let contract = contract.clone();
        drop(contracts);

        self.emit(MarketEvent::ContractCompleted {
            contract_id,
            job_id: contract.job_id.clone(),
            amount_paid: contract.reward_locked,
            payment_reference,
        });
        Ok(contract)
    }

    /// Cancel a contract and return its reservation to the pool.
    ///
    /// Idempotent: cancelling an already-terminal contract is a no-op
    /// success, tolerating duplicate external cancellation signals. A
    /// cancelled contract frees the job for a new claim.
    pub async fn cancel(
        &self,
        contract_id: ContractId,
        reason: impl Into<String>,
    ) -> Result<Contract> {
        let reason = reason.into();
        let mut contracts = self.contracts.write().await;
        let contract = contracts
            .get_mut(&contract_id)
            .ok_or(MarketError::ContractNotFound(contract_id))?;

        if contract.state.is_terminal() {
            info!(
                contract_id = contract_id,
                state = %contract.state,
                "Cancellation of terminal contract ignored"
            );
            return Ok(contract.clone());
        }

        self.ledger
            .release(contract.reward_locked, Some(contract_id))
            .await?;
        contract.transition_to(ContractState::Cancelled)?;
        contract.cancel_reason = Some(reason.clone());

        info!(
            contract_id = contract_id,
            job_id = %contract.job_id,
            reward_released = %contract.reward_locked,
            reason = %reason,
            "Contract cancelled"
        );

        let contract = contract.clone();
        drop(contracts);

        self.emit(MarketEvent::ContractCancelled {
            contract_id,
            job_id: contract.job_id.clone(),
            reason,
        });
        Ok(contract)
    }

    // ========== Contributor administration ==========

    pub async fn register_contributor(
        &self,
        id: ContributorId,
        code_host_username: impl Into<String>,
    ) -> Contributor {
        let mut contributors = self.contributors.write().await;
        contributors
            .entry(id.clone())
            .or_insert_with(|| Contributor::new(id, code_host_username.into()))
            .clone()
    }

    pub async fn set_payment_handle(
        &self,
        id: &ContributorId,
        payment_handle: impl Into<String>,
    ) -> Result<()> {
        let mut contributors = self.contributors.write().await;
        let contributor = contributors
            .get_mut(id)
            .ok_or_else(|| MarketError::ContributorNotFound(id.clone()))?;
        contributor.payment_handle = Some(payment_handle.into());
        Ok(())
    }

    pub async fn get_contributor(&self, id: &ContributorId) -> Option<Contributor> {
        self.contributors.read().await.get(id).cloned()
    }

    // ========== Job administration ==========

    pub async fn add_job(&self, job: Job) -> Result<()> {
        self.catalog.add(job).await
    }

    pub async fn withdraw_job(&self, job_id: &JobId) -> Result<()> {
        self.catalog.withdraw(job_id).await
    }

    /// Edit a job's reward. Rejected once any contract, live or settled,
    /// references the job: the ledger's conservation accounting relies on
    /// the copied `reward_locked`, and a retroactive catalog edit would make
    /// the two diverge.
    pub async fn update_job_reward(&self, job_id: &JobId, reward: TokenAmount) -> Result<()> {
        // Same admission lock as claim_job: without it an edit could slip
        // between a claim's reward read and its reservation
        let admission = self.job_lock(job_id).await;
        let _guard = admission.lock().await;

        {
            let contracts = self.contracts.read().await;
            if contracts.values().any(|c| &c.job_id == job_id) {
                return Err(MarketError::RewardImmutable(job_id.clone()));
            }
        }
        self.catalog.set_reward(job_id, reward).await
    }

    // ========== Read API ==========

    pub async fn get_contract(&self, contract_id: ContractId) -> Option<Contract> {
        self.contracts.read().await.get(&contract_id).cloned()
    }

    pub async fn contracts_by_contributor(
        &self,
        contributor_id: &ContributorId,
    ) -> Vec<Contract> {
        self.contracts
            .read()
            .await
            .values()
            .filter(|c| &c.contributor_id == contributor_id)
            .cloned()
            .collect()
    }

    /// The non-terminal contract a contributor holds on a job, if any.
    pub async fn find_open_contract(
        &self,
        job_id: &JobId,
        contributor_id: &ContributorId,
    ) -> Option<Contract> {
        self.contracts
            .read()
            .await
            .values()
            .find(|c| {
                &c.job_id == job_id
                    && &c.contributor_id == contributor_id
                    && !c.state.is_terminal()
            })
            .cloned()
    }

    /// Jobs that are not withdrawn and have no claim standing against them.
    /// Cancellation puts a job back on the board; completion does not.
    pub async fn list_available_jobs(&self) -> Vec<Job> {
        let jobs = self.catalog.jobs().await;
        let contracts = self.contracts.read().await;

        jobs.into_iter()
            .filter(|job| !job.withdrawn)
            .filter(|job| {
                !contracts
                    .values()
                    .any(|c| c.job_id == job.id && Self::blocks_claim(c.state))
            })
            .collect()
    }

    pub async fn ledger_summary(&self) -> LedgerSummary {
        self.ledger.summary().await
    }

    pub async fn market_stats(&self) -> MarketStats {
        let contracts = self.contracts.read().await;
        let mut stats = MarketStats {
            total_contracts: contracts.len(),
            ..Default::default()
        };
        for contract in contracts.values() {
            match contract.state {
                ContractState::Pending => stats.pending += 1,
                ContractState::InProgress => stats.in_progress += 1,
                ContractState::UnderReview => stats.under_review += 1,
                ContractState::Completed => stats.completed += 1,
                ContractState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    // ========== Internals ==========

    async fn job_lock(&self, job_id: &JobId) -> Arc<Mutex<()>> {
        let mut locks = self.job_locks.lock().await;
        locks
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// A live or settled contract keeps its job off the board; only a
    /// cancelled one frees it for a new claim.
    fn blocks_claim(state: ContractState) -> bool {
        !state.is_terminal() || state == ContractState::Completed
    }

    async fn blocking_contract_for_job(&self, job_id: &JobId) -> Option<Contract> {
        self.contracts
            .read()
            .await
            .values()
            .find(|c| &c.job_id == job_id && Self::blocks_claim(c.state))
            .cloned()
    }

    /// Make sure a contributor record exists for a successful claimant and
    /// cache the registry's acceptance timestamp on it. The code-host
    /// username defaults to the id until properly registered.
    async fn note_contributor(&self, id: &ContributorId, cla_accepted_at: i64) {
        let mut contributors = self.contributors.write().await;
        let contributor = contributors
            .entry(id.clone())
            .or_insert_with(|| Contributor::new(id.clone(), id.as_str()));
        contributor.cla_accepted_at.get_or_insert(cla_accepted_at);
    }

    fn emit(&self, event: MarketEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(e) = tx.send(event) {
                warn!(error = %e, "Failed to emit market event");
            }
        }
    }
}
