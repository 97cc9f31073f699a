use bounty_economics::TokenAmount;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable job identifier, e.g. an issue reference like `repo#42`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Contributor identifier unifying a code-host account and a payment handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContributorId(String);

impl ContributorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContributorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContributorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Contract identifier assigned from the claim service's monotonic counter
pub type ContractId = u64;

/// Reporting category; affects nothing functionally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobCategory {
    Major,
    Minor,
    Maintenance,
}

/// Immutable catalog entry describing a unit of work and its fixed reward.
///
/// Jobs are never deleted; withdrawn jobs keep their history and simply stop
/// being claimable. The reward becomes immutable as soon as any contract
/// references the job (enforced by the claim service's admin path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub description: String,
    /// Fixed reward in token micro-units; always positive
    pub reward: TokenAmount,
    pub category: JobCategory,
    pub withdrawn: bool,
    pub created_at: i64,
}

impl Job {
    pub fn new(
        id: JobId,
        title: impl Into<String>,
        description: impl Into<String>,
        reward: TokenAmount,
        category: JobCategory,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
            reward,
            category,
            withdrawn: false,
            created_at: Utc::now().timestamp(),
        }
    }
}

/// Contributor identity: code-host account plus optional payment handle.
///
/// The payment handle must be set before any contract owned by this
/// contributor can settle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contributor {
    pub id: ContributorId,
    pub code_host_username: String,
    pub payment_handle: Option<String>,
    pub cla_accepted_at: Option<i64>,
}

impl Contributor {
    pub fn new(id: ContributorId, code_host_username: impl Into<String>) -> Self {
        Self {
            id,
            code_host_username: code_host_username.into(),
            payment_handle: None,
            cla_accepted_at: None,
        }
    }
}

/// Contract lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractState {
    /// Claim admitted, work not yet started. The current claim flow starts
    /// contracts in `InProgress`; this state is reserved for a
    /// pre-acceptance step.
    Pending,
    /// Contributor is working on the job
    InProgress,
    /// Pull request linked, awaiting merge
    UnderReview,
    /// Settled and paid
    Completed,
    /// Abandoned or rejected; frees the job for a new claim
    Cancelled,
}

impl ContractState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: &Self) -> bool {
        use ContractState::*;
        match (self, next) {
            // From Pending
            (Pending, InProgress) => true,
            (Pending, Cancelled) => true,

            // From InProgress
            (InProgress, UnderReview) => true,
            (InProgress, Completed) => true, // merge event may bypass review
            (InProgress, Cancelled) => true,

            // From UnderReview
            (UnderReview, Completed) => true,
            (UnderReview, Cancelled) => true,

            // Terminal states cannot transition
            (Completed, _) | (Cancelled, _) => false,

            // All other transitions are invalid
            _ => false,
        }
    }
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::UnderReview => "under_review",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One contributor's claim on one job.
///
/// `reward_locked` is copied from the job at claim time so the ledger's
/// conservation accounting never depends on a catalog field that could be
/// edited retroactively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub job_id: JobId,
    pub contributor_id: ContributorId,
    pub reward_locked: TokenAmount,
    pub state: ContractState,
    pub claimed_at: i64,
    pub pr_reference: Option<String>,
    pub completed_at: Option<i64>,
    pub payment_reference: Option<String>,
    pub cancel_reason: Option<String>,
}

impl Contract {
    pub fn new(id: ContractId, job: &Job, contributor_id: ContributorId) -> Self {
        Self {
            id,
            job_id: job.id.clone(),
            contributor_id,
            reward_locked: job.reward,
            state: ContractState::InProgress,
            claimed_at: Utc::now().timestamp(),
            pr_reference: None,
            completed_at: None,
            payment_reference: None,
            cancel_reason: None,
        }
    }

    /// Transition to a new state with FSM validation.
    ///
    /// Use this instead of direct state assignment so invalid transitions are
    /// rejected uniformly.
    pub fn transition_to(&mut self, next: ContractState) -> crate::error::Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(crate::error::MarketError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }

        tracing::debug!(
            contract_id = self.id,
            job_id = %self.job_id,
            from = %self.state,
            to = %next,
            "Contract state transition"
        );

        self.state = next;
        Ok(())
    }
}

/// Event emitted by the claim service after a successful mutation, for
/// read-model refresh or any other listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    ContractClaimed {
        contract_id: ContractId,
        job_id: JobId,
        contributor_id: ContributorId,
        reward_locked: TokenAmount,
    },
    ContractSubmitted {
        contract_id: ContractId,
        pr_reference: String,
    },
    ContractCompleted {
        contract_id: ContractId,
        job_id: JobId,
        amount_paid: TokenAmount,
        payment_reference: String,
    },
    ContractCancelled {
        contract_id: ContractId,
        job_id: JobId,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> Job {
        Job::new(
            JobId::from("repo#1"),
            "Fix parser",
            "Fix the parser bug",
            TokenAmount::from_micro(2_500_000),
            JobCategory::Minor,
        )
    }

    #[test]
    fn test_terminal_states() {
        assert!(ContractState::Completed.is_terminal());
        assert!(ContractState::Cancelled.is_terminal());
        assert!(!ContractState::Pending.is_terminal());
        assert!(!ContractState::InProgress.is_terminal());
        assert!(!ContractState::UnderReview.is_terminal());
    }

    #[test]
    fn test_valid_transitions() {
        use ContractState::*;
        assert!(Pending.can_transition_to(&InProgress));
        assert!(InProgress.can_transition_to(&UnderReview));
        assert!(InProgress.can_transition_to(&Completed));
        assert!(UnderReview.can_transition_to(&Completed));
        assert!(UnderReview.can_transition_to(&Cancelled));
    }

    #[test]
    fn test_terminal_states_never_transition() {
        use ContractState::*;
        for next in [Pending, InProgress, UnderReview, Completed, Cancelled] {
            assert!(!Completed.can_transition_to(&next));
            assert!(!Cancelled.can_transition_to(&next));
        }
    }

    #[test]
    fn test_contract_copies_reward_at_claim_time() {
        let job = test_job();
        let contract = Contract::new(1, &job, ContributorId::from("alice"));
        assert_eq!(contract.reward_locked, job.reward);
        assert_eq!(contract.state, ContractState::InProgress);
    }

    #[test]
    fn test_guarded_transition_rejects_skips() {
        let job = test_job();
        let mut contract = Contract::new(1, &job, ContributorId::from("alice"));

        // Review before completion is fine
        contract.transition_to(ContractState::UnderReview).unwrap();
        contract.transition_to(ContractState::Completed).unwrap();

        // Completed is terminal
        assert!(contract.transition_to(ContractState::Cancelled).is_err());
        assert!(contract.transition_to(ContractState::InProgress).is_err());
    }
}
