use crate::types::{ContractId, ContractState, ContributorId, JobId};
use bounty_economics::{LedgerError, TokenAmount};
use thiserror::Error;

/// Marketplace error types
#[derive(Error, Debug, Clone)]
pub enum MarketError {
    /// No job with this id exists in the catalog
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The job was withdrawn and is no longer claimable
    #[error("job withdrawn: {0}")]
    JobWithdrawn(JobId),

    /// The contributor has not accepted the CLA (or acceptance could not be
    /// confirmed; unreachable registry fails closed)
    #[error("contributor {0} has not accepted the CLA")]
    ClaNotAccepted(ContributorId),

    /// Another contributor holds a live claim on this job
    #[error("job already claimed: {0}")]
    JobAlreadyClaimed(JobId),

    /// The reward pool cannot cover this claim
    #[error("reward pool exhausted: required {required}, available {available}")]
    PoolExhausted {
        required: TokenAmount,
        available: TokenAmount,
    },

    /// The requested transition is not allowed from the contract's state
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ContractState,
        to: ContractState,
    },

    /// Settlement requires a payment handle on the contributor
    #[error("contributor {0} has no payment handle")]
    MissingPaymentHandle(ContributorId),

    /// No contract with this id exists
    #[error("contract not found: {0}")]
    ContractNotFound(ContractId),

    /// No contributor with this id is registered
    #[error("contributor not found: {0}")]
    ContributorNotFound(ContributorId),

    /// Reward edits are rejected once any contract references the job
    #[error("reward for job {0} is immutable: a contract already references it")]
    RewardImmutable(JobId),

    /// Catalog already holds a job with this id
    #[error("duplicate job id: {0}")]
    DuplicateJob(JobId),

    /// Job rewards must be positive
    #[error("invalid reward for job {0}: must be positive")]
    InvalidReward(JobId),

    /// Ledger failure; invariant violations are fatal and must not be retried
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl MarketError {
    /// Fatal errors signal broken conservation and must halt settlement
    /// rather than be handled as ordinary request failures.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Ledger(LedgerError::InvariantViolation(_)) | Self::Ledger(LedgerError::Halted)
        )
    }
}

/// Result type for marketplace operations
pub type Result<T> = std::result::Result<T, MarketError>;
