//! # Bounty Economics
//!
//! Token amounts and the capped reward pool ledger backing the contract
//! marketplace.
//!
//! The [`TokenPoolLedger`] is the single shared resource mutated by claim,
//! cancellation and settlement flows. It enforces the conservation invariant
//! (`locked <= total_supply`, `paid <= locked`) and halts on the first breach
//! rather than silently continuing.

pub mod pool;
pub mod types;

pub use pool::{LedgerSummary, TokenPoolLedger};
pub use types::{LedgerEntry, LedgerEntryKind, TokenAmount, TOKEN_BASE_UNIT, TOKEN_DECIMALS};

use thiserror::Error;

/// Ledger error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The pool cannot cover the requested reservation
    #[error("insufficient supply: required {required}, available {available}")]
    InsufficientSupply {
        required: TokenAmount,
        available: TokenAmount,
    },

    /// Conservation broke; indicates a bug in the caller, not a user error
    #[error("ledger invariant violation: {0}")]
    InvariantViolation(String),

    /// A previous invariant violation halted the ledger
    #[error("ledger is halted after an invariant violation")]
    Halted,
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;
