//! # Bounty Market
//!
//! Contract claim and reward settlement engine: a fixed pool of reward
//! tokens divided into named jobs, each claimable by exactly one contributor,
//! gated by a signed CLA and settled exactly once when the contributor's
//! pull request merges.
//!
//! ## Architecture
//!
//! - **Job Catalog**: read-mostly list of jobs with fixed rewards
//! - **CLA Registry**: read-only acceptance check, fail-closed at the gate
//! - **Claim Service**: the coordination core and single writer of contract
//!   state; per-job mutual exclusion over claim admission
//! - **Settlement Watcher**: maps at-least-once, possibly out-of-order
//!   GitHub events to idempotent lifecycle transitions
//! - **Token Pool Ledger** (in `bounty-economics`): conservation of the
//!   capped reward supply across reserve, release and pay
//!
//! ## Flows
//!
//! Claims run UI → [`ClaimService`] → ledger; settlement runs webhook →
//! [`map_webhook`] → [`SettlementWatcher`] → [`ClaimService`] → ledger.
//! Everything else only reads.

pub mod catalog;
pub mod cla;
pub mod claim;
pub mod config;
pub mod error;
pub mod types;
pub mod watcher;
pub mod webhook;

pub use catalog::JobCatalog;
pub use cla::{ClaRegistry, InMemoryClaRegistry};
pub use claim::{ClaimService, MarketStats};
pub use config::MarketplaceConfig;
pub use error::{MarketError, Result};
pub use types::{
    Contract, ContractId, ContractState, Contributor, ContributorId, Job, JobCategory, JobId,
    MarketEvent,
};
pub use watcher::{SettlementEvent, SettlementEventKind, SettlementWatcher, WatcherStats};
pub use webhook::map_webhook;
