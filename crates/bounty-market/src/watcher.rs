//! Settlement Watcher
//!
//! External-event adapter between GitHub and the claim service. Consumes
//! pull-request outcome events from an inbound queue, resolves the matching
//! live contract and requests the corresponding state transition.
//!
//! Delivery is at-least-once and possibly out of order, so the watcher leans
//! on the claim service's guards rather than on event ordering: a replayed
//! `PrMerged` against a settled contract is a no-op, and a stale
//! `PrClosedUnmerged` arriving after settlement finds no live contract to
//! cancel.

use crate::claim::ClaimService;
use crate::error::MarketError;
use crate::types::{ContributorId, JobId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementEventKind {
    /// The contributor's pull request merged; settle the contract
    PrMerged,
    /// The pull request closed without merging; cancel the contract
    PrClosedUnmerged,
}

/// Externally-delivered pull-request outcome, already mapped to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub kind: SettlementEventKind,
    pub job_id: JobId,
    pub contributor_id: ContributorId,
    pub pr_reference: String,
}

/// Counters over everything the watcher has consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub delivered: u64,
    pub settled: u64,
    pub cancelled: u64,
    /// Events with no live contract or rejected by a transition guard
    pub ignored: u64,
    /// Settlements deferred until the contributor supplies a payment handle
    pub deferred: u64,
}

pub struct SettlementWatcher {
    service: Arc<ClaimService>,
    rx: mpsc::UnboundedReceiver<SettlementEvent>,
    stats: WatcherStats,
}

impl SettlementWatcher {
    /// Create a watcher and the sender its events are delivered on.
    pub fn channel(service: Arc<ClaimService>) -> (mpsc::UnboundedSender<SettlementEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                service,
                rx,
                stats: WatcherStats::default(),
            },
        )
    }

    pub fn stats(&self) -> WatcherStats {
        self.stats
    }

    /// Consume events until every sender is dropped.
    ///
    /// Recoverable failures are logged and skipped; a fatal ledger error
    /// stops the loop, since no settlement may proceed past a conservation
    /// breach.
    pub async fn run(&mut self) -> crate::error::Result<WatcherStats> {
        while let Some(event) = self.rx.recv().await {
            self.handle_event(event).await?;
        }
        info!(stats = ?self.stats, "Settlement watcher drained its queue");
        Ok(self.stats)
    }

    /// Process one event. Returns an error only on fatal ledger breaches.
    pub async fn handle_event(&mut self, event: SettlementEvent) -> crate::error::Result<()> {
        self.stats.delivered += 1;

        let contract = match self
            .service
            .find_open_contract(&event.job_id, &event.contributor_id)
            .await
        {
            Some(contract) => contract,
            None => {
                // Replay against a settled contract, or an event for a pair
                // that never claimed; both are safe to drop
                debug!(
                    job_id = %event.job_id,
                    contributor_id = %event.contributor_id,
                    kind = ?event.kind,
                    "No live contract for event; ignoring"
                );
                self.stats.ignored += 1;
                return Ok(());
            }
        };

        match event.kind {
            SettlementEventKind::PrMerged => {
                let payment_reference = format!("merge:{}", event.pr_reference);
                match self
                    .service
                    .complete(contract.id, payment_reference, Some(event.pr_reference.clone()))
                    .await
                {
                    Ok(_) => {
                        self.stats.settled += 1;
                    }
                    Err(MarketError::MissingPaymentHandle(contributor_id)) => {
                        // Left for redelivery once the contributor links a
                        // payment handle
                        warn!(
                            contract_id = contract.id,
                            contributor_id = %contributor_id,
                            pr_reference = %event.pr_reference,
                            "Settlement deferred: no payment handle"
                        );
                        self.stats.deferred += 1;
                    }
                    Err(e) if e.is_fatal() => {
                        error!(
                            contract_id = contract.id,
                            error = %e,
                            "Fatal ledger error during settlement; stopping watcher"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(
                            contract_id = contract.id,
                            error = %e,
                            "Settlement rejected"
                        );
                        self.stats.ignored += 1;
                    }
                }
            }
            SettlementEventKind::PrClosedUnmerged => {
                let reason = format!("pr closed without merge: {}", event.pr_reference);
                match self.service.cancel(contract.id, reason).await {
                    Ok(_) => {
                        self.stats.cancelled += 1;
                    }
                    Err(e) if e.is_fatal() => {
                        error!(
                            contract_id = contract.id,
                            error = %e,
                            "Fatal ledger error during cancellation; stopping watcher"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(
                            contract_id = contract.id,
                            error = %e,
                            "Cancellation rejected"
                        );
                        self.stats.ignored += 1;
                    }
                }
            }
        }

        Ok(())
    }
}
