//! End-to-end integration tests for the contract marketplace.
//!
//! Exercises the full lifecycle from claim admission through review and
//! webhook-driven settlement, and the coordination properties the whole
//! subsystem exists for: per-job mutual exclusion, supply conservation and
//! exactly-once payment.

use bounty_economics::TokenAmount;
use bounty_market::*;
use serde_json::json;
use std::sync::Arc;

/// Test fixture wiring a catalog, CLA registry, ledger and claim service.
struct MarketFixture {
    service: Arc<ClaimService>,
    cla: Arc<InMemoryClaRegistry>,
}

impl MarketFixture {
    async fn new(supply_micro: u64) -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        let config = MarketplaceConfig {
            total_supply_micro: supply_micro,
            repository: "acme/widgets".to_string(),
            ..Default::default()
        };
        let catalog = Arc::new(JobCatalog::new());
        let cla = Arc::new(InMemoryClaRegistry::new());
        let ledger = Arc::new(config.build_ledger());
        let service = Arc::new(ClaimService::new(catalog, cla.clone(), ledger));
        Self { service, cla }
    }

    async fn add_job(&self, id: &str, reward_micro: u64) {
        self.service
            .add_job(Job::new(
                JobId::from(id),
                format!("job {id}"),
                "do the work",
                TokenAmount::from_micro(reward_micro),
                JobCategory::Major,
            ))
            .await
            .unwrap();
    }

    async fn onboard(&self, contributor: &str, handle: Option<&str>) {
        let id = ContributorId::from(contributor);
        self.cla.accept(id.clone()).await;
        self.service
            .register_contributor(id.clone(), contributor)
            .await;
        if let Some(handle) = handle {
            self.service.set_payment_handle(&id, handle).await.unwrap();
        }
    }

    /// Sum of `reward_locked` over non-cancelled contracts, for checking
    /// conservation against the ledger's `locked`.
    async fn locked_sum(&self, contributors: &[&str]) -> TokenAmount {
        let mut sum = TokenAmount::ZERO;
        for contributor in contributors {
            for contract in self
                .service
                .contracts_by_contributor(&ContributorId::from(*contributor))
                .await
            {
                if contract.state != ContractState::Cancelled {
                    sum = sum.saturating_add(contract.reward_locked);
                }
            }
        }
        sum
    }
}

/// N concurrent claims on one job produce exactly one contract
#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let fx = MarketFixture::new(100_000_000).await;
    fx.add_job("repo#1", 1_000_000).await;

    let contributors: Vec<String> = (0..32).map(|i| format!("dev{i}")).collect();
    for contributor in &contributors {
        fx.onboard(contributor, None).await;
    }

    let mut handles = Vec::new();
    for contributor in &contributors {
        let service = fx.service.clone();
        let contributor = ContributorId::new(contributor.clone());
        handles.push(tokio::spawn(async move {
            service.claim_job(JobId::from("repo#1"), contributor).await
        }));
    }

    let mut winners = 0;
    let mut already_claimed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(MarketError::JobAlreadyClaimed(_)) => already_claimed += 1,
            Err(e) => panic!("unexpected claim error: {e}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(already_claimed, 31);

    // Exactly one reservation was taken
    let summary = fx.service.ledger_summary().await;
    assert_eq!(summary.locked, TokenAmount::from_micro(1_000_000));
    assert_eq!(fx.service.market_stats().await.total_contracts, 1);
}

/// Ledger totals always equal the sums over contract states
#[tokio::test]
async fn test_conservation_across_lifecycle() {
    let fx = MarketFixture::new(10_000_000).await;
    fx.add_job("repo#1", 2_000_000).await;
    fx.add_job("repo#2", 3_000_000).await;
    fx.add_job("repo#3", 1_000_000).await;
    fx.onboard("alice", Some("$alice")).await;
    fx.onboard("bob", Some("$bob")).await;

    let c1 = fx
        .service
        .claim_job(JobId::from("repo#1"), ContributorId::from("alice"))
        .await
        .unwrap();
    let c2 = fx
        .service
        .claim_job(JobId::from("repo#2"), ContributorId::from("bob"))
        .await
        .unwrap();
    let c3 = fx
        .service
        .claim_job(JobId::from("repo#3"), ContributorId::from("alice"))
        .await
        .unwrap();

    let contributors = ["alice", "bob"];
    let summary = fx.service.ledger_summary().await;
    assert_eq!(summary.locked, fx.locked_sum(&contributors).await);
    assert_eq!(summary.paid, TokenAmount::ZERO);

    // Settle one, cancel one, leave one in flight
    fx.service
        .submit_for_review(c1.id, "#10")
        .await
        .unwrap();
    fx.service.complete(c1.id, "pay-1", None).await.unwrap();
    fx.service.cancel(c2.id, "abandoned").await.unwrap();

    let summary = fx.service.ledger_summary().await;
    assert_eq!(summary.locked, fx.locked_sum(&contributors).await);
    assert_eq!(summary.locked, TokenAmount::from_micro(3_000_000)); // c1 + c3
    assert_eq!(summary.paid, TokenAmount::from_micro(2_000_000)); // c1 only
    assert!(!summary.halted);

    // And after the last one settles
    fx.service.complete(c3.id, "pay-3", None).await.unwrap();
    let summary = fx.service.ledger_summary().await;
    assert_eq!(summary.paid, fx.locked_sum(&contributors).await);
    assert_eq!(summary.paid, summary.locked);
}

/// Claims whose rewards sum past the supply fail with PoolExhausted and the
/// pool never over-locks
#[tokio::test]
async fn test_pool_exhaustion_bounds_claims() {
    let supply = 5_000_000;
    let fx = MarketFixture::new(supply).await;
    for i in 0..8 {
        fx.add_job(&format!("repo#{i}"), 1_000_000).await;
    }
    fx.onboard("alice", None).await;

    let mut admitted = 0;
    let mut exhausted = 0;
    for i in 0..8 {
        match fx
            .service
            .claim_job(JobId::from(format!("repo#{i}").as_str()), ContributorId::from("alice"))
            .await
        {
            Ok(_) => admitted += 1,
            Err(MarketError::PoolExhausted { .. }) => exhausted += 1,
            Err(e) => panic!("unexpected claim error: {e}"),
        }
    }

    assert_eq!(admitted, 5);
    assert_eq!(exhausted, 3);

    let summary = fx.service.ledger_summary().await;
    assert_eq!(summary.locked, TokenAmount::from_micro(supply));
    assert!(summary.locked <= summary.total_supply);
}

/// Spec scenario: claim, review #145, merge, replayed merge
#[tokio::test]
async fn test_full_settlement_scenario() {
    let fx = MarketFixture::new(10_000_000).await;
    fx.add_job("widgets#7", 2_500_000).await;
    fx.onboard("c1", Some("$c1")).await;

    let contract = fx
        .service
        .claim_job(JobId::from("widgets#7"), ContributorId::from("c1"))
        .await
        .unwrap();
    assert_eq!(contract.state, ContractState::InProgress);

    let contract = fx
        .service
        .submit_for_review(contract.id, "#145")
        .await
        .unwrap();
    assert_eq!(contract.state, ContractState::UnderReview);

    let (tx, mut watcher) = SettlementWatcher::channel(fx.service.clone());
    let merge = SettlementEvent {
        kind: SettlementEventKind::PrMerged,
        job_id: JobId::from("widgets#7"),
        contributor_id: ContributorId::from("c1"),
        pr_reference: "#145".to_string(),
    };
    tx.send(merge.clone()).unwrap();
    tx.send(merge).unwrap(); // at-least-once delivery replays the event
    drop(tx);

    let stats = watcher.run().await.unwrap();
    assert_eq!(stats.settled, 1);
    assert_eq!(stats.ignored, 1);

    let settled = fx.service.get_contract(contract.id).await.unwrap();
    assert_eq!(settled.state, ContractState::Completed);
    assert!(settled.completed_at.is_some());
    assert!(settled.payment_reference.is_some());

    let summary = fx.service.ledger_summary().await;
    assert_eq!(summary.paid, TokenAmount::from_micro(2_500_000));
}

/// Spec scenario: contributor without a CLA is rejected with nothing mutated
#[tokio::test]
async fn test_claim_without_cla_leaves_no_trace() {
    let fx = MarketFixture::new(10_000_000).await;
    fx.add_job("repo#2", 1_000_000).await;

    let err = fx
        .service
        .claim_job(JobId::from("repo#2"), ContributorId::from("c2"))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::ClaNotAccepted(_)));

    assert_eq!(fx.service.market_stats().await.total_contracts, 0);
    let summary = fx.service.ledger_summary().await;
    assert_eq!(summary.locked, TokenAmount::ZERO);
    assert_eq!(summary.paid, TokenAmount::ZERO);
    assert_eq!(fx.service.list_available_jobs().await.len(), 1);
}

/// Raw webhook payloads drive the watcher end to end
#[tokio::test]
async fn test_webhook_to_settlement_pipeline() {
    let fx = MarketFixture::new(10_000_000).await;
    fx.add_job("widgets#42", 1_000_000).await;
    fx.onboard("alice", Some("$alice")).await;

    fx.service
        .claim_job(JobId::from("widgets#42"), ContributorId::from("alice"))
        .await
        .unwrap();

    let payload = json!({
        "action": "closed",
        "repository": {"full_name": "acme/widgets"},
        "pull_request": {
            "number": 145,
            "merged": true,
            "user": {"login": "alice"},
            "body": "Closes #42",
            "head": {"ref": "issue-42-fix"},
        },
    });

    let event = map_webhook("acme/widgets", &payload).unwrap().unwrap();
    let (_tx, mut watcher) = SettlementWatcher::channel(fx.service.clone());
    watcher.handle_event(event).await.unwrap();

    let summary = fx.service.ledger_summary().await;
    assert_eq!(summary.paid, TokenAmount::from_micro(1_000_000));

    let contracts = fx
        .service
        .contracts_by_contributor(&ContributorId::from("alice"))
        .await;
    assert_eq!(contracts.len(), 1);
    assert_eq!(contracts[0].state, ContractState::Completed);
    assert_eq!(contracts[0].pr_reference.as_deref(), Some("#145"));
}

/// Read API stays consistent while contracts move through their lifecycle
#[tokio::test]
async fn test_read_api_views() {
    let fx = MarketFixture::new(10_000_000).await;
    fx.add_job("repo#1", 1_000_000).await;
    fx.add_job("repo#2", 1_000_000).await;
    fx.onboard("alice", Some("$alice")).await;

    assert_eq!(fx.service.list_available_jobs().await.len(), 2);

    let contract = fx
        .service
        .claim_job(JobId::from("repo#1"), ContributorId::from("alice"))
        .await
        .unwrap();

    assert_eq!(fx.service.list_available_jobs().await.len(), 1);
    let stats = fx.service.market_stats().await;
    assert_eq!(stats.in_progress, 1);
    assert_eq!(stats.total_contracts, 1);

    fx.service.complete(contract.id, "pay-1", None).await.unwrap();

    // Completed jobs do not come back on the board
    assert_eq!(fx.service.list_available_jobs().await.len(), 1);
    let stats = fx.service.market_stats().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.in_progress, 0);

    let contributor = fx
        .service
        .get_contributor(&ContributorId::from("alice"))
        .await
        .unwrap();
    assert!(contributor.cla_accepted_at.is_some());
}
