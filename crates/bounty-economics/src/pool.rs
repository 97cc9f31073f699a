use crate::types::{LedgerEntry, LedgerEntryKind, TokenAmount};
use crate::{LedgerError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Point-in-time view of the pool, safe to hand to any reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSummary {
    pub total_supply: TokenAmount,
    pub locked: TokenAmount,
    pub paid: TokenAmount,
    pub available: TokenAmount,
    pub halted: bool,
}

#[derive(Debug)]
struct PoolState {
    locked: TokenAmount,
    paid: TokenAmount,
    /// Set on the first invariant breach; no mutation is admitted afterwards.
    halted: bool,
    history: Vec<LedgerEntry>,
}

/// Capped reward pool for contract settlement.
///
/// A singleton per token symbol. Tracks the fixed total supply set aside for
/// contracts, the amount locked against in-flight or completed contracts, and
/// the amount actually paid out. All mutations go through [`reserve`],
/// [`release`] and [`pay`]; each is atomic with respect to concurrent callers.
///
/// Invariants: `locked <= total_supply` and `paid <= locked` at all times.
/// A breach is a bug in the caller, not an expected condition: the ledger
/// records it, refuses all further mutation and surfaces
/// [`LedgerError::InvariantViolation`].
///
/// [`reserve`]: TokenPoolLedger::reserve
/// [`release`]: TokenPoolLedger::release
/// [`pay`]: TokenPoolLedger::pay
pub struct TokenPoolLedger {
    total_supply: TokenAmount,
    history_limit: usize,
    state: Arc<RwLock<PoolState>>,
}

impl TokenPoolLedger {
    pub fn new(total_supply: TokenAmount) -> Self {
        Self::with_history_limit(total_supply, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(total_supply: TokenAmount, history_limit: usize) -> Self {
        Self {
            total_supply,
            history_limit,
            state: Arc::new(RwLock::new(PoolState {
                locked: TokenAmount::ZERO,
                paid: TokenAmount::ZERO,
                halted: false,
                history: Vec::new(),
            })),
        }
    }

    pub fn total_supply(&self) -> TokenAmount {
        self.total_supply
    }

    /// Lock `amount` against a new contract.
    ///
    /// Fails with [`LedgerError::InsufficientSupply`] when the pool cannot
    /// cover the reservation; the pool is left untouched.
    pub async fn reserve(&self, amount: TokenAmount, contract_id: Option<u64>) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        self.check_not_halted(&state)?;

        let new_locked = state
            .locked
            .checked_add(amount)
            .ok_or_else(|| self.breach(&mut state, "locked amount overflow"))?;

        if new_locked > self.total_supply {
            return Err(LedgerError::InsufficientSupply {
                required: amount,
                available: self.total_supply.saturating_sub(state.locked),
            });
        }

        state.locked = new_locked;
        Self::record(&mut state, self.history_limit, LedgerEntryKind::Reserve, amount, contract_id);

        info!(
            amount = %amount,
            locked = %state.locked,
            total_supply = %self.total_supply,
            contract_id = ?contract_id,
            "🔒 Reward reserved"
        );
        Ok(())
    }

    /// Return a reservation to the pool (contract cancelled).
    ///
    /// Releasing more than is locked means conservation has already broken;
    /// that is surfaced as a fatal invariant violation, never clamped.
    pub async fn release(&self, amount: TokenAmount, contract_id: Option<u64>) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        self.check_not_halted(&state)?;

        let unpaid_locked = state.locked.saturating_sub(state.paid);
        if amount > unpaid_locked {
            return Err(self.breach(
                &mut state,
                format!(
                    "release of {} exceeds unpaid locked amount {}",
                    amount, unpaid_locked
                ),
            ));
        }

        state.locked = state.locked.saturating_sub(amount);
        Self::record(&mut state, self.history_limit, LedgerEntryKind::Release, amount, contract_id);

        info!(
            amount = %amount,
            locked = %state.locked,
            contract_id = ?contract_id,
            "🔓 Reservation released"
        );
        Ok(())
    }

    /// Record a payout against a previously reserved amount.
    ///
    /// Payment can never exceed what was reserved; exceeding it is a fatal
    /// invariant violation.
    pub async fn pay(&self, amount: TokenAmount, contract_id: Option<u64>) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        self.check_not_halted(&state)?;

        let new_paid = state
            .paid
            .checked_add(amount)
            .ok_or_else(|| self.breach(&mut state, "paid amount overflow"))?;

        if new_paid > state.locked {
            let detail = format!(
                "payment of {} would bring paid to {} against locked {}",
                amount, new_paid, state.locked
            );
            return Err(self.breach(&mut state, detail));
        }

        state.paid = new_paid;
        Self::record(&mut state, self.history_limit, LedgerEntryKind::Pay, amount, contract_id);

        info!(
            amount = %amount,
            paid = %state.paid,
            locked = %state.locked,
            contract_id = ?contract_id,
            "💸 Reward paid"
        );
        Ok(())
    }

    pub async fn summary(&self) -> LedgerSummary {
        let state = self.state.read().await;
        LedgerSummary {
            total_supply: self.total_supply,
            locked: state.locked,
            paid: state.paid,
            available: self.total_supply.saturating_sub(state.locked),
            halted: state.halted,
        }
    }

    pub async fn is_halted(&self) -> bool {
        self.state.read().await.halted
    }

    /// Most recent audit entries, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<LedgerEntry> {
        let state = self.state.read().await;
        let start = state.history.len().saturating_sub(limit);
        state.history[start..].to_vec()
    }

    fn check_not_halted(&self, state: &PoolState) -> Result<()> {
        if state.halted {
            return Err(LedgerError::Halted);
        }
        Ok(())
    }

    /// Mark the pool halted and produce the fatal error describing why.
    fn breach(&self, state: &mut PoolState, detail: impl Into<String>) -> LedgerError {
        let detail = detail.into();
        state.halted = true;
        error!(
            locked = %state.locked,
            paid = %state.paid,
            total_supply = %self.total_supply,
            detail = %detail,
            "Ledger invariant violated; halting all further mutation"
        );
        LedgerError::InvariantViolation(detail)
    }

    fn record(
        state: &mut PoolState,
        limit: usize,
        kind: LedgerEntryKind,
        amount: TokenAmount,
        contract_id: Option<u64>,
    ) {
        state.history.push(LedgerEntry {
            kind,
            amount,
            contract_id,
            timestamp: chrono::Utc::now().timestamp(),
        });
        // Bound history growth; drop the oldest tenth when full
        if state.history.len() > limit {
            let drop = (limit / 10).max(1);
            state.history.drain(0..drop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reserve_within_supply() {
        let ledger = TokenPoolLedger::new(TokenAmount::from_micro(10_000_000));

        ledger
            .reserve(TokenAmount::from_micro(4_000_000), Some(1))
            .await
            .unwrap();

        let summary = ledger.summary().await;
        assert_eq!(summary.locked, TokenAmount::from_micro(4_000_000));
        assert_eq!(summary.available, TokenAmount::from_micro(6_000_000));
        assert!(!summary.halted);
    }

    #[tokio::test]
    async fn test_reserve_exhaustion() {
        let ledger = TokenPoolLedger::new(TokenAmount::from_micro(5_000_000));

        ledger
            .reserve(TokenAmount::from_micro(4_000_000), Some(1))
            .await
            .unwrap();

        let err = ledger
            .reserve(TokenAmount::from_micro(2_000_000), Some(2))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientSupply { .. }));

        // Failed reservation leaves the pool untouched and not halted
        let summary = ledger.summary().await;
        assert_eq!(summary.locked, TokenAmount::from_micro(4_000_000));
        assert!(!summary.halted);
    }

    #[tokio::test]
    async fn test_release_and_reclaim() {
        let ledger = TokenPoolLedger::new(TokenAmount::from_micro(5_000_000));

        ledger
            .reserve(TokenAmount::from_micro(5_000_000), Some(1))
            .await
            .unwrap();
        ledger
            .release(TokenAmount::from_micro(5_000_000), Some(1))
            .await
            .unwrap();

        // Freed supply is claimable again
        ledger
            .reserve(TokenAmount::from_micro(3_000_000), Some(2))
            .await
            .unwrap();
        assert_eq!(
            ledger.summary().await.locked,
            TokenAmount::from_micro(3_000_000)
        );
    }

    #[tokio::test]
    async fn test_over_release_halts_ledger() {
        let ledger = TokenPoolLedger::new(TokenAmount::from_micro(5_000_000));

        ledger
            .reserve(TokenAmount::from_micro(1_000_000), Some(1))
            .await
            .unwrap();

        let err = ledger
            .release(TokenAmount::from_micro(2_000_000), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
        assert!(ledger.is_halted().await);

        // Halted ledger admits no further mutation
        let err = ledger
            .reserve(TokenAmount::from_micro(1), Some(2))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Halted));
    }

    #[tokio::test]
    async fn test_pay_requires_reservation() {
        let ledger = TokenPoolLedger::new(TokenAmount::from_micro(5_000_000));

        ledger
            .reserve(TokenAmount::from_micro(2_000_000), Some(1))
            .await
            .unwrap();
        ledger
            .pay(TokenAmount::from_micro(2_000_000), Some(1))
            .await
            .unwrap();

        // Paying beyond what is locked is a conservation breach
        let err = ledger
            .pay(TokenAmount::from_micro(1), Some(2))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
        assert!(ledger.is_halted().await);
    }

    #[tokio::test]
    async fn test_release_never_touches_paid_funds() {
        let ledger = TokenPoolLedger::new(TokenAmount::from_micro(5_000_000));

        ledger
            .reserve(TokenAmount::from_micro(2_000_000), Some(1))
            .await
            .unwrap();
        ledger
            .pay(TokenAmount::from_micro(2_000_000), Some(1))
            .await
            .unwrap();

        // Everything locked is already paid; releasing any of it is a breach
        let err = ledger
            .release(TokenAmount::from_micro(1_000_000), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_zero_amount_mutations_are_noops() {
        let ledger = TokenPoolLedger::new(TokenAmount::from_micro(1));

        ledger.reserve(TokenAmount::ZERO, None).await.unwrap();
        ledger.release(TokenAmount::ZERO, None).await.unwrap();
        ledger.pay(TokenAmount::ZERO, None).await.unwrap();

        assert!(ledger.history(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_history_records_mutations() {
        let ledger = TokenPoolLedger::new(TokenAmount::from_micro(10_000_000));

        ledger
            .reserve(TokenAmount::from_micro(1_000_000), Some(7))
            .await
            .unwrap();
        ledger
            .pay(TokenAmount::from_micro(1_000_000), Some(7))
            .await
            .unwrap();

        let history = ledger.history(10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, LedgerEntryKind::Reserve);
        assert_eq!(history[1].kind, LedgerEntryKind::Pay);
        assert_eq!(history[1].contract_id, Some(7));
    }
}
