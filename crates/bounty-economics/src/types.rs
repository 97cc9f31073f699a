use serde::{Deserialize, Serialize};
use std::fmt;

pub const TOKEN_DECIMALS: u32 = 6;
pub const TOKEN_BASE_UNIT: u64 = 1_000_000; // 10^6 micro-units per token

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenAmount(u64);

impl TokenAmount {
    pub const ZERO: Self = Self(0);

    pub fn from_tokens(tokens: f64) -> Self {
        Self((tokens * TOKEN_BASE_UNIT as f64) as u64)
    }

    pub fn from_micro(units: u64) -> Self {
        Self(units)
    }

    pub fn to_tokens(&self) -> f64 {
        self.0 as f64 / TOKEN_BASE_UNIT as f64
    }

    pub fn to_micro(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.to_tokens())
    }
}

/// Kind of ledger mutation, recorded for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntryKind {
    /// Reward locked against a newly claimed contract
    Reserve,
    /// Reservation returned on cancellation
    Release,
    /// Reward paid out on settlement
    Pay,
}

/// One entry in the ledger's audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub kind: LedgerEntryKind,
    pub amount: TokenAmount,
    /// Contract the mutation was made on behalf of, when known
    pub contract_id: Option<u64>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_conversions() {
        let amount = TokenAmount::from_tokens(2.5);
        assert_eq!(amount.to_micro(), 2_500_000);
        assert_eq!(TokenAmount::from_micro(2_500_000), amount);
        assert!((amount.to_tokens() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = TokenAmount::from_micro(u64::MAX);
        assert!(a.checked_add(TokenAmount::from_micro(1)).is_none());
        assert!(TokenAmount::ZERO.checked_sub(TokenAmount::from_micro(1)).is_none());
        assert_eq!(
            TokenAmount::from_micro(5).saturating_sub(TokenAmount::from_micro(10)),
            TokenAmount::ZERO
        );
    }
}
