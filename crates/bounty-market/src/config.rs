use bounty_economics::{TokenAmount, TokenPoolLedger};
use serde::{Deserialize, Serialize};

/// Deployment configuration for one marketplace instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// Token symbol the pool is denominated in
    pub token_symbol: String,
    /// Fixed supply set aside for contracts, in micro-units
    pub total_supply_micro: u64,
    /// Repository the settlement watcher accepts webhooks for (`owner/name`)
    pub repository: String,
    /// Ledger audit history bound
    pub ledger_history_limit: usize,
}

impl MarketplaceConfig {
    pub fn total_supply(&self) -> TokenAmount {
        TokenAmount::from_micro(self.total_supply_micro)
    }

    /// Build the reward pool this deployment settles against.
    pub fn build_ledger(&self) -> TokenPoolLedger {
        TokenPoolLedger::with_history_limit(self.total_supply(), self.ledger_history_limit)
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            token_symbol: "BNTY".to_string(),
            total_supply_micro: 1_000_000 * 1_000_000, // one million tokens
            repository: String::new(),
            ledger_history_limit: 10_000,
        }
    }
}
