use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Native currency amount in the ledger's smallest unit
pub type Amount = u128;
pub type BlockNumber = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account(pub String);

/// Opaque handle to a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionRef(pub String);

impl std::fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contract event as found in a receipt or an event scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub name: String,
    pub block: BlockNumber,
    pub correlation_id: u64,
    /// Event value; for oracle results this is the delivered random number
    pub payload: String,
}

/// Confirmation receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction: TransactionRef,
    pub block: BlockNumber,
    pub events: Vec<LedgerEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Signing declined or the transaction reverted
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
}

// Port for the ledger holding the randomness contract.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Send a randomness request paying `fee`
    async fn submit_request(&self, fee: Amount) -> Result<TransactionRef, LedgerError>;
    async fn await_confirmation(&self, tx: &TransactionRef) -> Result<Receipt, LedgerError>;
    /// Events named `event` in `from..=to` (`to = None` means up to the head)
    async fn scan_events(
        &self,
        event: &str,
        from: BlockNumber,
        to: Option<BlockNumber>,
    ) -> Result<Vec<LedgerEvent>, LedgerError>;
    async fn current_block(&self) -> Result<BlockNumber, LedgerError>;
    /// Oracle fee for one request
    async fn get_fee(&self) -> Result<Amount, LedgerError>;
    async fn get_balance(&self, account: &Account) -> Result<Amount, LedgerError>;
}
