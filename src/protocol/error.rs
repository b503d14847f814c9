use thiserror::Error;

use super::ledger::{Amount, LedgerError};

/// Why a seed request failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    /// Balance cannot cover the oracle fee plus the safety margin. Nothing was sent.
    #[error("insufficient funds: balance {balance} is below the required {required}")]
    InsufficientFunds { balance: Amount, required: Amount },
    /// Wallet declined to sign or the ledger rejected the transaction
    #[error("request rejected: {0}")]
    RequestRejected(String),
    /// Confirmed receipt has no request-accepted event. Not retried.
    #[error("confirmation receipt carries no correlation id")]
    CorrelationMissing,
    #[error("oracle did not fulfil the request within {attempts} polls")]
    OracleTimeout { attempts: u32 },
    #[error("ledger query failed: {0}")]
    LedgerQueryFailure(LedgerError),
    /// A newer request (or an explicit cancel) replaced this one
    #[error("request superseded")]
    Superseded,
    #[error("no request in flight")]
    NotStarted,
}

impl AcquisitionError {
    /// Whether the player may simply try again
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AcquisitionError::InsufficientFunds { .. })
    }
}

impl From<LedgerError> for AcquisitionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(reason) => AcquisitionError::RequestRejected(reason),
            other => AcquisitionError::LedgerQueryFailure(other),
        }
    }
}
