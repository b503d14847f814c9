//! Seed request lifecycle
//!
//! Each state carries exactly the data that exists at that point, so a seed
//! value outside `Fulfilled` or a correlation id before `Correlating` cannot
//! be expressed.

use serde::Serialize;

use super::error::AcquisitionError;
use super::ledger::{BlockNumber, TransactionRef};
use crate::sim::Seed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Idle,
    Submitted,
    Confirmed,
    Correlating,
    Polling,
    Fulfilled,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SeedRequest {
    #[default]
    Idle,
    Submitted {
        transaction: TransactionRef,
    },
    Confirmed {
        transaction: TransactionRef,
        block: BlockNumber,
    },
    Correlating {
        transaction: TransactionRef,
        block: BlockNumber,
        correlation_id: u64,
    },
    Polling {
        transaction: TransactionRef,
        block: BlockNumber,
        correlation_id: u64,
        attempts: u32,
    },
    Fulfilled {
        transaction: TransactionRef,
        correlation_id: u64,
        seed: Seed,
    },
    Failed {
        transaction: Option<TransactionRef>,
        reason: AcquisitionError,
    },
}

impl SeedRequest {
    pub fn status(&self) -> RequestStatus {
        match self {
            SeedRequest::Idle => RequestStatus::Idle,
            SeedRequest::Submitted { .. } => RequestStatus::Submitted,
            SeedRequest::Confirmed { .. } => RequestStatus::Confirmed,
            SeedRequest::Correlating { .. } => RequestStatus::Correlating,
            SeedRequest::Polling { .. } => RequestStatus::Polling,
            SeedRequest::Fulfilled { .. } => RequestStatus::Fulfilled,
            SeedRequest::Failed { .. } => RequestStatus::Failed,
        }
    }

    pub fn transaction_ref(&self) -> Option<&TransactionRef> {
        match self {
            SeedRequest::Idle => None,
            SeedRequest::Submitted { transaction }
            | SeedRequest::Confirmed { transaction, .. }
            | SeedRequest::Correlating { transaction, .. }
            | SeedRequest::Polling { transaction, .. }
            | SeedRequest::Fulfilled { transaction, .. } => Some(transaction),
            SeedRequest::Failed { transaction, .. } => transaction.as_ref(),
        }
    }

    pub fn correlation_id(&self) -> Option<u64> {
        match self {
            SeedRequest::Correlating { correlation_id, .. }
            | SeedRequest::Polling { correlation_id, .. }
            | SeedRequest::Fulfilled { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        }
    }

    pub fn seed_value(&self) -> Option<&Seed> {
        match self {
            SeedRequest::Fulfilled { seed, .. } => Some(seed),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&AcquisitionError> {
        match self {
            SeedRequest::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SeedRequest::Fulfilled { .. } | SeedRequest::Failed { .. })
    }

    /// Move to `Failed`, keeping the transaction handle if one exists
    pub(crate) fn into_failed(self, reason: AcquisitionError) -> Self {
        SeedRequest::Failed {
            transaction: self.transaction_ref().cloned(),
            reason,
        }
    }
}
