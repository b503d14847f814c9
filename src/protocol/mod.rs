//! Seed acquisition from an external randomness oracle
//!
//! The ledger is reached through the [`LedgerClient`] port. A request is
//! submitted, confirmed, correlated with the oracle's sequence number and then
//! polled until the oracle's result event appears.

pub mod acquisition;
pub mod error;
pub mod ledger;
pub mod request;
pub mod testing;

pub use acquisition::{CancelHandle, RequestWatch, SeedAcquisition, required_funds};
pub use error::AcquisitionError;
pub use ledger::{
    Account, Amount, BlockNumber, LedgerClient, LedgerError, LedgerEvent, Receipt, TransactionRef,
};
pub use request::{RequestStatus, SeedRequest};
