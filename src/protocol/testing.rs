//! In-memory ledger with a scripted oracle
//!
//! Used by the protocol tests and the integration suite. The chain head
//! advances by one block on every `current_block` call; oracle results are
//! placed at explicit blocks and found by range scans like on a real chain.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::ledger::{
    Account, Amount, BlockNumber, LedgerClient, LedgerError, LedgerEvent, Receipt, TransactionRef,
};
use crate::config::ProtocolConfig;

/// Chain head when the ledger is created
pub const GENESIS_BLOCK: BlockNumber = 100;
const DEFAULT_FEE: Amount = 100;
const DEFAULT_BALANCE: Amount = 1_000_000;
const AUTO_CORRELATION_BASE: u64 = 1000;

#[derive(Debug)]
struct Script {
    head: BlockNumber,
    fee: Amount,
    balance: Amount,
    reject_next: Option<String>,
    correlations: VecDeque<Option<u64>>,
    pending: HashMap<TransactionRef, Option<u64>>,
    oracle_events: Vec<LedgerEvent>,
    failing_scans: u32,
    submissions: Vec<Amount>,
    scans: Vec<(BlockNumber, BlockNumber)>,
    in_flight: u32,
    max_in_flight: u32,
}

#[derive(Debug)]
pub struct ScriptedLedger {
    script: Mutex<Script>,
    request_event: String,
    result_event: String,
}

impl Default for ScriptedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLedger {
    pub fn new() -> Self {
        let names = ProtocolConfig::default();
        Self {
            script: Mutex::new(Script {
                head: GENESIS_BLOCK,
                fee: DEFAULT_FEE,
                balance: DEFAULT_BALANCE,
                reject_next: None,
                correlations: VecDeque::new(),
                pending: HashMap::new(),
                oracle_events: Vec::new(),
                failing_scans: 0,
                submissions: Vec::new(),
                scans: Vec::new(),
                in_flight: 0,
                max_in_flight: 0,
            }),
            request_event: names.request_event,
            result_event: names.result_event,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_fee(&self, fee: Amount) {
        self.lock().fee = fee;
    }

    pub fn set_balance(&self, balance: Amount) {
        self.lock().balance = balance;
    }

    /// The next confirmed request carries this correlation id
    pub fn correlate_next(&self, correlation_id: u64) {
        self.lock().correlations.push_back(Some(correlation_id));
    }

    /// The next confirmed request's receipt lacks the request-accepted event
    pub fn omit_next_correlation(&self) {
        self.lock().correlations.push_back(None);
    }

    /// The next submission is declined
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.lock().reject_next = Some(reason.into());
    }

    /// The next `n` event scans fail with a query error
    pub fn fail_next_scans(&self, n: u32) {
        self.lock().failing_scans = n;
    }

    /// Oracle fulfils `correlation_id` with `payload` at `block`
    pub fn emit_result(&self, correlation_id: u64, payload: impl Into<String>, block: BlockNumber) {
        let event = LedgerEvent {
            name: self.result_event.clone(),
            block,
            correlation_id,
            payload: payload.into(),
        };
        self.lock().oracle_events.push(event);
    }

    /// Fees paid by accepted submissions
    pub fn submissions(&self) -> Vec<Amount> {
        self.lock().submissions.clone()
    }

    /// Successful scans as `(from, to)` block ranges
    pub fn scans(&self) -> Vec<(BlockNumber, BlockNumber)> {
        self.lock().scans.clone()
    }

    pub fn scan_count(&self) -> usize {
        self.lock().scans.len()
    }

    /// Highest number of scans that were ever in progress at once
    pub fn max_concurrent_scans(&self) -> u32 {
        self.lock().max_in_flight
    }

    pub fn head(&self) -> BlockNumber {
        self.lock().head
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn submit_request(&self, fee: Amount) -> Result<TransactionRef, LedgerError> {
        let mut script = self.lock();
        if let Some(reason) = script.reject_next.take() {
            return Err(LedgerError::Rejected(reason));
        }
        if fee > script.balance {
            return Err(LedgerError::Rejected("fee exceeds balance".into()));
        }
        script.balance -= fee;
        script.submissions.push(fee);

        let n = script.submissions.len() as u64;
        let correlation = script
            .correlations
            .pop_front()
            .unwrap_or(Some(AUTO_CORRELATION_BASE + n));
        let tx = TransactionRef(format!("0x{:064x}", n));
        script.pending.insert(tx.clone(), correlation);
        Ok(tx)
    }

    async fn await_confirmation(&self, tx: &TransactionRef) -> Result<Receipt, LedgerError> {
        let mut script = self.lock();
        let Some(correlation) = script.pending.remove(tx) else {
            return Err(LedgerError::Query(format!("unknown transaction {}", tx)));
        };
        let block = script.head;
        let events = correlation
            .map(|correlation_id| LedgerEvent {
                name: self.request_event.clone(),
                block,
                correlation_id,
                payload: String::new(),
            })
            .into_iter()
            .collect();
        Ok(Receipt {
            transaction: tx.clone(),
            block,
            events,
        })
    }

    async fn scan_events(
        &self,
        event: &str,
        from: BlockNumber,
        to: Option<BlockNumber>,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        {
            let mut script = self.lock();
            script.in_flight += 1;
            script.max_in_flight = script.max_in_flight.max(script.in_flight);
        }
        // Give a concurrent poller the chance to overlap
        tokio::task::yield_now().await;

        let mut script = self.lock();
        script.in_flight -= 1;
        if script.failing_scans > 0 {
            script.failing_scans -= 1;
            return Err(LedgerError::Query("rpc timeout".into()));
        }
        let to = to.unwrap_or(script.head);
        script.scans.push((from, to));
        Ok(script
            .oracle_events
            .iter()
            .filter(|e| e.name == event && (from..=to).contains(&e.block))
            .cloned()
            .collect())
    }

    async fn current_block(&self) -> Result<BlockNumber, LedgerError> {
        let mut script = self.lock();
        script.head += 1;
        Ok(script.head)
    }

    async fn get_fee(&self) -> Result<Amount, LedgerError> {
        Ok(self.lock().fee)
    }

    async fn get_balance(&self, _account: &Account) -> Result<Amount, LedgerError> {
        Ok(self.lock().balance)
    }
}
