//! Seed acquisition state machine
//!
//! `submit` walks a request through funds check, submission, confirmation and
//! correlation, then hands off to a spawned poll task that scans the ledger
//! for the oracle's result. Every request gets a new generation number. Each
//! transition is applied and published while the generation lock is held, so
//! a stale poll task can neither change the request nor publish telemetry once
//! a reset has started.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::error::AcquisitionError;
use super::ledger::{Account, Amount, BlockNumber, LedgerClient, LedgerError, TransactionRef};
use super::request::SeedRequest;
use crate::config::ProtocolConfig;
use crate::sim::Seed;
use crate::telemetry::{EventKind, EventSource, TelemetryBus};

const BPS_DENOMINATOR: Amount = 10_000;

/// Fee plus the safety margin
pub fn required_funds(fee: Amount, margin_bps: u32) -> Amount {
    fee.saturating_add(fee.saturating_mul(Amount::from(margin_bps)) / BPS_DENOMINATOR)
}

#[derive(Debug, Clone, Default)]
struct RequestSlot {
    generation: u64,
    request: SeedRequest,
}

/// Current generation and the poll task that belongs to it
#[derive(Default)]
struct Control {
    generation: u64,
    poll: Option<AbortHandle>,
}

/// State shared with the poll task and any [`CancelHandle`]
#[derive(Clone)]
struct Shared {
    slot: Arc<watch::Sender<RequestSlot>>,
    control: Arc<Mutex<Control>>,
    telemetry: TelemetryBus,
}

impl Shared {
    fn new(telemetry: TelemetryBus) -> Self {
        let (slot, _) = watch::channel(RequestSlot::default());
        Self {
            slot: Arc::new(slot),
            control: Arc::new(Mutex::new(Control::default())),
            telemetry,
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the control block if `generation` is still current
    fn current(&self, generation: u64) -> Result<MutexGuard<'_, Control>, AcquisitionError> {
        let control = self.control();
        if control.generation == generation {
            Ok(control)
        } else {
            Err(AcquisitionError::Superseded)
        }
    }

    /// Abort the poll task and start a new generation with an idle request.
    /// Returns the new generation and the request it replaced.
    fn reset(&self) -> (u64, SeedRequest) {
        let mut control = self.control();
        if let Some(task) = control.poll.take() {
            task.abort();
        }
        control.generation += 1;
        let generation = control.generation;
        let mut previous = SeedRequest::Idle;
        self.slot.send_modify(|slot| {
            slot.generation = generation;
            previous = std::mem::take(&mut slot.request);
        });
        (generation, previous)
    }

    fn cancel(&self) {
        let (_, previous) = self.reset();
        if !previous.is_terminal() && previous != SeedRequest::Idle {
            log::info!("Seed request cancelled");
            self.telemetry.publish(
                EventSource::Protocol,
                EventKind::Event,
                "Seed request cancelled",
            );
        }
    }

    fn is_polling(&self) -> bool {
        self.control()
            .poll
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Record the poll task of `generation`, or abort it if a reset won
    fn track(&self, generation: u64, task: AbortHandle) {
        match self.current(generation) {
            Ok(mut control) => control.poll = Some(task),
            Err(_) => task.abort(),
        }
    }

    fn abort_poll(&self) {
        if let Some(task) = self.control().poll.take() {
            task.abort();
        }
    }

    /// Move to `request` and log the transition
    fn enter(
        &self,
        generation: u64,
        request: SeedRequest,
        kind: EventKind,
        message: String,
    ) -> Result<(), AcquisitionError> {
        let _control = self.current(generation)?;
        self.slot.send_modify(|slot| slot.request = request);
        self.telemetry.publish(EventSource::Protocol, kind, message);
        Ok(())
    }

    fn fail(&self, generation: u64, reason: AcquisitionError, message: String) {
        let Ok(_control) = self.current(generation) else {
            return;
        };
        self.slot.send_modify(|slot| {
            let previous = std::mem::take(&mut slot.request);
            slot.request = previous.into_failed(reason);
        });
        self.telemetry
            .publish(EventSource::Protocol, EventKind::Warn, message);
    }

    fn publish(&self, generation: u64, kind: EventKind, message: String) {
        if let Ok(_control) = self.current(generation) {
            self.telemetry.publish(EventSource::Protocol, kind, message);
        }
    }
}

/// Waits for the outcome of one request
#[derive(Debug)]
pub struct RequestWatch {
    rx: watch::Receiver<RequestSlot>,
    generation: u64,
}

impl RequestWatch {
    /// Resolve with the seed, the failure reason, or `Superseded` if a newer
    /// request replaced this one first
    pub async fn wait(mut self) -> Result<Seed, AcquisitionError> {
        let generation = self.generation;
        let Ok(slot) = self
            .rx
            .wait_for(|slot| slot.generation != generation || slot.request.is_terminal())
            .await
        else {
            return Err(AcquisitionError::Superseded);
        };
        if slot.generation != generation {
            return Err(AcquisitionError::Superseded);
        }
        match &slot.request {
            SeedRequest::Fulfilled { seed, .. } => Ok(seed.clone()),
            SeedRequest::Failed { reason, .. } => Err(reason.clone()),
            _ => Err(AcquisitionError::Superseded),
        }
    }
}

/// Cancels whatever request the acquisition has in flight. Held by the view
/// that owns the session so play and teardown can stop the poll loop.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Shared,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_polling(&self) -> bool {
        self.shared.is_polling()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("request", &self.shared.slot.borrow().request)
            .finish()
    }
}

/// Parameters of one poll loop
struct PollPlan {
    transaction: TransactionRef,
    from_block: BlockNumber,
    correlation_id: u64,
    result_event: String,
    interval: Duration,
    max_backoff: Duration,
    max_attempts: u32,
}

pub struct SeedAcquisition<L> {
    ledger: Arc<L>,
    account: Account,
    config: ProtocolConfig,
    shared: Shared,
}

impl<L> std::fmt::Debug for SeedAcquisition<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.shared.slot.borrow();
        f.debug_struct("SeedAcquisition")
            .field("account", &self.account)
            .field("generation", &slot.generation)
            .field("request", &slot.request)
            .finish()
    }
}

impl<L: LedgerClient + 'static> SeedAcquisition<L> {
    pub fn new(
        ledger: Arc<L>,
        account: Account,
        config: ProtocolConfig,
        telemetry: TelemetryBus,
    ) -> Self {
        Self {
            ledger,
            account,
            config,
            shared: Shared::new(telemetry),
        }
    }

    /// Snapshot of the current request
    pub fn request(&self) -> SeedRequest {
        self.shared.slot.borrow().request.clone()
    }

    /// Watch the current request's outcome
    pub fn watch(&self) -> RequestWatch {
        let rx = self.shared.slot.subscribe();
        let generation = rx.borrow().generation;
        RequestWatch { rx, generation }
    }

    /// Handle that cancels the in-flight request from elsewhere
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: self.shared.clone(),
        }
    }

    /// Whether a poll loop is running
    pub fn is_polling(&self) -> bool {
        self.shared.is_polling()
    }

    /// Cancel the in-flight request, if any
    pub fn cancel(&mut self) {
        self.shared.cancel();
    }

    /// Start a new request. Any prior request is cancelled first. Returns once
    /// the poll loop is running, or with the error that stopped the request.
    pub async fn submit(&mut self) -> Result<(), AcquisitionError> {
        let (generation, _) = self.shared.reset();
        match self.dispatch(generation).await {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("Seed request failed: {}", err);
                self.shared
                    .fail(generation, err.clone(), format!("Seed request failed: {}", err));
                Err(err)
            }
        }
    }

    /// Wait for the current request to finish
    pub async fn wait(&self) -> Result<Seed, AcquisitionError> {
        if self.request() == SeedRequest::Idle {
            return Err(AcquisitionError::NotStarted);
        }
        self.watch().wait().await
    }

    /// Submit and wait for the seed
    pub async fn acquire(&mut self) -> Result<Seed, AcquisitionError> {
        self.submit().await?;
        self.wait().await
    }

    /// One-shot handoff of a fulfilled seed. The request is reset afterwards.
    pub fn take_seed(&mut self) -> Option<Seed> {
        let seed = self.request().seed_value().cloned()?;
        self.shared.reset();
        log::debug!("Seed {} handed to session", seed);
        Some(seed)
    }

    async fn dispatch(&mut self, generation: u64) -> Result<(), AcquisitionError> {
        let fee = self
            .ledger
            .get_fee()
            .await
            .map_err(AcquisitionError::LedgerQueryFailure)?;
        let balance = self
            .ledger
            .get_balance(&self.account)
            .await
            .map_err(AcquisitionError::LedgerQueryFailure)?;
        let required = required_funds(fee, self.config.fee_margin_bps);
        if balance < required {
            return Err(AcquisitionError::InsufficientFunds { balance, required });
        }

        let transaction = self.ledger.submit_request(fee).await?;
        log::info!("Randomness request submitted: {}", transaction);
        self.shared.enter(
            generation,
            SeedRequest::Submitted {
                transaction: transaction.clone(),
            },
            EventKind::Event,
            format!("VRF request submitted ({})", transaction),
        )?;

        let receipt = self.ledger.await_confirmation(&transaction).await?;
        self.shared.enter(
            generation,
            SeedRequest::Confirmed {
                transaction: transaction.clone(),
                block: receipt.block,
            },
            EventKind::Event,
            format!("Transaction confirmed in block {}", receipt.block),
        )?;

        let correlation_id = receipt
            .events
            .iter()
            .find(|event| event.name == self.config.request_event)
            .map(|event| event.correlation_id)
            .ok_or(AcquisitionError::CorrelationMissing)?;
        self.shared.enter(
            generation,
            SeedRequest::Correlating {
                transaction: transaction.clone(),
                block: receipt.block,
                correlation_id,
            },
            EventKind::Proof,
            format!("Oracle assigned sequence {}", correlation_id),
        )?;

        self.shared.enter(
            generation,
            SeedRequest::Polling {
                transaction: transaction.clone(),
                block: receipt.block,
                correlation_id,
                attempts: 0,
            },
            EventKind::Event,
            format!("Polling for oracle result (sequence {})", correlation_id),
        )?;
        let plan = PollPlan {
            transaction,
            from_block: receipt.block,
            correlation_id,
            result_event: self.config.result_event.clone(),
            interval: Duration::from_millis(self.config.poll_interval_ms),
            max_backoff: Duration::from_millis(self.config.max_backoff_ms),
            max_attempts: self.config.max_poll_attempts,
        };
        let task = tokio::spawn(poll_for_result(
            Arc::clone(&self.ledger),
            self.shared.clone(),
            generation,
            plan,
        ));
        self.shared.track(generation, task.abort_handle());
        Ok(())
    }
}

impl<L> Drop for SeedAcquisition<L> {
    fn drop(&mut self) {
        self.shared.abort_poll();
    }
}

async fn poll_for_result<L: LedgerClient>(
    ledger: Arc<L>,
    shared: Shared,
    generation: u64,
    plan: PollPlan,
) {
    let mut from_block = plan.from_block;
    let mut delay = plan.interval;

    for attempt in 1..=plan.max_attempts {
        tokio::time::sleep(delay).await;
        let polling = SeedRequest::Polling {
            transaction: plan.transaction.clone(),
            block: plan.from_block,
            correlation_id: plan.correlation_id,
            attempts: attempt,
        };
        let message = format!("Oracle poll {} for sequence {}", attempt, plan.correlation_id);
        if shared
            .enter(generation, polling, EventKind::Event, message)
            .is_err()
        {
            return;
        }

        match scan_once(&*ledger, &plan, &mut from_block).await {
            Ok(Some(payload)) => {
                let seed = Seed::new(payload);
                log::info!("Oracle fulfilled sequence {}: {}", plan.correlation_id, seed);
                let fulfilled = SeedRequest::Fulfilled {
                    transaction: plan.transaction.clone(),
                    correlation_id: plan.correlation_id,
                    seed: seed.clone(),
                };
                let message = format!("Seed updated: {}", seed);
                if shared
                    .enter(generation, fulfilled, EventKind::Proof, message)
                    .is_err()
                {
                    log::debug!("Result for sequence {} arrived after reset", plan.correlation_id);
                }
                return;
            }
            Ok(None) => {
                log::debug!("No oracle result yet (poll {})", attempt);
                delay = plan.interval;
            }
            Err(err) => {
                log::warn!("Ledger query failed on poll {}: {}", attempt, err);
                shared.publish(
                    generation,
                    EventKind::Warn,
                    format!("Ledger query failed on poll {}: {}", attempt, err),
                );
                delay = (delay * 2).min(plan.max_backoff);
            }
        }
    }

    let reason = AcquisitionError::OracleTimeout {
        attempts: plan.max_attempts,
    };
    log::warn!("{}", reason);
    let message = reason.to_string();
    shared.fail(generation, reason, message);
}

/// Scan the blocks mined since the last scan for the matching result
async fn scan_once<L: LedgerClient + ?Sized>(
    ledger: &L,
    plan: &PollPlan,
    from_block: &mut BlockNumber,
) -> Result<Option<String>, LedgerError> {
    let head = ledger.current_block().await?;
    if *from_block > head {
        return Ok(None);
    }
    let events = ledger
        .scan_events(&plan.result_event, *from_block, Some(head))
        .await?;
    *from_block = head + 1;
    Ok(events
        .into_iter()
        .find(|event| event.correlation_id == plan.correlation_id)
        .map(|event| event.payload))
}
