//! Reconciliation of purchase updates into ledgered entitlements.
//!
//! Every transaction ID gets a lane: a task draining that key's events in
//! arrival order, so redeliveries and retries for one purchase never
//! interleave. Lanes for different keys run concurrently, bounded by a
//! worker semaphore that is held only while a validation call is in flight.
//! Backoff between retries holds neither a worker nor any lock.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::{
    runtime::Handle,
    sync::{mpsc, watch, Notify, Semaphore},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::EngineConfig,
    domain::{
        entities::{
            entitlement_record::EntitlementRecord,
            purchase_event::{PurchaseEvent, TransactionId},
            reconciliation_notification::{EntitlementChanged, ValidationFailed},
            validation_result::{ValidationReason, ValidationResult},
        },
        repositories::{entitlement_ledger::EntitlementLedger, receipt_validator::ReceiptValidator},
    },
    errors::IapError,
};

use super::retry_policy::RetryPolicy;

/// Where a transaction stands in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Unseen,
    Validating,
    /// Backing off after `attempt` unreachable results.
    Retrying { attempt: u32 },
    Granted,
    Rejected(ValidationReason),
}

impl TransactionState {
    fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Granted | TransactionState::Rejected(_))
    }
}

/// Outbound notification streams.
///
/// Items are sent from the engine's lane tasks on the Tokio runtime. Which
/// thread observes them is up to whoever polls the receivers.
pub struct EngineReceivers {
    pub entitlements: mpsc::UnboundedReceiver<EntitlementChanged>,
    pub failures: mpsc::UnboundedReceiver<ValidationFailed>,
}

enum Job {
    Submit(PurchaseEvent),
    Revalidate(PurchaseEvent),
}

impl Job {
    fn event(&self) -> &PurchaseEvent {
        match self {
            Job::Submit(event) | Job::Revalidate(event) => event,
        }
    }
}

struct KeyState {
    status: TransactionState,
    queue: VecDeque<Job>,
    lane_running: bool,
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            status: TransactionState::Unseen,
            queue: VecDeque::new(),
            lane_running: false,
        }
    }
}

struct EngineState {
    /// Terminal outcomes stay here for the life of the engine.
    keys: HashMap<TransactionId, KeyState>,
    running_lanes: usize,
    accepting: bool,
}

struct EngineInner<V: ?Sized, L: ?Sized> {
    validator: Arc<V>,
    ledger: Arc<L>,
    retry_policy: RetryPolicy,
    workers: Arc<Semaphore>,
    runtime: Handle,
    state: Mutex<EngineState>,
    idle: Notify,
    shutdown: watch::Sender<bool>,
    entitlements: mpsc::UnboundedSender<EntitlementChanged>,
    failures: mpsc::UnboundedSender<ValidationFailed>,
}

pub struct ReconciliationEngine<V: ?Sized, L: ?Sized> {
    inner: Arc<EngineInner<V, L>>,
}

impl<V: ?Sized, L: ?Sized> Clone for ReconciliationEngine<V, L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V, L> ReconciliationEngine<V, L>
where
    V: ReceiptValidator + ?Sized + 'static,
    L: EntitlementLedger + ?Sized + 'static,
{
    /// Must be called from within a Tokio runtime; lanes are spawned on it.
    pub fn new(
        validator: Arc<V>,
        ledger: Arc<L>,
        config: &EngineConfig,
    ) -> Result<(Self, EngineReceivers), IapError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            IapError::Config("reconciliation engine requires a Tokio runtime".into())
        })?;
        let (entitlements_tx, entitlements_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let engine = Self {
            inner: Arc::new(EngineInner {
                validator,
                ledger,
                retry_policy: RetryPolicy::from(config),
                workers: Arc::new(Semaphore::new(config.worker_count)),
                runtime,
                state: Mutex::new(EngineState {
                    keys: HashMap::new(),
                    running_lanes: 0,
                    accepting: true,
                }),
                idle: Notify::new(),
                shutdown,
                entitlements: entitlements_tx,
                failures: failures_tx,
            }),
        };
        Ok((
            engine,
            EngineReceivers {
                entitlements: entitlements_rx,
                failures: failures_rx,
            },
        ))
    }

    /// Queues a purchase update. Safe to call redundantly; a transaction that
    /// already reached a terminal outcome is not validated again.
    pub fn submit(&self, event: PurchaseEvent) -> Result<(), IapError> {
        self.enqueue(Job::Submit(event))
    }

    /// Queues a forced re-validation of a purchase, even if it was already
    /// granted. Used to pick up subscription expiry and store-side refunds.
    /// Rejected transactions stay rejected.
    pub fn revalidate(&self, event: PurchaseEvent) -> Result<(), IapError> {
        self.enqueue(Job::Revalidate(event))
    }

    pub fn state(&self, transaction_id: &TransactionId) -> TransactionState {
        self.inner
            .lock_state()
            .keys
            .get(transaction_id)
            .map(|k| k.status)
            .unwrap_or(TransactionState::Unseen)
    }

    /// The product's current Active entitlement, straight from the ledger.
    pub fn entitlement(&self, product_id: &str) -> Option<EntitlementRecord> {
        self.inner.ledger.query(product_id)
    }

    /// Resolves once no lane has queued or in-flight work.
    pub async fn wait_idle(&self) {
        self.inner.wait_idle().await
    }

    /// Stops accepting events, drops queued events and pending retries, and
    /// waits for in-flight validations to finish applying their outcome.
    pub async fn shutdown(&self) {
        let was_accepting = std::mem::replace(&mut self.inner.lock_state().accepting, false);
        if was_accepting {
            info!("reconciliation engine shutting down");
            self.inner.shutdown.send_replace(true);
        }
        self.inner.wait_idle().await;
        if was_accepting {
            info!("reconciliation engine stopped");
        }
    }

    fn enqueue(&self, job: Job) -> Result<(), IapError> {
        let transaction_id = job.event().transaction_id().clone();
        let mut state = self.inner.lock_state();
        if !state.accepting {
            return Err(IapError::EngineShutDown);
        }
        let key = state.keys.entry(transaction_id.clone()).or_default();
        key.queue.push_back(job);
        if key.lane_running {
            return Ok(());
        }
        key.lane_running = true;
        state.running_lanes += 1;
        drop(state);

        let inner = self.inner.clone();
        self.inner
            .runtime
            .spawn(async move { inner.run_lane(transaction_id).await });
        Ok(())
    }
}

impl<V, L> EngineInner<V, L>
where
    V: ReceiptValidator + ?Sized + 'static,
    L: EntitlementLedger + ?Sized + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, transaction_id: &TransactionId, status: TransactionState) {
        if let Some(key) = self.lock_state().keys.get_mut(transaction_id) {
            key.status = status;
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.lock_state().running_lanes == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn run_lane(&self, transaction_id: TransactionId) {
        loop {
            let job = {
                let mut state = self.lock_state();
                let accepting = state.accepting;
                let Some(key) = state.keys.get_mut(&transaction_id) else {
                    state.running_lanes -= 1;
                    break;
                };
                let next = if accepting {
                    key.queue.pop_front()
                } else {
                    if !key.queue.is_empty() {
                        debug!(%transaction_id, dropped = key.queue.len(), "dropping queued events on shutdown");
                    }
                    key.queue.clear();
                    None
                };
                match next {
                    Some(job) => job,
                    None => {
                        key.lane_running = false;
                        state.running_lanes -= 1;
                        break;
                    }
                }
            };
            self.process(&transaction_id, job).await;
        }
        if self.lock_state().running_lanes == 0 {
            self.idle.notify_waiters();
        }
    }

    async fn process(&self, transaction_id: &TransactionId, job: Job) {
        let forced = matches!(job, Job::Revalidate(_));
        let event = job.event();
        // The ledger outlives this cache, so a recorded transaction counts as
        // granted even when this engine has not seen it yet.
        let recorded = self.ledger.get(transaction_id).is_some();
        let previous = {
            let mut state = self.lock_state();
            let Some(key) = state.keys.get_mut(transaction_id) else {
                return;
            };
            if key.status == TransactionState::Unseen && recorded {
                key.status = TransactionState::Granted;
            }
            let previous = key.status;
            match previous {
                TransactionState::Granted if !forced => {
                    debug!(%transaction_id, "already granted; ignoring redelivery");
                    return;
                }
                TransactionState::Rejected(reason) => {
                    debug!(%transaction_id, ?reason, "already rejected; ignoring redelivery");
                    return;
                }
                _ => {}
            }
            key.status = TransactionState::Validating;
            previous
        };
        // What to fall back to when this pass settles nothing.
        let resting = if previous.is_terminal() {
            previous
        } else {
            TransactionState::Unseen
        };

        let mut shutdown = self.shutdown.subscribe();
        let mut attempt = 1;
        let result = loop {
            let Some(result) = self.validate_isolated(event).await else {
                debug!(%transaction_id, "engine stopped before validation started");
                self.set_status(transaction_id, resting);
                return;
            };
            if result.reason != ValidationReason::StoreUnreachable {
                break result;
            }
            if !self.retry_policy.allows_another_attempt(attempt) {
                break result;
            }
            let delay = self.retry_policy.delay_after(attempt);
            warn!(
                %transaction_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "store unreachable; scheduling retry"
            );
            self.set_status(transaction_id, TransactionState::Retrying { attempt });
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown) => {
                    info!(%transaction_id, "dropping pending retry on shutdown");
                    self.set_status(transaction_id, resting);
                    return;
                }
            }
            attempt += 1;
            self.set_status(transaction_id, TransactionState::Validating);
        };

        let status = self.apply(event, result, resting).await;
        self.set_status(transaction_id, status);
    }

    /// Runs one validation on its own task, holding a worker permit for its
    /// duration. A panicking validator only costs this attempt.
    ///
    /// Returns `None` without calling the validator if shutdown began while
    /// waiting for a worker.
    async fn validate_isolated(&self, event: &PurchaseEvent) -> Option<ValidationResult> {
        let transaction_id = event.transaction_id().clone();
        let Ok(permit) = self.workers.clone().acquire_owned().await else {
            return Some(ValidationResult::rejected(
                transaction_id,
                ValidationReason::StoreUnreachable,
            ));
        };
        if *self.shutdown.borrow() {
            return None;
        }
        let validator = self.validator.clone();
        let task_transaction_id = transaction_id.clone();
        let raw_receipt = event.raw_receipt().to_owned();
        let store = event.store();
        let product_id = event.product_id().to_owned();
        let handle = self.runtime.spawn(async move {
            let _permit = permit;
            validator
                .validate(&task_transaction_id, &raw_receipt, store, &product_id)
                .await
        });
        Some(match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(%transaction_id, error = %e, "receipt validation task failed");
                ValidationResult::rejected(transaction_id, ValidationReason::StoreUnreachable)
            }
        })
    }

    /// Runs a ledger operation on the blocking pool; journal appends fsync.
    async fn on_ledger<T, F>(&self, op: F) -> Result<T, IapError>
    where
        T: Send + 'static,
        F: FnOnce(&L) -> Result<T, IapError> + Send + 'static,
    {
        let ledger = self.ledger.clone();
        self.runtime
            .spawn_blocking(move || op(&*ledger))
            .await
            .map_err(|e| IapError::LedgerJournal(format!("ledger task failed: {e}")))?
    }

    /// Applies a settled validation result to the ledger and emits what
    /// changed. Returns the transaction's new status.
    async fn apply(
        &self,
        event: &PurchaseEvent,
        result: ValidationResult,
        resting: TransactionState,
    ) -> TransactionState {
        let transaction_id = event.transaction_id();
        let product_id = event.product_id();
        match result.reason {
            ValidationReason::Valid => {
                let commit = {
                    let transaction_id = transaction_id.clone();
                    let product_id = product_id.to_owned();
                    let granted_at = event.purchase_time();
                    let expiry = result.expiry;
                    self.on_ledger(move |ledger| {
                        ledger.commit(&transaction_id, &product_id, granted_at, expiry)
                    })
                    .await
                };
                match commit {
                    Ok(outcome) => {
                        if outcome.changed {
                            info!(%transaction_id, product_id, state = ?outcome.record.state, "entitlement granted");
                            self.emit_changed(outcome.record);
                        }
                        if let Some(superseded) = outcome.superseded {
                            self.emit_changed(superseded);
                        }
                        TransactionState::Granted
                    }
                    Err(e) => {
                        error!(%transaction_id, error = %e, "failed to commit entitlement");
                        resting
                    }
                }
            }
            ValidationReason::Expired | ValidationReason::Revoked => {
                let reason = result.reason;
                let id = transaction_id.clone();
                let transition = self
                    .on_ledger(move |ledger| {
                        if reason == ValidationReason::Expired {
                            ledger.expire(&id)
                        } else {
                            ledger.revoke(&id)
                        }
                    })
                    .await;
                match transition {
                    Ok(Some(transition)) => {
                        if transition.changed {
                            info!(%transaction_id, product_id, reason = ?result.reason, "entitlement withdrawn");
                            self.emit_changed(transition.record);
                        }
                        TransactionState::Rejected(result.reason)
                    }
                    Ok(None) => {
                        self.emit_failed(event, result.reason);
                        TransactionState::Rejected(result.reason)
                    }
                    Err(e) => {
                        error!(%transaction_id, error = %e, "failed to withdraw entitlement");
                        resting
                    }
                }
            }
            ValidationReason::Malformed | ValidationReason::StoreUnreachable
                if resting == TransactionState::Granted =>
            {
                // Only an explicit expiry or revocation withdraws a grant.
                warn!(%transaction_id, reason = ?result.reason, "re-validation inconclusive; keeping grant");
                resting
            }
            ValidationReason::Malformed | ValidationReason::StoreUnreachable => {
                self.emit_failed(event, result.reason);
                TransactionState::Rejected(result.reason)
            }
            ValidationReason::Pending => {
                debug!(%transaction_id, "purchase pending; awaiting redelivery");
                resting
            }
        }
    }

    fn emit_changed(&self, record: EntitlementRecord) {
        let notification = EntitlementChanged {
            product_id: record.product_id.clone(),
            record,
        };
        if self.entitlements.send(notification).is_err() {
            debug!("entitlement receiver dropped");
        }
    }

    fn emit_failed(&self, event: &PurchaseEvent, reason: ValidationReason) {
        warn!(transaction_id = %event.transaction_id(), product_id = event.product_id(), ?reason, "validation failed");
        let notification = ValidationFailed {
            transaction_id: event.transaction_id().clone(),
            product_id: event.product_id().to_owned(),
            reason,
        };
        if self.failures.send(notification).is_err() {
            debug!("failure receiver dropped");
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // The sender lives as long as the engine, so an error cannot happen here
    // while a lane is running.
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
