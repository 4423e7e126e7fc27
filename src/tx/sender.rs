//! Transaction submission with gas escalation and reconnect-and-rebuild
//!
//! One logical submission runs this loop, bounded by the policy's attempt
//! count:
//!
//! ```text
//! Build ──► Sign ──► Broadcast ──► Success
//!   ▲         ▲          │
//!   │         └─ bump ◄──┤ Underpriced  (same nonce, higher price)
//!   └── reconnect ◄──────┤ Network      (fresh nonce, price kept)
//!                        └ Fatal ──► abort
//! ```

use super::gas::GasEstimator;
use super::nonce::NonceManager;
use super::retry::{RetryExecutor, RetryPolicy};
use super::signer::TxSigner;
use super::{
    attempt_trail, AttemptOutcome, ConfirmationWaiter, OperationDescriptor, PendingSubmission, Receipt,
    TransactionAttempt,
};
use crate::chain::{Connection, ConnectionManager};
use crate::error::{ErrorKind, PilotError, PilotResult};
use crate::shutdown::AbortSignal;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{TransactionRequest, H256, U256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Parameters settled by the Build step, carried across attempts
#[derive(Debug, Default)]
struct AttemptState {
    /// `None` forces a Build on the next attempt
    nonce: Option<U256>,
    /// Non-decreasing across the whole submission
    gas_price: Option<U256>,
}

/// Builds, signs, broadcasts and confirms transactions for one sender
pub struct TransactionSubmitter {
    manager: Arc<ConnectionManager>,
    signer: Arc<dyn TxSigner>,
    nonces: NonceManager,
    gas: GasEstimator,
    waiter: ConfirmationWaiter,
    chain_id: u64,
    /// Held for the whole of a submission; one outstanding nonce at a time
    in_flight: Mutex<()>,
    abort: AbortSignal,
}

impl TransactionSubmitter {
    pub fn new(
        manager: Arc<ConnectionManager>,
        signer: Arc<dyn TxSigner>,
        gas: GasEstimator,
        waiter: ConfirmationWaiter,
        abort: AbortSignal,
    ) -> Self {
        let chain_id = manager.endpoint().chain_id;
        let nonces = NonceManager::new(signer.address());
        info!("Transaction submitter initialized with wallet: {:?}", signer.address());

        Self {
            manager,
            signer,
            nonces,
            gas,
            waiter,
            chain_id,
            in_flight: Mutex::new(()),
            abort,
        }
    }

    pub fn waiter(&self) -> &ConfirmationWaiter {
        &self.waiter
    }

    /// Broadcast `descriptor` and wait for its receipt
    pub async fn submit(
        &self,
        conn: &mut Connection,
        descriptor: &OperationDescriptor,
        policy: &RetryPolicy,
    ) -> PilotResult<Receipt> {
        let _guard = self.in_flight.lock().await;

        let pending = self.broadcast_unlocked(conn, descriptor, policy).await?;
        let receipt = self.waiter.wait(conn, &pending).await?;

        info!(
            "{} included: nonce {}, fee {} wei [{}]",
            pending.label,
            pending.nonce,
            receipt.fee(),
            pending.trail()
        );
        crate::metrics::record_fee(&descriptor.label, receipt.fee());
        Ok(receipt)
    }

    /// Broadcast `descriptor` without waiting for inclusion
    pub async fn broadcast(
        &self,
        conn: &mut Connection,
        descriptor: &OperationDescriptor,
        policy: &RetryPolicy,
    ) -> PilotResult<PendingSubmission> {
        let _guard = self.in_flight.lock().await;
        self.broadcast_unlocked(conn, descriptor, policy).await
    }

    async fn broadcast_unlocked(
        &self,
        conn: &mut Connection,
        descriptor: &OperationDescriptor,
        policy: &RetryPolicy,
    ) -> PilotResult<PendingSubmission> {
        descriptor.validate()?;
        crate::metrics::record_submission(&descriptor.label);

        let max_attempts = policy.max_attempts.max(1);
        let mut state = AttemptState::default();
        let mut attempts: Vec<TransactionAttempt> = Vec::new();

        for index in 1..=max_attempts {
            self.abort.check()?;

            let result = self.attempt_once(conn, descriptor, policy, &mut state).await;
            let nonce = state.nonce;
            let gas_price = state.gas_price;

            let err = match result {
                Ok(tx_hash) => {
                    attempts.push(TransactionAttempt {
                        index,
                        nonce,
                        gas_price,
                        outcome: AttemptOutcome::Success,
                    });
                    crate::metrics::record_attempt(&descriptor.label, AttemptOutcome::Success);
                    info!(
                        "{} sent: {:?} (attempt {}/{}, nonce {:?}, gas price {:?})",
                        descriptor.label, tx_hash, index, max_attempts, nonce, gas_price
                    );
                    return Ok(PendingSubmission {
                        label: descriptor.label.clone(),
                        tx_hash,
                        nonce: nonce.unwrap_or_default(),
                        gas_price: gas_price.unwrap_or_default(),
                        attempts,
                    });
                }
                Err(PilotError::Aborted) => return Err(PilotError::Aborted),
                Err(err) => err,
            };

            let outcome = match err.kind() {
                Some(ErrorKind::Underpriced) => AttemptOutcome::Underpriced,
                Some(ErrorKind::TransientNetwork) | Some(ErrorKind::Timeout) => {
                    AttemptOutcome::TransientNetwork
                }
                _ => AttemptOutcome::Fatal,
            };
            attempts.push(TransactionAttempt {
                index,
                nonce,
                gas_price,
                outcome,
            });
            crate::metrics::record_attempt(&descriptor.label, outcome);

            let last_attempt = index == max_attempts;

            match outcome {
                AttemptOutcome::Fatal => {
                    error!(
                        "{} aborted on attempt {}: {} [{}]",
                        descriptor.label,
                        index,
                        err,
                        attempt_trail(&attempts)
                    );
                    return Err(PilotError::SubmissionFailed {
                        attempts: index,
                        cause: Box::new(err),
                    });
                }
                _ if last_attempt => {
                    error!(
                        "{} failed after {} attempts: {} [{}]",
                        descriptor.label,
                        index,
                        err,
                        attempt_trail(&attempts)
                    );
                    return Err(PilotError::SubmissionFailed {
                        attempts: index,
                        cause: Box::new(err),
                    });
                }
                AttemptOutcome::Underpriced => {
                    if let Some(old) = state.gas_price {
                        let new = self.gas.escalate(old);
                        state.gas_price = Some(new);
                        crate::metrics::record_gas_bump(&descriptor.label);
                        warn!("{} underpriced, bumped gas from {} -> {}", descriptor.label, old, new);
                    }
                    self.abort.sleep(policy.rpc_delay).await?;
                }
                AttemptOutcome::TransientNetwork => {
                    warn!(
                        "{} attempt {}/{} hit a network error, rebuilding: {}",
                        descriptor.label, index, max_attempts, err
                    );
                    // The nonce may have moved while we were disconnected
                    state.nonce = None;
                    if policy.reconnect_on_network_error {
                        match self.manager.reconnect(conn.clone()).await {
                            Ok(fresh) => *conn = fresh,
                            Err(e) => warn!("Reconnect failed, next attempt reuses old handle: {}", e),
                        }
                    }
                    self.abort.sleep(policy.delay).await?;
                }
                AttemptOutcome::Success => {}
            }
        }

        Err(PilotError::SubmissionFailed {
            attempts: max_attempts,
            cause: Box::new(PilotError::Fatal("no attempts made".to_string())),
        })
    }

    /// Build (if needed), Sign and Broadcast once
    async fn attempt_once(
        &self,
        conn: &mut Connection,
        descriptor: &OperationDescriptor,
        policy: &RetryPolicy,
        state: &mut AttemptState,
    ) -> PilotResult<H256> {
        let single = policy.single_attempt();
        let executor = RetryExecutor::new(&self.manager, &self.abort);

        // Build
        let nonce = match state.nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = executor
                    .run(conn, &single, "pending_nonce", |c| async move {
                        self.nonces.fetch(&c).await
                    })
                    .await?;
                if state.gas_price.is_none() {
                    let price = executor
                        .run(conn, &single, "gas_price", |c| async move {
                            self.gas.starting_price(&c, descriptor).await
                        })
                        .await?;
                    state.gas_price = Some(price);
                }
                state.nonce = Some(nonce);
                nonce
            }
        };
        let gas_price = state
            .gas_price
            .ok_or_else(|| PilotError::Fatal("gas price not settled".to_string()))?;

        // Sign
        let tx = self.build_tx(descriptor, nonce, gas_price);
        let raw = self.signer.sign(&tx)?;

        // Broadcast
        executor
            .run(conn, &single, "send_raw_transaction", |c| {
                let raw = raw.clone();
                async move { c.send_raw_transaction(raw).await }
            })
            .await
    }

    fn build_tx(
        &self,
        descriptor: &OperationDescriptor,
        nonce: U256,
        gas_price: U256,
    ) -> TypedTransaction {
        TransactionRequest::new()
            .from(descriptor.from)
            .to(descriptor.to)
            .value(descriptor.value)
            .data(descriptor.data.clone())
            .gas(descriptor.gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(self.chain_id)
            .into()
    }
}
