//! Confirmation waiting for broadcast transactions
//!
//! A wait is a sequence of polling rounds. Each round polls the endpoint at a
//! fixed interval until the receipt appears or the round's timeout elapses.
//! Only after the last round times out does the wait fail.

use crate::chain::{Connection, ConnectionManager};
use crate::config::ConfirmationConfig;
use crate::error::{classify, ErrorKind, PilotError, PilotResult};
use crate::shutdown::AbortSignal;
use crate::tx::{PendingSubmission, Receipt};

use ethers::types::{TransactionReceipt, H256, U256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Polls for inclusion of a broadcast transaction
pub struct ConfirmationWaiter {
    manager: Arc<ConnectionManager>,
    poll_interval: Duration,
    round_timeout: Duration,
    max_rounds: u32,
    /// Replace the connection when a poll hits a network error or timeout
    reconnect_on_network_error: bool,
    abort: AbortSignal,
}

impl ConfirmationWaiter {
    pub fn new(
        manager: Arc<ConnectionManager>,
        config: &ConfirmationConfig,
        abort: AbortSignal,
    ) -> Self {
        Self {
            manager,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            round_timeout: Duration::from_secs(config.timeout_secs),
            max_rounds: config.max_rounds.max(1),
            reconnect_on_network_error: true,
            abort,
        }
    }

    /// Override the per-round timeout (the check-in uses a shorter one)
    pub fn with_round_timeout(mut self, round_timeout: Duration) -> Self {
        self.round_timeout = round_timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect_on_network_error: bool) -> Self {
        self.reconnect_on_network_error = reconnect_on_network_error;
        self
    }

    /// Wait for a submission this process broadcast.
    ///
    /// The fee is reported at the winning attempt's gas price.
    pub async fn wait(
        &self,
        conn: &mut Connection,
        pending: &PendingSubmission,
    ) -> PilotResult<Receipt> {
        self.wait_inner(conn, pending.tx_hash, Some(pending.gas_price))
            .await
    }

    /// Wait for an already-broadcast transaction known only by hash.
    ///
    /// The fee is reported at the receipt's effective gas price.
    pub async fn wait_for_hash(&self, conn: &mut Connection, tx_hash: H256) -> PilotResult<Receipt> {
        self.wait_inner(conn, tx_hash, None).await
    }

    async fn wait_inner(
        &self,
        conn: &mut Connection,
        tx_hash: H256,
        winning_price: Option<U256>,
    ) -> PilotResult<Receipt> {
        let started = Instant::now();

        for round in 1..=self.max_rounds {
            match timeout(self.round_timeout, self.poll_until_included(conn, tx_hash)).await {
                Ok(Ok(raw)) => {
                    let receipt = to_receipt(raw, winning_price);
                    crate::metrics::record_confirmation(
                        receipt.success,
                        started.elapsed().as_secs_f64(),
                    );
                    info!(
                        "Transaction {:?} confirmed in block {} (round {}, status {})",
                        tx_hash,
                        receipt.block_number,
                        round,
                        if receipt.success { "ok" } else { "reverted" }
                    );
                    return Ok(receipt);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        "Wait round {}/{} for {:?} timed out after {:?}",
                        round, self.max_rounds, tx_hash, self.round_timeout
                    );
                    if round < self.max_rounds {
                        info!("Retrying wait for {:?}", tx_hash);
                    }
                }
            }
        }

        crate::metrics::record_confirmation_timeout();
        error!(
            "Giving up on {:?} after {} rounds ({:?})",
            tx_hash,
            self.max_rounds,
            started.elapsed()
        );
        Err(PilotError::ConfirmationTimeout {
            tx_hash,
            rounds: self.max_rounds,
            timeout_secs: self.round_timeout.as_secs(),
        })
    }

    /// Poll until a mined receipt shows up. Runs until cancelled by the
    /// round timeout, an abort, or a fatal endpoint error.
    async fn poll_until_included(
        &self,
        conn: &mut Connection,
        tx_hash: H256,
    ) -> PilotResult<TransactionReceipt> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.abort.cancelled() => return Err(PilotError::Aborted),
            }

            match conn.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.block_number.is_some() => return Ok(receipt),
                Ok(_) => debug!("Transaction {:?} pending", tx_hash),
                Err(e) => match classify(&e) {
                    ErrorKind::TransientNetwork | ErrorKind::Timeout => {
                        warn!("Receipt poll for {:?} failed: {}", tx_hash, e);
                        if self.reconnect_on_network_error {
                            match self.manager.reconnect(conn.clone()).await {
                                Ok(fresh) => *conn = fresh,
                                Err(re) => warn!("Reconnect during confirmation wait failed: {}", re),
                            }
                        }
                    }
                    ErrorKind::Underpriced | ErrorKind::Fatal => {
                        return Err(PilotError::from_ledger(e));
                    }
                },
            }
        }
    }
}

fn to_receipt(raw: TransactionReceipt, winning_price: Option<U256>) -> Receipt {
    let effective_gas_price = winning_price
        .or(raw.effective_gas_price)
        .unwrap_or_default();

    Receipt {
        tx_hash: raw.transaction_hash,
        success: raw.status == Some(U64::one()),
        block_number: raw.block_number.map(|b| b.as_u64()).unwrap_or_default(),
        block_hash: raw.block_hash,
        gas_used: raw.gas_used.unwrap_or_default(),
        effective_gas_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::scripted::ScriptedLedger;
    use crate::config::EndpointConfig;
    use crate::error::LedgerError;

    fn setup(ledger: &ScriptedLedger) -> (Arc<ConnectionManager>, ConfirmationWaiter) {
        let manager = Arc::new(ConnectionManager::new(
            EndpointConfig {
                rpc_url: "http://scripted".to_string(),
                chain_id: 7234,
                request_timeout_secs: 20,
            },
            ledger.connector(),
        ));
        let waiter = ConfirmationWaiter::new(
            manager.clone(),
            &ConfirmationConfig::default(),
            AbortSignal::never(),
        );
        (manager, waiter)
    }

    fn pending(gas_price: u64) -> PendingSubmission {
        PendingSubmission {
            label: "swap".to_string(),
            tx_hash: H256::repeat_byte(0xaa),
            nonce: U256::from(3),
            gas_price: U256::from(gas_price),
            attempts: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_after_a_few_polls() {
        let ledger = ScriptedLedger::new();
        ledger.with(|s| {
            s.include_on_poll = Some(3);
            s.gas_used = 50_000;
        });
        let (manager, waiter) = setup(&ledger);
        let mut conn = manager.connect().await.unwrap();
        let start = Instant::now();

        let receipt = waiter.wait(&mut conn, &pending(12)).await.unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.block_number, 101);
        assert_eq!(receipt.fee(), U256::from(600_000u64));
        // polls at t=0, 5, 10
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_all_rounds() {
        let ledger = ScriptedLedger::new();
        ledger.with(|s| s.include_on_poll = None);
        let (manager, waiter) = setup(&ledger);
        let mut conn = manager.connect().await.unwrap();
        let start = Instant::now();

        let err = waiter.wait(&mut conn, &pending(10)).await.unwrap_err();

        assert!(matches!(
            err,
            PilotError::ConfirmationTimeout { rounds: 2, timeout_secs: 300, .. }
        ));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(600));
        assert!(elapsed < Duration::from_secs(601));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_round_can_confirm() {
        let ledger = ScriptedLedger::new();
        // 61 polls fit in the first 300s round (t=0..=300)
        ledger.with(|s| s.include_on_poll = Some(70));
        let (manager, waiter) = setup(&ledger);
        let mut conn = manager.connect().await.unwrap();

        let receipt = waiter.wait(&mut conn, &pending(10)).await.unwrap();
        assert!(receipt.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_network_error_reconnects_and_continues() {
        let ledger = ScriptedLedger::new();
        ledger.with(|s| {
            s.receipt_errors
                .push_back(LedgerError::Connection("connection reset".into()));
            s.include_on_poll = Some(1);
        });
        let (manager, waiter) = setup(&ledger);
        let mut conn = manager.connect().await.unwrap();

        let receipt = waiter.wait(&mut conn, &pending(10)).await.unwrap();
        assert!(receipt.success);
        assert_eq!(manager.reconnect_count(), 1);
        assert_eq!(conn.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_network_error_without_reconnect_keeps_polling() {
        let ledger = ScriptedLedger::new();
        ledger.with(|s| {
            s.receipt_errors
                .push_back(LedgerError::Connection("connection reset".into()));
            s.receipt_errors.push_back(LedgerError::Timeout(20));
            s.include_on_poll = Some(1);
        });
        let (manager, waiter) = setup(&ledger);
        let waiter = waiter.with_reconnect(false);
        let mut conn = manager.connect().await.unwrap();
        let start = Instant::now();

        let receipt = waiter.wait(&mut conn, &pending(10)).await.unwrap();
        assert!(receipt.success);
        assert_eq!(manager.reconnect_count(), 0);
        assert_eq!(conn.generation(), 0);
        // two failed polls, then the receipt on the third tick
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_hash_uses_receipt_price() {
        let ledger = ScriptedLedger::new();
        let (manager, waiter) = setup(&ledger);
        let mut conn = manager.connect().await.unwrap();

        let receipt = waiter
            .wait_for_hash(&mut conn, H256::repeat_byte(0xcc))
            .await
            .unwrap();
        assert_eq!(receipt.tx_hash, H256::repeat_byte(0xcc));
        // scripted receipts carry no effective price
        assert_eq!(receipt.effective_gas_price, U256::zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_receipt_reported_not_retried() {
        let ledger = ScriptedLedger::new();
        ledger.with(|s| s.receipt_status = 0);
        let (manager, waiter) = setup(&ledger);
        let mut conn = manager.connect().await.unwrap();

        let receipt = waiter.wait(&mut conn, &pending(10)).await.unwrap();
        assert!(!receipt.success);
        assert_eq!(ledger.with(|s| s.receipt_polls), 1);
    }
}
