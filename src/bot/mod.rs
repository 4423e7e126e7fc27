//! Swap and check-in bot driving the submission core
//!
//! Each cycle:
//! 1. Check in if the randomized cadence elapsed
//! 2. Read balances, skip the cycle when native funds are low
//! 3. Swap a random native amount into the token
//! 4. Swap the token balance (minus a reserve) back to native

mod schedule;

pub use schedule::{plan_return_swap, random_amount, random_secs, CheckInSchedule};

use crate::chain::{Connection, ConnectionManager};
use crate::config::{BotConfig, Settings};
use crate::error::{PilotError, PilotResult};
use crate::ops::{from_wei, to_wei, Contracts, OperationEncoder};
use crate::shutdown::AbortSignal;
use crate::tx::{
    ConfirmationWaiter, GasEstimator, OperationDescriptor, Receipt, RetryExecutor, RetryPolicy,
    TransactionSubmitter, TxSigner,
};

use ethers::types::{H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

const LOW_BALANCE_PAUSE: Duration = Duration::from_secs(300);
const FAILURE_PAUSE: Duration = Duration::from_secs(10);
const BALANCE_ATTEMPTS: u32 = 3;

/// Wallet balances in ether units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balances {
    pub native: f64,
    pub token: f64,
}

/// Swap/check-in loop for one wallet
pub struct Bot {
    manager: Arc<ConnectionManager>,
    submitter: TransactionSubmitter,
    checkin_waiter: ConfirmationWaiter,
    encoder: OperationEncoder,
    policy: RetryPolicy,
    config: BotConfig,
    schedule: CheckInSchedule,
    abort: AbortSignal,
}

impl Bot {
    pub fn new(
        settings: &Settings,
        manager: Arc<ConnectionManager>,
        signer: Arc<dyn TxSigner>,
        abort: AbortSignal,
    ) -> PilotResult<Self> {
        let contracts = Contracts::from_config(&settings.contracts)?;
        let encoder = OperationEncoder::new(signer.address(), contracts)?;

        let reconnect = settings.submission.reconnect_on_network_error;
        let waiter = ConfirmationWaiter::new(manager.clone(), &settings.confirmation, abort.clone())
            .with_reconnect(reconnect);
        let checkin_waiter =
            ConfirmationWaiter::new(manager.clone(), &settings.confirmation, abort.clone())
                .with_round_timeout(Duration::from_secs(settings.bot.checkin_timeout_secs))
                .with_reconnect(reconnect);
        let submitter = TransactionSubmitter::new(
            manager.clone(),
            signer,
            GasEstimator::new(settings.submission.gas_bump_percent),
            waiter,
            abort.clone(),
        );

        let config = settings.bot.clone();
        let schedule = CheckInSchedule::new(config.first_checkin_gap_secs, config.checkin_gap_secs);

        Ok(Self {
            manager,
            submitter,
            checkin_waiter,
            encoder,
            policy: RetryPolicy::from_config(&settings.submission),
            config,
            schedule,
            abort,
        })
    }

    /// Check in at startup, then cycle until aborted
    pub async fn run(&mut self, conn: &mut Connection) -> PilotResult<()> {
        info!("Bot started for wallet {:?}", self.encoder.sender());

        self.scheduled_check_in(conn).await;

        loop {
            self.ensure_live(conn).await;

            match self.run_cycle(conn).await {
                Ok(()) => {}
                Err(PilotError::Aborted) => break,
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Cycle failed, retrying after a pause: {}", e);
                    } else {
                        error!("Unexpected error in cycle: {}", e);
                    }
                    if let Err(PilotError::Aborted) = self.abort.sleep(FAILURE_PAUSE).await {
                        break;
                    }
                }
            }
        }

        info!("Bot stopped");
        Ok(())
    }

    /// Check the current connection and replace it when it stops answering
    async fn ensure_live(&self, conn: &mut Connection) {
        if self.manager.health_check(conn).await {
            return;
        }
        warn!(
            "Endpoint {} stopped answering (generation {}), reconnecting",
            conn.endpoint(),
            conn.generation()
        );
        match self.manager.reconnect(conn.clone()).await {
            Ok(fresh) => {
                *conn = fresh;
                info!(
                    "Reconnected as generation {} ({} reconnects so far)",
                    conn.generation(),
                    self.manager.reconnect_count()
                );
            }
            Err(e) => warn!("Reconnect before cycle failed: {}", e),
        }
    }

    /// One swap cycle
    pub async fn run_cycle(&mut self, conn: &mut Connection) -> PilotResult<()> {
        info!("=== New cycle ===");
        self.abort.check()?;

        if self.schedule.is_due(Instant::now()) {
            self.scheduled_check_in(conn).await;
        }

        let before = self.balances(conn).await?;
        info!("Balances: {:.4} native, {:.4} token", before.native, before.token);

        if before.native < self.config.min_native_balance {
            warn!(
                "Native balance {:.4} below {:.1}, skipping cycle",
                before.native, self.config.min_native_balance
            );
            return self.abort.sleep(LOW_BALANCE_PAUSE).await;
        }

        let amount = random_amount(self.config.swap_min, self.config.swap_max);
        info!("Swapping {} native -> token", amount);
        let swap = self
            .encoder
            .swap_native_for_token(to_wei(amount, 2)?, U256::zero())?;
        if let Err(e) = self.execute(conn, &swap).await {
            if matches!(e, PilotError::Aborted) {
                return Err(e);
            }
            warn!("Native -> token swap failed: {}", e);
            return self.abort.sleep(FAILURE_PAUSE).await;
        }

        let after = self.balances(conn).await?;
        info!("After swap: {:.4} native, {:.4} token", after.native, after.token);
        self.pause().await?;

        match plan_return_swap(after.token, self.config.token_reserve, self.config.swap_min) {
            None => info!("Not enough token to swap back, skipping second swap"),
            Some(amount) => {
                info!("Swapping {:.6} token -> native", amount);
                let swap = self
                    .encoder
                    .swap_token_for_native(to_wei(amount, 6)?, U256::zero())?;
                if let Err(e) = self.execute(conn, &swap).await {
                    if matches!(e, PilotError::Aborted) {
                        return Err(e);
                    }
                    warn!("Token -> native swap failed: {}", e);
                }
            }
        }

        let last = self.balances(conn).await?;
        info!("Final balances: {:.4} native, {:.4} token", last.native, last.token);
        self.pause().await
    }

    async fn pause(&self) -> PilotResult<()> {
        let sleep = random_secs(self.config.cycle_sleep_min_secs, self.config.cycle_sleep_max_secs);
        info!("Sleeping {:?}", sleep);
        self.abort.sleep(sleep).await
    }

    /// Submit and wait; a reverted receipt counts as a failure
    async fn execute(
        &self,
        conn: &mut Connection,
        descriptor: &OperationDescriptor,
    ) -> PilotResult<Receipt> {
        let receipt = self.submitter.submit(conn, descriptor, &self.policy).await?;
        report(&descriptor.label, receipt)
    }

    async fn scheduled_check_in(&mut self, conn: &mut Connection) {
        if let Err(e) = self.check_in(conn).await {
            error!("Check-in failed: {}", e);
        }
        self.schedule.record(Instant::now());
        info!("Next check-in in {:?}", self.schedule.next_gap());
    }

    /// Submit one check-in and wait for it under the check-in timeout
    pub async fn check_in(&self, conn: &mut Connection) -> PilotResult<Receipt> {
        info!("Attempting daily check-in");
        let descriptor = self.encoder.check_in()?;
        let pending = self.submitter.broadcast(conn, &descriptor, &self.policy).await?;
        let receipt = self.checkin_waiter.wait(conn, &pending).await?;
        report(&descriptor.label, receipt)
    }

    /// Approve the router to spend `amount` (ether units) of the token
    pub async fn approve(&self, conn: &mut Connection, amount: f64) -> PilotResult<Receipt> {
        let descriptor = self.encoder.approve(to_wei(amount, 6)?)?;
        self.execute(conn, &descriptor).await
    }

    /// Wait for a transaction broadcast elsewhere
    pub async fn wait_for(&self, conn: &mut Connection, tx_hash: H256) -> PilotResult<Receipt> {
        self.submitter.waiter().wait_for_hash(conn, tx_hash).await
    }

    /// Native and token balances, each read under the retry executor
    pub async fn balances(&self, conn: &mut Connection) -> PilotResult<Balances> {
        let policy = RetryPolicy {
            max_attempts: BALANCE_ATTEMPTS,
            ..self.policy.clone()
        };
        let executor = RetryExecutor::new(&self.manager, &self.abort);
        let sender = self.encoder.sender();

        let native = executor
            .run(conn, &policy, "balance", |c| async move { c.balance(sender).await })
            .await?;

        let request = self.encoder.token_balance_call()?;
        let raw = executor
            .run(conn, &policy, "balance_of", |c| {
                let request = request.clone();
                async move { c.call(request).await }
            })
            .await?;
        let token = self.encoder.decode_balance(&raw)?;

        let balances = Balances {
            native: from_wei(native),
            token: from_wei(token),
        };
        crate::metrics::record_wallet_balance("native", balances.native);
        crate::metrics::record_wallet_balance("token", balances.token);
        Ok(balances)
    }
}

fn report(label: &str, receipt: Receipt) -> PilotResult<Receipt> {
    if !receipt.success {
        error!("{} reverted in block {}", label, receipt.block_number);
        return Err(PilotError::Reverted {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        });
    }
    info!(
        "{} confirmed in block {}, fee {} native",
        label,
        receipt.block_number,
        ethers::utils::format_ether(receipt.fee())
    );
    Ok(receipt)
}
