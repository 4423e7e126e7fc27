//! Scripted in-memory ledger for tests
//!
//! Each queue is consumed front to back; an empty queue means "succeed".

use super::provider::{Connector, LedgerClient};
use crate::config::EndpointConfig;
use crate::error::{LedgerError, PilotResult};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct ScriptState {
    pub chain_id: u64,
    pub block: u64,
    /// Connections opened through the connector
    pub opens: u32,
    pub probe_errors: VecDeque<LedgerError>,

    /// Successive pending-nonce answers; the last one repeats
    pub nonces: VecDeque<u64>,
    pub nonce_errors: VecDeque<LedgerError>,
    /// Every nonce handed out
    pub nonce_fetches: Vec<u64>,

    pub gas_price: u64,
    pub gas_price_calls: u32,

    pub send_errors: VecDeque<LedgerError>,
    pub sent: Vec<Bytes>,
    pub hang_sends: bool,

    /// Receipt appears on this poll (1-based); `None` means never
    pub include_on_poll: Option<u32>,
    pub receipt_polls: u32,
    pub receipt_errors: VecDeque<LedgerError>,
    pub receipt_status: u64,
    pub gas_used: u64,

    pub balance: U256,
    pub call_result: Bytes,
    pub call_errors: VecDeque<LedgerError>,
}

#[derive(Clone)]
pub struct ScriptedLedger {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        let state = ScriptState {
            chain_id: 7234,
            block: 100,
            nonces: VecDeque::from(vec![0]),
            gas_price: 10_000_000_000,
            include_on_poll: Some(1),
            receipt_status: 1,
            gas_used: 21_000,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Inspect or adjust the script
    pub fn with<R>(&self, f: impl FnOnce(&mut ScriptState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(ScriptedConnector(self.clone()))
    }
}

/// Hash the scripted ledger assigns to a raw transaction
pub fn hash_of(raw: &Bytes) -> H256 {
    H256::from(keccak256(raw.as_ref()))
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(self.with(|s| s.chain_id))
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.with(|s| match s.probe_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(s.block),
        })
    }

    async fn pending_nonce(&self, _address: Address) -> Result<U256, LedgerError> {
        self.with(|s| {
            if let Some(err) = s.nonce_errors.pop_front() {
                return Err(err);
            }
            let nonce = if s.nonces.len() > 1 {
                s.nonces.pop_front().unwrap_or_default()
            } else {
                s.nonces.front().copied().unwrap_or_default()
            };
            s.nonce_fetches.push(nonce);
            Ok(U256::from(nonce))
        })
    }

    async fn gas_price(&self) -> Result<U256, LedgerError> {
        self.with(|s| {
            s.gas_price_calls += 1;
            Ok(U256::from(s.gas_price))
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, LedgerError> {
        let hang = self.with(|s| s.hang_sends);
        if hang {
            std::future::pending::<()>().await;
        }
        self.with(|s| {
            s.sent.push(raw.clone());
            match s.send_errors.pop_front() {
                Some(err) => Err(err),
                None => Ok(hash_of(&raw)),
            }
        })
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        self.with(|s| {
            if let Some(err) = s.receipt_errors.pop_front() {
                return Err(err);
            }
            s.receipt_polls += 1;
            match s.include_on_poll {
                Some(n) if s.receipt_polls >= n => Ok(Some(TransactionReceipt {
                    transaction_hash: tx_hash,
                    block_number: Some(U64::from(s.block + 1)),
                    block_hash: Some(H256::repeat_byte(0xbb)),
                    gas_used: Some(U256::from(s.gas_used)),
                    status: Some(U64::from(s.receipt_status)),
                    ..Default::default()
                })),
                _ => Ok(None),
            }
        })
    }

    async fn balance(&self, _address: Address) -> Result<U256, LedgerError> {
        Ok(self.with(|s| s.balance))
    }

    async fn call(&self, _tx: TypedTransaction) -> Result<Bytes, LedgerError> {
        self.with(|s| match s.call_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(s.call_result.clone()),
        })
    }
}

pub struct ScriptedConnector(ScriptedLedger);

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, _endpoint: &EndpointConfig) -> PilotResult<Arc<dyn LedgerClient>> {
        self.0.with(|s| s.opens += 1);
        Ok(Arc::new(self.0.clone()))
    }
}
