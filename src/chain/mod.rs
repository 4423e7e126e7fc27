//! Chain module - owns the connection to the ledger endpoint
//!
//! This module provides:
//! - The `LedgerClient` seam and its ethers-backed implementation
//! - `Connection`, an immutable handle with a bounded per-call timeout
//! - `ConnectionManager`, which opens, probes and replaces connections

pub mod provider;
#[cfg(test)]
pub mod scripted;

pub use provider::{Connector, HttpConnector, LedgerClient};

use crate::config::EndpointConfig;
use crate::error::{LedgerError, PilotError, PilotResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A verified handle to the endpoint.
///
/// Never repaired in place: `ConnectionManager::reconnect` hands back a new one.
#[derive(Clone)]
pub struct Connection {
    endpoint: String,
    request_timeout: Duration,
    client: Arc<dyn LedgerClient>,
    live: bool,
    generation: u64,
}

impl Connection {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// How many connections the manager had opened before this one
    pub fn generation(&self) -> u64 {
        self.generation
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.request_timeout.as_secs())),
        }
    }

    pub async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.bounded(self.client.chain_id()).await
    }

    pub async fn block_number(&self) -> Result<u64, LedgerError> {
        self.bounded(self.client.block_number()).await
    }

    pub async fn pending_nonce(&self, address: Address) -> Result<U256, LedgerError> {
        self.bounded(self.client.pending_nonce(address)).await
    }

    pub async fn gas_price(&self) -> Result<U256, LedgerError> {
        self.bounded(self.client.gas_price()).await
    }

    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, LedgerError> {
        self.bounded(self.client.send_raw_transaction(raw)).await
    }

    pub async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        self.bounded(self.client.transaction_receipt(tx_hash)).await
    }

    pub async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.bounded(self.client.balance(address)).await
    }

    pub async fn call(&self, tx: TypedTransaction) -> Result<Bytes, LedgerError> {
        self.bounded(self.client.call(tx)).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("request_timeout", &self.request_timeout)
            .field("live", &self.live)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Opens and replaces connections to the configured endpoint
pub struct ConnectionManager {
    config: EndpointConfig,
    connector: Arc<dyn Connector>,
    /// Connections opened so far
    opened: AtomicU64,
    /// Successful or failed reconnect attempts
    reconnects: AtomicU64,
}

impl ConnectionManager {
    pub fn new(config: EndpointConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            opened: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Manager backed by the ethers HTTP client
    pub fn http(config: EndpointConfig) -> Self {
        Self::new(config, Arc::new(HttpConnector))
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.config
    }

    /// Open a fresh connection and verify it answers a liveness probe
    pub async fn connect(&self) -> PilotResult<Connection> {
        let client = self.connector.open(&self.config).await?;
        let generation = self.opened.fetch_add(1, Ordering::SeqCst);

        let mut connection = Connection {
            endpoint: self.config.rpc_url.clone(),
            request_timeout: self.config.request_timeout(),
            client,
            live: false,
            generation,
        };

        let block = connection.block_number().await.map_err(|e| {
            crate::metrics::record_endpoint_live(false);
            PilotError::Unreachable {
                endpoint: self.config.rpc_url.clone(),
                reason: e.to_string(),
            }
        })?;
        connection.live = true;
        crate::metrics::record_endpoint_live(true);

        // A mismatch is worth shouting about but the probe itself passed
        match connection.chain_id().await {
            Ok(chain_id) if chain_id != self.config.chain_id => {
                warn!(
                    "Endpoint {} reports chain {} but {} is configured",
                    self.config.rpc_url, chain_id, self.config.chain_id
                );
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read chain id from {}: {}", self.config.rpc_url, e),
        }

        info!(
            "Connected to {} at block {} (generation {})",
            self.config.rpc_url, block, generation
        );
        Ok(connection)
    }

    /// Discard `stale` and open a new connection in its place
    pub async fn reconnect(&self, stale: Connection) -> PilotResult<Connection> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        crate::metrics::record_reconnect();
        warn!(
            "Re-initializing connection to {} (replacing generation {})",
            stale.endpoint, stale.generation
        );
        drop(stale);
        self.connect().await
    }

    /// Probe an existing connection without replacing it
    pub async fn health_check(&self, connection: &Connection) -> bool {
        let healthy = connection.block_number().await.is_ok();
        crate::metrics::record_endpoint_live(healthy);
        healthy
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }
}
