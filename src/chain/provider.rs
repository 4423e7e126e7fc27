//! Ledger endpoint access
//!
//! `LedgerClient` is the seam between the submission core and a JSON-RPC
//! endpoint. `HttpLedgerClient` is the ethers-backed implementation; tests use
//! the scripted ledger instead.

use crate::config::EndpointConfig;
use crate::error::{LedgerError, PilotError, PilotResult};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, TransactionReceipt, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Calls the submission core makes against the remote ledger
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Chain ID reported by the endpoint
    async fn chain_id(&self) -> Result<u64, LedgerError>;

    /// Latest block number; doubles as the liveness probe
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Transaction count for `address` including the pending pool
    async fn pending_nonce(&self, address: Address) -> Result<U256, LedgerError>;

    /// Endpoint's current fee estimate
    async fn gas_price(&self) -> Result<U256, LedgerError>;

    /// Broadcast a signed, RLP-encoded transaction
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, LedgerError>;

    /// Receipt for `tx_hash`, `None` while it is not yet included
    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, LedgerError>;

    /// Native balance of `address`
    async fn balance(&self, address: Address) -> Result<U256, LedgerError>;

    /// Read-only contract call
    async fn call(&self, tx: TypedTransaction) -> Result<Bytes, LedgerError>;
}

/// Opens fresh clients for an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &EndpointConfig) -> PilotResult<Arc<dyn LedgerClient>>;
}

/// JSON-RPC over HTTP via ethers
pub struct HttpLedgerClient {
    provider: Provider<Http>,
}

impl HttpLedgerClient {
    pub fn new(rpc_url: &str) -> PilotResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| PilotError::Config(format!("Invalid RPC URL '{}': {}", rpc_url, e)))?
            .interval(Duration::from_millis(500));

        Ok(Self { provider })
    }
}

/// Separate remote rejections from transport failures
fn map_provider_error(err: ProviderError) -> LedgerError {
    if let Some(resp) = err.as_error_response() {
        return LedgerError::Rpc {
            code: resp.code,
            message: resp.message.clone(),
        };
    }
    LedgerError::Connection(err.to_string())
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_chainid()
            .await
            .map(|id| id.as_u64())
            .map_err(map_provider_error)
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(map_provider_error)
    }

    async fn pending_nonce(&self, address: Address) -> Result<U256, LedgerError> {
        self.provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(map_provider_error)
    }

    async fn gas_price(&self) -> Result<U256, LedgerError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(map_provider_error)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, LedgerError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(map_provider_error)?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(map_provider_error)
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.provider
            .get_balance(address, None)
            .await
            .map_err(map_provider_error)
    }

    async fn call(&self, tx: TypedTransaction) -> Result<Bytes, LedgerError> {
        self.provider
            .call(&tx, None)
            .await
            .map_err(map_provider_error)
    }
}

/// Opens a new `HttpLedgerClient` per connection
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

#[async_trait]
impl Connector for HttpConnector {
    async fn open(&self, endpoint: &EndpointConfig) -> PilotResult<Arc<dyn LedgerClient>> {
        let client = HttpLedgerClient::new(&endpoint.rpc_url)?;
        debug!("Opened HTTP client for {}", endpoint.rpc_url);
        Ok(Arc::new(client))
    }
}
