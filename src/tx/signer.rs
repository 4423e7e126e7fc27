//! Signing capability
//!
//! The core only sees `TxSigner`; the key never leaves `LocalSigner` and is
//! never formatted.

use crate::error::{PilotError, PilotResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};

/// Deterministic transaction signer
pub trait TxSigner: Send + Sync {
    fn address(&self) -> Address;

    /// RLP-encoded signed transaction ready for broadcast
    fn sign(&self, tx: &TypedTransaction) -> PilotResult<Bytes>;
}

/// In-memory secp256k1 key
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    pub fn from_key(key: &str, chain_id: u64) -> PilotResult<Self> {
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| PilotError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(chain_id);
        Ok(Self { wallet })
    }

    /// Load the key from the named environment variable
    pub fn from_env(var: &str, chain_id: u64) -> PilotResult<Self> {
        let key = std::env::var(var)
            .map_err(|_| PilotError::Wallet(format!("No wallet configured. Set {}", var)))?;
        Self::from_key(&key, chain_id)
    }
}

impl TxSigner for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn sign(&self, tx: &TypedTransaction) -> PilotResult<Bytes> {
        let signature = self
            .wallet
            .sign_transaction_sync(tx)
            .map_err(|e| PilotError::Wallet(e.to_string()))?;
        Ok(tx.rlp_signed(&signature))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.wallet.address())
            .finish()
    }
}
