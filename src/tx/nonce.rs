//! Nonce tracking for the single sending account
//!
//! Handles:
//! - Fetching the pending transaction count for every Build step
//! - Gap detection against the last nonce handed out

use crate::chain::Connection;
use crate::error::LedgerError;

use ethers::types::{Address, U256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Fetches nonces for one sender and remembers the last one issued
pub struct NonceManager {
    /// Wallet address
    address: Address,
    /// Last nonce handed to a Build step
    last_issued: Mutex<Option<U256>>,
}

impl NonceManager {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            last_issued: Mutex::new(None),
        }
    }

    /// Fetch the sender's pending count from the endpoint.
    ///
    /// Always goes to the endpoint; the local record only feeds gap warnings.
    pub async fn fetch(&self, conn: &Connection) -> Result<U256, LedgerError> {
        let nonce = conn.pending_nonce(self.address).await?;

        let mut last = self.last_issued.lock().await;
        if let Some(previous) = *last {
            if nonce < previous {
                warn!(
                    "Nonce went backwards for {:?}: issued {} before, endpoint now reports {}",
                    self.address, previous, nonce
                );
            } else if nonce > previous + 1 {
                warn!(
                    "Nonce gap detected for {:?}: expected at most {}, got {}",
                    self.address,
                    previous + 1,
                    nonce
                );
            }
        }
        *last = Some(nonce);

        debug!("Fetched nonce {} for {:?}", nonce, self.address);
        Ok(nonce)
    }
}
