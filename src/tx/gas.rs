//! Gas pricing: starting price and underpriced escalation

use crate::chain::Connection;
use crate::error::LedgerError;
use crate::tx::OperationDescriptor;

use ethers::types::U256;
use tracing::debug;

/// Gas price policy for a submission
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer added to the endpoint's estimate (e.g., 10 = 10%)
    gas_price_buffer_percent: u64,
    /// Escalation after an underpriced rejection (e.g., 20 = ×1.2)
    bump_percent: u64,
}

impl GasEstimator {
    pub fn new(bump_percent: u64) -> Self {
        Self {
            gas_price_buffer_percent: 10,
            bump_percent,
        }
    }

    /// Price for the first attempt of a submission
    pub async fn starting_price(
        &self,
        conn: &Connection,
        descriptor: &OperationDescriptor,
    ) -> Result<U256, LedgerError> {
        if let Some(price) = descriptor.gas_price {
            return Ok(price);
        }

        let estimate = conn.gas_price().await?;
        let buffered = estimate.saturating_add(
            estimate.saturating_mul(U256::from(self.gas_price_buffer_percent)) / 100,
        );
        debug!(
            "No starting gas price for {}, using endpoint estimate {} (+{}%) = {}",
            descriptor.label, estimate, self.gas_price_buffer_percent, buffered
        );
        Ok(buffered)
    }

    /// Next price after an underpriced rejection.
    ///
    /// `ceil(previous × (100 + bump) / 100)`, always strictly above `previous`
    /// until it saturates at `U256::MAX`. Each step compounds on the price
    /// actually broadcast, so a non-round start rounds up at every step.
    pub fn escalate(&self, previous: U256) -> U256 {
        let hundred = U256::from(100u64);
        let scaled = previous.saturating_mul(U256::from(100 + self.bump_percent));
        let bumped = scaled.saturating_add(hundred - 1) / hundred;
        bumped.max(previous.saturating_add(U256::one()))
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::scripted::ScriptedLedger;
    use crate::chain::ConnectionManager;
    use crate::config::EndpointConfig;
    use ethers::types::{Address, Bytes};

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    #[test]
    fn test_escalation_matches_compound_multiplier() {
        let gas = GasEstimator::new(20);
        let mut price = gwei(10);
        let expected = [gwei(12), U256::from(14_400_000_000u64), U256::from(17_280_000_000u64)];
        for want in expected {
            price = gas.escalate(price);
            assert_eq!(price, want);
        }
    }

    #[test]
    fn test_escalation_rounds_up() {
        let gas = GasEstimator::new(20);
        assert_eq!(gas.escalate(U256::from(10u64)), U256::from(12u64));
        assert_eq!(gas.escalate(U256::from(12u64)), U256::from(15u64));
        // Tiny prices still strictly increase
        assert_eq!(gas.escalate(U256::one()), U256::from(2u64));
        assert_eq!(gas.escalate(U256::zero()), U256::one());
    }

    #[test]
    fn test_escalation_compounds_from_non_round_start() {
        let gas = GasEstimator::new(20);
        let mut price = U256::from(7u64);
        let mut seen = Vec::new();
        for _ in 0..3 {
            price = gas.escalate(price);
            seen.push(price.as_u64());
        }
        // Rounded up from the previous price, not round(7 × 1.2^k)
        assert_eq!(seen, vec![9, 11, 14]);
    }

    #[test]
    fn test_escalation_saturates_without_overflow() {
        let gas = GasEstimator::new(20);
        assert_eq!(gas.escalate(U256::MAX), U256::MAX);
        assert_eq!(gas.escalate(U256::MAX - 1), U256::MAX);
        let huge = U256::MAX / 2;
        assert!(gas.escalate(huge) > huge);
    }

    #[tokio::test]
    async fn test_starting_price_buffer_on_large_estimate() {
        let ledger = ScriptedLedger::new();
        let manager = ConnectionManager::new(
            EndpointConfig {
                rpc_url: "http://scripted".to_string(),
                chain_id: 7234,
                request_timeout_secs: 20,
            },
            ledger.connector(),
        );
        let conn = manager.connect().await.unwrap();
        ledger.with(|s| s.gas_price = u64::MAX);

        let open = OperationDescriptor::new(
            "approve",
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Bytes::default(),
        );
        let price = GasEstimator::default().starting_price(&conn, &open).await.unwrap();
        assert!(price > U256::from(u64::MAX));
    }

    #[tokio::test]
    async fn test_starting_price_prefers_descriptor() {
        let ledger = ScriptedLedger::new();
        let manager = ConnectionManager::new(
            EndpointConfig {
                rpc_url: "http://scripted".to_string(),
                chain_id: 7234,
                request_timeout_secs: 20,
            },
            ledger.connector(),
        );
        let conn = manager.connect().await.unwrap();
        let gas = GasEstimator::default();

        let fixed = OperationDescriptor::new(
            "approve",
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Bytes::default(),
        )
        .with_gas_price(gwei(10));
        assert_eq!(gas.starting_price(&conn, &fixed).await.unwrap(), gwei(10));
        assert_eq!(ledger.with(|s| s.gas_price_calls), 0);

        let open = OperationDescriptor { gas_price: None, ..fixed };
        ledger.with(|s| s.gas_price = 20_000_000_000);
        assert_eq!(gas.starting_price(&conn, &open).await.unwrap(), gwei(22));
        assert_eq!(ledger.with(|s| s.gas_price_calls), 1);
    }
}
