//! Data carried through a submission

use crate::error::{PilotError, PilotResult};

use ethers::types::{Address, Bytes, H256, U256};
use std::fmt;

/// What to send, as produced by the operation encoder.
///
/// The core never looks inside `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    /// Short name used in logs and metrics
    pub label: String,
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: U256,
    /// Starting gas price; `None` asks the endpoint for an estimate
    pub gas_price: Option<U256>,
}

impl OperationDescriptor {
    pub fn new(label: impl Into<String>, from: Address, to: Address, data: Bytes) -> Self {
        Self {
            label: label.into(),
            from,
            to,
            data,
            value: U256::zero(),
            gas_limit: U256::from(21_000u64),
            gas_price: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = U256::from(gas_limit);
        self
    }

    pub fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    /// Reject descriptors no endpoint could accept
    pub fn validate(&self) -> PilotResult<()> {
        if self.gas_limit.is_zero() {
            return Err(PilotError::Fatal(format!(
                "malformed descriptor '{}': zero gas limit",
                self.label
            )));
        }
        if self.to.is_zero() {
            return Err(PilotError::Fatal(format!(
                "malformed descriptor '{}': zero target address",
                self.label
            )));
        }
        if matches!(self.gas_price, Some(p) if p.is_zero()) {
            return Err(PilotError::Fatal(format!(
                "malformed descriptor '{}': zero gas price",
                self.label
            )));
        }
        Ok(())
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientNetwork,
    Underpriced,
    Fatal,
}

impl AttemptOutcome {
    pub fn label(self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::TransientNetwork => "transient_network",
            AttemptOutcome::Underpriced => "underpriced",
            AttemptOutcome::Fatal => "fatal",
        }
    }
}

/// One pass through Build/Sign/Broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionAttempt {
    /// 1-based
    pub index: u32,
    /// `None` when the attempt failed before a nonce was fetched
    pub nonce: Option<U256>,
    /// `None` when the attempt failed before a price was settled
    pub gas_price: Option<U256>,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for TransactionAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.outcome.label())?;
        if let Some(nonce) = self.nonce {
            write!(f, " nonce={}", nonce)?;
        }
        if let Some(price) = self.gas_price {
            write!(f, " price={}", price)?;
        }
        Ok(())
    }
}

/// One line per submission for logs: `#1 underpriced nonce=4 price=10, #2 ...`
pub fn attempt_trail(attempts: &[TransactionAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A transaction the endpoint accepted but that may not be included yet
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub label: String,
    pub tx_hash: H256,
    pub nonce: U256,
    /// Price of the winning attempt
    pub gas_price: U256,
    pub attempts: Vec<TransactionAttempt>,
}

impl PendingSubmission {
    pub fn trail(&self) -> String {
        attempt_trail(&self.attempts)
    }
}

/// Inclusion attestation for a broadcast transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub tx_hash: H256,
    /// Execution status: `false` means included but reverted
    pub success: bool,
    pub block_number: u64,
    pub block_hash: Option<H256>,
    pub gas_used: U256,
    pub effective_gas_price: U256,
}

impl Receipt {
    /// Fee actually paid: gas used at the winning attempt's price
    pub fn fee(&self) -> U256 {
        self.gas_used.saturating_mul(self.effective_gas_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_gas_limit() {
        let d = OperationDescriptor::new(
            "noop",
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Bytes::default(),
        )
        .with_gas_limit(0);
        assert!(matches!(d.validate(), Err(PilotError::Fatal(_))));
    }

    #[test]
    fn test_validate_rejects_zero_target() {
        let d = OperationDescriptor::new("noop", Address::repeat_byte(1), Address::zero(), Bytes::default());
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_attempt_trail_lists_every_attempt() {
        let attempts = vec![
            TransactionAttempt {
                index: 1,
                nonce: None,
                gas_price: None,
                outcome: AttemptOutcome::TransientNetwork,
            },
            TransactionAttempt {
                index: 2,
                nonce: Some(U256::from(4)),
                gas_price: Some(U256::from(10u64)),
                outcome: AttemptOutcome::Underpriced,
            },
            TransactionAttempt {
                index: 3,
                nonce: Some(U256::from(4)),
                gas_price: Some(U256::from(12u64)),
                outcome: AttemptOutcome::Success,
            },
        ];
        assert_eq!(
            attempt_trail(&attempts),
            "#1 transient_network, #2 underpriced nonce=4 price=10, #3 success nonce=4 price=12"
        );
        assert_eq!(attempt_trail(&[]), "");
    }

    #[test]
    fn test_receipt_fee() {
        let receipt = Receipt {
            tx_hash: H256::zero(),
            success: true,
            block_number: 1,
            block_hash: None,
            gas_used: U256::from(50_000u64),
            effective_gas_price: U256::from(12u64),
        };
        assert_eq!(receipt.fee(), U256::from(600_000u64));
    }
}
