//! Error types for txpilot
//!
//! `LedgerError` is what the endpoint reported. `ErrorKind` is what the retry
//! logic does about it. `PilotError` is what crosses the core's boundary.

use ethers::types::H256;
use thiserror::Error;

/// Failure reported by the ledger endpoint for a single call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Transport-level failure: refused, reset, DNS, garbled response
    #[error("connection failure: {0}")]
    Connection(String),

    /// The per-call deadline elapsed before the endpoint answered
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// The endpoint answered with a JSON-RPC error object
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Closed set of failure classes the retry logic reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    Underpriced,
    Timeout,
    Fatal,
}

impl ErrorKind {
    /// Whether this class calls for a reconnect before trying again
    pub fn is_network(self) -> bool {
        matches!(self, ErrorKind::TransientNetwork | ErrorKind::Timeout)
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Underpriced => "underpriced",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify an endpoint failure.
///
/// This is the only place remote messages are interpreted.
pub fn classify(err: &LedgerError) -> ErrorKind {
    match err {
        LedgerError::Connection(_) => ErrorKind::TransientNetwork,
        LedgerError::Timeout(_) => ErrorKind::Timeout,
        LedgerError::Rpc { message, .. } => {
            let message = message.to_ascii_lowercase();
            // geth: "replacement transaction underpriced", "transaction underpriced"
            // nethermind: "ReplacementNotAllowed", erigon: "could not replace existing tx"
            if message.contains("underpriced")
                || message.contains("replacementnotallowed")
                || message.contains("could not replace existing")
            {
                ErrorKind::Underpriced
            } else {
                ErrorKind::Fatal
            }
        }
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Transient network error: {0}")]
    TransientNetwork(LedgerError),

    #[error("Transaction underpriced: {0}")]
    Underpriced(LedgerError),

    #[error("Transaction {tx_hash:?} not included after {rounds} rounds of {timeout_secs}s")]
    ConfirmationTimeout {
        tx_hash: H256,
        rounds: u32,
        timeout_secs: u64,
    },

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("{kind} after {attempts} attempt(s): {source}")]
    CallFailed {
        attempts: u32,
        kind: ErrorKind,
        #[source]
        source: LedgerError,
    },

    #[error("Submission failed after {attempts} attempts: {cause}")]
    SubmissionFailed {
        attempts: u32,
        #[source]
        cause: Box<PilotError>,
    },

    #[error("Transaction {tx_hash:?} reverted in block {block_number}")]
    Reverted { tx_hash: H256, block_number: u64 },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Aborted")]
    Aborted,
}

impl PilotError {
    /// Wrap a single endpoint failure in the matching taxonomy variant
    pub fn from_ledger(err: LedgerError) -> Self {
        match classify(&err) {
            ErrorKind::TransientNetwork | ErrorKind::Timeout => PilotError::TransientNetwork(err),
            ErrorKind::Underpriced => PilotError::Underpriced(err),
            ErrorKind::Fatal => PilotError::Fatal(err.to_string()),
        }
    }

    /// Failure class, when the error came out of an endpoint call
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PilotError::CallFailed { kind, .. } => Some(*kind),
            PilotError::TransientNetwork(_) | PilotError::Unreachable { .. } => {
                Some(ErrorKind::TransientNetwork)
            }
            PilotError::Underpriced(_) => Some(ErrorKind::Underpriced),
            PilotError::ConfirmationTimeout { .. } => Some(ErrorKind::Timeout),
            PilotError::Fatal(_) => Some(ErrorKind::Fatal),
            _ => None,
        }
    }

    /// Check if a higher-level caller could reasonably try again later
    pub fn is_retryable(&self) -> bool {
        match self {
            PilotError::Unreachable { .. }
            | PilotError::TransientNetwork(_)
            | PilotError::Underpriced(_)
            | PilotError::ConfirmationTimeout { .. } => true,
            PilotError::CallFailed { kind, .. } => *kind != ErrorKind::Fatal,
            PilotError::SubmissionFailed { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(self, PilotError::Wallet(_) | PilotError::Config(_))
            || matches!(self, PilotError::Fatal(msg) if msg.contains("insufficient funds"))
    }
}

/// Result type for txpilot operations
pub type PilotResult<T> = Result<T, PilotError>;
