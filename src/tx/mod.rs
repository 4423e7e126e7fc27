//! Transaction submission module with retry, gas escalation and confirmation

mod confirm;
mod gas;
mod nonce;
mod retry;
mod sender;
mod signer;
mod types;

pub use confirm::ConfirmationWaiter;
pub use gas::GasEstimator;
pub use retry::{RetryExecutor, RetryPolicy};
pub use sender::TransactionSubmitter;
pub use signer::{LocalSigner, TxSigner};
pub use types::{
    attempt_trail, AttemptOutcome, OperationDescriptor, PendingSubmission, Receipt,
    TransactionAttempt,
};
