//! Generic retry wrapper for endpoint calls
//!
//! Classifies each failure and either reconnects and backs off (network),
//! backs off without reconnecting (pricing conflict), or gives up at once
//! (anything else).

use crate::chain::{Connection, ConnectionManager};
use crate::config::SubmissionConfig;
use crate::error::{classify, ErrorKind, LedgerError, PilotError, PilotResult};
use crate::shutdown::AbortSignal;

use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Retry configuration for one call site
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after a network failure
    pub delay: Duration,
    /// Wait after a retryable remote rejection
    pub rpc_delay: Duration,
    pub reconnect_on_network_error: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &SubmissionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_secs(config.retry_delay_secs),
            rpc_delay: Duration::from_secs(config.rpc_retry_delay_secs),
            reconnect_on_network_error: config.reconnect_on_network_error,
        }
    }

    /// Same policy limited to one try, for callers that own the outer loop
    pub fn single_attempt(&self) -> Self {
        Self {
            max_attempts: 1,
            ..self.clone()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SubmissionConfig::default())
    }
}

/// Runs fallible endpoint calls under a `RetryPolicy`
pub struct RetryExecutor<'a> {
    manager: &'a ConnectionManager,
    abort: &'a AbortSignal,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(manager: &'a ConnectionManager, abort: &'a AbortSignal) -> Self {
        Self { manager, abort }
    }

    /// Invoke `op` until it succeeds or the policy is exhausted.
    ///
    /// `op` receives the current connection; after a reconnect it sees the
    /// replacement, and so does the caller through `conn`. Failures come back
    /// as `PilotError::CallFailed` carrying the attempt count and class.
    pub async fn run<T, F, Fut>(
        &self,
        conn: &mut Connection,
        policy: &RetryPolicy,
        call: &str,
        mut op: F,
    ) -> PilotResult<T>
    where
        F: FnMut(Connection) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.abort.check()?;

            let err = match op(conn.clone()).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", call, attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind = classify(&err);
            crate::metrics::record_call_failure(call, kind);

            if kind == ErrorKind::Fatal || attempt >= max_attempts {
                if kind == ErrorKind::Fatal {
                    error!("{} attempt {}/{} failed fatally: {}", call, attempt, max_attempts, err);
                } else if max_attempts > 1 {
                    error!("{} failed after {} attempts: {}", call, attempt, err);
                }
                return Err(PilotError::CallFailed {
                    attempts: attempt,
                    kind,
                    source: err,
                });
            }

            if kind.is_network() {
                warn!("{} attempt {}/{} - {}: {}", call, attempt, max_attempts, kind, err);
                if policy.reconnect_on_network_error {
                    match self.manager.reconnect(conn.clone()).await {
                        Ok(fresh) => *conn = fresh,
                        Err(e) => warn!("Reconnect before next {} attempt failed: {}", call, e),
                    }
                }
                self.abort.sleep(policy.delay).await?;
            } else {
                warn!(
                    "{} attempt {}/{} rejected as underpriced, retrying in {:?}",
                    call, attempt, max_attempts, policy.rpc_delay
                );
                self.abort.sleep(policy.rpc_delay).await?;
            }
        }
    }
}
