//! Cooperative abort signal
//!
//! Checked between attempts and raced against every backoff or poll wait.
//! In-flight endpoint calls are not interrupted; they are bounded by the
//! per-call timeout instead.

use crate::error::{PilotError, PilotResult};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Trips the paired `AbortSignal`s
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
    // Keeps the channel open so `changed()` never reports a closed sender
    _tx: Arc<watch::Sender<bool>>,
}

/// Create a connected handle/signal pair
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);
    (AbortHandle { tx: tx.clone() }, AbortSignal { rx, _tx: tx })
}

impl AbortSignal {
    /// A signal nobody can trip
    #[cfg(test)]
    pub fn never() -> Self {
        abort_pair().1
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail fast if an abort was requested
    pub fn check(&self) -> PilotResult<()> {
        if self.is_aborted() {
            Err(PilotError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Resolves once the signal is tripped
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration` unless aborted first
    pub async fn sleep(&self, duration: Duration) -> PilotResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(PilotError::Aborted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_abort() {
        let signal = AbortSignal::never();
        assert_ok!(signal.sleep(Duration::from_secs(5)).await);
        assert_ok!(signal.check());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_interrupts_sleep() {
        let (handle, signal) = abort_pair();
        let start = tokio::time::Instant::now();

        let sleeper = tokio::spawn({
            let signal = signal.clone();
            async move { signal.sleep(Duration::from_secs(3600)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.abort();

        let result = sleeper.await.unwrap();
        assert!(matches!(result, Err(PilotError::Aborted)));
        assert!(start.elapsed() < Duration::from_secs(3600));
        assert_err!(signal.check());
    }
}
