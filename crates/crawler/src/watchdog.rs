//! Hang watchdog - a deadline raced against one browser operation
//!
//! Armed before the operation starts, disarmed when it returns. If the
//! deadline passes first the callback runs to completion on its own task,
//! even if the guard is disarmed or dropped halfway through: a reset that
//! has started is never left half done.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct HangGuard {
    timer: JoinHandle<()>,
    fired: oneshot::Receiver<()>,
    timeout: Duration,
}

impl HangGuard {
    /// Start the countdown; `on_fire` runs once when `timeout` elapses
    pub fn arm<F, Fut>(timeout: Duration, on_fire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, fired) = oneshot::channel();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Detached so aborting the timer cannot interrupt the reset
            let reset = tokio::spawn(on_fire());
            if let Err(e) = reset.await {
                tracing::error!("Hang callback failed: {}", e);
            }
            let _ = tx.send(());
        });

        Self {
            timer,
            fired,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves after the deadline passed and the callback finished;
    /// pending forever once the guard is disarmed
    pub async fn fired(&mut self) {
        if (&mut self.fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn disarm(self) {
        self.timer.abort();
    }
}

impl Drop for HangGuard {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
