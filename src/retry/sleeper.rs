use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Backoff was interrupted by a shutdown/cancellation signal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("retry backoff cancelled by shutdown signal")]
pub struct Cancelled;

/// Suspends the retry loop between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `delay`, or returns [`Cancelled`] as soon as the wait is
    /// interrupted.
    async fn sleep(&self, delay: Duration) -> Result<(), Cancelled>;
}

/// Real wall-clock sleeper backed by the tokio timer.
///
/// With a shutdown receiver attached, flipping the flag to `true` cancels
/// any in-progress sleep and every later one.
#[derive(Debug, Clone, Default)]
pub struct TokioSleeper {
    shutdown: Option<watch::Receiver<bool>>,
}

impl TokioSleeper {
    pub fn new() -> Self {
        Self { shutdown: None }
    }

    /// Sleeper cancelled when `shutdown` becomes `true`.
    ///
    /// ```
    /// use txretry::TokioSleeper;
    ///
    /// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    /// let sleeper = TokioSleeper::with_shutdown(shutdown_rx);
    /// // later: shutdown_tx.send(true)
    /// # drop((shutdown_tx, sleeper));
    /// ```
    pub fn with_shutdown(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }
}

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) -> Result<(), Cancelled> {
        let Some(shutdown) = &self.shutdown else {
            tokio::time::sleep(delay).await;
            return Ok(());
        };

        let mut shutdown = shutdown.clone();
        let stopped = *shutdown.borrow_and_update();
        if stopped {
            return Err(Cancelled);
        }

        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = &mut timer => return Ok(()),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can cancel us any more
                        (&mut timer).await;
                        return Ok(());
                    }
                    let stopped = *shutdown.borrow_and_update();
                    if stopped {
                        return Err(Cancelled);
                    }
                }
            }
        }
    }
}

/// Test sleeper: records each requested delay and returns immediately.
///
/// `cancel_on(n)` makes the `n`-th sleep (1-based) return [`Cancelled`].
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
    cancel_on: Option<usize>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_on(mut self, sleep_number: usize) -> Self {
        self.cancel_on = Some(sleep_number);
        self
    }

    /// Delays requested so far, including a cancelled one.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn sleep_count(&self) -> usize {
        self.delays().len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) -> Result<(), Cancelled> {
        let count = {
            let mut delays = self
                .delays
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            delays.push(delay);
            delays.len()
        };

        if self.cancel_on == Some(count) {
            return Err(Cancelled);
        }
        Ok(())
    }
}
