use super::config::duration_millis;
use anyhow::anyhow;
use log::warn;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::Duration;

/// Structured event emitted by the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RetryEvent {
    /// A retryable failure occurred and the loop is about to back off.
    RetryAttempted {
        /// 1-based number of the retry about to happen
        attempt_number: u32,
        #[serde(rename = "delay_ms", with = "duration_millis")]
        delay: Duration,
    },
    /// The retry budget ran out; the last error is being returned.
    RetryExhausted {
        /// Total invocations of the operation, first try included
        attempts: u32,
    },
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryAttempted {
                attempt_number,
                delay,
            } => write!(f, "retry #{attempt_number} after {}ms", delay.as_millis()),
            Self::RetryExhausted { attempts } => {
                write!(f, "retries exhausted after {attempts} attempts")
            }
        }
    }
}

/// Receives retry events. Fire-and-forget: a returned error or a panic is
/// logged by the executor and otherwise ignored.
pub trait RetryObserver: Send + Sync {
    fn on_event(&self, event: &RetryEvent) -> anyhow::Result<()>;
}

/// Delivers `event` to `observer`, absorbing errors and panics.
pub(crate) fn notify(observer: Option<&dyn RetryObserver>, event: &RetryEvent) {
    let Some(observer) = observer else {
        return;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("Retry observer failed on '{}': {:#}", event, err),
        Err(payload) => warn!(
            "Retry observer panicked on '{}': {}",
            event,
            panic_message(payload.as_ref())
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Emits each event as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_event(&self, event: &RetryEvent) -> anyhow::Result<()> {
        match event {
            RetryEvent::RetryAttempted {
                attempt_number,
                delay,
            } => tracing::info!(
                attempt_number = *attempt_number,
                delay_ms = delay.as_millis() as u64,
                "retry attempted"
            ),
            RetryEvent::RetryExhausted { attempts } => {
                tracing::warn!(attempts = *attempts, "retry exhausted")
            }
        }
        Ok(())
    }
}

/// Collects events in memory, mainly for tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RetryEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl RetryObserver for RecordingObserver {
    fn on_event(&self, event: &RetryEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|err| anyhow!("event log poisoned: {err}"))?
            .push(event.clone());
        Ok(())
    }
}
