use super::classifier::{Classification, DefaultClassifier, ErrorClassifier};
use super::config::{RetryConfig, RetryConfigError};
use super::observer::{RetryEvent, RetryObserver, notify};
use super::sleeper::{Cancelled, Sleeper, TokioSleeper};
use log::{debug, error, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Failure returned by the retry loop.
///
/// `Operation` carries the operation's own error, untouched, whether it was
/// fatal on the first try or the retry budget ran out. `Cancelled` means the
/// backoff was interrupted and the operation was not invoked again.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    Operation(E),
    Cancelled(Cancelled),
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// The operation error, if this is not a cancellation.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(err) => Some(err),
            Self::Cancelled(_) => None,
        }
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err),
            Self::Cancelled(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(err) => write!(f, "{err}"),
            Self::Cancelled(cancelled) => write!(f, "{cancelled}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Operation(err) => err.source(),
            Self::Cancelled(_) => None,
        }
    }
}

/// Per-call retry bookkeeping.
#[derive(Debug, Default)]
struct AttemptState {
    /// Retries already consumed
    attempt_index: u32,
}

impl AttemptState {
    fn invocations(&self) -> u32 {
        self.attempt_index.saturating_add(1)
    }
}

/// Runs `operation`, retrying retryable failures with exponential backoff.
///
/// - success returns the value;
/// - a fatal failure returns the error at once, without sleeping;
/// - a retryable failure sleeps `config.delay_for(n)` and tries again, up to
///   `config.max_attempts` retries, after which the last error is returned
///   unchanged;
/// - a cancelled sleep returns [`RetryError::Cancelled`] immediately.
///
/// The operation must be safe to repeat after a failed attempt.
pub async fn execute<F, Fut, T, E, C>(
    mut operation: F,
    config: &RetryConfig,
    classifier: &C,
    sleeper: &dyn Sleeper,
    observer: Option<&dyn RetryObserver>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    C: ErrorClassifier<E> + ?Sized,
{
    let mut state = AttemptState::default();

    loop {
        let err = match operation().await {
            Ok(value) => {
                if state.attempt_index > 0 {
                    debug!(
                        "Operation succeeded after {} retries",
                        state.attempt_index
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if classifier.classify(&err) == Classification::Fatal {
            debug!(
                "Non-retryable failure on attempt {}: {}",
                state.invocations(),
                err
            );
            return Err(RetryError::Operation(err));
        }

        if state.attempt_index >= config.max_attempts {
            error!(
                "Hit max retries ({}) after {} attempts: {}",
                config.max_attempts,
                state.invocations(),
                err
            );
            notify(
                observer,
                &RetryEvent::RetryExhausted {
                    attempts: state.invocations(),
                },
            );
            return Err(RetryError::Operation(err));
        }

        let delay = config.delay_for(state.attempt_index);
        let attempt_number = state.attempt_index + 1;
        warn!(
            "Retryable failure, retrying (attempt {} of {}): {} (backoff={}ms)",
            attempt_number,
            config.max_attempts,
            err,
            delay.as_millis()
        );
        notify(
            observer,
            &RetryEvent::RetryAttempted {
                attempt_number,
                delay,
            },
        );

        if let Err(cancelled) = sleeper.sleep(delay).await {
            warn!(
                "Retry backoff cancelled before attempt {}; giving up",
                attempt_number
            );
            return Err(RetryError::Cancelled(cancelled));
        }

        state.attempt_index += 1;
    }
}

/// Reusable retry policy: config, classifier, sleeper and optional observer.
///
/// Holds no per-call state, so one executor may serve concurrent callers.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use txretry::{DbError, RetryConfig, RetryExecutor};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let executor = RetryExecutor::new(RetryConfig::new(3, Duration::from_millis(1)))?;
///
/// let mut calls = 0;
/// let id = executor
///     .execute(|| {
///         calls += 1;
///         let attempt = calls;
///         async move {
///             if attempt < 3 {
///                 Err(DbError::serialization_failure("restart transaction"))
///             } else {
///                 Ok(42)
///             }
///         }
///     })
///     .await?;
///
/// assert_eq!(id, 42);
/// assert_eq!(calls, 3);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RetryExecutor<C = DefaultClassifier> {
    config: RetryConfig,
    classifier: C,
    sleeper: Arc<dyn Sleeper>,
    observer: Option<Arc<dyn RetryObserver>>,
}

impl RetryExecutor<DefaultClassifier> {
    /// Executor with the default classifier and a tokio sleeper.
    pub fn new(config: RetryConfig) -> Result<Self, RetryConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            classifier: DefaultClassifier::default(),
            sleeper: Arc::new(TokioSleeper::new()),
            observer: None,
        })
    }
}

impl Default for RetryExecutor<DefaultClassifier> {
    fn default() -> Self {
        Self {
            config: RetryConfig::default(),
            classifier: DefaultClassifier::default(),
            sleeper: Arc::new(TokioSleeper::new()),
            observer: None,
        }
    }
}

impl<C> RetryExecutor<C> {
    /// Replace the classifier
    pub fn with_classifier<C2>(self, classifier: C2) -> RetryExecutor<C2> {
        RetryExecutor {
            config: self.config,
            classifier,
            sleeper: self.sleeper,
            observer: self.observer,
        }
    }

    /// Replace the sleeper
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Attach an observer
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Runs `operation` under this executor's policy. See [`execute`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        C: ErrorClassifier<E>,
    {
        execute(
            operation,
            &self.config,
            &self.classifier,
            self.sleeper.as_ref(),
            self.observer.as_deref(),
        )
        .await
    }
}

impl<C: fmt::Debug> fmt::Debug for RetryExecutor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}
