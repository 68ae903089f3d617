/// Retry executor tests
///
/// Attempt counting, backoff growth, exhaustion, cancellation and observer
/// behaviour of the retry loop.
/// Run with: cargo test --test retry_executor_tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};
use txretry::{
    Cancelled, Classification, DbError, DefaultClassifier, ErrorClassifier, RecordingObserver,
    RecordingSleeper, RetryConfig, RetryError, RetryEvent, RetryExecutor, RetryObserver,
    TokioSleeper, execute,
};

fn recording_executor(max_attempts: u32) -> (RetryExecutor, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::new());
    let executor = RetryExecutor::new(RetryConfig::new(max_attempts, Duration::from_secs(1)))
        .unwrap()
        .with_sleeper(sleeper.clone());
    (executor, sleeper)
}

fn conflict() -> DbError {
    DbError::data_access(
        "could not insert cart item",
        DbError::serialization_failure("restart transaction"),
    )
}

#[tokio::test]
async fn test_always_retryable_runs_budget_plus_one() {
    for max_attempts in 0..=5u32 {
        let (executor, sleeper) = recording_executor(max_attempts);
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(conflict()) }
            })
            .await;

        assert_eq!(result, Err(RetryError::Operation(conflict())));
        assert_eq!(calls.load(Ordering::SeqCst), max_attempts as usize + 1);
        assert_eq!(sleeper.sleep_count(), max_attempts as usize);
    }
}

#[tokio::test]
async fn test_fatal_error_fails_immediately() {
    let (executor, sleeper) = recording_executor(3);
    let calls = AtomicUsize::new(0);

    let result: Result<(), _> = executor
        .execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::ConstraintViolation("duplicate key".into())) }
        })
        .await;

    let err = assert_err!(result);
    assert_eq!(
        err,
        RetryError::Operation(DbError::ConstraintViolation("duplicate key".into()))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(sleeper.sleep_count(), 0);
}

#[tokio::test]
async fn test_succeeds_after_transient_failures() {
    for failures in 0..3usize {
        let (executor, sleeper) = recording_executor(3);
        let calls = AtomicUsize::new(0);

        let result = executor
            .execute(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < failures {
                        Err(DbError::Sql("connection reset".into()))
                    } else {
                        Ok("inserted")
                    }
                }
            })
            .await;

        assert_eq!(assert_ok!(result), "inserted");
        assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
        assert_eq!(sleeper.sleep_count(), failures);
    }
}

#[tokio::test]
async fn test_backoff_doubles() {
    let (executor, sleeper) = recording_executor(3);

    let _: Result<(), _> = executor.execute(|| async { Err(conflict()) }).await;

    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ]
    );
}

#[tokio::test]
async fn test_custom_multiplier() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let config = RetryConfig::new(3, Duration::from_millis(100)).backoff_multiplier(3.0);
    let executor = RetryExecutor::new(config)
        .unwrap()
        .with_sleeper(sleeper.clone());

    let _: Result<(), _> = executor.execute(|| async { Err(conflict()) }).await;

    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(300),
            Duration::from_millis(900),
        ]
    );
}

#[tokio::test]
async fn test_end_to_end_conflict_exhaustion() {
    let (executor, sleeper) = recording_executor(3);
    let observer = Arc::new(RecordingObserver::new());
    let executor = executor.with_observer(observer.clone());
    let calls = AtomicUsize::new(0);

    let result: Result<(), _> = executor
        .execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::serialization_failure("restart transaction")) }
        })
        .await;

    let err = assert_err!(result).into_operation_error().unwrap();
    assert_eq!(err.sql_state(), Some("40001"));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ]
    );
    assert_eq!(
        observer.events(),
        vec![
            RetryEvent::RetryAttempted {
                attempt_number: 1,
                delay: Duration::from_secs(1),
            },
            RetryEvent::RetryAttempted {
                attempt_number: 2,
                delay: Duration::from_secs(2),
            },
            RetryEvent::RetryAttempted {
                attempt_number: 3,
                delay: Duration::from_secs(4),
            },
            RetryEvent::RetryExhausted { attempts: 4 },
        ]
    );
}

#[tokio::test]
async fn test_cancellation_stops_invocations() {
    let sleeper = Arc::new(RecordingSleeper::new().cancel_on(1));
    let executor = RetryExecutor::new(RetryConfig::new(10, Duration::from_secs(1)))
        .unwrap()
        .with_sleeper(sleeper.clone());
    let observer = Arc::new(RecordingObserver::new());
    let executor = executor.with_observer(observer.clone());
    let calls = AtomicUsize::new(0);

    let result: Result<(), _> = executor
        .execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;

    assert_eq!(result, Err(RetryError::Cancelled(Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(sleeper.sleep_count(), 1);
    // no exhaustion event for a cancelled loop
    assert_eq!(observer.events().len(), 1);
}

#[tokio::test]
async fn test_shutdown_signal_interrupts_real_backoff() {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let executor = RetryExecutor::new(RetryConfig::new(3, Duration::from_secs(60)))
        .unwrap()
        .with_sleeper(Arc::new(TokioSleeper::with_shutdown(shutdown_rx)));
    let calls = Arc::new(AtomicUsize::new(0));

    let task_calls = calls.clone();
    let handle = tokio::spawn(async move {
        executor
            .execute(|| {
                task_calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(conflict()) }
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let start = Instant::now();
    shutdown_tx.send(true).unwrap();

    let result = handle.await.unwrap();
    assert!(result.unwrap_err().is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_real_sleeper_waits_between_attempts() {
    let executor = RetryExecutor::new(RetryConfig::new(2, Duration::from_millis(10))).unwrap();
    let start = Instant::now();

    let result: Result<(), _> = executor.execute(|| async { Err(conflict()) }).await;

    assert!(result.is_err());
    // 10ms + 20ms of backoff
    assert!(start.elapsed() >= Duration::from_millis(30));
}

struct BrokenObserver {
    calls: AtomicUsize,
}

impl RetryObserver for BrokenObserver {
    fn on_event(&self, _event: &RetryEvent) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("metrics sink down")
    }
}

#[tokio::test]
async fn test_failing_observer_does_not_affect_loop() {
    let (executor, sleeper) = recording_executor(2);
    let observer = Arc::new(BrokenObserver {
        calls: AtomicUsize::new(0),
    });
    let executor = executor.with_observer(observer.clone());
    let calls = AtomicUsize::new(0);

    let result = executor
        .execute(|| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(conflict())
                } else {
                    Ok(call)
                }
            }
        })
        .await;

    assert_eq!(result, Ok(2));
    assert_eq!(sleeper.sleep_count(), 2);
    assert_eq!(observer.calls.load(Ordering::SeqCst), 2);
}

struct PanickingObserver {
    calls: AtomicUsize,
}

impl RetryObserver for PanickingObserver {
    fn on_event(&self, _event: &RetryEvent) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("metrics sink bug")
    }
}

#[tokio::test]
async fn test_panicking_observer_does_not_affect_loop() {
    let (executor, sleeper) = recording_executor(2);
    let observer = Arc::new(PanickingObserver {
        calls: AtomicUsize::new(0),
    });
    let executor = executor.with_observer(observer.clone());
    let calls = AtomicUsize::new(0);

    let result = executor
        .execute(|| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 1 {
                    Err(conflict())
                } else {
                    Ok(2)
                }
            }
        })
        .await;

    assert_eq!(result, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(sleeper.sleep_count(), 1);
    assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_observer_on_exhaustion_returns_error() {
    let (executor, sleeper) = recording_executor(1);
    let observer = Arc::new(PanickingObserver {
        calls: AtomicUsize::new(0),
    });
    let executor = executor.with_observer(observer.clone());

    let result: Result<u32, _> = executor.execute(|| async { Err(conflict()) }).await;

    assert_eq!(result, Err(RetryError::Operation(conflict())));
    assert_eq!(sleeper.sleep_count(), 1);
    // one retry event plus the exhaustion event
    assert_eq!(observer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_free_function_with_closure_classifier() {
    let sleeper = RecordingSleeper::new();
    let config = RetryConfig::new(2, Duration::from_millis(5));
    let classifier = |err: &std::io::Error| {
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Classification::Retryable
        } else {
            Classification::Fatal
        }
    };
    let calls = AtomicUsize::new(0);

    let result: Result<(), RetryError<std::io::Error>> = execute(
        || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(std::io::Error::from(std::io::ErrorKind::WouldBlock)) }
        },
        &config,
        &classifier,
        &sleeper,
        None,
    )
    .await;

    let err = assert_err!(result).into_operation_error().unwrap();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(sleeper.sleep_count(), 2);
}

#[tokio::test]
async fn test_strict_classifier_stops_on_generic_error() {
    let (executor, sleeper) = recording_executor(3);
    let executor = executor.with_classifier(DefaultClassifier::strict());

    let result: Result<(), _> = executor
        .execute(|| async { Err(DbError::Sql("connection reset".into())) })
        .await;

    assert_eq!(
        result,
        Err(RetryError::Operation(DbError::Sql("connection reset".into())))
    );
    assert_eq!(sleeper.sleep_count(), 0);
}

#[tokio::test]
async fn test_concurrent_callers_have_independent_budgets() {
    let (executor, sleeper) = recording_executor(2);
    let executor = Arc::new(executor);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            let calls = AtomicUsize::new(0);
            let result: Result<(), _> = executor
                .execute(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(conflict()) }
                })
                .await;
            assert!(result.is_err());
            calls.load(Ordering::SeqCst)
        }));
    }

    for calls in futures::future::join_all(handles).await {
        assert_eq!(calls.unwrap(), 3);
    }
    assert_eq!(sleeper.sleep_count(), 16);
}

#[test]
fn test_classification_is_deterministic() {
    let classifier = DefaultClassifier::new();
    let wrapped = conflict();
    let validation = DbError::Validation("quantity must be positive".into());

    for _ in 0..3 {
        assert_eq!(classifier.classify(&wrapped), Classification::Retryable);
        assert_eq!(classifier.classify(&validation), Classification::Fatal);
    }
}
