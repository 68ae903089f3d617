// ============================================================================
// Transaction Retry Module
// ============================================================================
//
// Retries a fallible database write when it fails with a transient
// serialization conflict, and propagates every other failure untouched.
//
// Design Patterns Used:
// - Strategy Pattern: pluggable ErrorClassifier and Sleeper
// - Observer Pattern: fire-and-forget RetryEvent delivery
// - State Machine: Trying -> Done | Failed | Exhausted | Cancelled
//
// ============================================================================

pub mod classifier;
pub mod config;
pub mod executor;
pub mod observer;
pub mod sleeper;

pub use classifier::{Classification, DefaultClassifier, ErrorClassifier};
pub use config::{RetryConfig, RetryConfigError};
pub use executor::{RetryError, RetryExecutor, execute};
pub use observer::{RecordingObserver, RetryEvent, RetryObserver, TracingObserver};
pub use sleeper::{Cancelled, RecordingSleeper, Sleeper, TokioSleeper};
