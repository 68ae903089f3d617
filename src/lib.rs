// ============================================================================
// TxRetry Library
// ============================================================================

pub mod core;
pub mod retry;
pub mod cart;

// Re-export main types for convenience
pub use crate::core::{DatabaseFailure, DbError, Result, SERIALIZATION_FAILURE};
pub use retry::{
    Cancelled,
    Classification,
    DefaultClassifier,
    ErrorClassifier,
    RecordingObserver,
    RecordingSleeper,
    RetryConfig,
    RetryConfigError,
    RetryError,
    RetryEvent,
    RetryExecutor,
    RetryObserver,
    Sleeper,
    TokioSleeper,
    TracingObserver,
    execute,
};

// Re-export cart API
pub use cart::{CartItem, CartItemDao, CartService, InMemoryCartItemDao, StoredCartItem};
