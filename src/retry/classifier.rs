use crate::core::{DatabaseFailure, SERIALIZATION_FAILURE};
use std::fmt;

/// Outcome of classifying an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Transient failure; the operation may be retried.
    Retryable,
    /// Real error; propagate to the caller immediately.
    Fatal,
}

impl Classification {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
        };
        write!(f, "{label}")
    }
}

/// Decides whether a failure of type `E` is worth retrying.
///
/// Implementations must be pure: classifying the same error twice gives
/// the same answer. Any `Fn(&E) -> Classification` is a classifier.
pub trait ErrorClassifier<E: ?Sized> {
    fn classify(&self, error: &E) -> Classification;
}

impl<E: ?Sized, F> ErrorClassifier<E> for F
where
    F: Fn(&E) -> Classification,
{
    fn classify(&self, error: &E) -> Classification {
        self(error)
    }
}

/// Default number of cause links inspected below the outermost error.
pub const DEFAULT_MAX_CAUSE_DEPTH: usize = 8;

/// Serialization-conflict classifier for [`DatabaseFailure`] errors.
///
/// Policy, in order:
/// 1. the error or any cause within `max_cause_depth` links carries the
///    conflict code (`40001` by default) => retryable;
/// 2. the outermost error is a generic database error => retryable;
/// 3. anything else => fatal.
///
/// Rule 2 treats every undetailed database failure as transient, which can
/// hide genuinely fatal errors behind the retry budget. Use
/// [`DefaultClassifier::strict`] to retry on the conflict code only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultClassifier {
    conflict_code: String,
    max_cause_depth: usize,
    retry_generic_errors: bool,
}

impl DefaultClassifier {
    pub fn new() -> Self {
        Self {
            conflict_code: SERIALIZATION_FAILURE.to_string(),
            max_cause_depth: DEFAULT_MAX_CAUSE_DEPTH,
            retry_generic_errors: true,
        }
    }

    /// Retries only errors carrying the conflict code.
    pub fn strict() -> Self {
        Self {
            retry_generic_errors: false,
            ..Self::new()
        }
    }

    /// Set the code that marks a serialization conflict
    pub fn conflict_code(mut self, code: impl Into<String>) -> Self {
        self.conflict_code = code.into();
        self
    }

    /// Set how many cause links are followed
    pub fn max_cause_depth(mut self, depth: usize) -> Self {
        self.max_cause_depth = depth;
        self
    }

    pub fn retries_generic_errors(&self) -> bool {
        self.retry_generic_errors
    }

    /// Walks `error` and its causes looking for the conflict code.
    fn carries_conflict_code(&self, error: &dyn DatabaseFailure) -> bool {
        let mut current = Some(error);
        let mut depth = 0usize;

        while let Some(failure) = current {
            if failure.error_code() == Some(self.conflict_code.as_str()) {
                return true;
            }
            if depth == self.max_cause_depth {
                break;
            }
            depth += 1;
            current = failure.root_cause();
        }

        false
    }
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DatabaseFailure> ErrorClassifier<E> for DefaultClassifier {
    fn classify(&self, error: &E) -> Classification {
        if self.carries_conflict_code(error) {
            return Classification::Retryable;
        }

        if self.retry_generic_errors && error.is_generic_database_error() {
            return Classification::Retryable;
        }

        Classification::Fatal
    }
}
