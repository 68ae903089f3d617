pub mod error;

pub use error::{DatabaseFailure, DbError, Result, SERIALIZATION_FAILURE};
