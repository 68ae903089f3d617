use super::dao::CartItemDao;
use super::item::CartItem;
use crate::core::DbError;
use crate::retry::{RetryError, RetryExecutor};
use std::sync::Arc;
use uuid::Uuid;

/// Adds items to carts, retrying inserts that hit serialization conflicts.
#[derive(Clone)]
pub struct CartService {
    dao: Arc<dyn CartItemDao>,
    executor: RetryExecutor,
}

impl CartService {
    pub fn new(dao: Arc<dyn CartItemDao>, executor: RetryExecutor) -> Self {
        Self { dao, executor }
    }

    /// Inserts `item` and returns its id.
    ///
    /// A conflicting insert is repeated under the executor's retry policy.
    /// A failed insert writes nothing, so repeating it is safe.
    pub async fn add_item_to_cart(&self, item: &CartItem) -> Result<Uuid, RetryError<DbError>> {
        let dao = self.dao.as_ref();
        self.executor.execute(move || dao.insert(item)).await
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }
}
