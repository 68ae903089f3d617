use super::item::{CartItem, StoredCartItem};
use crate::core::{DbError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persists cart items.
#[async_trait]
pub trait CartItemDao: Send + Sync {
    /// Inserts `item` and returns its new id.
    async fn insert(&self, item: &CartItem) -> Result<Uuid>;

    async fn get(&self, id: Uuid) -> Result<Option<StoredCartItem>>;
}

/// In-memory cart item store.
///
/// Failures queued with [`fail_next`](Self::fail_next) are returned by the
/// next inserts, in order, before any write happens. This is how conflicts
/// are simulated without a real database.
#[derive(Default)]
pub struct InMemoryCartItemDao {
    items: RwLock<HashMap<Uuid, StoredCartItem>>,
    scripted_failures: Mutex<VecDeque<DbError>>,
    insert_calls: AtomicUsize,
}

impl InMemoryCartItemDao {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `err` to be returned by an upcoming insert.
    pub fn fail_next(&self, err: DbError) -> Result<()> {
        self.scripted_failures.lock()?.push_back(err);
        Ok(())
    }

    /// Number of times `insert` was called, failed calls included.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    fn next_scripted_failure(&self) -> Result<Option<DbError>> {
        Ok(self.scripted_failures.lock()?.pop_front())
    }
}

#[async_trait]
impl CartItemDao for InMemoryCartItemDao {
    async fn insert(&self, item: &CartItem) -> Result<Uuid> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.next_scripted_failure()? {
            return Err(err);
        }

        if item.quantity == 0 {
            return Err(DbError::Validation(
                "cart item quantity must be positive".into(),
            ));
        }
        if item.unit_price_cents < 0 {
            return Err(DbError::ConstraintViolation(format!(
                "unit_price_cents must be non-negative, got {}",
                item.unit_price_cents
            )));
        }

        let stored = StoredCartItem {
            id: Uuid::new_v4(),
            item: item.clone(),
            inserted_at: Utc::now(),
        };
        let id = stored.id;
        self.items.write().await.insert(id, stored);

        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredCartItem>> {
        Ok(self.items.read().await.get(&id).cloned())
    }
}
