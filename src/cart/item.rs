use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Line item to add to a shopping cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl CartItem {
    pub fn new(cart_id: Uuid, product_id: Uuid, quantity: u32, unit_price_cents: i64) -> Self {
        Self {
            cart_id,
            product_id,
            quantity,
            unit_price_cents,
        }
    }

    /// Line total, saturating on overflow.
    pub fn total_cents(&self) -> i64 {
        self.unit_price_cents.saturating_mul(i64::from(self.quantity))
    }
}

/// A cart item as stored, with its generated id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCartItem {
    pub id: Uuid,
    pub item: CartItem,
    pub inserted_at: DateTime<Utc>,
}
