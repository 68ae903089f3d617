// ============================================================================
// Cart Module
// ============================================================================
//
// Shopping-cart writes wrapped in the transaction retry policy.
//
// ============================================================================

pub mod dao;
pub mod item;
pub mod service;

pub use dao::{CartItemDao, InMemoryCartItemDao};
pub use item::{CartItem, StoredCartItem};
pub use service::CartService;
