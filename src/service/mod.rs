//! Checkout services: cart pricing engine and order pipeline

pub mod cart;
pub mod order;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub use cart::{CartService, CartSummary};
pub use order::{AdminOrder, OrderService, PlacedOrder};

/// Per-user mutation locks.
///
/// Cart and order mutations for one user are serialized through the mutex
/// registered here; different users proceed in parallel. The registry is
/// shared by both services so an order placement and a cart edit for the
/// same user cannot interleave.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}
