//! Repository traits for the checkout core
//!
//! Everything the services touch goes through these seams, constructed
//! explicitly and injected — no process-wide handles. Two implementations
//! ship: [`memory::MemoryStore`] for tests and local development, and
//! [`postgres::PgStore`] for production.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Address, Cart, Order, OrderItem, Product};
use crate::Result;

/// A quantity to reserve or release for one product.
#[derive(Clone, Debug)]
pub struct StockLine {
    pub product_id: String,
    pub quantity: u32,
}

impl From<&OrderItem> for StockLine {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
        }
    }
}

/// Buyer identity, joined onto admin order listings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub record_id: String,
    pub name: String,
    pub email: String,
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<Product>>;

    /// Reserve stock for every line, all-or-nothing: the conditional
    /// decrement of each line and the shortfall check form one atomic unit,
    /// so concurrent reservations for the same product cannot both pass.
    /// Fails with `Error::InsufficientStock` naming the product that fell
    /// short, leaving no line decremented.
    async fn reserve_stock(&self, lines: &[StockLine]) -> Result<()>;

    /// Return previously reserved stock. Lines whose product has vanished
    /// are skipped with a warning rather than failing the release.
    async fn release_stock(&self, lines: &[StockLine]) -> Result<()>;
}

#[async_trait]
pub trait TaxTable: Send + Sync {
    /// Percentage rate of an active tax record, `None` when the record is
    /// missing or inactive.
    async fn find_active_rate(&self, tax_ref: &str) -> Result<Option<Decimal>>;
}

#[async_trait]
pub trait UserProfiles: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserIdentity>>;

    async fn list_addresses(&self, user_id: &str) -> Result<Vec<Address>>;

    /// Append an address to the user's book, assigning it a record id.
    /// When the address is flagged default, the default flag is cleared on
    /// every sibling first — at most one default per user.
    async fn append_address(&self, user_id: &str, address: Address) -> Result<Address>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Cart>>;

    /// Upsert the whole aggregate, lines and totals together.
    async fn save(&self, cart: &Cart) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<Order>>;

    /// Orders for one user, newest first.
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>>;

    /// Every order, newest first.
    async fn list_all(&self) -> Result<Vec<Order>>;

    async fn insert(&self, order: &Order) -> Result<()>;

    async fn update(&self, order: &Order) -> Result<()>;
}
