//! In-memory store for tests and local development
//!
//! One `MemoryStore` implements every repository trait. Stock reservation
//! takes a single write lock for the whole check-then-decrement pass, which
//! is what makes concurrent reservations race-free.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Address, Cart, Order, Product};
use crate::store::{CartStore, OrderStore, ProductCatalog, StockLine, TaxTable, UserIdentity, UserProfiles};
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct TaxRecord {
    pub rate: Decimal,
    pub status: bool,
}

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub identity: UserIdentity,
    pub addresses: Vec<Address>,
}

#[derive(Default)]
struct Inner {
    products: RwLock<HashMap<String, Product>>,
    taxes: RwLock<HashMap<String, TaxRecord>>,
    users: RwLock<HashMap<String, UserRecord>>,
    carts: RwLock<HashMap<String, Cart>>,
    orders: RwLock<Vec<Order>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_product(&self, product: Product) {
        self.inner
            .products
            .write()
            .await
            .insert(product.record_id.clone(), product);
    }

    pub async fn insert_tax(&self, record_id: &str, rate: Decimal, status: bool) {
        self.inner
            .taxes
            .write()
            .await
            .insert(record_id.to_string(), TaxRecord { rate, status });
    }

    pub async fn insert_user(&self, record_id: &str, name: &str, email: &str) {
        self.inner.users.write().await.insert(
            record_id.to_string(),
            UserRecord {
                identity: UserIdentity {
                    record_id: record_id.to_string(),
                    name: name.to_string(),
                    email: email.to_string(),
                },
                addresses: vec![],
            },
        );
    }

    pub async fn stock_of(&self, product_id: &str) -> Option<i64> {
        self.inner
            .products
            .read()
            .await
            .get(product_id)
            .map(|p| p.stock)
    }

    pub async fn remove_product(&self, product_id: &str) {
        self.inner.products.write().await.remove(product_id);
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<Product>> {
        Ok(self.inner.products.read().await.get(record_id).cloned())
    }

    async fn reserve_stock(&self, lines: &[StockLine]) -> Result<()> {
        let mut products = self.inner.products.write().await;
        // Verify every line before touching any stock.
        for line in lines {
            let product = products
                .get(&line.product_id)
                .ok_or_else(|| Error::NotFound(format!("product {}", line.product_id)))?;
            if product.stock < i64::from(line.quantity) {
                return Err(Error::InsufficientStock {
                    name: product.name.clone(),
                    requested: line.quantity,
                    available: product.stock.max(0) as u32,
                });
            }
        }
        for line in lines {
            if let Some(product) = products.get_mut(&line.product_id) {
                product.stock -= i64::from(line.quantity);
            }
        }
        Ok(())
    }

    async fn release_stock(&self, lines: &[StockLine]) -> Result<()> {
        let mut products = self.inner.products.write().await;
        for line in lines {
            match products.get_mut(&line.product_id) {
                Some(product) => product.stock += i64::from(line.quantity),
                None => warn!(product = %line.product_id, "skipping stock release for missing product"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaxTable for MemoryStore {
    async fn find_active_rate(&self, tax_ref: &str) -> Result<Option<Decimal>> {
        Ok(self
            .inner
            .taxes
            .read()
            .await
            .get(tax_ref)
            .filter(|t| t.status)
            .map(|t| t.rate))
    }
}

#[async_trait]
impl UserProfiles for MemoryStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserIdentity>> {
        Ok(self
            .inner
            .users
            .read()
            .await
            .get(user_id)
            .map(|u| u.identity.clone()))
    }

    async fn list_addresses(&self, user_id: &str) -> Result<Vec<Address>> {
        Ok(self
            .inner
            .users
            .read()
            .await
            .get(user_id)
            .map(|u| u.addresses.clone())
            .unwrap_or_default())
    }

    async fn append_address(&self, user_id: &str, mut address: Address) -> Result<Address> {
        let mut users = self.inner.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
        address.record_id = Some(Uuid::now_v7().to_string());
        if address.is_default_delivery {
            for existing in &mut user.addresses {
                existing.is_default_delivery = false;
            }
        }
        user.addresses.push(address.clone());
        Ok(address)
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Cart>> {
        Ok(self.inner.carts.read().await.get(user_id).cloned())
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        self.inner
            .carts
            .write()
            .await
            .insert(cart.user_id.clone(), cart.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<Order>> {
        Ok(self
            .inner
            .orders
            .read()
            .await
            .iter()
            .find(|o| o.record_id == record_id)
            .cloned())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .inner
            .orders
            .read()
            .await
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_all(&self) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self.inner.orders.read().await.clone();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        self.inner.orders.write().await.push(order.clone());
        Ok(())
    }

    async fn update(&self, order: &Order) -> Result<()> {
        let mut orders = self.inner.orders.write().await;
        match orders.iter_mut().find(|o| o.record_id == order.record_id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("order {}", order.record_id))),
        }
    }
}
