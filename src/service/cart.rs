//! Cart pricing engine
//!
//! Prices are locked into the line at mutation time; reads serve the stored
//! snapshot and stock is re-validated at checkout. A line is re-priced
//! against the live catalog whenever its quantity changes.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::domain::cart::price_line;
use crate::domain::{Cart, Product};
use crate::service::UserLocks;
use crate::store::{CartStore, ProductCatalog, TaxTable};
use crate::{Error, Result};

#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartStore>,
    catalog: Arc<dyn ProductCatalog>,
    taxes: Arc<dyn TaxTable>,
    locks: Arc<UserLocks>,
}

/// One priced line of the summary view, joined with live product details.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryLine {
    pub product_id: String,
    pub name: String,
    pub slug: String,
    pub images: Vec<String>,
    pub quantity: u32,
    pub original_price: Decimal,
    pub discount_price: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub subtotal: Decimal,
    pub total: Decimal,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryTotals {
    pub items_count: u32,
    pub original_price: Decimal,
    pub discount_price: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub subtotal: Decimal,
    pub total: Decimal,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub cart_id: String,
    pub user_id: String,
    pub items: Vec<SummaryLine>,
    pub summary: SummaryTotals,
}

impl CartService {
    pub fn new(
        carts: Arc<dyn CartStore>,
        catalog: Arc<dyn ProductCatalog>,
        taxes: Arc<dyn TaxTable>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            carts,
            catalog,
            taxes,
            locks,
        }
    }

    /// The user's cart, created empty on first access. Idempotent.
    pub async fn get_or_create(&self, user_id: &str) -> Result<Cart> {
        if let Some(cart) = self.carts.find_by_user(user_id).await? {
            return Ok(cart);
        }
        let _guard = self.locks.acquire(user_id).await;
        // Re-check under the lock so concurrent first accesses agree.
        if let Some(cart) = self.carts.find_by_user(user_id).await? {
            return Ok(cart);
        }
        let cart = Cart::new(user_id);
        self.carts.save(&cart).await?;
        Ok(cart)
    }

    /// Add a product, merging into an existing line rather than duplicating
    /// it. The merged line is re-priced at the current catalog price.
    pub async fn add_item(&self, user_id: &str, product_id: &str, quantity: u32) -> Result<Cart> {
        if quantity == 0 {
            return Err(Error::Validation("quantity must be at least 1".to_string()));
        }
        let _guard = self.locks.acquire(user_id).await;
        let product = self.active_product(product_id).await?;
        let rate = self.tax_rate_for(&product).await?;

        let mut cart = match self.carts.find_by_user(user_id).await? {
            Some(cart) => cart,
            None => Cart::new(user_id),
        };
        let merged = cart
            .line(product_id)
            .map(|line| line.quantity)
            .unwrap_or(0)
            .saturating_add(quantity);
        cart.put_line(price_line(&product, rate, merged));
        self.carts.save(&cart).await?;
        Ok(cart)
    }

    /// Set a line's quantity. The line must exist and the quantity must be
    /// at least one; it is never silently clamped.
    pub async fn update_item(&self, user_id: &str, product_id: &str, quantity: u32) -> Result<Cart> {
        if quantity == 0 {
            return Err(Error::Validation("quantity must be at least 1".to_string()));
        }
        let _guard = self.locks.acquire(user_id).await;
        let mut cart = self
            .carts
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("cart for user {user_id}")))?;
        if cart.line(product_id).is_none() {
            return Err(Error::NotFound(format!("cart item {product_id}")));
        }
        let product = self.active_product(product_id).await?;
        let rate = self.tax_rate_for(&product).await?;
        cart.put_line(price_line(&product, rate, quantity));
        self.carts.save(&cart).await?;
        Ok(cart)
    }

    /// Remove a line. Removing an absent line is not an error.
    pub async fn remove_item(&self, user_id: &str, product_id: &str) -> Result<Cart> {
        let _guard = self.locks.acquire(user_id).await;
        let mut cart = self
            .carts
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("cart for user {user_id}")))?;
        if cart.remove_line(product_id) {
            self.carts.save(&cart).await?;
        }
        Ok(cart)
    }

    pub async fn clear(&self, user_id: &str) -> Result<Cart> {
        let _guard = self.locks.acquire(user_id).await;
        let mut cart = self
            .carts
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("cart for user {user_id}")))?;
        cart.clear();
        self.carts.save(&cart).await?;
        Ok(cart)
    }

    /// Summary view joined with live product details. Lines whose product
    /// has vanished from the catalog are dropped — from the view and from
    /// the stored cart, so the aggregates never go stale.
    pub async fn summary(&self, user_id: &str) -> Result<CartSummary> {
        let _guard = self.locks.acquire(user_id).await;
        let mut cart = match self.carts.find_by_user(user_id).await? {
            Some(cart) => cart,
            None => {
                let cart = Cart::new(user_id);
                self.carts.save(&cart).await?;
                cart
            }
        };

        let mut lines = Vec::with_capacity(cart.items.len());
        let mut orphans = Vec::new();
        for item in &cart.items {
            match self.catalog.find_by_record_id(&item.product_id).await? {
                Some(product) => lines.push(SummaryLine {
                    product_id: item.product_id.clone(),
                    name: product.name,
                    slug: product.slug,
                    images: product.images,
                    quantity: item.quantity,
                    original_price: item.total_price + item.discount,
                    discount_price: item.total_price,
                    discount: item.discount,
                    tax: item.item_tax,
                    subtotal: item.total_price,
                    total: item.total_price + item.item_tax,
                }),
                None => orphans.push(item.product_id.clone()),
            }
        }
        if !orphans.is_empty() {
            debug!(user = user_id, ?orphans, "dropping cart lines for vanished products");
            cart.retain_products(|id| !orphans.iter().any(|o| o == id));
            self.carts.save(&cart).await?;
        }

        let summary = SummaryTotals {
            items_count: lines.iter().map(|l| l.quantity).sum(),
            original_price: lines.iter().map(|l| l.original_price).sum(),
            discount_price: lines.iter().map(|l| l.discount_price).sum(),
            discount: lines.iter().map(|l| l.discount).sum(),
            tax: lines.iter().map(|l| l.tax).sum(),
            subtotal: lines.iter().map(|l| l.subtotal).sum(),
            total: lines.iter().map(|l| l.subtotal + l.tax).sum(),
        };
        Ok(CartSummary {
            cart_id: cart.record_id,
            user_id: cart.user_id,
            items: lines,
            summary,
        })
    }

    async fn active_product(&self, product_id: &str) -> Result<Product> {
        self.catalog
            .find_by_record_id(product_id)
            .await?
            .filter(Product::is_active)
            .ok_or_else(|| Error::NotFound(format!("product {product_id}")))
    }

    /// Tax rate for a product, in percent. A product without a tax
    /// reference is untaxed; a dangling or inactive reference also resolves
    /// to zero, but is logged since it usually means a stale catalog entry.
    async fn tax_rate_for(&self, product: &Product) -> Result<Decimal> {
        let Some(tax_ref) = &product.tax_ref else {
            return Ok(Decimal::ZERO);
        };
        match self.taxes.find_active_rate(tax_ref).await? {
            Some(rate) => Ok(rate),
            None => {
                debug!(
                    product = %product.record_id,
                    tax = %tax_ref,
                    "tax record missing or inactive, defaulting to 0%"
                );
                Ok(Decimal::ZERO)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn service(store: &MemoryStore) -> CartService {
        let store = store.clone();
        CartService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::new(UserLocks::new()),
        )
    }

    async fn seed_product(
        store: &MemoryStore,
        record_id: &str,
        price: i64,
        discount_price: Option<i64>,
        tax_ref: Option<&str>,
        status: bool,
    ) {
        store
            .insert_product(Product {
                record_id: record_id.into(),
                name: format!("Product {record_id}"),
                slug: record_id.to_lowercase(),
                images: vec![],
                price: Decimal::new(price, 0),
                discount_price: discount_price.map(|p| Decimal::new(p, 0)),
                stock: 100,
                tax_ref: tax_ref.map(String::from),
                status,
            })
            .await;
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = MemoryStore::new();
        let svc = service(&store);
        let first = svc.get_or_create("U1").await.unwrap();
        let second = svc.get_or_create("U1").await.unwrap();
        assert_eq!(first.record_id, second.record_id);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_add_item_merges_quantities() {
        let store = MemoryStore::new();
        seed_product(&store, "P1", 100, None, None, true).await;
        let svc = service(&store);

        svc.add_item("U1", "P1", 2).await.unwrap();
        let cart = svc.add_item("U1", "P1", 3).await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 5);
        assert_eq!(cart.subtotal, Decimal::new(500, 0));
    }

    #[tokio::test]
    async fn test_add_inactive_or_missing_product_fails() {
        let store = MemoryStore::new();
        seed_product(&store, "P1", 100, None, None, false).await;
        let svc = service(&store);

        assert!(matches!(
            svc.add_item("U1", "P1", 1).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            svc.add_item("U1", "NOPE", 1).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_item_applies_discount_and_tax() {
        let store = MemoryStore::new();
        seed_product(&store, "P1", 100, Some(80), Some("GST18"), true).await;
        store.insert_tax("GST18", Decimal::new(18, 0), true).await;
        let svc = service(&store);

        let cart = svc.add_item("U1", "P1", 2).await.unwrap();
        assert_eq!(cart.subtotal, Decimal::new(160, 0));
        assert_eq!(cart.discount, Decimal::new(40, 0));
        assert_eq!(cart.tax, Decimal::new(288, 1)); // 28.80
        assert_eq!(cart.total, Decimal::new(1888, 1)); // 188.80
    }

    #[tokio::test]
    async fn test_inactive_tax_defaults_to_zero() {
        let store = MemoryStore::new();
        seed_product(&store, "P1", 100, None, Some("GST18"), true).await;
        store.insert_tax("GST18", Decimal::new(18, 0), false).await;
        let svc = service(&store);

        let cart = svc.add_item("U1", "P1", 1).await.unwrap();
        assert_eq!(cart.tax, Decimal::ZERO);
        assert_eq!(cart.total, Decimal::new(100, 0));
    }

    #[tokio::test]
    async fn test_update_item_validates_quantity_and_line() {
        let store = MemoryStore::new();
        seed_product(&store, "P1", 100, None, None, true).await;
        let svc = service(&store);
        svc.add_item("U1", "P1", 2).await.unwrap();

        assert!(matches!(
            svc.update_item("U1", "P1", 0).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            svc.update_item("U1", "P2", 1).await,
            Err(Error::NotFound(_))
        ));

        let cart = svc.update_item("U1", "P1", 7).await.unwrap();
        assert_eq!(cart.items[0].quantity, 7);
        assert_eq!(cart.subtotal, Decimal::new(700, 0));
    }

    #[tokio::test]
    async fn test_remove_item_is_idempotent() {
        let store = MemoryStore::new();
        seed_product(&store, "P1", 100, None, None, true).await;
        let svc = service(&store);
        svc.add_item("U1", "P1", 1).await.unwrap();

        let cart = svc.remove_item("U1", "P1").await.unwrap();
        assert!(cart.is_empty());
        // Absent line: no error.
        let cart = svc.remove_item("U1", "P1").await.unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn test_clear_resets_aggregates() {
        let store = MemoryStore::new();
        seed_product(&store, "P1", 100, Some(90), None, true).await;
        let svc = service(&store);
        svc.add_item("U1", "P1", 4).await.unwrap();

        let cart = svc.clear("U1").await.unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.items_count, 0);
        assert_eq!(cart.total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_summary_totals_match_lines() {
        let store = MemoryStore::new();
        seed_product(&store, "P1", 100, Some(80), Some("GST18"), true).await;
        seed_product(&store, "P2", 50, None, None, true).await;
        store.insert_tax("GST18", Decimal::new(18, 0), true).await;
        let svc = service(&store);
        svc.add_item("U1", "P1", 2).await.unwrap();
        svc.add_item("U1", "P2", 1).await.unwrap();

        let view = svc.summary("U1").await.unwrap();
        assert_eq!(view.items.len(), 2);
        let expected: Decimal = view.items.iter().map(|l| l.subtotal + l.tax).sum();
        assert_eq!(view.summary.total, expected);
        assert_eq!(view.summary.items_count, 3);
        assert_eq!(view.summary.discount, Decimal::new(40, 0));
    }

    #[tokio::test]
    async fn test_summary_drops_orphan_lines() {
        let store = MemoryStore::new();
        seed_product(&store, "P1", 100, None, None, true).await;
        seed_product(&store, "P2", 50, None, None, true).await;
        let svc = service(&store);
        svc.add_item("U1", "P1", 1).await.unwrap();
        svc.add_item("U1", "P2", 1).await.unwrap();

        store.remove_product("P1").await;
        let view = svc.summary("U1").await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].product_id, "P2");
        assert_eq!(view.summary.total, Decimal::new(50, 0));

        // The stored cart was pruned too.
        let cart = svc.get_or_create("U1").await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.total, Decimal::new(50, 0));
    }
}
