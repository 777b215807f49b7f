//! Cart aggregate
//!
//! One cart per user, created lazily and never deleted, only emptied.
//! Aggregate totals are recomputed on every mutation so they are never
//! stale relative to the lines.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{money, Product};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    pub quantity: u32,
    /// Selling price per unit, locked in at the last mutation of this line.
    pub base_price: Decimal,
    /// `base_price * quantity`
    pub total_price: Decimal,
    /// Catalog price minus selling price, times quantity.
    pub discount: Decimal,
    pub item_tax: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub record_id: String,
    pub user_id: String,
    pub items: Vec<CartItem>,
    pub items_count: u32,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Price one cart line against the live catalog record.
///
/// `tax_rate` is a percentage. The tax is charged on the selling total and
/// rounded to two decimal places.
pub fn price_line(product: &Product, tax_rate: Decimal, quantity: u32) -> CartItem {
    let qty = Decimal::from(quantity);
    let base_price = product.selling_price();
    let original = product.price * qty;
    let total_price = base_price * qty;
    CartItem {
        product_id: product.record_id.clone(),
        quantity,
        base_price,
        total_price,
        discount: original - total_price,
        item_tax: money::round(total_price * tax_rate / Decimal::ONE_HUNDRED),
    }
}

impl Cart {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            record_id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            items: vec![],
            items_count: 0,
            subtotal: Decimal::ZERO,
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn line(&self, product_id: &str) -> Option<&CartItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    /// Replace the line for this product, or append one. Line position is
    /// preserved so the cart keeps its insertion order.
    pub fn put_line(&mut self, item: CartItem) {
        match self
            .items
            .iter_mut()
            .find(|i| i.product_id == item.product_id)
        {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
        self.recalculate();
    }

    /// Remove the line if present. Returns whether anything was removed;
    /// deletion is idempotent.
    pub fn remove_line(&mut self, product_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        let removed = self.items.len() != before;
        if removed {
            self.recalculate();
        }
        removed
    }

    /// Drop lines whose product no longer exists in the catalog.
    pub fn retain_products(&mut self, live: impl Fn(&str) -> bool) {
        let before = self.items.len();
        self.items.retain(|i| live(&i.product_id));
        if self.items.len() != before {
            self.recalculate();
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.recalculate();
    }

    fn recalculate(&mut self) {
        self.items_count = self.items.iter().map(|i| i.quantity).sum();
        self.subtotal = self.items.iter().map(|i| i.total_price).sum();
        self.discount = self.items.iter().map(|i| i.discount).sum();
        self.tax = self.items.iter().map(|i| i.item_tax).sum();
        self.total = self.subtotal + self.tax;
        self.updated_at = Utc::now();
    }
}
