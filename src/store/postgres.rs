//! PostgreSQL store
//!
//! Raw-SQL repositories over `sqlx`. Stock reservation is a conditional
//! decrement (`... WHERE stock >= $2`) with an affected-rows check, all
//! lines inside one transaction, so the database serializes concurrent
//! reservations per product row.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{
    Address, Cart, CartItem, Order, OrderItem, OrderStatus, PaymentMethod, Product, Transaction,
    TransactionStatus,
};
use crate::store::{
    CartStore, OrderStore, ProductCatalog, StockLine, TaxTable, UserIdentity, UserProfiles,
};
use crate::{Error, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    record_id: String,
    name: String,
    slug: String,
    images: Vec<String>,
    price: Decimal,
    discount_price: Option<Decimal>,
    stock: i64,
    tax_ref: Option<String>,
    status: bool,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            record_id: row.record_id,
            name: row.name,
            slug: row.slug,
            images: row.images,
            price: row.price,
            discount_price: row.discount_price,
            stock: row.stock,
            tax_ref: row.tax_ref,
            status: row.status,
        }
    }
}

#[async_trait]
impl ProductCatalog for PgStore {
    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT record_id, name, slug, images, price, discount_price, stock, tax_ref, status \
             FROM products WHERE record_id = $1",
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Product::from))
    }

    async fn reserve_stock(&self, lines: &[StockLine]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for line in lines {
            let result = sqlx::query(
                "UPDATE products SET stock = stock - $2, updated_at = NOW() \
                 WHERE record_id = $1 AND stock >= $2",
            )
            .bind(&line.product_id)
            .bind(i64::from(line.quantity))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                let current: Option<(String, i64)> =
                    sqlx::query_as("SELECT name, stock FROM products WHERE record_id = $1")
                        .bind(&line.product_id)
                        .fetch_optional(&self.pool)
                        .await?;
                return Err(match current {
                    Some((name, stock)) => Error::InsufficientStock {
                        name,
                        requested: line.quantity,
                        available: stock.max(0) as u32,
                    },
                    None => Error::NotFound(format!("product {}", line.product_id)),
                });
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn release_stock(&self, lines: &[StockLine]) -> Result<()> {
        for line in lines {
            let result = sqlx::query(
                "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE record_id = $1",
            )
            .bind(&line.product_id)
            .bind(i64::from(line.quantity))
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                warn!(product = %line.product_id, "skipping stock release for missing product");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaxTable for PgStore {
    async fn find_active_rate(&self, tax_ref: &str) -> Result<Option<Decimal>> {
        let rate: Option<(Decimal,)> =
            sqlx::query_as("SELECT rate FROM taxes WHERE record_id = $1 AND status = TRUE")
                .bind(tax_ref)
                .fetch_optional(&self.pool)
                .await?;
        Ok(rate.map(|(r,)| r))
    }
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    record_id: String,
    first_name: String,
    last_name: String,
    phone: String,
    email: String,
    line1: String,
    line2: Option<String>,
    city: String,
    state: String,
    country: String,
    pin_code: String,
    is_default_delivery: bool,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Address {
            record_id: Some(row.record_id),
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            email: row.email,
            line1: row.line1,
            line2: row.line2,
            city: row.city,
            state: row.state,
            country: row.country,
            pin_code: row.pin_code,
            is_default_delivery: row.is_default_delivery,
        }
    }
}

#[async_trait]
impl UserProfiles for PgStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserIdentity>> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT record_id, name, email FROM users WHERE record_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(record_id, name, email)| UserIdentity {
            record_id,
            name,
            email,
        }))
    }

    async fn list_addresses(&self, user_id: &str) -> Result<Vec<Address>> {
        let rows = sqlx::query_as::<_, AddressRow>(
            "SELECT record_id, first_name, last_name, phone, email, line1, line2, city, state, \
             country, pin_code, is_default_delivery \
             FROM addresses WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Address::from).collect())
    }

    async fn append_address(&self, user_id: &str, mut address: Address) -> Result<Address> {
        let mut tx = self.pool.begin().await?;
        if address.is_default_delivery {
            sqlx::query("UPDATE addresses SET is_default_delivery = FALSE WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        let record_id = Uuid::now_v7().to_string();
        sqlx::query(
            "INSERT INTO addresses (record_id, user_id, first_name, last_name, phone, email, \
             line1, line2, city, state, country, pin_code, is_default_delivery, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())",
        )
        .bind(&record_id)
        .bind(user_id)
        .bind(&address.first_name)
        .bind(&address.last_name)
        .bind(&address.phone)
        .bind(&address.email)
        .bind(&address.line1)
        .bind(&address.line2)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.country)
        .bind(&address.pin_code)
        .bind(address.is_default_delivery)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        address.record_id = Some(record_id);
        Ok(address)
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    record_id: String,
    user_id: String,
    items_count: i32,
    subtotal: Decimal,
    discount: Decimal,
    tax: Decimal,
    total: Decimal,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    product_id: String,
    quantity: i32,
    base_price: Decimal,
    total_price: Decimal,
    discount: Decimal,
    item_tax: Decimal,
}

#[async_trait]
impl CartStore for PgStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Cart>> {
        let row = sqlx::query_as::<_, CartRow>(
            "SELECT record_id, user_id, items_count, subtotal, discount, tax, total, created_at, \
             updated_at FROM carts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };

        let items = sqlx::query_as::<_, CartItemRow>(
            "SELECT product_id, quantity, base_price, total_price, discount, item_tax \
             FROM cart_items WHERE cart_record_id = $1 ORDER BY position",
        )
        .bind(&row.record_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Cart {
            record_id: row.record_id,
            user_id: row.user_id,
            items: items
                .into_iter()
                .map(|i| CartItem {
                    product_id: i.product_id,
                    quantity: i.quantity.max(0) as u32,
                    base_price: i.base_price,
                    total_price: i.total_price,
                    discount: i.discount,
                    item_tax: i.item_tax,
                })
                .collect(),
            items_count: row.items_count.max(0) as u32,
            subtotal: row.subtotal,
            discount: row.discount,
            tax: row.tax,
            total: row.total,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO carts (record_id, user_id, items_count, subtotal, discount, tax, total, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (user_id) DO UPDATE SET items_count = $3, subtotal = $4, discount = $5, \
             tax = $6, total = $7, updated_at = $9",
        )
        .bind(&cart.record_id)
        .bind(&cart.user_id)
        .bind(cart.items_count as i32)
        .bind(cart.subtotal)
        .bind(cart.discount)
        .bind(cart.tax)
        .bind(cart.total)
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM cart_items WHERE cart_record_id = $1")
            .bind(&cart.record_id)
            .execute(&mut *tx)
            .await?;
        for (position, item) in cart.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO cart_items (cart_record_id, product_id, quantity, base_price, \
                 total_price, discount, item_tax, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&cart.record_id)
            .bind(&item.product_id)
            .bind(item.quantity as i32)
            .bind(item.base_price)
            .bind(item.total_price)
            .bind(item.discount)
            .bind(item.item_tax)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    record_id: String,
    order_id: String,
    user_id: String,
    subtotal: Decimal,
    discount: Decimal,
    tax: Decimal,
    shipping: Decimal,
    total: Decimal,
    shipping_address: serde_json::Value,
    billing_address: serde_json::Value,
    status: String,
    delivery_method: String,
    tracking_number: Option<String>,
    stock_reserved: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    product_id: String,
    name: String,
    images: Vec<String>,
    quantity: i32,
    base_price: Decimal,
    total_price: Decimal,
    discount: Decimal,
    tax: Decimal,
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    record_id: String,
    payment_method: String,
    amount: Decimal,
    status: String,
    gateway_order_id: Option<String>,
    gateway_payment_id: Option<String>,
    gateway_signature: Option<String>,
}

fn address_from_json(value: serde_json::Value) -> Result<Address> {
    serde_json::from_value(value).map_err(|e| Error::Storage(format!("malformed address: {e}")))
}

fn address_to_json(address: &Address) -> Result<serde_json::Value> {
    serde_json::to_value(address).map_err(|e| Error::Storage(format!("address encode: {e}")))
}

impl PgStore {
    async fn hydrate_order(&self, row: OrderRow) -> Result<Order> {
        let items = sqlx::query_as::<_, OrderItemRow>(
            "SELECT product_id, name, images, quantity, base_price, total_price, discount, tax \
             FROM order_items WHERE order_record_id = $1 ORDER BY position",
        )
        .bind(&row.record_id)
        .fetch_all(&self.pool)
        .await?;

        let transactions = sqlx::query_as::<_, TransactionRow>(
            "SELECT record_id, payment_method, amount, status, gateway_order_id, \
             gateway_payment_id, gateway_signature \
             FROM transactions WHERE order_record_id = $1 ORDER BY position",
        )
        .bind(&row.record_id)
        .fetch_all(&self.pool)
        .await?;

        let status = OrderStatus::parse(&row.status)
            .ok_or_else(|| Error::Storage(format!("unknown order status {}", row.status)))?;

        Ok(Order {
            record_id: row.record_id,
            order_id: row.order_id,
            user_id: row.user_id,
            items: items
                .into_iter()
                .map(|i| OrderItem {
                    product_id: i.product_id,
                    name: i.name,
                    images: i.images,
                    quantity: i.quantity.max(0) as u32,
                    base_price: i.base_price,
                    total_price: i.total_price,
                    discount: i.discount,
                    tax: i.tax,
                })
                .collect(),
            subtotal: row.subtotal,
            discount: row.discount,
            tax: row.tax,
            shipping: row.shipping,
            total: row.total,
            shipping_address: address_from_json(row.shipping_address)?,
            billing_address: address_from_json(row.billing_address)?,
            status,
            transactions: transactions
                .into_iter()
                .map(|t| {
                    Ok(Transaction {
                        record_id: t.record_id,
                        payment_method: PaymentMethod::parse(&t.payment_method).ok_or_else(
                            || Error::Storage(format!("unknown payment method {}", t.payment_method)),
                        )?,
                        amount: t.amount,
                        status: TransactionStatus::parse(&t.status).ok_or_else(|| {
                            Error::Storage(format!("unknown transaction status {}", t.status))
                        })?,
                        gateway_order_id: t.gateway_order_id,
                        gateway_payment_id: t.gateway_payment_id,
                        gateway_signature: t.gateway_signature,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            delivery_method: row.delivery_method,
            tracking_number: row.tracking_number,
            stock_reserved: row.stock_reserved,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn write_transactions(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order: &Order,
    ) -> Result<()> {
        sqlx::query("DELETE FROM transactions WHERE order_record_id = $1")
            .bind(&order.record_id)
            .execute(&mut **tx)
            .await?;
        for (position, t) in order.transactions.iter().enumerate() {
            sqlx::query(
                "INSERT INTO transactions (record_id, order_record_id, payment_method, amount, \
                 status, gateway_order_id, gateway_payment_id, gateway_signature, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&t.record_id)
            .bind(&order.record_id)
            .bind(t.payment_method.as_str())
            .bind(t.amount)
            .bind(t.status.as_str())
            .bind(&t.gateway_order_id)
            .bind(&t.gateway_payment_id)
            .bind(&t.gateway_signature)
            .bind(position as i32)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

const ORDER_COLUMNS: &str = "record_id, order_id, user_id, subtotal, discount, tax, shipping, \
                             total, shipping_address, billing_address, status, delivery_method, \
                             tracking_number, stock_reserved, created_at, updated_at";

#[async_trait]
impl OrderStore for PgStore {
    async fn find_by_record_id(&self, record_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE record_id = $1"
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_order(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.hydrate_order(row).await?);
        }
        Ok(orders)
    }

    async fn list_all(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.hydrate_order(row).await?);
        }
        Ok(orders)
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO orders (record_id, order_id, user_id, subtotal, discount, tax, shipping, \
             total, shipping_address, billing_address, status, delivery_method, tracking_number, \
             stock_reserved, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(&order.record_id)
        .bind(&order.order_id)
        .bind(&order.user_id)
        .bind(order.subtotal)
        .bind(order.discount)
        .bind(order.tax)
        .bind(order.shipping)
        .bind(order.total)
        .bind(address_to_json(&order.shipping_address)?)
        .bind(address_to_json(&order.billing_address)?)
        .bind(order.status.as_str())
        .bind(&order.delivery_method)
        .bind(&order.tracking_number)
        .bind(order.stock_reserved)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (order_record_id, product_id, name, images, quantity, \
                 base_price, total_price, discount, tax, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(&order.record_id)
            .bind(&item.product_id)
            .bind(&item.name)
            .bind(&item.images)
            .bind(item.quantity as i32)
            .bind(item.base_price)
            .bind(item.total_price)
            .bind(item.discount)
            .bind(item.tax)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }
        self.write_transactions(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE orders SET status = $2, tracking_number = $3, stock_reserved = $4, \
             updated_at = $5 WHERE record_id = $1",
        )
        .bind(&order.record_id)
        .bind(order.status.as_str())
        .bind(&order.tracking_number)
        .bind(order.stock_reserved)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("order {}", order.record_id)));
        }
        self.write_transactions(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }
}
