//! Order pipeline
//!
//! Creation re-validates stock against the live catalog, snapshots the cart
//! into an immutable order, then branches: COD reserves stock immediately,
//! online payments defer the reservation to signature verification. The
//! gateway order is created before anything is persisted, so a gateway
//! failure never leaves a dangling order behind.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::domain::{money, Address, Order, OrderItem, OrderStatus, PaymentMethod};
use crate::events::{EventPublisher, OrderEvent};
use crate::payment::{GatewayOrder, PaymentGateway};
use crate::service::UserLocks;
use crate::store::{CartStore, OrderStore, ProductCatalog, StockLine, UserIdentity, UserProfiles};
use crate::{Error, Result};

#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    carts: Arc<dyn CartStore>,
    catalog: Arc<dyn ProductCatalog>,
    users: Arc<dyn UserProfiles>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventPublisher,
    locks: Arc<UserLocks>,
    currency: String,
}

/// Result of order creation: the persisted order and, for online payments,
/// the remote payment order the client completes against.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_order: Option<GatewayOrder>,
}

/// Admin listing entry: an order joined with its buyer's identity.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrder {
    #[serde(flatten)]
    pub order: Order,
    pub user_details: Option<UserIdentity>,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        carts: Arc<dyn CartStore>,
        catalog: Arc<dyn ProductCatalog>,
        users: Arc<dyn UserProfiles>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventPublisher,
        locks: Arc<UserLocks>,
        currency: &str,
    ) -> Self {
        Self {
            orders,
            carts,
            catalog,
            users,
            gateway,
            events,
            locks,
            currency: currency.to_string(),
        }
    }

    pub async fn create_order(
        &self,
        user_id: &str,
        shipping_address: Address,
        payment_method: PaymentMethod,
        save_address: bool,
    ) -> Result<PlacedOrder> {
        let _guard = self.locks.acquire(user_id).await;

        let mut cart = self
            .carts
            .find_by_user(user_id)
            .await?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Validation("cart is empty".to_string()))?;

        // Re-validate stock and freeze the lines in one pass.
        let mut items = Vec::with_capacity(cart.items.len());
        let mut stock_lines = Vec::with_capacity(cart.items.len());
        for line in &cart.items {
            let product = self
                .catalog
                .find_by_record_id(&line.product_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("product {}", line.product_id)))?;
            if product.stock < i64::from(line.quantity) {
                return Err(Error::InsufficientStock {
                    name: product.name,
                    requested: line.quantity,
                    available: product.stock.max(0) as u32,
                });
            }
            items.push(OrderItem {
                product_id: product.record_id.clone(),
                name: product.name.clone(),
                images: product.images.clone(),
                quantity: line.quantity,
                base_price: line.base_price,
                total_price: line.total_price,
                discount: line.discount,
                tax: line.item_tax,
            });
            stock_lines.push(StockLine {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
            });
        }

        if save_address {
            self.save_address_if_new(user_id, &shipping_address).await?;
        }

        let mut order = Order::place(
            &cart,
            items,
            shipping_address.clone(),
            shipping_address,
            payment_method,
        );

        let gateway_order = if payment_method.is_cod() {
            // COD reserves stock right away; the reservation decides the
            // race, the check above only fails fast.
            self.catalog.reserve_stock(&stock_lines).await?;
            order.mark_stock_reserved();
            if let Err(err) = self.orders.insert(&order).await {
                self.release_quietly(&stock_lines).await;
                return Err(err);
            }
            cart.clear();
            self.carts.save(&cart).await?;
            None
        } else {
            let amount = money::to_minor_units(order.total)
                .ok_or_else(|| Error::Validation("order total out of range".to_string()))?;
            let remote = self
                .gateway
                .create_order(amount, &self.currency, &order.record_id)
                .await?;
            order.attach_gateway_order(&remote.id);
            self.orders.insert(&order).await?;
            Some(remote)
        };

        info!(order = %order.order_id, user = user_id, method = payment_method.as_str(), "order created");
        self.events
            .publish(OrderEvent::Created {
                order_record_id: order.record_id.clone(),
                order_id: order.order_id.clone(),
                user_id: order.user_id.clone(),
                total: order.total,
                payment_method: payment_method.as_str().to_string(),
            })
            .await;

        Ok(PlacedOrder {
            order,
            gateway_order,
        })
    }

    pub async fn verify_payment(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
        order_record_id: &str,
    ) -> Result<Order> {
        // Signature first: the failure path must not touch any state.
        self.gateway
            .verify_signature(gateway_order_id, gateway_payment_id, signature)?;

        let found = self
            .orders
            .find_by_record_id(order_record_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("order {order_record_id}")))?;
        let _guard = self.locks.acquire(&found.user_id).await;
        // Re-read under the lock; a concurrent cancel may have won.
        let mut order = self
            .orders
            .find_by_record_id(order_record_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("order {order_record_id}")))?;

        if order.status != OrderStatus::Pending {
            return Err(Error::InvalidState(format!(
                "order {} is not awaiting payment",
                order.order_id
            )));
        }
        // The signature proves the pair is genuine; this proves it is ours.
        let expected = order
            .active_transaction()
            .and_then(|t| t.gateway_order_id.as_deref());
        if expected != Some(gateway_order_id) {
            return Err(Error::PaymentVerification(
                "payment does not belong to this order".to_string(),
            ));
        }

        let stock_lines: Vec<StockLine> = order.items.iter().map(StockLine::from).collect();
        self.catalog.reserve_stock(&stock_lines).await?;
        order.confirm_payment(gateway_payment_id, signature)?;
        order.mark_stock_reserved();
        if let Err(err) = self.orders.update(&order).await {
            self.release_quietly(&stock_lines).await;
            return Err(err);
        }

        if let Some(mut cart) = self.carts.find_by_user(&order.user_id).await? {
            cart.clear();
            self.carts.save(&cart).await?;
        }

        info!(order = %order.order_id, "payment verified, order confirmed");
        self.events
            .publish(OrderEvent::Confirmed {
                order_record_id: order.record_id.clone(),
                user_id: order.user_id.clone(),
                total: order.total,
            })
            .await;
        Ok(order)
    }

    pub async fn cancel_order(&self, order_record_id: &str, user_id: &str) -> Result<Order> {
        let _guard = self.locks.acquire(user_id).await;
        let mut order = self
            .orders
            .find_by_record_id(order_record_id)
            .await?
            .filter(|o| o.belongs_to(user_id))
            .ok_or_else(|| Error::NotFound(format!("order {order_record_id}")))?;

        // Stock only comes back if this order actually holds it: a COD
        // order from placement, an online order from verification.
        let held = order.stock_reserved;
        order.cancel()?;
        self.orders.update(&order).await?;
        if held {
            let lines: Vec<StockLine> = order.items.iter().map(StockLine::from).collect();
            self.catalog.release_stock(&lines).await?;
        }

        info!(order = %order.order_id, user = user_id, "order cancelled");
        self.events
            .publish(OrderEvent::Cancelled {
                order_record_id: order.record_id.clone(),
                user_id: order.user_id.clone(),
            })
            .await;
        Ok(order)
    }

    /// Orders for one user, newest first.
    pub async fn orders_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        self.orders.find_by_user(user_id).await
    }

    /// A single order, visible only to its owner.
    pub async fn order_details(&self, order_record_id: &str, user_id: &str) -> Result<Order> {
        self.orders
            .find_by_record_id(order_record_id)
            .await?
            .filter(|o| o.belongs_to(user_id))
            .ok_or_else(|| Error::NotFound(format!("order {order_record_id}")))
    }

    /// Every order joined with buyer identity, newest first.
    pub async fn all_orders(&self) -> Result<Vec<AdminOrder>> {
        let orders = self.orders.list_all().await?;
        let mut out = Vec::with_capacity(orders.len());
        for order in orders {
            let user_details = self.users.find_user(&order.user_id).await?;
            out.push(AdminOrder {
                order,
                user_details,
            });
        }
        Ok(out)
    }

    async fn save_address_if_new(&self, user_id: &str, address: &Address) -> Result<()> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
        let existing = self.users.list_addresses(user_id).await?;
        if existing.iter().any(|a| a.is_duplicate_of(address)) {
            debug!(user = user_id, "address already on file, skipping save");
            return Ok(());
        }
        let mut address = address.clone();
        // The first address a user ever saves becomes their default.
        address.is_default_delivery = existing.is_empty();
        self.users.append_address(user_id, address).await?;
        debug!(user = user_id, "new address saved to profile");
        Ok(())
    }

    async fn release_quietly(&self, lines: &[StockLine]) {
        if let Err(err) = self.catalog.release_stock(lines).await {
            error!("failed to release stock after aborted order: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Product, TransactionStatus};
    use crate::payment::payment_signature;
    use crate::service::CartService;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    const SECRET: &str = "gw_secret";

    struct TestGateway {
        fail: bool,
    }

    #[async_trait]
    impl PaymentGateway for TestGateway {
        async fn create_order(
            &self,
            amount_minor: i64,
            currency: &str,
            receipt: &str,
        ) -> Result<GatewayOrder> {
            if self.fail {
                return Err(Error::PaymentGateway(
                    "payment service unavailable".to_string(),
                ));
            }
            Ok(GatewayOrder {
                id: format!("order_gw_{receipt}"),
                amount: amount_minor,
                currency: currency.to_string(),
            })
        }

        fn verify_signature(
            &self,
            gateway_order_id: &str,
            gateway_payment_id: &str,
            signature: &str,
        ) -> Result<()> {
            crate::payment::verify_payment_signature(
                SECRET,
                gateway_order_id,
                gateway_payment_id,
                signature,
            )
        }
    }

    struct Fixture {
        store: MemoryStore,
        carts: CartService,
        orders: OrderService,
    }

    fn fixture(gateway_fails: bool) -> Fixture {
        let store = MemoryStore::new();
        let locks = Arc::new(UserLocks::new());
        let carts = CartService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            locks.clone(),
        );
        let orders = OrderService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(TestGateway {
                fail: gateway_fails,
            }),
            EventPublisher::disabled(),
            locks,
            "INR",
        );
        Fixture {
            store,
            carts,
            orders,
        }
    }

    async fn seed_product(store: &MemoryStore, record_id: &str, price: i64, stock: i64) {
        store
            .insert_product(Product {
                record_id: record_id.into(),
                name: format!("Product {record_id}"),
                slug: record_id.to_lowercase(),
                images: vec!["front.jpg".into()],
                price: Decimal::new(price, 0),
                discount_price: None,
                stock,
                tax_ref: None,
                status: true,
            })
            .await;
    }

    fn shipping() -> Address {
        Address {
            first_name: "Asha".into(),
            last_name: "Rao".into(),
            phone: "9876543210".into(),
            email: "asha@example.com".into(),
            line1: "12 Park Lane".into(),
            city: "Mumbai".into(),
            state: "MH".into(),
            country: "IN".into(),
            pin_code: "400001".into(),
            ..Address::default()
        }
    }

    #[tokio::test]
    async fn test_empty_cart_rejected() {
        let fx = fixture(false);
        let err = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Cod, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(fx.orders.orders_for_user("U1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_everything_untouched() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 2).await;
        fx.carts.add_item("U1", "P1", 3).await.unwrap();

        let err = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Cod, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientStock { requested: 3, .. }));
        assert_eq!(fx.store.stock_of("P1").await, Some(2));
        let cart = fx.carts.get_or_create("U1").await.unwrap();
        assert_eq!(cart.items_count, 3);
        assert!(fx.orders.orders_for_user("U1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cod_reserves_stock_and_clears_cart() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 10).await;
        fx.carts.add_item("U1", "P1", 4).await.unwrap();

        let placed = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Cod, false)
            .await
            .unwrap();
        assert!(placed.gateway_order.is_none());
        assert_eq!(placed.order.status, OrderStatus::Pending);
        assert!(placed.order.stock_reserved);
        assert_eq!(fx.store.stock_of("P1").await, Some(6));
        assert!(fx.carts.get_or_create("U1").await.unwrap().is_empty());

        let tx = placed.order.active_transaction().unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount, Decimal::new(400, 0));
    }

    #[tokio::test]
    async fn test_online_defers_stock_until_verification() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 10).await;
        fx.carts.add_item("U1", "P1", 2).await.unwrap();

        let placed = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Razorpay, false)
            .await
            .unwrap();
        let gw = placed.gateway_order.as_ref().unwrap();
        assert_eq!(gw.amount, 20000); // 200.00 in paise
        assert_eq!(fx.store.stock_of("P1").await, Some(10));
        assert_eq!(
            fx.carts.get_or_create("U1").await.unwrap().items_count,
            2,
            "cart stays until payment is verified"
        );

        let sig = payment_signature(SECRET, &gw.id, "pay_1");
        let order = fx
            .orders
            .verify_payment(&gw.id, "pay_1", &sig, &placed.order.record_id)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert!(order.stock_reserved);
        assert_eq!(
            order.active_transaction().unwrap().status,
            TransactionStatus::Success
        );
        assert_eq!(fx.store.stock_of("P1").await, Some(8));
        assert!(fx.carts.get_or_create("U1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_signature_mutates_nothing() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 10).await;
        fx.carts.add_item("U1", "P1", 2).await.unwrap();
        let placed = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Card, false)
            .await
            .unwrap();
        let gw_id = placed.gateway_order.unwrap().id;

        let sig = payment_signature("wrong_secret", &gw_id, "pay_1");
        let err = fx
            .orders
            .verify_payment(&gw_id, "pay_1", &sig, &placed.order.record_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PaymentVerification(_)));

        let order = fx
            .orders
            .order_details(&placed.order.record_id, "U1")
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(fx.store.stock_of("P1").await, Some(10));
        assert_eq!(fx.carts.get_or_create("U1").await.unwrap().items_count, 2);
    }

    #[tokio::test]
    async fn test_verify_rejects_foreign_gateway_order() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 10).await;
        fx.carts.add_item("U1", "P1", 1).await.unwrap();
        let placed = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Upi, false)
            .await
            .unwrap();

        // Valid signature over a pair that belongs to some other order.
        let sig = payment_signature(SECRET, "order_gw_other", "pay_1");
        let err = fx
            .orders
            .verify_payment("order_gw_other", "pay_1", &sig, &placed.order.record_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PaymentVerification(_)));
    }

    #[tokio::test]
    async fn test_gateway_failure_persists_nothing() {
        let fx = fixture(true);
        seed_product(&fx.store, "P1", 100, 10).await;
        fx.carts.add_item("U1", "P1", 1).await.unwrap();

        let err = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Card, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PaymentGateway(_)));
        assert!(fx.orders.orders_for_user("U1").await.unwrap().is_empty());
        assert_eq!(fx.store.stock_of("P1").await, Some(10));
        assert_eq!(fx.carts.get_or_create("U1").await.unwrap().items_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_confirmed_order_restores_stock() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 10).await;
        fx.carts.add_item("U1", "P1", 4).await.unwrap();
        let placed = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Cod, false)
            .await
            .unwrap();
        assert_eq!(fx.store.stock_of("P1").await, Some(6));

        let cancelled = fx
            .orders
            .cancel_order(&placed.order.record_id, "U1")
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(
            cancelled.active_transaction().unwrap().status,
            TransactionStatus::Refunded
        );
        assert_eq!(fx.store.stock_of("P1").await, Some(10));

        // A second cancel is an invalid transition.
        let err = fx
            .orders
            .cancel_order(&placed.order.record_id, "U1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_cancel_unverified_online_order_leaves_stock_alone() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 10).await;
        fx.carts.add_item("U1", "P1", 2).await.unwrap();
        let placed = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Razorpay, false)
            .await
            .unwrap();

        fx.orders
            .cancel_order(&placed.order.record_id, "U1")
            .await
            .unwrap();
        // Stock was never reserved for this order, so nothing comes back.
        assert_eq!(fx.store.stock_of("P1").await, Some(10));
    }

    #[tokio::test]
    async fn test_cancel_requires_ownership() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 10).await;
        fx.carts.add_item("U1", "P1", 1).await.unwrap();
        let placed = fx
            .orders
            .create_order("U1", shipping(), PaymentMethod::Cod, false)
            .await
            .unwrap();

        let err = fx
            .orders
            .cancel_order(&placed.order.record_id, "U2")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_save_address_dedupes_and_defaults_first() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 10).await;
        fx.store.insert_user("U1", "Asha", "asha@example.com").await;

        fx.carts.add_item("U1", "P1", 1).await.unwrap();
        fx.orders
            .create_order("U1", shipping(), PaymentMethod::Cod, true)
            .await
            .unwrap();

        // Same address again, differently cased: suppressed.
        let mut again = shipping();
        again.line1 = "  12 PARK LANE ".into();
        fx.carts.add_item("U1", "P1", 1).await.unwrap();
        fx.orders
            .create_order("U1", again, PaymentMethod::Cod, true)
            .await
            .unwrap();

        let addresses = fx.store.list_addresses("U1").await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert!(addresses[0].is_default_delivery);
    }

    #[tokio::test]
    async fn test_concurrent_orders_never_oversell() {
        let fx = fixture(false);
        seed_product(&fx.store, "P1", 100, 3).await;
        for i in 0..8 {
            fx.carts
                .add_item(&format!("U{i}"), "P1", 1)
                .await
                .unwrap();
        }

        let mut set = tokio::task::JoinSet::new();
        for i in 0..8 {
            let orders = fx.orders.clone();
            set.spawn(async move {
                orders
                    .create_order(&format!("U{i}"), shipping(), PaymentMethod::Cod, false)
                    .await
            });
        }
        let mut ok = 0;
        let mut short = 0;
        while let Some(res) = set.join_next().await {
            match res.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::InsufficientStock { .. }) => short += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(short, 5);
        assert_eq!(fx.store.stock_of("P1").await, Some(0));
    }
}
