//! Order aggregate
//!
//! Orders are built from a cart snapshot and never re-priced: catalog
//! changes after placement cannot alter a placed order's totals. Status
//! moves forward only, with cancellation as the single backward exit from
//! `pending` or `confirmed`.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Address, Cart};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "processing" => Some(Self::Processing),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Position on the forward fulfillment track; `None` for the terminal
    /// cancelled state, which is off the track entirely.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Processing => Some(2),
            Self::Shipped => Some(3),
            Self::Delivered => Some(4),
            Self::Cancelled => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Upi,
    Cod,
    Razorpay,
}

impl PaymentMethod {
    pub fn is_cod(&self) -> bool {
        matches!(self, Self::Cod)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Upi => "upi",
            Self::Cod => "cod",
            Self::Razorpay => "razorpay",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "card" => Some(Self::Card),
            "upi" => Some(Self::Upi),
            "cod" => Some(Self::Cod),
            "razorpay" => Some(Self::Razorpay),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// One payment attempt. The order keeps every attempt as an append-only
/// log; the last entry is the active one.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub record_id: String,
    pub payment_method: PaymentMethod,
    pub amount: Decimal,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_signature: Option<String>,
}

/// Frozen copy of a cart line at placement time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub images: Vec<String>,
    pub quantity: u32,
    pub base_price: Decimal,
    pub total_price: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub record_id: String,
    /// Human-readable identifier, derived from time plus a random suffix.
    pub order_id: String,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub shipping_address: Address,
    pub billing_address: Address,
    #[serde(rename = "orderStatus")]
    pub status: OrderStatus,
    pub transactions: Vec<Transaction>,
    pub delivery_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    /// Whether this order currently holds reserved catalog stock. Set for
    /// COD at placement and for online payments at verification; cleared
    /// on cancellation.
    pub stock_reserved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn generate_order_id() -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("ORD{}{}", Utc::now().timestamp_millis(), suffix)
}

impl Order {
    /// Build a pending order from a cart snapshot, with one pending
    /// transaction for the full amount.
    pub fn place(
        cart: &Cart,
        items: Vec<OrderItem>,
        shipping_address: Address,
        billing_address: Address,
        payment_method: PaymentMethod,
    ) -> Self {
        let now = Utc::now();
        Self {
            record_id: Uuid::now_v7().to_string(),
            order_id: generate_order_id(),
            user_id: cart.user_id.clone(),
            items,
            subtotal: cart.subtotal,
            discount: cart.discount,
            tax: cart.tax,
            shipping: Decimal::ZERO,
            total: cart.total,
            shipping_address,
            billing_address,
            status: OrderStatus::Pending,
            transactions: vec![Transaction {
                record_id: Uuid::now_v7().to_string(),
                payment_method,
                amount: cart.total,
                status: TransactionStatus::Pending,
                gateway_order_id: None,
                gateway_payment_id: None,
                gateway_signature: None,
            }],
            delivery_method: "standard".to_string(),
            tracking_number: None,
            stock_reserved: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn active_transaction(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn attach_gateway_order(&mut self, gateway_order_id: &str) {
        if let Some(tx) = self.transactions.last_mut() {
            tx.gateway_order_id = Some(gateway_order_id.to_string());
        }
        self.touch();
    }

    pub fn mark_stock_reserved(&mut self) {
        self.stock_reserved = true;
        self.touch();
    }

    /// Record a verified payment: transaction succeeds, order confirms.
    pub fn confirm_payment(&mut self, gateway_payment_id: &str, signature: &str) -> Result<()> {
        if self.status != OrderStatus::Pending {
            return Err(Error::InvalidState(format!(
                "order {} is not awaiting payment",
                self.order_id
            )));
        }
        if let Some(tx) = self.transactions.last_mut() {
            tx.status = TransactionStatus::Success;
            tx.gateway_payment_id = Some(gateway_payment_id.to_string());
            tx.gateway_signature = Some(signature.to_string());
        }
        self.status = OrderStatus::Confirmed;
        self.touch();
        Ok(())
    }

    /// Move forward along the fulfillment track. Cancellation is not a
    /// forward move; use [`Order::cancel`].
    pub fn advance(&mut self, to: OrderStatus) -> Result<()> {
        let (from_rank, to_rank) = match (self.status.rank(), to.rank()) {
            (Some(f), Some(t)) => (f, t),
            _ => {
                return Err(Error::InvalidState(format!(
                    "order {} cannot move from {} to {}",
                    self.order_id,
                    self.status.as_str(),
                    to.as_str()
                )))
            }
        };
        if to_rank <= from_rank {
            return Err(Error::InvalidState(format!(
                "order {} cannot move from {} to {}",
                self.order_id,
                self.status.as_str(),
                to.as_str()
            )));
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    /// The single backward transition: pending or confirmed orders may be
    /// cancelled; the active transaction is marked refunded.
    pub fn cancel(&mut self) -> Result<()> {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(Error::InvalidState(format!(
                "order {} cannot be cancelled at this stage",
                self.order_id
            )));
        }
        if let Some(tx) = self.transactions.last_mut() {
            tx.status = TransactionStatus::Refunded;
        }
        self.status = OrderStatus::Cancelled;
        self.stock_reserved = false;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
