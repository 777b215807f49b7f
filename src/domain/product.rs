//! Product record shape consumed from the catalog collaborator

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub record_id: String,
    pub name: String,
    pub slug: String,
    pub images: Vec<String>,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub stock: i64,
    pub tax_ref: Option<String>,
    pub status: bool,
}

impl Product {
    /// Price a buyer actually pays: the discounted price when one is set.
    pub fn selling_price(&self) -> Decimal {
        self.discount_price.unwrap_or(self.price)
    }

    pub fn is_active(&self) -> bool {
        self.status
    }
}
