//! Delivery addresses
//!
//! Orders store a denormalized copy of the address, never a reference, so
//! later edits to the user's address book cannot alter a placed order.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[validate(length(min = 1, message = "first name is required"))]
    pub first_name: String,
    pub last_name: String,
    #[validate(length(min = 1, message = "phone is required"))]
    pub phone: String,
    pub email: String,
    #[validate(length(min = 1, message = "address line is required"))]
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    pub state: String,
    pub country: String,
    #[validate(length(min = 1, message = "pin code is required"))]
    pub pin_code: String,
    #[serde(default)]
    pub is_default_delivery: bool,
}

fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

impl Address {
    /// Two addresses are the same delivery point when line1, city, pin code
    /// and phone match after trimming and case folding.
    pub fn is_duplicate_of(&self, other: &Address) -> bool {
        norm(&self.line1) == norm(&other.line1)
            && norm(&self.city) == norm(&other.city)
            && self.pin_code.trim() == other.pin_code.trim()
            && self.phone.trim() == other.phone.trim()
    }
}
