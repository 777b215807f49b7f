//! Payment gateway seam
//!
//! Signature verification recomputes `HMAC-SHA256(secret, order_id + "|" +
//! payment_id)` and compares through `Mac::verify_slice`, which is
//! constant-time.

pub mod razorpay;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{Error, Result};

/// Remote payment order created at the gateway before the buyer pays.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a remote payment order. `amount_minor` is in minor units
    /// (paise for INR). Single attempt; a timeout or transport failure
    /// surfaces as `Error::PaymentGateway`.
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder>;

    /// Verify the signature the gateway attached after the buyer paid.
    fn verify_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<()>;
}

/// Hex signature over `order_id|payment_id`, as the gateway computes it.
#[cfg(test)]
pub fn payment_signature(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{gateway_order_id}|{gateway_payment_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_payment_signature(
    secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> Result<()> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::PaymentVerification("invalid key".to_string()))?;
    mac.update(format!("{gateway_order_id}|{gateway_payment_id}").as_bytes());
    let supplied = hex::decode(signature)
        .map_err(|_| Error::PaymentVerification("malformed signature".to_string()))?;
    mac.verify_slice(&supplied)
        .map_err(|_| Error::PaymentVerification("signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret";

    #[test]
    fn test_round_trip_signature_verifies() {
        let sig = payment_signature(SECRET, "order_abc", "pay_xyz");
        verify_payment_signature(SECRET, "order_abc", "pay_xyz", &sig).unwrap();
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let mut sig = payment_signature(SECRET, "order_abc", "pay_xyz");
        // Flip the last hex digit.
        let last = sig.pop().unwrap();
        sig.push(if last == '0' { '1' } else { '0' });
        assert!(matches!(
            verify_payment_signature(SECRET, "order_abc", "pay_xyz", &sig),
            Err(Error::PaymentVerification(_))
        ));
    }

    #[test]
    fn test_wrong_payment_id_rejected() {
        let sig = payment_signature(SECRET, "order_abc", "pay_xyz");
        assert!(matches!(
            verify_payment_signature(SECRET, "order_abc", "pay_other", &sig),
            Err(Error::PaymentVerification(_))
        ));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        assert!(matches!(
            verify_payment_signature(SECRET, "order_abc", "pay_xyz", "not-hex!"),
            Err(Error::PaymentVerification(_))
        ));
    }
}
