//! Razorpay integration via REST API (no SDK dependency)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::payment::{GatewayOrder, PaymentGateway};
use crate::{Error, Result};

const API_BASE: &str = "https://api.razorpay.com/v1";

#[derive(Clone)]
pub struct RazorpayGateway {
    http: reqwest::Client,
    key_id: String,
    key_secret: String,
    base_url: String,
}

#[derive(Deserialize)]
struct RazorpayOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

impl RazorpayGateway {
    pub fn new(key_id: &str, key_secret: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::PaymentGateway(format!("client setup: {e}")))?;
        Ok(Self {
            http,
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder> {
        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({
                "amount": amount_minor,
                "currency": currency,
                "receipt": receipt,
            }))
            .send()
            .await
            .map_err(|e| {
                error!("razorpay order creation failed: {e}");
                if e.is_timeout() {
                    Error::PaymentGateway("payment service timed out".to_string())
                } else {
                    Error::PaymentGateway("payment service unavailable".to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "razorpay order creation rejected");
            return Err(Error::PaymentGateway(format!(
                "payment order rejected with status {status}"
            )));
        }

        let order: RazorpayOrderResponse = response
            .json()
            .await
            .map_err(|e| Error::PaymentGateway(format!("malformed gateway response: {e}")))?;
        Ok(GatewayOrder {
            id: order.id,
            amount: order.amount,
            currency: order.currency,
        })
    }

    fn verify_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<()> {
        crate::payment::verify_payment_signature(
            &self.key_secret,
            gateway_order_id,
            gateway_payment_id,
            signature,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::payment_signature;

    #[test]
    fn test_verify_uses_key_secret() {
        let gateway =
            RazorpayGateway::new("rzp_test_key", "rzp_test_secret", Duration::from_secs(5))
                .unwrap();
        let sig = payment_signature("rzp_test_secret", "order_1", "pay_1");
        gateway.verify_signature("order_1", "pay_1", &sig).unwrap();
        assert!(gateway.verify_signature("order_1", "pay_2", &sig).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_maps_to_gateway_error() {
        let gateway = RazorpayGateway::new("key", "secret", Duration::from_millis(200))
            .unwrap()
            .with_base_url("http://127.0.0.1:1/v1");
        let err = gateway.create_order(10000, "INR", "rcpt").await.unwrap_err();
        assert!(matches!(err, Error::PaymentGateway(_)));
    }
}
