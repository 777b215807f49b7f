//! Domain events published over NATS when configured
//!
//! Publishing is fire-and-forget: a missing connection or a publish failure
//! is logged and never fails the operation that raised the event.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created {
        order_record_id: String,
        order_id: String,
        user_id: String,
        total: Decimal,
        payment_method: String,
    },
    Confirmed {
        order_record_id: String,
        user_id: String,
        total: Decimal,
    },
    Cancelled {
        order_record_id: String,
        user_id: String,
    },
}

impl OrderEvent {
    fn subject(&self) -> &'static str {
        match self {
            Self::Created { .. } => "orders.created",
            Self::Confirmed { .. } => "orders.confirmed",
            Self::Cancelled { .. } => "orders.cancelled",
        }
    }
}

#[derive(Clone)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self {
        Self { nats }
    }

    pub fn disabled() -> Self {
        Self { nats: None }
    }

    pub async fn publish(&self, event: OrderEvent) {
        let Some(client) = &self.nats else { return };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode event: {err}");
                return;
            }
        };
        if let Err(err) = client.publish(event.subject().to_string(), payload.into()).await {
            warn!(subject = event.subject(), "failed to publish event: {err}");
        }
    }
}
