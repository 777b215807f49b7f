//! Environment-driven configuration

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub gateway_key_id: String,
    pub gateway_key_secret: String,
    pub gateway_timeout_secs: u64,
    pub currency: String,
    pub nats_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8083".to_string())
                .parse()
                .context("PORT must be a number")?,
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            gateway_key_id: std::env::var("RAZORPAY_KEY_ID")
                .context("RAZORPAY_KEY_ID is required")?,
            gateway_key_secret: std::env::var("RAZORPAY_KEY_SECRET")
                .context("RAZORPAY_KEY_SECRET is required")?,
            gateway_timeout_secs: std::env::var("GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("GATEWAY_TIMEOUT_SECS must be a number")?,
            currency: std::env::var("CURRENCY").unwrap_or_else(|_| "INR".to_string()),
            nats_url: std::env::var("NATS_URL").ok(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
