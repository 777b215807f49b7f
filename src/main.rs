//! Storefront checkout service

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use storefront_checkout::api::{self, AppState};
use storefront_checkout::config::Config;
use storefront_checkout::events::EventPublisher;
use storefront_checkout::payment::razorpay::RazorpayGateway;
use storefront_checkout::service::{CartService, OrderService, UserLocks};
use storefront_checkout::store::postgres::PgStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => Some(async_nats::connect(url).await?),
        None => None,
    };

    let store = Arc::new(PgStore::new(db));
    let locks = Arc::new(UserLocks::new());
    let gateway = Arc::new(RazorpayGateway::new(
        &config.gateway_key_id,
        &config.gateway_key_secret,
        Duration::from_secs(config.gateway_timeout_secs),
    )?);

    let carts = CartService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        locks.clone(),
    );
    let orders = OrderService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        gateway,
        EventPublisher::new(nats),
        locks,
        &config.currency,
    );
    let app = api::router(AppState { carts, orders });

    let addr = config.bind_addr();
    tracing::info!("🚀 storefront-checkout listening on {addr}");
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
