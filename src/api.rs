//! HTTP surface
//!
//! Thin axum handlers over the checkout services. All decisions live in the
//! services; this layer validates payloads and maps error kinds to status
//! codes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use validator::Validate;

use crate::domain::{Address, Cart, Order, PaymentMethod};
use crate::service::{AdminOrder, CartService, CartSummary, OrderService, PlacedOrder};
use crate::Error;

#[derive(Clone)]
pub struct AppState {
    pub carts: CartService,
    pub orders: OrderService,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_)
            | Error::InsufficientStock { .. }
            | Error::PaymentVerification(_) => StatusCode::BAD_REQUEST,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn validated<T: Validate>(payload: T) -> Result<T, Error> {
    payload
        .validate()
        .map_err(|e| Error::Validation(e.to_string()))?;
    Ok(payload)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/health",
            get(|| async {
                Json(json!({ "status": "healthy", "service": "storefront-checkout" }))
            }),
        )
        .route("/api/v1/cart/:user_id", get(get_cart).delete(clear_cart))
        .route(
            "/api/v1/cart/:user_id/items",
            post(add_item).put(update_item),
        )
        .route(
            "/api/v1/cart/:user_id/items/:product_id",
            delete(remove_item),
        )
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/verify", post(verify_payment))
        .route("/api/v1/orders/user/:user_id", get(user_orders))
        .route("/api/v1/orders/:record_id", get(order_details))
        .route("/api/v1/orders/:record_id/cancel", post(cancel_order))
        .route("/api/v1/admin/orders", get(all_orders))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_cart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<CartSummary>, Error> {
    Ok(Json(state.carts.summary(&user_id).await?))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct AddItemRequest {
    #[validate(length(min = 1, message = "product id is required"))]
    product_record_id: String,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    quantity: Option<u32>,
}

async fn add_item(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<Cart>), Error> {
    let payload = validated(payload)?;
    let cart = state
        .carts
        .add_item(&user_id, &payload.product_record_id, payload.quantity.unwrap_or(1))
        .await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateItemRequest {
    #[validate(length(min = 1, message = "product id is required"))]
    product_record_id: String,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    quantity: u32,
}

async fn update_item(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<Json<Cart>, Error> {
    let payload = validated(payload)?;
    let cart = state
        .carts
        .update_item(&user_id, &payload.product_record_id, payload.quantity)
        .await?;
    Ok(Json(cart))
}

async fn remove_item(
    State(state): State<AppState>,
    Path((user_id, product_id)): Path<(String, String)>,
) -> Result<Json<Cart>, Error> {
    Ok(Json(state.carts.remove_item(&user_id, &product_id).await?))
}

async fn clear_cart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Cart>, Error> {
    Ok(Json(state.carts.clear(&user_id).await?))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateOrderRequest {
    #[validate(length(min = 1, message = "user id is required"))]
    user_id: String,
    #[validate]
    shipping_address: Address,
    payment_method: PaymentMethod,
    #[serde(default)]
    save_address: bool,
}

async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<PlacedOrder>), Error> {
    let payload = validated(payload)?;
    let placed = state
        .orders
        .create_order(
            &payload.user_id,
            payload.shipping_address,
            payload.payment_method,
            payload.save_address,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

#[derive(Debug, Deserialize, Validate)]
struct VerifyPaymentRequest {
    #[validate(length(min = 1, message = "gateway order id is required"))]
    razorpay_order_id: String,
    #[validate(length(min = 1, message = "gateway payment id is required"))]
    razorpay_payment_id: String,
    #[validate(length(min = 1, message = "signature is required"))]
    razorpay_signature: String,
    #[serde(rename = "orderRecordId")]
    order_record_id: String,
}

async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<Json<Order>, Error> {
    let payload = validated(payload)?;
    let order = state
        .orders
        .verify_payment(
            &payload.razorpay_order_id,
            &payload.razorpay_payment_id,
            &payload.razorpay_signature,
            &payload.order_record_id,
        )
        .await?;
    Ok(Json(order))
}

async fn user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Order>>, Error> {
    Ok(Json(state.orders.orders_for_user(&user_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerQuery {
    user_id: String,
}

async fn order_details(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<Order>, Error> {
    Ok(Json(
        state
            .orders
            .order_details(&record_id, &owner.user_id)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelOrderRequest {
    user_id: String,
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<Json<Order>, Error> {
    Ok(Json(
        state
            .orders
            .cancel_order(&record_id, &payload.user_id)
            .await?,
    ))
}

async fn all_orders(State(state): State<AppState>) -> Result<Json<Vec<AdminOrder>>, Error> {
    Ok(Json(state.orders.all_orders().await?))
}
