use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{ErrorKind, Order, OrderStatus, PaymentOutcome, SaleError, WebhookResult};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::payments::PaymentNotice;
use crate::store::Store;
use crate::SaleEngine;

pub struct AppState<S> {
    pub engine: Arc<SaleEngine<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub price: String,
    pub stock: i32,
    pub available_stock: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateHoldRequest {
    pub quantity: i32,
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateHoldResponse {
    pub hold_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub hold_id: Uuid,
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: OrderStatus,
    pub hold_id: Option<Uuid>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            product_id: order.product_id,
            quantity: order.quantity,
            status: order.status,
            hold_id: order.hold_id,
            idempotency_key: order.idempotency_key,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub order_id: Uuid,
    pub status: String,
    pub idempotency_key: String,
    pub payment_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentWebhookResponse {
    pub result: WebhookResult,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// A [`SaleError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(SaleError);

impl From<SaleError> for ApiError {
    fn from(err: SaleError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(SaleError::Validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError(SaleError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match self.0.kind() {
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
            ErrorKind::Validation => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn create_router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health_check))
        .route("/products/:id", get(get_product::<S>))
        .route("/products/:id/holds", post(create_hold::<S>))
        .route("/orders", post(create_order::<S>))
        .route("/payments/webhook", post(payment_webhook::<S>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn get_product<S: Store>(
    State(state): State<AppState<S>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ProductResponse>, ApiError> {
    let Path(product_id) = id?;
    let (product, available_stock) = state.engine.availability.product(product_id).await?;

    Ok(Json(ProductResponse {
        id: product.id,
        name: product.name,
        price: product.price.to_string(),
        stock: product.stock,
        available_stock,
    }))
}

pub async fn create_hold<S: Store>(
    State(state): State<AppState<S>>,
    id: Result<Path<Uuid>, PathRejection>,
    request: Result<Json<CreateHoldRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateHoldResponse>), ApiError> {
    let Path(product_id) = id?;
    let Json(request) = request?;

    let hold = state
        .engine
        .holds
        .create_hold(product_id, request.quantity, request.ttl_seconds)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateHoldResponse {
            hold_id: hold.id,
            expires_at: hold.expires_at,
        }),
    ))
}

pub async fn create_order<S: Store>(
    State(state): State<AppState<S>>,
    request: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let Json(request) = request?;

    let order = state
        .engine
        .orders
        .create_order(request.hold_id, request.idempotency_key)
        .await?;

    Ok((StatusCode::CREATED, Json(order.into())))
}

pub async fn payment_webhook<S: Store>(
    State(state): State<AppState<S>>,
    request: Result<Json<PaymentWebhookRequest>, JsonRejection>,
) -> Result<Json<PaymentWebhookResponse>, ApiError> {
    let Json(request) = request?;
    let outcome: PaymentOutcome = request.status.parse()?;

    let result = state
        .engine
        .payments
        .handle_webhook(PaymentNotice {
            order_id: request.order_id,
            outcome,
            idempotency_key: request.idempotency_key,
            payment_id: request.payment_id,
        })
        .await?;

    let message = match result {
        WebhookResult::Processed => "Payment webhook processed",
        WebhookResult::AlreadyProcessed => "Webhook already processed",
    };

    Ok(Json(PaymentWebhookResponse {
        result,
        message: message.to_string(),
    }))
}

pub async fn welcome() -> &'static str {
    "Welcome to Flash Sale API"
}

pub async fn health_check() -> &'static str {
    "OK"
}
