mod support;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use sale_service::api::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use support::Fixture;
use tower::ServiceExt;
use uuid::Uuid;

fn router(f: &Fixture) -> Router {
    create_router(AppState {
        engine: Arc::clone(&f.engine),
    })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_check_says_ok() {
    let f = Fixture::new();
    let response = router(&f).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn product_shows_price_and_available_stock() {
    let f = Fixture::new();
    let product = f.product(100);
    f.hold(product.id, 4).await;

    let (status, body) = send(router(&f), get(&format!("/products/{}", product.id))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Flash Sale Product");
    assert_eq!(body["price"], "49.99");
    assert_eq!(body["stock"], 100);
    assert_eq!(body["available_stock"], 96);
}

#[tokio::test]
async fn missing_product_is_404() {
    let f = Fixture::new();

    let (status, body) = send(router(&f), get(&format!("/products/{}", Uuid::new_v4()))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn malformed_product_id_is_422() {
    let f = Fixture::new();

    let (status, body) = send(router(&f), get("/products/not-a-uuid")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn hold_order_and_payment_flow() {
    let f = Fixture::new();
    let product = f.product(2);

    let (status, hold) = send(
        router(&f),
        post(
            &format!("/products/{}/holds", product.id),
            json!({ "quantity": 2, "ttl_seconds": 60 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(hold["expires_at"].is_string());

    let (status, _) = send(
        router(&f),
        post(&format!("/products/{}/holds", product.id), json!({ "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let order_request = json!({ "hold_id": hold["hold_id"], "idempotency_key": "order-1" });
    let (status, order) = send(router(&f), post("/orders", order_request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["quantity"], 2);

    let (status, replay) = send(router(&f), post("/orders", order_request)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(replay["id"], order["id"]);

    let (_, product_body) = send(router(&f), get(&format!("/products/{}", product.id))).await;
    assert_eq!(product_body["available_stock"], 0);

    let webhook = json!({
        "order_id": order["id"],
        "status": "failure",
        "idempotency_key": "pay-evt-1",
    });
    let (status, body) = send(router(&f), post("/payments/webhook", webhook.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "processed");

    let (status, body) = send(router(&f), post("/payments/webhook", webhook)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "already_processed");
    assert_eq!(body["message"], "Webhook already processed");

    let (_, product_body) = send(router(&f), get(&format!("/products/{}", product.id))).await;
    assert_eq!(product_body["available_stock"], 2);
}

#[tokio::test]
async fn invalid_hold_request_is_422() {
    let f = Fixture::new();
    let product = f.product(5);

    let (status, body) = send(
        router(&f),
        post(&format!("/products/{}/holds", product.id), json!({ "quantity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");

    let (status, _) = send(
        router(&f),
        post(&format!("/products/{}/holds", product.id), json!({ "quantity": "many" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_hold_is_404() {
    let f = Fixture::new();

    let (status, body) = send(
        router(&f),
        post("/orders", json!({ "hold_id": Uuid::new_v4(), "idempotency_key": "k" })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn webhook_with_unknown_status_is_422() {
    let f = Fixture::new();

    let (status, body) = send(
        router(&f),
        post(
            "/payments/webhook",
            json!({ "order_id": Uuid::new_v4(), "status": "refunded", "idempotency_key": "w" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn webhook_for_unknown_order_is_404() {
    let f = Fixture::new();

    let (status, _) = send(
        router(&f),
        post(
            "/payments/webhook",
            json!({ "order_id": Uuid::new_v4(), "status": "success", "idempotency_key": "w" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
