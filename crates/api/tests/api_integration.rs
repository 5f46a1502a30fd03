//! Integration tests for the API server.

use std::sync::OnceLock;

use application::InMemoryPriceOracle;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::ProductId;
use domain::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use persistence::{InMemoryDatabase, InMemoryLocker};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: axum::Router,
    db: InMemoryDatabase,
    prices: InMemoryPriceOracle,
    product_id: ProductId,
}

/// Builds an in-memory app with one product priced at 9.99.
fn setup() -> TestApp {
    let product_id = ProductId::new();
    let db = InMemoryDatabase::new();
    let prices = InMemoryPriceOracle::with_prices([(product_id, Money::from_cents(999))]);
    let state = api::create_state(db.clone(), InMemoryLocker::new(), prices.clone(), None);

    TestApp {
        router: api::create_app(state, get_metrics_handle()),
        db,
        prices,
        product_id,
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn add_product(customer_id: &str, product_id: &str) -> Request<Body> {
    json_request(
        "POST",
        &format!("/customers/{customer_id}/order/items"),
        serde_json::json!({ "product_id": product_id }),
    )
}

/// Adds the priced product for a new customer; returns the customer, order
/// and item IDs.
async fn order_with_item(app: &TestApp) -> (String, String, String) {
    let customer_id = uuid::Uuid::now_v7().to_string();
    let (status, json) = send(
        &app.router,
        add_product(&customer_id, &app.product_id.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let item_id = json["item_id"].as_str().unwrap().to_string();
    let order_id = app
        .db
        .orders()
        .await
        .into_iter()
        .find(|order| order.customer_id().to_string() == customer_id)
        .unwrap()
        .id()
        .to_string();
    (customer_id, order_id, item_id)
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, json) = send(&app.router, empty_request("GET", "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "memory");
}

#[tokio::test]
async fn test_add_product_returns_item_id() {
    let app = setup();
    let customer_id = uuid::Uuid::now_v7().to_string();

    let (status, json) = send(
        &app.router,
        add_product(&customer_id, &app.product_id.to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let item_id = json["item_id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(item_id).is_ok());
}

#[tokio::test]
async fn test_get_order_shows_items() {
    let app = setup();
    let (customer_id, order_id, item_id) = order_with_item(&app).await;

    let (status, json) = send(
        &app.router,
        empty_request("GET", &format!("/orders/{order_id}")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], order_id);
    assert_eq!(json["customer_id"], customer_id);
    assert_eq!(json["status"], "Open");
    assert_eq!(json["items"][0]["id"], item_id);
    assert_eq!(json["items"][0]["product_id"], app.product_id.to_string());
    assert_eq!(json["items"][0]["price_cents"], 999);
    assert_eq!(json["total_cents"], 999);
}

#[tokio::test]
async fn test_same_customer_reuses_open_order() {
    let app = setup();
    let (customer_id, order_id, _) = order_with_item(&app).await;

    let (status, _) = send(
        &app.router,
        add_product(&customer_id, &app.product_id.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, json) = send(
        &app.router,
        empty_request("GET", &format!("/orders/{order_id}")),
    )
    .await;
    assert_eq!(json["items"].as_array().unwrap().len(), 2);
    assert_eq!(json["total_cents"], 1998);
}

#[tokio::test]
async fn test_status_change_and_conflict() {
    let app = setup();
    let (_, order_id, item_id) = order_with_item(&app).await;

    let (status, json) = send(
        &app.router,
        json_request(
            "PUT",
            &format!("/orders/{order_id}/status"),
            serde_json::json!({ "status": "Pending" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "Pending");

    let (status, json) = send(
        &app.router,
        empty_request("DELETE", &format!("/orders/{order_id}/items/{item_id}")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("Pending"));
}

#[tokio::test]
async fn test_remove_item_and_delete_order() {
    let app = setup();
    let (_, order_id, item_id) = order_with_item(&app).await;

    let (status, _) = send(
        &app.router,
        empty_request("DELETE", &format!("/orders/{order_id}/items/{item_id}")),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app.router,
        empty_request("DELETE", &format!("/orders/{order_id}")),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app.router,
        empty_request("GET", &format!("/orders/{order_id}")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let app = setup();
    let order_id = uuid::Uuid::now_v7();

    let (status, json) = send(
        &app.router,
        empty_request("GET", &format!("/orders/{order_id}")),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_invalid_ids_are_bad_requests() {
    let app = setup();
    let product_id = app.product_id.to_string();

    let (status, _) = send(&app.router, empty_request("GET", "/orders/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app.router, add_product("not-a-uuid", &product_id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("customer_id"));

    let customer_id = uuid::Uuid::now_v7().to_string();
    let (status, json) = send(&app.router, add_product(&customer_id, "nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("product_id"));
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let app = setup();
    let customer_id = uuid::Uuid::now_v7().to_string();

    let (status, _) = send(
        &app.router,
        add_product(&customer_id, &ProductId::new().to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_price_oracle_outage_is_service_unavailable() {
    let app = setup();
    app.prices.set_unavailable(true);
    let customer_id = uuid::Uuid::now_v7().to_string();

    let (status, _) = send(
        &app.router,
        add_product(&customer_id, &app.product_id.to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.db.orders().await.iter().all(|o| o.items().is_empty()));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    order_with_item(&app).await;

    let response = app
        .router
        .oneshot(empty_request("GET", "/metrics"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(content_type, api::routes::metrics::PROMETHEUS_CONTENT_TYPE);
    assert_eq!(response.headers()["cache-control"], "no-store");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("order_items_added_total"));
}
