mod common;

use axum::{
    body::{self, Body},
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal_macros::dec;
use scentstock_api::handlers;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{shipment_line, TestApp};

async fn request(router: &Router, method: Method, uri: &str, payload: Option<Value>) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match payload {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    router
        .clone()
        .oneshot(builder.body(body).expect("build request"))
        .await
        .expect("send request")
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("parse response body")
}

#[tokio::test]
async fn sale_flow_over_http_returns_enveloped_json() {
    let app = TestApp::new().await;
    app.seed_shipment(
        vec![shipment_line("Dior", "Sauvage", "100ml", 10, dec!(5))],
        dec!(0),
        dec!(0),
        Utc::now(),
    )
    .await;
    let router = handlers::router(app.state.clone());

    let available = request(
        &router,
        Method::GET,
        "/api/v1/inventory/available?brand=Dior&name=Sauvage&size=100ml",
        None,
    )
    .await;
    assert_eq!(available.status(), StatusCode::OK);
    let available = json_body(available).await;
    assert_eq!(available["data"]["total_available"], 10);
    assert_eq!(available["data"]["lots"].as_array().map(Vec::len), Some(1));

    let created = request(
        &router,
        Method::POST,
        "/api/v1/sales",
        Some(json!({
            "customer_name": "Maria Perez",
            "lines": [
                { "brand": "Dior", "name": "Sauvage", "size": "100ml", "quantity": 3, "unit_price": "20" }
            ],
            "currency": "USD",
            "amount_paid": "30"
        })),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await;
    assert_eq!(created["success"], true);
    assert_eq!(created["data"]["payment_status"], "partial");
    let sale_id = created["data"]["id"].as_str().expect("sale id").to_string();

    let fetched = request(&router, Method::GET, &format!("/api/v1/sales/{sale_id}"), None).await;
    assert_eq!(fetched.status(), StatusCode::OK);
    let fetched = json_body(fetched).await;
    assert_eq!(fetched["data"]["items"].as_array().map(Vec::len), Some(1));

    // The ledger view reflects the sale.
    let available = json_body(
        request(
            &router,
            Method::GET,
            "/api/v1/inventory/available?brand=Dior&name=Sauvage&size=100ml",
            None,
        )
        .await,
    )
    .await;
    assert_eq!(available["data"]["total_available"], 7);
}

#[tokio::test]
async fn shortfall_maps_to_bad_request_with_counts() {
    let app = TestApp::new().await;
    app.seed_shipment(
        vec![shipment_line("Chanel", "No 5", "50ml", 2, dec!(30))],
        dec!(0),
        dec!(0),
        Utc::now(),
    )
    .await;
    let router = handlers::router(app.state.clone());

    let response = request(
        &router,
        Method::POST,
        "/api/v1/sales",
        Some(json!({
            "customer_name": "Ana Garcia",
            "lines": [
                { "brand": "Chanel", "name": "No 5", "size": "50ml", "quantity": 3, "unit_price": "90" }
            ],
            "currency": "USD"
        })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    let message = body["message"].as_str().expect("error message");
    assert!(message.contains("needed 3"));
    assert!(message.contains("available 2"));
}

#[tokio::test]
async fn unknown_sale_maps_to_not_found() {
    let app = TestApp::new().await;
    let router = handlers::router(app.state.clone());

    let response = request(
        &router,
        Method::GET,
        "/api/v1/sales/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn settlement_recompute_is_exposed_for_reconciliation() {
    let app = TestApp::new().await;
    let shipment = app
        .seed_shipment(
            vec![shipment_line("Armani", "Code", "75ml", 5, dec!(9))],
            dec!(0),
            dec!(0),
            Utc::now(),
        )
        .await;
    let router = handlers::router(app.state.clone());

    let response = request(
        &router,
        Method::POST,
        &format!("/api/v1/shipments/{}/settlement/recompute", shipment.id),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["total_revenue"], "0");
}
