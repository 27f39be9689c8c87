//! End-to-end checkout: cart, invoice creation at the gateway, then the
//! payment callback settling the order.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, response_text, TestApp, MERCHANT_CODE};
use serde_json::Value;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

async fn checkout(app: &TestApp) -> (StatusCode, Value) {
    let response = app
        .as_customer(Method::POST, "/api/v1/orders/checkout", None)
        .await;
    let status = response.status();
    (status, response_json(response).await)
}

#[tokio::test]
async fn checkout_then_successful_callback_marks_order_paid() {
    let app = TestApp::new().await;
    let kopi = app.seed_product("Kopi Gayo", 25_000).await;
    let teh = app.seed_product("Teh Tarik", 12_500).await;
    app.add_to_cart(&kopi, 2).await;
    app.add_to_cart(&teh, 1).await;

    Mock::given(method("POST"))
        .and(path(common::INVOICE_PATH))
        .and(header_exists("x-duitku-signature"))
        .and(body_partial_json(serde_json::json!({
            "paymentAmount": 62_500,
            "email": "budi@example.com",
            "customerVaName": "Budi Santoso",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "merchantCode": MERCHANT_CODE,
            "reference": "DS0001REF",
            "paymentUrl": "https://sandbox.duitku.com/pay/DS0001REF",
            "statusCode": "00",
            "statusMessage": "SUCCESS",
        })))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let (status, body) = checkout(&app).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["totalPrice"], 62_500);
    assert_eq!(body["reference"], "DS0001REF");
    assert_eq!(body["paymentUrl"], "https://sandbox.duitku.com/pay/DS0001REF");
    let order_id = body["orderId"].as_str().expect("order id").to_string();

    // The cart now belongs to the order
    let cart = response_json(app.as_customer(Method::GET, "/api/v1/cart", None).await).await;
    assert_eq!(cart["items"].as_array().map(Vec::len), Some(0));

    let order = response_json(
        app.as_customer(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;
    assert_eq!(order["status"], "Pending");
    assert_eq!(order["quantity"], 3);
    assert_eq!(order["duitku_reference"], "DS0001REF");
    assert_eq!(order["items"].as_array().map(Vec::len), Some(2));

    let callback = app.deliver_callback(&order_id, 62_500, "00").await;
    assert_eq!(callback.status(), StatusCode::OK);
    assert_eq!(
        response_text(callback).await,
        "Callback received and processed"
    );

    let order = response_json(
        app.as_customer(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;
    assert_eq!(order["status"], "Paid");

    // Gateways redeliver; the repeat is acknowledged and changes nothing
    let again = app.deliver_callback(&order_id, 62_500, "00").await;
    assert_eq!(again.status(), StatusCode::OK);

    // A late failure notice cannot undo a payment
    let late_failure = app.deliver_callback(&order_id, 62_500, "01").await;
    assert_eq!(late_failure.status(), StatusCode::OK);
    let order = response_json(
        app.as_customer(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;
    assert_eq!(order["status"], "Paid");
}

#[tokio::test]
async fn failed_payment_callback_marks_order_failed() {
    let app = TestApp::new().await;
    app.gateway_accepts("DS0001FAIL").await;
    let product = app.seed_product("Sambal Roa", 30_000).await;
    app.add_to_cart(&product, 1).await;

    let (_, body) = checkout(&app).await;
    let order_id = body["orderId"].as_str().expect("order id").to_string();

    let callback = app.deliver_callback(&order_id, 30_000, "01").await;
    assert_eq!(callback.status(), StatusCode::OK);

    let orders = response_json(app.as_customer(Method::GET, "/api/v1/orders", None).await).await;
    assert_eq!(orders[0]["status"], "Failed");
}

#[tokio::test]
async fn second_checkout_without_new_items_is_empty_cart() {
    let app = TestApp::new().await;
    app.gateway_accepts("DS0001ONCE").await;
    let product = app.seed_product("Rendang", 45_000).await;
    app.add_to_cart(&product, 1).await;

    let (status, _) = checkout(&app).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = checkout(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "EMPTY_CART");
}

#[tokio::test]
async fn checkout_with_empty_cart_never_reaches_gateway() {
    let app = TestApp::new().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.gateway)
        .await;

    let (status, body) = checkout(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "EMPTY_CART");
}

#[tokio::test]
async fn gateway_rejection_leaves_cart_ready_for_retry() {
    let app = TestApp::new().await;
    app.gateway_rejects().await;
    let product = app.seed_product("Batik Tulis", 350_000).await;
    app.add_to_cart(&product, 1).await;

    let (status, body) = checkout(&app).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "PAYMENT_INITIATION_FAILED");
    assert_eq!(body["details"], "GATEWAY_REJECTED");

    let orders = response_json(app.as_customer(Method::GET, "/api/v1/orders", None).await).await;
    assert_eq!(orders.as_array().map(Vec::len), Some(0));

    let cart = response_json(app.as_customer(Method::GET, "/api/v1/cart", None).await).await;
    assert_eq!(cart["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(cart["subtotal"], 350_000);
}

#[tokio::test]
async fn checkout_requires_a_bearer_token() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::POST, "/api/v1/orders/checkout", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(response).await["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn checkout_is_rate_limited_per_client() {
    let app = TestApp::with_config(|cfg| {
        cfg.checkout_rate_limit.burst = 2;
    })
    .await;

    for _ in 0..2 {
        let (status, _) = checkout(&app).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let response = app
        .as_customer(Method::POST, "/api/v1/orders/checkout", None)
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn orders_of_other_users_are_not_visible() {
    let app = TestApp::new().await;
    app.gateway_accepts("DS0001MINE").await;
    let product = app.seed_product("Kerupuk", 10_000).await;
    app.add_to_cart(&product, 1).await;
    let (_, body) = checkout(&app).await;
    let order_id = body["orderId"].as_str().expect("order id").to_string();

    let response = app
        .as_admin(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
