//! The Duitku callback endpoint as the gateway sees it.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp, API_KEY, MERCHANT_CODE};
use duitku_shop_api::payments::signature::callback_signature;
use test_case::test_case;
use uuid::Uuid;

/// Checks out a single product and returns the new order id
async fn pending_order(app: &TestApp, price: i64) -> String {
    app.gateway_accepts("DS0001CB").await;
    let product = app.seed_product("Kain Songket", price).await;
    app.add_to_cart(&product, 1).await;

    let body = response_json(
        app.as_customer(Method::POST, "/api/v1/orders/checkout", None)
            .await,
    )
    .await;
    body["orderId"].as_str().expect("order id").to_string()
}

async fn order_status(app: &TestApp, order_id: &str) -> String {
    let order = response_json(
        app.as_customer(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;
    order["status"].as_str().unwrap_or_default().to_string()
}

#[test_case("00", "Paid" ; "success code settles as paid")]
#[test_case("01", "Failed" ; "failure code settles as failed")]
#[test_case("02", "Pending" ; "unknown code keeps the order pending")]
#[tokio::test]
async fn result_code_decides_status(result_code: &str, expected: &str) {
    let app = TestApp::new().await;
    let order_id = pending_order(&app, 40_000).await;

    let response = app.deliver_callback(&order_id, 40_000, result_code).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(order_status(&app, &order_id).await, expected);
}

#[tokio::test]
async fn forged_signature_is_rejected_and_order_untouched() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app, 40_000).await;

    let response = app
        .post_form(
            "/api/v1/duitku/callback",
            &[
                ("merchantCode", MERCHANT_CODE.to_string()),
                ("amount", "40000".to_string()),
                ("merchantOrderId", order_id.clone()),
                ("resultCode", "00".to_string()),
                (
                    "signature",
                    callback_signature(MERCHANT_CODE, 40_000, &order_id, "not-the-api-key"),
                ),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(response).await["code"], "INVALID_SIGNATURE");
    assert_eq!(order_status(&app, &order_id).await, "Pending");
}

#[tokio::test]
async fn signed_callback_with_wrong_amount_is_rejected() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app, 40_000).await;

    let response = app.deliver_callback(&order_id, 1_000, "00").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["code"], "AMOUNT_MISMATCH");
    assert_eq!(order_status(&app, &order_id).await, "Pending");
}

#[tokio::test]
async fn callback_for_unknown_order_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .deliver_callback(&Uuid::new_v4().to_string(), 40_000, "00")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["code"], "ORDER_NOT_FOUND");
}

#[tokio::test]
async fn non_integer_amount_is_bad_request() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app, 40_000).await;

    let response = app
        .post_form(
            "/api/v1/duitku/callback",
            &[
                ("merchantCode", MERCHANT_CODE.to_string()),
                ("amount", "40000.50".to_string()),
                ("merchantOrderId", order_id.clone()),
                ("resultCode", "00".to_string()),
                (
                    "signature",
                    callback_signature(MERCHANT_CODE, 40_000, &order_id, API_KEY),
                ),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(order_status(&app, &order_id).await, "Pending");
}

#[tokio::test]
async fn callback_needs_no_bearer_token() {
    let app = TestApp::new().await;
    let order_id = pending_order(&app, 15_000).await;

    // deliver_callback never sends an Authorization header
    let response = app.deliver_callback(&order_id, 15_000, "00").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(order_status(&app, &order_id).await, "Paid");
}
