#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use duitku_shop_api::{
    app_router,
    auth::password::hash_password,
    config::{AppConfig, DuitkuConfig},
    db::{self, DbConfig},
    entities::{product, user, UserRole},
    payments::{signature::callback_signature, DuitkuClient},
    AppState,
};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const MERCHANT_CODE: &str = "DS0001";
pub const API_KEY: &str = "integration-test-api-key-0123456789";
pub const PASSWORD: &str = "correct-horse-battery";
pub const INVOICE_PATH: &str = "/api/merchant/createInvoice";

/// A seeded account with a ready-to-use bearer token
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub token: String,
}

/// Application harness backed by in-memory SQLite and a mock Duitku server.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: MockServer,
    pub customer: TestUser,
    pub admin: TestUser,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let gateway = MockServer::start().await;

        let duitku = DuitkuConfig::new(
            MERCHANT_CODE,
            API_KEY,
            format!("{}{}", gateway.uri(), INVOICE_PATH),
            "https://shop.example.com/api/v1/duitku/callback",
            "https://shop.example.com/orders",
        );
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_secret_key_for_integration_tests_only_0123456789".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            duitku,
        );
        cfg.checkout_rate_limit.burst = 1_000;
        adjust(&mut cfg);

        let pool = db::establish_connection_with_config(&DbConfig::from(&cfg))
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let client = DuitkuClient::new(cfg.duitku.clone()).expect("duitku client");
        let state = AppState::new(db, cfg, Arc::new(client));
        let router = app_router(state.clone());

        let customer = seed_account(&state, "Budi Santoso", "budi@example.com", UserRole::User).await;
        let admin = seed_account(&state, "Admin Toko", "admin@example.com", UserRole::Admin).await;

        Self {
            router,
            state,
            gateway,
            customer,
            admin,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    /// Request as the seeded customer
    pub async fn as_customer(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request(method, uri, body, Some(&self.customer.token))
            .await
    }

    /// Request as the seeded admin
    pub async fn as_admin(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request(method, uri, body, Some(&self.admin.token)).await
    }

    /// Posts a url-encoded form; values must not need escaping
    pub async fn post_form(&self, uri: &str, fields: &[(&str, String)]) -> Response {
        let encoded = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(encoded))
            .expect("failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Delivers a correctly signed Duitku callback
    pub async fn deliver_callback(&self, order_id: &str, amount: i64, result_code: &str) -> Response {
        let signature = callback_signature(MERCHANT_CODE, amount, order_id, API_KEY);
        self.post_form(
            "/api/v1/duitku/callback",
            &[
                ("merchantCode", MERCHANT_CODE.to_string()),
                ("amount", amount.to_string()),
                ("merchantOrderId", order_id.to_string()),
                ("resultCode", result_code.to_string()),
                ("reference", "DS0001REF".to_string()),
                ("signature", signature),
            ],
        )
        .await
    }

    /// Makes the mock gateway accept every invoice with `reference`
    pub async fn gateway_accepts(&self, reference: &str) {
        Mock::given(method("POST"))
            .and(path(INVOICE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "merchantCode": MERCHANT_CODE,
                "reference": reference,
                "paymentUrl": format!("https://sandbox.duitku.com/pay/{}", reference),
                "statusCode": "00",
                "statusMessage": "SUCCESS",
            })))
            .mount(&self.gateway)
            .await;
    }

    /// Makes the mock gateway reject every invoice
    pub async fn gateway_rejects(&self) {
        Mock::given(method("POST"))
            .and(path(INVOICE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "statusCode": "01",
                "statusMessage": "Minimum Payment 10000 IDR",
            })))
            .mount(&self.gateway)
            .await;
    }

    pub async fn seed_product(&self, name: &str, price: i64) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            description: Set(None),
            image_url: Set(None),
            category_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Adds `quantity` of `product` to the seeded customer's cart
    pub async fn add_to_cart(&self, product: &product::Model, quantity: i32) {
        let response = self
            .as_customer(
                Method::POST,
                "/api/v1/cart/items",
                Some(json!({ "product_id": product.id, "quantity": quantity })),
            )
            .await;
        assert!(
            response.status().is_success(),
            "add to cart failed: {}",
            response.status()
        );
    }
}

async fn seed_account(state: &AppState, name: &str, email: &str, role: UserRole) -> TestUser {
    let now = Utc::now();
    let user = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        email: Set(email.to_string()),
        password_hash: Set(hash_password(PASSWORD).expect("hash password")),
        role: Set(role),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*state.db)
    .await
    .expect("seed user");

    let token = state
        .auth
        .generate_token(user.id, &user.email, role.as_str())
        .expect("issue token");

    TestUser {
        id: user.id,
        email: user.email,
        token,
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn response_text(response: Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}
