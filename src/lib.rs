//! Duitku Shop API Library
//!
//! Catalog, carts, checkout and Duitku payment reconciliation for a small
//! e-commerce backend.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod rate_limiter;
pub mod services;
pub mod tracing;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::payments::PaymentGateway;
use crate::rate_limiter::{RateLimitConfig, RateLimiter};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub auth: Arc<AuthService>,
    pub services: handlers::AppServices,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wires every service from the configuration and the chosen gateway.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(auth::AuthConfig::from_app_config(&config)));
        let services =
            handlers::AppServices::new(db.clone(), auth.clone(), gateway, &config.duitku);
        let rate_limiter = RateLimiter::new(RateLimitConfig::from(&config.checkout_rate_limit));

        Self {
            db,
            config,
            auth,
            services,
            rate_limiter,
        }
    }
}

/// Routes served under `/api/v1`
pub fn api_v1_routes(rate_limiter: RateLimiter) -> Router<AppState> {
    Router::new()
        .route("/status", get(health::version_info))
        // Accounts
        .merge(handlers::auth::auth_routes())
        .merge(handlers::users::users_routes())
        .merge(handlers::users::admin_users_routes())
        // Catalog (public reads, admin writes)
        .merge(handlers::commerce::products_routes())
        .merge(handlers::commerce::admin_products_routes())
        .merge(handlers::commerce::categories_routes())
        .merge(handlers::commerce::admin_categories_routes())
        // Cart, checkout and orders
        .merge(handlers::commerce::carts_routes())
        .merge(handlers::commerce::checkout_routes(rate_limiter))
        .merge(handlers::commerce::orders_routes())
        // Gateway callback (signature-verified, no bearer token)
        .merge(handlers::payment_webhooks::payment_webhook_routes())
}

/// Complete application router with health, docs and the HTTP middleware stack.
///
/// CORS and the request timeout are added by the binary since they depend on
/// deployment settings.
pub fn app_router(state: AppState) -> Router {
    let health_state = Arc::new(health::HealthState::new(state.db.clone()));
    let auth = state.auth.clone();

    Router::new()
        .nest("/api/v1", api_v1_routes(state.rate_limiter.clone()))
        .with_state(state)
        .merge(health::health_routes(health_state))
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        // Inject AuthService into request extensions for auth middleware
        .layer(middleware::from_fn_with_state(auth, inject_auth_service))
        // Ensure every request carries a request id for traceability
        .layer(middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
}

async fn inject_auth_service(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(auth);
    next.run(request).await
}

pub mod prelude {
    pub use crate::errors::*;
    pub use crate::payments::{compute_totals, PaymentGateway, ResultCode};
    pub use crate::services::commerce::*;
    pub use crate::services::payments::*;
    pub use crate::{app_router, AppState};
}
