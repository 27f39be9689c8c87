pub mod auth;
pub mod commerce;
pub mod common;
pub mod payment_webhooks;
pub mod users;

use crate::{
    auth::AuthService,
    config::DuitkuConfig,
    db::DbPool,
    payments::PaymentGateway,
    services::{
        commerce::{
            CartService, CheckoutService, CustomerService, OrderService, ProductCatalogService,
        },
        payments::PaymentCallbackService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub product_catalog: Arc<ProductCatalogService>,
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub customer: Arc<CustomerService>,
    pub order: Arc<OrderService>,
    pub payment_callback: Arc<PaymentCallbackService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        auth_service: Arc<AuthService>,
        gateway: Arc<dyn PaymentGateway>,
        duitku: &DuitkuConfig,
    ) -> Self {
        Self {
            product_catalog: Arc::new(ProductCatalogService::new(db_pool.clone())),
            cart: Arc::new(CartService::new(db_pool.clone())),
            checkout: Arc::new(CheckoutService::new(db_pool.clone(), gateway)),
            customer: Arc::new(CustomerService::new(db_pool.clone(), auth_service)),
            order: Arc::new(OrderService::new(db_pool.clone())),
            payment_callback: Arc::new(PaymentCallbackService::new(db_pool, duitku)),
        }
    }
}
