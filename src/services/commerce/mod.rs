/// Commerce services module - shop business logic
pub mod cart_service;
pub mod checkout_service;
pub mod customer_service;
pub mod order_service;
pub mod product_catalog_service;

// Re-export services for convenience
pub use cart_service::{AddToCartInput, CartService, CartView, UpdateCartItemInput};
pub use checkout_service::{CheckoutResponse, CheckoutService};
pub use customer_service::CustomerService;
pub use order_service::OrderService;
pub use product_catalog_service::ProductCatalogService;
