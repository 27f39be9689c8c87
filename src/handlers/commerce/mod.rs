/// Commerce API handlers module
pub mod carts;
pub mod categories;
pub mod checkout;
pub mod orders;
pub mod products;

// Re-export route builders
pub use carts::carts_routes;
pub use categories::{admin_categories_routes, categories_routes};
pub use checkout::checkout_routes;
pub use orders::orders_routes;
pub use products::{admin_products_routes, products_routes};
