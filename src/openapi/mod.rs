use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Duitku Shop API",
        version = "0.1.0",
        description = r#"
# Duitku Shop API

Catalog, cart and checkout for a small shop, with payments through Duitku.

## Authentication

Sign up or sign in to obtain a JWT and send it on every protected call:

```
Authorization: Bearer <your-jwt-token>
```

## Checkout and payment

`POST /api/v1/orders/checkout` turns the active cart into a `Pending` order and
returns the Duitku `paymentUrl`. Duitku later reports the payment outcome to
`POST /api/v1/duitku/callback`, which moves the order to `Paid` or `Failed`.

## Errors

```json
{
  "error": "Bad Request",
  "code": "EMPTY_CART",
  "message": "Cart is empty",
  "request_id": "2f0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "auth", description = "Sign up and sign in"),
        (name = "users", description = "Profile and addresses"),
        (name = "catalog", description = "Products and categories"),
        (name = "cart", description = "Active cart"),
        (name = "orders", description = "Checkout and order history"),
        (name = "payments", description = "Payment gateway callbacks"),
        (name = "admin", description = "Administrative endpoints")
    ),
    paths(
        crate::handlers::auth::sign_up,
        crate::handlers::auth::sign_in,

        crate::handlers::users::get_me,
        crate::handlers::users::update_me,
        crate::handlers::users::delete_me,
        crate::handlers::users::list_addresses,
        crate::handlers::users::create_address,
        crate::handlers::users::update_address,
        crate::handlers::users::delete_address,
        crate::handlers::users::list_users,

        crate::handlers::commerce::products::list_products,
        crate::handlers::commerce::products::get_product,
        crate::handlers::commerce::products::create_product,
        crate::handlers::commerce::products::update_product,
        crate::handlers::commerce::products::delete_product,
        crate::handlers::commerce::categories::list_categories,
        crate::handlers::commerce::categories::create_category,
        crate::handlers::commerce::categories::delete_category,

        crate::handlers::commerce::carts::get_cart,
        crate::handlers::commerce::carts::add_to_cart,
        crate::handlers::commerce::carts::get_cart_item,
        crate::handlers::commerce::carts::update_cart_item,
        crate::handlers::commerce::carts::remove_cart_item,

        crate::handlers::commerce::checkout::checkout,
        crate::handlers::commerce::orders::list_orders,
        crate::handlers::commerce::orders::get_order,

        crate::handlers::payment_webhooks::duitku_callback,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::entities::OrderStatus,
        )
    ),
    modifiers(&BearerSecurity)
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
