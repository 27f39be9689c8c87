use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ApiError,
    handlers::common::{map_service_error, success_response},
    rate_limiter::{rate_limit_middleware, RateLimiter},
    services::commerce::CheckoutResponse,
    AppState,
};
use axum::{extract::State, response::Response, routing::post, Router};

/// Checkout sits behind the per-client rate limiter as well as auth.
pub fn checkout_routes(rate_limiter: RateLimiter) -> Router<AppState> {
    Router::new()
        .route("/orders/checkout", post(checkout))
        .with_auth()
        .layer(axum::middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
}

/// Check out the caller's active cart and open a Duitku payment
#[utoipa::path(
    post,
    path = "/api/v1/orders/checkout",
    responses(
        (status = 200, description = "Order created and payment initiated", body = CheckoutResponse),
        (status = 400, description = "Cart is empty", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
        (status = 500, description = "Order or payment could not be created", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn checkout(
    State(state): State<AppState>,
    caller: Option<AuthUser>,
) -> Result<Response, ApiError> {
    let response = state
        .services
        .checkout
        .checkout_to_completion(caller.map(|user| user.user_id))
        .await
        .map_err(map_service_error)?;
    Ok(success_response(response))
}
