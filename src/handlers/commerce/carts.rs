use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ApiError,
    handlers::common::{
        created_response, map_service_error, no_content_response, success_response,
        validate_input,
    },
    services::commerce::cart_service::{
        AddToCartInput, CartItemView, CartView, UpdateCartItemInput,
    },
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart))
        .route("/cart/items", post(add_to_cart))
        .route(
            "/cart/items/:id",
            get(get_cart_item)
                .put(update_cart_item)
                .delete(remove_cart_item),
        )
        .with_auth()
}

/// Get the caller's active cart
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Active cart with subtotal", body = CartView),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    let cart = state
        .services
        .cart
        .get_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// Add a product to the active cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddToCartInput,
    responses(
        (status = 201, description = "New cart line", body = CartItemView),
        (status = 200, description = "Existing line incremented", body = CartItemView),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let (item, created) = state
        .services
        .cart
        .add_item(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(if created {
        created_response(item)
    } else {
        success_response(item)
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item id")),
    responses(
        (status = 200, description = "Cart item", body = CartItemView),
        (status = 404, description = "Not in the caller's active cart", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn get_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let item = state
        .services
        .cart
        .get_item(user.user_id, item_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(item))
}

/// Update cart item quantity
#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item id")),
    request_body = UpdateCartItemInput,
    responses(
        (status = 200, description = "Cart item updated", body = CartItemView),
        (status = 404, description = "Not in the caller's active cart", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateCartItemInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let item = state
        .services
        .cart
        .update_item(user.user_id, item_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(item))
}

/// Remove item from cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item id")),
    responses((status = 204, description = "Cart item removed")),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state
        .services
        .cart
        .remove_item(user.user_id, item_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
