use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ApiError,
    handlers::common::{
        created_response, map_service_error, no_content_response, success_response,
        validate_input,
    },
    services::commerce::customer_service::{
        AddressInput, AddressView, UpdateProfileInput, UserProfile, UserSummary,
    },
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{get, put},
    Router,
};
use uuid::Uuid;

/// Routes acting on the caller's own account
pub fn users_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me).put(update_me).delete(delete_me))
        .route(
            "/users/me/addresses",
            get(list_addresses).post(create_address),
        )
        .route(
            "/users/me/addresses/:id",
            put(update_address).delete(delete_address),
        )
        .with_auth()
}

pub fn admin_users_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .with_role("admin")
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Caller profile", body = UserProfile),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    let profile = state
        .services
        .customer
        .get_profile(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(profile))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/me",
    request_body = UpdateProfileInput,
    responses(
        (status = 200, description = "Profile updated", body = UserSummary),
        (status = 409, description = "Email already registered", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UpdateProfileInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let updated = state
        .services
        .customer
        .update_profile(user.user_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(updated))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/me",
    responses((status = 204, description = "Account deleted")),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn delete_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    state
        .services
        .customer
        .delete_account(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me/addresses",
    responses((status = 200, description = "Caller addresses", body = [AddressView])),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn list_addresses(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    let addresses = state
        .services
        .customer
        .list_addresses(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(addresses))
}

#[utoipa::path(
    post,
    path = "/api/v1/users/me/addresses",
    request_body = AddressInput,
    responses((status = 201, description = "Address created", body = AddressView)),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn create_address(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddressInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let address = state
        .services
        .customer
        .create_address(user.user_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(address))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/me/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    request_body = AddressInput,
    responses(
        (status = 200, description = "Address updated", body = AddressView),
        (status = 404, description = "Not one of the caller's addresses", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn update_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddressInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let address = state
        .services
        .customer
        .update_address(user.user_id, id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(address))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/me/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    responses((status = 204, description = "Address deleted")),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn delete_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state
        .services
        .customer
        .delete_address(user.user_id, id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    responses(
        (status = 200, description = "All users", body = [UserSummary]),
        (status = 403, description = "Admin role required"),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_users(State(state): State<AppState>) -> Result<Response, ApiError> {
    let users = state
        .services
        .customer
        .list_users()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(users))
}
