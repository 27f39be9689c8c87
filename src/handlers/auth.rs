use crate::{
    errors::ApiError,
    handlers::common::{created_response, map_service_error, success_response, validate_input},
    services::commerce::customer_service::{AuthTokenResponse, SignInInput, SignUpInput},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::Response,
    routing::post,
    Router,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/api/v1/auth/sign-up",
    request_body = SignUpInput,
    responses(
        (status = 201, description = "Account created", body = AuthTokenResponse),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email already registered", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let response = state
        .services
        .customer
        .sign_up(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(response))
}

/// Exchange credentials for a bearer token
#[utoipa::path(
    post,
    path = "/api/v1/auth/sign-in",
    request_body = SignInInput,
    responses(
        (status = 200, description = "Signed in", body = AuthTokenResponse),
        (status = 401, description = "Invalid email or password", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let response = state
        .services
        .customer
        .sign_in(payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(response))
}
