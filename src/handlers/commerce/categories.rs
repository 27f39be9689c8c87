use crate::{
    auth::AuthRouterExt,
    errors::ApiError,
    handlers::common::{
        created_response, map_service_error, no_content_response, success_response,
        validate_input,
    },
    services::commerce::product_catalog_service::{CategoryView, CreateCategoryInput},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use uuid::Uuid;

pub fn categories_routes() -> Router<AppState> {
    Router::new().route("/categories", get(list_categories))
}

pub fn admin_categories_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/categories", post(create_category))
        .route("/admin/categories/:id", delete(delete_category))
        .with_role("admin")
}

#[utoipa::path(
    get,
    path = "/api/v1/categories",
    responses((status = 200, description = "All categories", body = [CategoryView])),
    tag = "catalog"
)]
pub async fn list_categories(State(state): State<AppState>) -> Result<Response, ApiError> {
    let categories = state
        .services
        .product_catalog
        .list_categories()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(categories))
}

/// Answers 201 when the category is new and 200 when it already existed
#[utoipa::path(
    post,
    path = "/api/v1/admin/categories",
    request_body = CreateCategoryInput,
    responses(
        (status = 201, description = "Category created", body = CategoryView),
        (status = 200, description = "Category already existed", body = CategoryView),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn create_category(
    State(state): State<AppState>,
    Json(payload): Json<CreateCategoryInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let (category, created) = state
        .services
        .product_catalog
        .create_category(payload)
        .await
        .map_err(map_service_error)?;

    Ok(if created {
        created_response(category)
    } else {
        success_response(category)
    })
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category id")),
    responses((status = 204, description = "Category deleted")),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state
        .services
        .product_catalog
        .delete_category(id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
