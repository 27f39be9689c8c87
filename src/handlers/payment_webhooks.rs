use crate::{
    errors::{ApiError, ServiceError},
    handlers::common::map_service_error,
    services::payments::PaymentCallback,
    AppState,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Form, Router,
};
use serde::Deserialize;
use tracing::warn;
use utoipa::ToSchema;

pub const CALLBACK_ACK: &str = "Callback received and processed";

/// Form body Duitku posts to the callback URL.
///
/// Every field is taken as text; `amount` is parsed afterwards so a malformed
/// value gets a proper error response instead of a form rejection.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DuitkuCallbackForm {
    pub merchant_code: String,
    pub amount: String,
    pub merchant_order_id: String,
    pub product_detail: Option<String>,
    pub result_code: String,
    pub reference: Option<String>,
    pub signature: String,
}

impl TryFrom<DuitkuCallbackForm> for PaymentCallback {
    type Error = ServiceError;

    fn try_from(form: DuitkuCallbackForm) -> Result<Self, Self::Error> {
        let amount = form.amount.trim().parse::<i64>().map_err(|_| {
            ServiceError::BadRequest(format!("amount is not an integer: {:?}", form.amount))
        })?;

        Ok(PaymentCallback {
            merchant_code: form.merchant_code,
            amount,
            merchant_order_id: form.merchant_order_id,
            product_detail: form.product_detail,
            result_code: form.result_code,
            reference: form.reference,
            signature: form.signature,
        })
    }
}

pub fn payment_webhook_routes() -> Router<AppState> {
    Router::new().route("/duitku/callback", post(duitku_callback))
}

/// Payment notification from Duitku.
///
/// Anything but a 200 makes the gateway deliver the callback again.
#[utoipa::path(
    post,
    path = "/api/v1/duitku/callback",
    request_body(content = DuitkuCallbackForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Callback acknowledged", body = String),
        (status = 400, description = "Malformed amount or amount mismatch", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 500, description = "Status could not be stored", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn duitku_callback(
    State(state): State<AppState>,
    Form(form): Form<DuitkuCallbackForm>,
) -> Result<Response, ApiError> {
    let callback = PaymentCallback::try_from(form).map_err(|e| {
        warn!(error = %e, "callback rejected: malformed payload");
        map_service_error(e)
    })?;

    state
        .services
        .payment_callback
        .handle_callback(callback)
        .await
        .map_err(map_service_error)?;

    Ok((StatusCode::OK, CALLBACK_ACK).into_response())
}
