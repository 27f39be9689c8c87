use async_trait::async_trait;
use metrics::counter;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{
    compute_totals, signature, CustomerContact, GatewayError, Invoice, InvoiceLine,
    PaymentGateway,
};
use crate::config::DuitkuConfig;
use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;

const SUCCESS_STATUS_CODE: &str = "00";
const MAX_VA_NAME_LEN: usize = 20;

/// Invoice creation payload, as the gateway expects it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateInvoiceRequest<'a> {
    payment_amount: i64,
    merchant_order_id: String,
    product_details: String,
    email: &'a str,
    phone_number: &'a str,
    customer_va_name: String,
    item_details: &'a [InvoiceLine],
    callback_url: &'a str,
    return_url: &'a str,
    expiry_period: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreateInvoiceResponse {
    merchant_code: String,
    reference: String,
    payment_url: String,
    status_code: String,
    status_message: String,
}

/// HTTP client for the Duitku invoice API
#[derive(Clone)]
pub struct DuitkuClient {
    http: reqwest::Client,
    config: DuitkuConfig,
}

impl DuitkuClient {
    pub fn new(config: DuitkuConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self { http, config })
    }

    fn build_request<'a>(
        &'a self,
        order: &OrderModel,
        lines: &'a [InvoiceLine],
        customer: &'a CustomerContact,
    ) -> CreateInvoiceRequest<'a> {
        CreateInvoiceRequest {
            payment_amount: order.total_price,
            merchant_order_id: order.id.to_string(),
            product_details: format!("Payment for order #{}", order.id),
            email: &customer.email,
            phone_number: &customer.phone_number,
            customer_va_name: customer.name.chars().take(MAX_VA_NAME_LEN).collect(),
            item_details: lines,
            callback_url: &self.config.callback_url,
            return_url: &self.config.return_url,
            expiry_period: self.config.expiry_period_minutes,
        }
    }

    fn rejected_from_error_body(status: StatusCode, body: &str) -> GatewayError {
        match serde_json::from_str::<CreateInvoiceResponse>(body) {
            Ok(parsed) if !parsed.status_message.is_empty() => GatewayError::GatewayRejected {
                code: if parsed.status_code.is_empty() {
                    status.as_u16().to_string()
                } else {
                    parsed.status_code
                },
                message: parsed.status_message,
            },
            _ => GatewayError::GatewayRejected {
                code: status.as_u16().to_string(),
                message: body.to_string(),
            },
        }
    }
}

#[async_trait]
impl PaymentGateway for DuitkuClient {
    #[instrument(skip(self, lines, customer), fields(order_id = %order.id))]
    async fn create_invoice(
        &self,
        order: &OrderModel,
        lines: &[InvoiceLine],
        customer: &CustomerContact,
    ) -> Result<Invoice, GatewayError> {
        let computed_total = compute_totals(lines).map(|t| t.total_price).unwrap_or(-1);
        if computed_total != order.total_price {
            counter!("duitku_shop.gateway.invoice", 1, "outcome" => "consistency_error");
            return Err(GatewayError::ConsistencyError {
                order_total: order.total_price,
                computed_total,
            });
        }

        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = signature::invoice_signature(
            &self.config.merchant_code,
            &timestamp,
            &self.config.api_key,
        );
        let payload = self.build_request(order, lines, customer);

        let response = self
            .http
            .post(&self.config.endpoint)
            .header(header::ACCEPT, "application/json")
            .header("x-duitku-signature", signature)
            .header("x-duitku-timestamp", &timestamp)
            .header("x-duitku-merchantcode", &self.config.merchant_code)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                counter!("duitku_shop.gateway.invoice", 1, "outcome" => "unreachable");
                warn!(error = %e, "invoice request did not complete");
                GatewayError::GatewayUnreachable(e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            counter!("duitku_shop.gateway.invoice", 1, "outcome" => "unreachable");
            GatewayError::GatewayUnreachable(format!("reading response body: {}", e))
        })?;

        if status != StatusCode::OK {
            counter!("duitku_shop.gateway.invoice", 1, "outcome" => "rejected");
            warn!(http_status = status.as_u16(), "invoice request rejected");
            return Err(Self::rejected_from_error_body(status, &body));
        }

        let parsed: CreateInvoiceResponse = serde_json::from_str(&body).map_err(|e| {
            counter!("duitku_shop.gateway.invoice", 1, "outcome" => "rejected");
            GatewayError::GatewayRejected {
                code: status.as_u16().to_string(),
                message: format!("unreadable invoice response: {}", e),
            }
        })?;

        if parsed.status_code != SUCCESS_STATUS_CODE {
            counter!("duitku_shop.gateway.invoice", 1, "outcome" => "rejected");
            warn!(status_code = %parsed.status_code, "gateway declined invoice");
            return Err(GatewayError::GatewayRejected {
                code: parsed.status_code,
                message: parsed.status_message,
            });
        }

        if parsed.reference.is_empty() || parsed.payment_url.is_empty() {
            counter!("duitku_shop.gateway.invoice", 1, "outcome" => "rejected");
            return Err(GatewayError::GatewayRejected {
                code: parsed.status_code,
                message: "invoice response is missing reference or payment url".to_string(),
            });
        }

        counter!("duitku_shop.gateway.invoice", 1, "outcome" => "created");
        info!(
            reference = %parsed.reference,
            merchant_code = %parsed.merchant_code,
            "invoice created"
        );

        Ok(Invoice {
            reference: parsed.reference,
            payment_url: parsed.payment_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::OrderStatus;
    use assert_matches::assert_matches;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header as header_is, method, path};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    const MERCHANT: &str = "DS0001";
    const API_KEY: &str = "merchant-secret";

    /// Checks the signature header against the timestamp header it was sent with
    struct SignedWith(&'static str, &'static str);

    impl Match for SignedWith {
        fn matches(&self, request: &Request) -> bool {
            let get = |name: &str| {
                request
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            match (get("x-duitku-timestamp"), get("x-duitku-signature")) {
                (Some(ts), Some(sig)) => sig == signature::invoice_signature(self.0, &ts, self.1),
                _ => false,
            }
        }
    }

    fn client(server: &MockServer) -> DuitkuClient {
        let mut cfg = DuitkuConfig::new(
            MERCHANT,
            API_KEY,
            format!("{}/api/merchant/createInvoice", server.uri()),
            "https://shop.example.com/api/v1/duitku/callback",
            "https://shop.example.com/orders",
        );
        cfg.timeout_secs = 1;
        DuitkuClient::new(cfg).unwrap()
    }

    fn order(total: i64) -> OrderModel {
        let now = chrono::Utc::now();
        OrderModel {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total_price: total,
            quantity: 3,
            status: OrderStatus::Pending,
            duitku_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn lines() -> Vec<InvoiceLine> {
        vec![
            InvoiceLine {
                name: "Product A".into(),
                price: 10_000,
                quantity: 2,
            },
            InvoiceLine {
                name: "Product B".into(),
                price: 5_000,
                quantity: 1,
            },
        ]
    }

    fn customer() -> CustomerContact {
        CustomerContact {
            name: "A customer with a very long display name".into(),
            email: "buyer@example.com".into(),
            phone_number: "08123456789".into(),
        }
    }

    #[tokio::test]
    async fn successful_invoice_returns_reference_and_url() {
        let server = MockServer::start().await;
        let order = order(25_000);

        Mock::given(method("POST"))
            .and(path("/api/merchant/createInvoice"))
            .and(header_is("x-duitku-merchantcode", MERCHANT))
            .and(SignedWith(MERCHANT, API_KEY))
            .and(body_partial_json(json!({
                "paymentAmount": 25000,
                "merchantOrderId": order.id.to_string(),
                "email": "buyer@example.com",
                "phoneNumber": "08123456789",
                "customerVaName": "A customer with a ve",
                "expiryPeriod": 30,
                "itemDetails": [
                    {"name": "Product A", "price": 10000, "quantity": 2},
                    {"name": "Product B", "price": 5000, "quantity": 1}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "merchantCode": MERCHANT,
                "reference": "INV123",
                "paymentUrl": "https://pay.example.com/INV123",
                "statusCode": "00",
                "statusMessage": "SUCCESS"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let invoice = client(&server)
            .create_invoice(&order, &lines(), &customer())
            .await
            .unwrap();

        assert_eq!(invoice.reference, "INV123");
        assert_eq!(invoice.payment_url, "https://pay.example.com/INV123");
    }

    #[tokio::test]
    async fn mismatched_total_never_reaches_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = client(&server)
            .create_invoice(&order(24_999), &lines(), &customer())
            .await;

        assert_matches!(
            result,
            Err(GatewayError::ConsistencyError {
                order_total: 24_999,
                computed_total: 25_000
            })
        );
    }

    #[tokio::test]
    async fn non_success_status_code_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "statusCode": "01",
                "statusMessage": "Merchant not active"
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .create_invoice(&order(25_000), &lines(), &customer())
            .await;

        assert_matches!(
            result,
            Err(GatewayError::GatewayRejected { code, message })
                if code == "01" && message == "Merchant not active"
        );
    }

    #[tokio::test]
    async fn structured_http_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "statusMessage": "Wrong signature"
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .create_invoice(&order(25_000), &lines(), &customer())
            .await;

        assert_matches!(
            result,
            Err(GatewayError::GatewayRejected { code, message })
                if code == "400" && message == "Wrong signature"
        );
    }

    #[tokio::test]
    async fn unstructured_http_error_keeps_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let result = client(&server)
            .create_invoice(&order(25_000), &lines(), &customer())
            .await;

        assert_matches!(
            result,
            Err(GatewayError::GatewayRejected { code, message })
                if code == "502" && message == "upstream down"
        );
    }

    #[tokio::test]
    async fn slow_gateway_times_out_as_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(json!({"statusCode": "00"})),
            )
            .mount(&server)
            .await;

        let result = client(&server)
            .create_invoice(&order(25_000), &lines(), &customer())
            .await;

        assert_matches!(result, Err(GatewayError::GatewayUnreachable(_)));
    }
}
