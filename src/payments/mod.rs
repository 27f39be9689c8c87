//! Payment gateway integration.
//!
//! [`PaymentGateway`] is the seam the checkout orchestrator talks to;
//! [`duitku::DuitkuClient`] is the production implementation and
//! [`signature`] holds both keyed-hash schemes of the Duitku protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::order::{Model as OrderModel, OrderStatus};

pub mod duitku;
pub mod signature;

pub use duitku::DuitkuClient;

/// One invoice line, priced from the cart snapshot taken at checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub name: String,
    pub price: i64,
    pub quantity: i32,
}

/// Total price and total quantity of a set of lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub total_price: i64,
    pub quantity: i32,
}

/// Sum of `price * quantity` and of `quantity` over `lines`.
///
/// Returns `None` if either sum overflows.
pub fn compute_totals(lines: &[InvoiceLine]) -> Option<Totals> {
    lines.iter().try_fold(
        Totals {
            total_price: 0,
            quantity: 0,
        },
        |acc, line| {
            let line_total = line.price.checked_mul(i64::from(line.quantity))?;
            Some(Totals {
                total_price: acc.total_price.checked_add(line_total)?,
                quantity: acc.quantity.checked_add(line.quantity)?,
            })
        },
    )
}

/// Customer details sent along with the invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    pub phone_number: String,
}

/// A successfully created invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub reference: String,
    pub payment_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The order total disagrees with the lines it is being invoiced for.
    /// Raised before any request leaves the process.
    #[error("order total {order_total} does not match recomputed cart total {computed_total}")]
    ConsistencyError {
        order_total: i64,
        computed_total: i64,
    },

    #[error("payment gateway unreachable: {0}")]
    GatewayUnreachable(String),

    #[error("payment gateway rejected the invoice (code {code}): {message}")]
    GatewayRejected { code: String, message: String },
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::ConsistencyError { .. } => "CONSISTENCY_ERROR",
            GatewayError::GatewayUnreachable(_) => "GATEWAY_UNREACHABLE",
            GatewayError::GatewayRejected { .. } => "GATEWAY_REJECTED",
        }
    }
}

/// Invoice creation against an external payment processor.
///
/// Implementations must check `order.total_price` against `lines` before
/// sending anything, and must not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(
        &self,
        order: &OrderModel,
        lines: &[InvoiceLine],
        customer: &CustomerContact,
    ) -> Result<Invoice, GatewayError>;
}

/// Outcome reported by a payment callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultCode {
    /// "00"
    Success,
    /// "01"
    Failed,
    /// Anything else; payment still unresolved
    Other(String),
}

impl ResultCode {
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "00" => ResultCode::Success,
            "01" => ResultCode::Failed,
            other => ResultCode::Other(other.to_string()),
        }
    }

    pub fn target_status(&self) -> OrderStatus {
        match self {
            ResultCode::Success => OrderStatus::Paid,
            ResultCode::Failed => OrderStatus::Failed,
            ResultCode::Other(_) => OrderStatus::Pending,
        }
    }
}
