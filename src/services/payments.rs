//! Reconciliation of Duitku payment callbacks against stored orders.
//!
//! Callbacks are delivered at least once. Every rejection here must surface
//! as a non-success response so the gateway redelivers; only a processed (or
//! deliberately ignored) callback is acknowledged.

use crate::{
    config::DuitkuConfig,
    entities::{
        order::{self, OrderStatus},
        Order, OrderModel,
    },
    errors::ServiceError,
    payments::{signature::verify_callback_signature, ResultCode},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A callback whose fields have been parsed but not yet verified
#[derive(Debug, Clone)]
pub struct PaymentCallback {
    pub merchant_code: String,
    pub amount: i64,
    pub merchant_order_id: String,
    pub product_detail: Option<String>,
    pub result_code: String,
    pub reference: Option<String>,
    pub signature: String,
}

/// What a verified callback did to its order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The status (and possibly the missing reference) was written
    Updated {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    /// Nothing to change; repeated deliveries end up here
    Unchanged { order_id: Uuid, status: OrderStatus },
    /// The order is already settled and keeps its status
    TerminalKept {
        order_id: Uuid,
        status: OrderStatus,
        attempted: OrderStatus,
    },
}

#[derive(Clone)]
pub struct PaymentCallbackService {
    db: Arc<DatabaseConnection>,
    api_key: String,
}

impl PaymentCallbackService {
    pub fn new(db: Arc<DatabaseConnection>, duitku: &DuitkuConfig) -> Self {
        Self {
            db,
            api_key: duitku.api_key.clone(),
        }
    }

    /// Verifies a callback and applies its result to the order.
    ///
    /// `Paid` and `Failed` are final: a later callback that disagrees is
    /// acknowledged but ignored.
    #[instrument(
        skip(self, callback),
        fields(
            merchant_order_id = %callback.merchant_order_id,
            result_code = %callback.result_code
        )
    )]
    pub async fn handle_callback(
        &self,
        callback: PaymentCallback,
    ) -> Result<CallbackOutcome, ServiceError> {
        if !verify_callback_signature(
            &callback.merchant_code,
            callback.amount,
            &callback.merchant_order_id,
            &self.api_key,
            &callback.signature,
        ) {
            counter!("duitku_shop.callback", 1, "outcome" => "invalid_signature");
            warn!("callback rejected: signature mismatch");
            return Err(ServiceError::InvalidSignature);
        }

        let order = self.find_order(&callback.merchant_order_id).await?;

        if callback.amount != order.total_price {
            counter!("duitku_shop.callback", 1, "outcome" => "amount_mismatch");
            warn!(
                order_id = %order.id,
                expected = order.total_price,
                received = callback.amount,
                "callback rejected: amount mismatch"
            );
            return Err(ServiceError::AmountMismatch {
                expected: order.total_price,
                received: callback.amount,
            });
        }

        let target = ResultCode::parse(&callback.result_code).target_status();
        let reference = callback
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        let outcome = self.apply(&order, target, reference).await?;

        match &outcome {
            CallbackOutcome::Updated { order_id, from, to } => {
                counter!("duitku_shop.callback", 1, "outcome" => "updated");
                info!(order_id = %order_id, from = %from, to = %to, "order status updated");
            }
            CallbackOutcome::Unchanged { order_id, status } => {
                counter!("duitku_shop.callback", 1, "outcome" => "unchanged");
                info!(order_id = %order_id, status = %status, "callback left order unchanged");
            }
            CallbackOutcome::TerminalKept {
                order_id,
                status,
                attempted,
            } => {
                counter!("duitku_shop.callback", 1, "outcome" => "terminal_kept");
                warn!(
                    order_id = %order_id,
                    status = %status,
                    attempted = %attempted,
                    "callback tried to change a settled order; ignored"
                );
            }
        }

        Ok(outcome)
    }

    async fn find_order(&self, merchant_order_id: &str) -> Result<OrderModel, ServiceError> {
        let order_id = Uuid::parse_str(merchant_order_id.trim()).map_err(|_| {
            counter!("duitku_shop.callback", 1, "outcome" => "order_not_found");
            warn!("callback rejected: merchant order id is not an order id");
            ServiceError::OrderNotFound
        })?;

        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                counter!("duitku_shop.callback", 1, "outcome" => "order_not_found");
                warn!(order_id = %order_id, "callback rejected: unknown order");
                ServiceError::OrderNotFound
            })
    }

    /// Writes `target` only if it differs from the stored status.
    ///
    /// The update is conditional on the status read earlier, so two
    /// concurrent deliveries cannot both move the order.
    async fn apply(
        &self,
        order: &OrderModel,
        target: OrderStatus,
        reference: Option<&str>,
    ) -> Result<CallbackOutcome, ServiceError> {
        let status_changes = target != order.status;
        if status_changes && order.status.is_terminal() {
            return Ok(CallbackOutcome::TerminalKept {
                order_id: order.id,
                status: order.status,
                attempted: target,
            });
        }

        // Recovers a reference that checkout failed to store
        let fill_reference = match (order.duitku_reference.as_deref(), reference) {
            (None, Some(reference)) => Some(reference.to_string()),
            _ => None,
        };

        if !status_changes && fill_reference.is_none() {
            return Ok(CallbackOutcome::Unchanged {
                order_id: order.id,
                status: order.status,
            });
        }

        let mut update = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(target))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(reference) = fill_reference {
            info!(order_id = %order.id, reference = %reference, "storing payment reference from callback");
            update = update.col_expr(order::Column::DuitkuReference, Expr::value(Some(reference)));
        }

        let result = update
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(order.status))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                counter!("duitku_shop.callback", 1, "outcome" => "status_update_failed");
                warn!(order_id = %order.id, error = %e, "order status update failed");
                ServiceError::StatusUpdateFailed(e)
            })?;

        if result.rows_affected == 0 {
            // Another delivery moved the order in between; report what is stored now
            let current = Order::find_by_id(order.id)
                .one(&*self.db)
                .await?
                .ok_or(ServiceError::OrderNotFound)?;
            return Ok(if current.status == target {
                CallbackOutcome::Unchanged {
                    order_id: current.id,
                    status: current.status,
                }
            } else {
                CallbackOutcome::TerminalKept {
                    order_id: current.id,
                    status: current.status,
                    attempted: target,
                }
            });
        }

        if status_changes {
            Ok(CallbackOutcome::Updated {
                order_id: order.id,
                from: order.status,
                to: target,
            })
        } else {
            Ok(CallbackOutcome::Unchanged {
                order_id: order.id,
                status: order.status,
            })
        }
    }
}
