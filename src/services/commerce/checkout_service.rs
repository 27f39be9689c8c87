use crate::{
    db::with_transaction,
    entities::{
        commerce::{cart, Cart},
        order::{self, OrderStatus},
        Order, OrderModel, User,
    },
    errors::ServiceError,
    payments::{CustomerContact, GatewayError, InvoiceLine, PaymentGateway, Totals},
    tracing::{current_request_id, log_slow_request, scope_request_id},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    cart_service::{load_active_cart, load_cart_lines, CartSnapshot},
    customer_service::latest_phone_number,
};

const SLOW_GATEWAY_CALL: Duration = Duration::from_secs(5);

/// Result of a successful checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub total_price: i64,
    pub reference: String,
    pub payment_url: String,
}

/// Turns the caller's active cart into a pending order and opens a payment
/// for it with the gateway.
///
/// Order creation and cart linking commit together. A gateway failure after
/// that point is compensated by deleting the order and unlinking the cart in
/// a single transaction, so the cart can be checked out again. Nothing is
/// retried.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { db, gateway }
    }

    /// Runs [`Self::checkout`] on its own task.
    ///
    /// If the HTTP request is dropped the task still finishes, so a client
    /// disconnect never leaves a checkout between its steps.
    pub async fn checkout_to_completion(
        &self,
        caller: Option<Uuid>,
    ) -> Result<CheckoutResponse, ServiceError> {
        let service = self.clone();
        let request_id = current_request_id();
        let span = tracing::Span::current();

        let task = tokio::spawn(
            async move {
                match request_id {
                    Some(id) => scope_request_id(id, service.checkout(caller)).await,
                    None => service.checkout(caller).await,
                }
            }
            .instrument(span),
        );

        task.await
            .map_err(|e| ServiceError::InternalError(format!("checkout task failed: {}", e)))?
    }

    /// Checks out the caller's active cart.
    ///
    /// # Errors
    ///
    /// * `Unauthenticated` - no caller
    /// * `UserNotFound` - the caller id does not resolve to a user
    /// * `EmptyCart` - no active cart, no items, or another checkout linked the cart first
    /// * `CheckoutTransactionFailed` - creating the order or linking the cart failed; nothing persisted
    /// * `PaymentInitiationFailed` - the gateway failed and the order was rolled back
    /// * `CompensationFailed` - the gateway failed and the rollback failed too
    /// * `ReferencePersistFailed` - the invoice exists but its reference is not stored
    #[instrument(skip(self))]
    pub async fn checkout(&self, caller: Option<Uuid>) -> Result<CheckoutResponse, ServiceError> {
        let user_id = caller.ok_or(ServiceError::Unauthenticated)?;

        let user = User::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        let snapshot = match load_active_cart(&*self.db, user.id).await? {
            Some(snapshot) if !snapshot.is_empty() => snapshot,
            _ => return Err(ServiceError::EmptyCart),
        };

        let totals = snapshot
            .totals()
            .ok_or_else(|| ServiceError::ValidationError("cart total is out of range".into()))?;

        let (order, lines) = match self.create_order(user.id, &snapshot, totals).await {
            Ok(Some(created)) => created,
            Ok(None) => {
                info!(cart_id = %snapshot.cart.id, "cart was linked by a concurrent checkout");
                return Err(ServiceError::EmptyCart);
            }
            Err(e) => {
                counter!("duitku_shop.checkout", 1, "outcome" => "transaction_failed");
                error!(user_id = %user.id, error = %e, "checkout transaction failed");
                return Err(ServiceError::CheckoutTransactionFailed(e));
            }
        };

        info!(
            order_id = %order.id,
            cart_id = %snapshot.cart.id,
            total_price = order.total_price,
            quantity = order.quantity,
            "order created"
        );

        let customer = CustomerContact {
            name: user.name.clone(),
            email: user.email.clone(),
            phone_number: latest_phone_number(&*self.db, user.id)
                .await
                .unwrap_or_else(|e| {
                    warn!(user_id = %user.id, error = %e, "could not load phone number");
                    None
                })
                .unwrap_or_default(),
        };

        let started = Instant::now();
        let invoice_result = self.gateway.create_invoice(&order, &lines, &customer).await;
        log_slow_request("duitku.create_invoice", started.elapsed(), SLOW_GATEWAY_CALL);

        let invoice = match invoice_result {
            Ok(invoice) => invoice,
            Err(gateway_error) => {
                return Err(self
                    .compensate(&order, snapshot.cart.id, gateway_error)
                    .await);
            }
        };

        let persisted = Order::update_many()
            .col_expr(
                order::Column::DuitkuReference,
                Expr::value(Some(invoice.reference.clone())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .exec(&*self.db)
            .await;

        match persisted {
            Ok(result) if result.rows_affected == 1 => {}
            Ok(_) => {
                counter!("duitku_shop.checkout", 1, "outcome" => "reference_persist_failed");
                error!(
                    alert = true,
                    order_id = %order.id,
                    reference = %invoice.reference,
                    "order disappeared before its payment reference was stored"
                );
                return Err(ServiceError::ReferencePersistFailed {
                    order_id: order.id,
                    reference: invoice.reference,
                });
            }
            Err(e) => {
                counter!("duitku_shop.checkout", 1, "outcome" => "reference_persist_failed");
                error!(
                    alert = true,
                    order_id = %order.id,
                    reference = %invoice.reference,
                    error = %e,
                    "payment reference could not be stored"
                );
                return Err(ServiceError::ReferencePersistFailed {
                    order_id: order.id,
                    reference: invoice.reference,
                });
            }
        }

        counter!("duitku_shop.checkout", 1, "outcome" => "success");
        info!(order_id = %order.id, reference = %invoice.reference, "payment initiated");

        Ok(CheckoutResponse {
            order_id: order.id,
            total_price: order.total_price,
            reference: invoice.reference,
            payment_url: invoice.payment_url,
        })
    }

    /// Inserts the order and links the cart to it in one transaction.
    ///
    /// The link is a conditional update on `order_id IS NULL`; if another
    /// checkout got there first nothing is written and `None` is returned.
    /// The lines handed back are re-read inside the transaction, so they are
    /// exactly what the order was linked to.
    async fn create_order(
        &self,
        user_id: Uuid,
        snapshot: &CartSnapshot,
        totals: Totals,
    ) -> Result<Option<(OrderModel, Vec<InvoiceLine>)>, DbErr> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            total_price: Set(totals.total_price),
            quantity: Set(totals.quantity),
            status: Set(OrderStatus::Pending),
            duitku_reference: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let linked = Cart::update_many()
            .col_expr(cart::Column::OrderId, Expr::value(Some(order.id)))
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Id.eq(snapshot.cart.id))
            .filter(cart::Column::OrderId.is_null())
            .exec(&txn)
            .await?;

        if linked.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        let lines = CartSnapshot {
            cart: snapshot.cart.clone(),
            lines: load_cart_lines(&txn, snapshot.cart.id).await?,
        }
        .invoice_lines();

        txn.commit().await?;
        Ok(Some((order, lines)))
    }

    /// Undoes a committed order after the gateway failed.
    ///
    /// Returns the error to report: `PaymentInitiationFailed` when the cart is
    /// active again, `CompensationFailed` when the order is left behind.
    async fn compensate(
        &self,
        order: &OrderModel,
        cart_id: Uuid,
        gateway_error: GatewayError,
    ) -> ServiceError {
        warn!(
            order_id = %order.id,
            gateway_code = gateway_error.code(),
            error = %gateway_error,
            "payment initiation failed, rolling back order"
        );

        match self.delete_order_and_unlink(order.id, cart_id).await {
            Ok(()) => {
                counter!(
                    "duitku_shop.checkout", 1,
                    "outcome" => "payment_initiation_failed",
                    "gateway_code" => gateway_error.code()
                );
                ServiceError::PaymentInitiationFailed(gateway_error)
            }
            Err(cleanup_error) => {
                counter!("duitku_shop.checkout", 1, "outcome" => "compensation_failed");
                error!(
                    alert = true,
                    order_id = %order.id,
                    cart_id = %cart_id,
                    gateway_error = %gateway_error,
                    cleanup_error = %cleanup_error,
                    "orphaned pending order: compensation failed"
                );
                ServiceError::CompensationFailed {
                    order_id: order.id,
                    gateway_error,
                    cleanup_error: cleanup_error.to_string(),
                }
            }
        }
    }

    async fn delete_order_and_unlink(&self, order_id: Uuid, cart_id: Uuid) -> Result<(), DbErr> {
        with_transaction(&self.db, |txn| {
            Box::pin(async move {
                Cart::update_many()
                    .col_expr(cart::Column::OrderId, Expr::value(Option::<Uuid>::None))
                    .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(cart::Column::Id.eq(cart_id))
                    .filter(cart::Column::OrderId.eq(order_id))
                    .exec(txn)
                    .await?;

                Order::delete_by_id(order_id).exec(txn).await?;
                Ok(())
            })
        })
        .await
    }
}
