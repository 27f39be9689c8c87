use crate::{
    entities::{
        commerce::{cart, Cart},
        order::{self, OrderStatus},
        Order, OrderModel,
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::cart_service::{load_cart_lines, CartItemView};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub total_price: i64,
    pub quantity: i32,
    pub status: OrderStatus,
    pub duitku_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderModel> for OrderSummary {
    fn from(model: OrderModel) -> Self {
        Self {
            id: model.id,
            total_price: model.total_price,
            quantity: model.quantity,
            status: model.status,
            duitku_reference: model.duitku_reference,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// An order with the items of the cart it was created from.
///
/// Item prices are the products' current prices; `total_price` is the
/// amount fixed at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderSummary,
    pub items: Vec<CartItemView>,
}

/// Read access to the caller's orders
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<OrderSummary>, ServiceError> {
        let orders = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(orders.into_iter().map(OrderSummary::from).collect())
    }

    /// Another user's order is reported as not found
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderDetail, ServiceError> {
        let order = Order::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let carts = Cart::find()
            .filter(cart::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        let mut items = Vec::new();
        for cart in carts {
            let lines = load_cart_lines(&*self.db, cart.id).await?;
            items.extend(lines.iter().map(CartItemView::from));
        }

        Ok(OrderDetail {
            order: order.into(),
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        payments::{Invoice, MockPaymentGateway},
        services::{
            commerce::{CheckoutService, ProductCatalogService},
            test_support::{seed_cart, seed_product, seed_user, test_db},
        },
    };
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn order_detail_lists_checked_out_items() {
        let db = test_db().await;
        let user = seed_user(&db, "orders@example.com").await;
        let stranger = seed_user(&db, "stranger@example.com").await;
        let a = seed_product(&db, "Product A", 10_000).await;
        let b = seed_product(&db, "Product B", 5_000).await;
        seed_cart(&db, user.id, &[(&a, 2), (&b, 1)]).await;

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_invoice().returning(|_, _, _| {
            Ok(Invoice {
                reference: "INV77".to_string(),
                payment_url: "https://pay.example/INV77".to_string(),
            })
        });
        let checkout = CheckoutService::new(db.clone(), Arc::new(gateway));
        let placed = checkout.checkout(Some(user.id)).await.unwrap();

        let svc = OrderService::new(db);
        let orders = svc.list_orders(user.id).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Pending);

        let detail = svc.get_order(user.id, placed.order_id).await.unwrap();
        assert_eq!(detail.items.len(), 2);
        assert_eq!(detail.order.total_price, 25_000);

        assert_matches!(
            svc.get_order(stranger.id, placed.order_id).await,
            Err(ServiceError::NotFound(_))
        );
        assert!(svc.list_orders(stranger.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ordered_products_cannot_be_deleted() {
        let db = test_db().await;
        let user = seed_user(&db, "history@example.com").await;
        let a = seed_product(&db, "Product A", 10_000).await;
        let b = seed_product(&db, "Product B", 5_000).await;
        seed_cart(&db, user.id, &[(&a, 2), (&b, 1)]).await;

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_invoice().returning(|_, _, _| {
            Ok(Invoice {
                reference: "INV88".to_string(),
                payment_url: "https://pay.example/INV88".to_string(),
            })
        });
        let placed = CheckoutService::new(db.clone(), Arc::new(gateway))
            .checkout(Some(user.id))
            .await
            .unwrap();

        let catalog = ProductCatalogService::new(db.clone());
        assert_matches!(
            catalog.delete_product(a.id).await,
            Err(ServiceError::Conflict(_))
        );
        assert!(catalog.get_product(a.id).await.is_ok());

        let detail = OrderService::new(db)
            .get_order(user.id, placed.order_id)
            .await
            .unwrap();
        assert_eq!(detail.items.len(), 2);
        let line_sum: i64 = detail.items.iter().map(|item| item.line_total).sum();
        assert_eq!(line_sum, detail.order.total_price);
    }
}
