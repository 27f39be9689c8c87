use crate::{
    entities::{
        commerce::{cart, cart_item, Cart, CartItem},
        product::{self, Entity as Product},
    },
    errors::ServiceError,
    payments::{compute_totals, InvoiceLine, Totals},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// A cart item together with the product it references
#[derive(Debug, Clone)]
pub struct CartLine {
    pub item: cart_item::Model,
    pub product: product::Model,
}

/// A cart and its lines, read at one point in time
#[derive(Debug, Clone)]
pub struct CartSnapshot {
    pub cart: cart::Model,
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines priced at the products' current prices
    pub fn invoice_lines(&self) -> Vec<InvoiceLine> {
        self.lines
            .iter()
            .map(|line| InvoiceLine {
                name: line.product.name.clone(),
                price: line.product.price,
                quantity: line.item.quantity,
            })
            .collect()
    }

    pub fn totals(&self) -> Option<Totals> {
        compute_totals(&self.invoice_lines())
    }
}

/// Loads the items of `cart_id` with their products, oldest item first.
pub async fn load_cart_lines<C>(conn: &C, cart_id: Uuid) -> Result<Vec<CartLine>, DbErr>
where
    C: ConnectionTrait,
{
    let rows = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .find_also_related(Product)
        .order_by_asc(cart_item::Column::CreatedAt)
        .order_by_asc(cart_item::Column::Id)
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(item, product)| product.map(|product| CartLine { item, product }))
        .collect())
}

/// Finds the user's active cart (`order_id IS NULL`).
///
/// Should more than one exist, the oldest one is the active cart.
pub async fn find_active_cart<C>(conn: &C, user_id: Uuid) -> Result<Option<cart::Model>, DbErr>
where
    C: ConnectionTrait,
{
    Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .filter(cart::Column::OrderId.is_null())
        .order_by_asc(cart::Column::CreatedAt)
        .order_by_asc(cart::Column::Id)
        .one(conn)
        .await
}

/// Marks `cart_id` as being edited, provided it is still active.
///
/// The update takes the same row lock as checkout's conditional link, so
/// inside a transaction either the edit lands before the cart is linked or
/// this returns `false` and nothing is written to the cart.
pub async fn claim_active_cart<C>(conn: &C, cart_id: Uuid) -> Result<bool, DbErr>
where
    C: ConnectionTrait,
{
    let claimed = Cart::update_many()
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::Id.eq(cart_id))
        .filter(cart::Column::OrderId.is_null())
        .exec(conn)
        .await?;
    Ok(claimed.rows_affected == 1)
}

/// Active cart plus its lines, or `None` when the user has no active cart.
pub async fn load_active_cart<C>(conn: &C, user_id: Uuid) -> Result<Option<CartSnapshot>, DbErr>
where
    C: ConnectionTrait,
{
    match find_active_cart(conn, user_id).await? {
        Some(cart) => {
            let lines = load_cart_lines(conn, cart.id).await?;
            Ok(Some(CartSnapshot { cart, lines }))
        }
        None => Ok(None),
    }
}

/// Input for adding a product to the cart
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

/// Input for changing an item's quantity
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateCartItemInput {
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_total: i64,
}

impl CartItemView {
    fn from_parts(item: &cart_item::Model, product: &product::Model) -> Self {
        Self {
            id: item.id,
            product_id: product.id,
            product_name: product.name.clone(),
            unit_price: product.price,
            quantity: item.quantity,
            line_total: product.price.saturating_mul(i64::from(item.quantity)),
        }
    }
}

impl From<&CartLine> for CartItemView {
    fn from(line: &CartLine) -> Self {
        Self::from_parts(&line.item, &line.product)
    }
}

/// The caller's active cart as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    /// `None` until the first item is added
    pub cart_id: Option<Uuid>,
    pub items: Vec<CartItemView>,
    pub total_quantity: i32,
    pub subtotal: i64,
}

impl CartView {
    fn empty() -> Self {
        Self {
            cart_id: None,
            items: Vec::new(),
            total_quantity: 0,
            subtotal: 0,
        }
    }

    fn from_snapshot(snapshot: &CartSnapshot) -> Result<Self, ServiceError> {
        let totals = snapshot
            .totals()
            .ok_or_else(|| ServiceError::ValidationError("cart total is out of range".into()))?;
        Ok(Self {
            cart_id: Some(snapshot.cart.id),
            items: snapshot.lines.iter().map(CartItemView::from).collect(),
            total_quantity: totals.quantity,
            subtotal: totals.total_price,
        })
    }
}

/// Shopping cart service.
///
/// Every operation is scoped to the caller's active cart. Items of a cart
/// that checkout has linked to an order are not visible here and cannot be
/// changed.
///
/// # Examples
///
/// ```ignore
/// let cart_service = CartService::new(db);
///
/// let (item, created) = cart_service
///     .add_item(user_id, AddToCartInput { product_id, quantity: 2 })
///     .await?;
///
/// let view = cart_service.get_cart(user_id).await?;
/// assert_eq!(view.total_quantity, 2);
/// ```
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    /// Creates a new `CartService` instance.
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Returns the caller's active cart with product details and a subtotal.
    ///
    /// A user without an active cart gets an empty view rather than an error.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        match load_active_cart(&*self.db, user_id).await? {
            Some(snapshot) => CartView::from_snapshot(&snapshot),
            None => Ok(CartView::empty()),
        }
    }

    /// Adds a product to the caller's active cart.
    ///
    /// Creates the active cart if the user has none. If the product is
    /// already in the cart its quantity is incremented instead of adding a
    /// second line.
    ///
    /// # Returns
    ///
    /// * `Ok((CartItemView, true))` - A new line was inserted
    /// * `Ok((CartItemView, false))` - An existing line was incremented
    /// * `Err(ServiceError::NotFound)` - Unknown product
    /// * `Err(ServiceError::ValidationError)` - Quantity out of range
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<(CartItemView, bool), ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let now = Utc::now();
        let active = match find_active_cart(&txn, user_id).await? {
            Some(cart) if claim_active_cart(&txn, cart.id).await? => Some(cart),
            Some(cart) => {
                info!(cart_id = %cart.id, "cart was checked out meanwhile, starting a new one");
                None
            }
            None => None,
        };
        let cart = match active {
            Some(cart) => cart,
            None => {
                cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    order_id: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        let existing_item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .one(&txn)
            .await?;

        let (item, created) = if let Some(item) = existing_item {
            let quantity = item
                .quantity
                .checked_add(input.quantity)
                .ok_or_else(|| ServiceError::ValidationError("quantity is too large".into()))?;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(quantity);
            item.updated_at = Set(now);
            (item.update(&txn).await?, false)
        } else {
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(input.quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            (item, true)
        };

        txn.commit().await?;

        info!(
            cart_id = %cart.id,
            product_id = %product.id,
            quantity = item.quantity,
            "cart item saved"
        );
        Ok((CartItemView::from_parts(&item, &product), created))
    }

    /// Returns one item of the caller's active cart.
    #[instrument(skip(self))]
    pub async fn get_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartItemView, ServiceError> {
        let (item, product) = find_owned_active_item(&*self.db, user_id, item_id).await?;
        Ok(CartItemView::from_parts(&item, &product))
    }

    /// Sets an item's quantity.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        input: UpdateCartItemInput,
    ) -> Result<CartItemView, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let (item, product) = find_owned_active_item(&txn, user_id, item_id).await?;
        if !claim_active_cart(&txn, item.cart_id).await? {
            return Err(item_not_found(item_id));
        }

        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(input.quantity);
        item.updated_at = Set(Utc::now());
        let item = item.update(&txn).await?;

        txn.commit().await?;
        Ok(CartItemView::from_parts(&item, &product))
    }

    /// Removes an item from the caller's active cart.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let (item, _) = find_owned_active_item(&txn, user_id, item_id).await?;
        if !claim_active_cart(&txn, item.cart_id).await? {
            return Err(item_not_found(item_id));
        }
        CartItem::delete_by_id(item.id).exec(&txn).await?;
        txn.commit().await?;

        info!(item_id = %item_id, "cart item removed");
        Ok(())
    }
}

fn item_not_found(item_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Cart item {} not found", item_id))
}

/// An item is only reachable through its owner's active cart
async fn find_owned_active_item<C>(
    conn: &C,
    user_id: Uuid,
    item_id: Uuid,
) -> Result<(cart_item::Model, product::Model), ServiceError>
where
    C: ConnectionTrait,
{
    let not_found = || item_not_found(item_id);

    let (item, cart) = CartItem::find_by_id(item_id)
        .find_also_related(Cart)
        .one(conn)
        .await?
        .ok_or_else(not_found)?;

    match cart {
        Some(cart) if cart.user_id == user_id && cart.is_active() => {}
        _ => return Err(not_found()),
    }

    let product = Product::find_by_id(item.product_id)
        .one(conn)
        .await?
        .ok_or_else(not_found)?;

    Ok((item, product))
}
