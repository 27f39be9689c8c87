use crate::{
    db::with_transaction,
    entities::{
        commerce::{cart, cart_item, category, Cart, CartItem, Category},
        product::{self, Entity as Product},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Query, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Product as listed in the catalog
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductView {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductView {
    fn new(product: product::Model, category: Option<category::Model>) -> Self {
        Self {
            id: product.id,
            name: product.name,
            price: product.price,
            description: product.description,
            image_url: product.image_url,
            category_id: product.category_id,
            category_name: category.map(|c| c.name),
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryView {
    pub id: Uuid,
    pub name: String,
}

impl From<category::Model> for CategoryView {
    fn from(model: category::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductFilter {
    /// Only products in this category
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(range(min = 1))]
    pub price: i64,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(url)]
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(range(min = 1))]
    pub price: Option<i64>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(url)]
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCategoryInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

/// Products and categories. Reads are public, writes are admin-only.
#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DatabaseConnection>,
}

impl ProductCatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists products newest first, with their category name
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        filter: ProductFilter,
    ) -> Result<Vec<ProductView>, ServiceError> {
        let mut query = Product::find().find_also_related(Category);
        if let Some(category_id) = filter.category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }

        let rows = query
            .order_by_desc(product::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(product, category)| ProductView::new(product, category))
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductView, ServiceError> {
        let (product, category) = Product::find_by_id(product_id)
            .find_also_related(Category)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        Ok(ProductView::new(product, category))
    }

    #[instrument(skip(self, input))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductView, ServiceError> {
        input.validate()?;
        let category = self.resolve_category(input.category_id).await?;

        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            price: Set(input.price),
            description: Set(input.description),
            image_url: Set(input.image_url),
            category_id: Set(input.category_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %product.id, price = product.price, "product created");
        Ok(ProductView::new(product, category))
    }

    /// Price changes never touch existing orders, which keep their own totals.
    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        input: UpdateProductInput,
    ) -> Result<ProductView, ServiceError> {
        input.validate()?;

        let existing = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let category_id = input.category_id.or(existing.category_id);
        let category = self.resolve_category(category_id).await?;

        let mut product: product::ActiveModel = existing.into();
        if let Some(name) = input.name {
            product.name = Set(name);
        }
        if let Some(price) = input.price {
            product.price = Set(price);
        }
        if let Some(description) = input.description {
            product.description = Set(Some(description));
        }
        if let Some(image_url) = input.image_url {
            product.image_url = Set(Some(image_url));
        }
        product.category_id = Set(category_id);
        product.updated_at = Set(Utc::now());

        let product = product.update(&*self.db).await?;
        Ok(ProductView::new(product, category))
    }

    /// Removes the product and its lines in active carts.
    ///
    /// A product that is in a checked-out cart stays, since those lines make
    /// up an order's total: that case is a `Conflict`.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let in_order =
            move || ServiceError::Conflict(format!("Product {} is part of an order", product_id));

        let result = with_transaction(&self.db, |txn| {
            Box::pin(async move {
                let ordered_lines = CartItem::find()
                    .inner_join(Cart)
                    .filter(cart_item::Column::ProductId.eq(product_id))
                    .filter(cart::Column::OrderId.is_not_null())
                    .count(txn)
                    .await?;
                if ordered_lines > 0 {
                    return Err(in_order());
                }

                CartItem::delete_many()
                    .filter(cart_item::Column::ProductId.eq(product_id))
                    .filter(
                        cart_item::Column::CartId.in_subquery(
                            Query::select()
                                .column(cart::Column::Id)
                                .from(Cart)
                                .and_where(cart::Column::OrderId.is_null())
                                .to_owned(),
                        ),
                    )
                    .exec(txn)
                    .await?;

                let deleted = Product::delete_by_id(product_id).exec(txn).await?;
                if deleted.rows_affected == 0 {
                    return Err(ServiceError::NotFound(format!(
                        "Product {} not found",
                        product_id
                    )));
                }
                Ok(())
            })
        })
        .await;

        match result {
            Ok(()) => {
                info!(product_id = %product_id, "product deleted");
                Ok(())
            }
            // A cart holding the product was checked out after the count
            Err(ServiceError::DatabaseError(e))
                if matches!(e.sql_err(), Some(SqlErr::ForeignKeyConstraintViolation(_))) =>
            {
                Err(in_order())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_categories(&self) -> Result<Vec<CategoryView>, ServiceError> {
        let categories = Category::find()
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(categories.into_iter().map(CategoryView::from).collect())
    }

    /// Returns the category with this name, creating it if needed.
    ///
    /// The `bool` is `true` when a new category was created.
    #[instrument(skip(self, input))]
    pub async fn create_category(
        &self,
        input: CreateCategoryInput,
    ) -> Result<(CategoryView, bool), ServiceError> {
        input.validate()?;
        let name = input.name.trim().to_string();

        if let Some(existing) = self.find_category_by_name(&name).await? {
            return Ok((existing.into(), false));
        }

        let now = Utc::now();
        let inserted = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match inserted {
            Ok(category) => Ok((category.into(), true)),
            // Lost a race against an identical insert
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => self
                .find_category_by_name(&name)
                .await?
                .map(|c| (c.into(), false))
                .ok_or(ServiceError::DatabaseError(e)),
            Err(e) => Err(e.into()),
        }
    }

    /// Products in the category keep existing, uncategorized
    #[instrument(skip(self))]
    pub async fn delete_category(&self, category_id: Uuid) -> Result<(), ServiceError> {
        let result = Category::delete_by_id(category_id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Category {} not found",
                category_id
            )));
        }
        Ok(())
    }

    async fn find_category_by_name(
        &self,
        name: &str,
    ) -> Result<Option<category::Model>, ServiceError> {
        Ok(Category::find()
            .filter(category::Column::Name.eq(name))
            .one(&*self.db)
            .await?)
    }

    async fn resolve_category(
        &self,
        category_id: Option<Uuid>,
    ) -> Result<Option<category::Model>, ServiceError> {
        match category_id {
            Some(id) => Category::find_by_id(id)
                .one(&*self.db)
                .await?
                .map(Some)
                .ok_or_else(|| ServiceError::NotFound(format!("Category {} not found", id))),
            None => Ok(None),
        }
    }
}
