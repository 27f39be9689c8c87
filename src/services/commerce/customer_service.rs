use crate::{
    auth::{
        password::{hash_password_blocking, verify_password_blocking},
        AuthService,
    },
    entities::{
        commerce::{address, Address},
        user::{self, UserRole},
        User, UserModel,
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SignUpInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SignInInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Partial profile update; absent fields are left as they are
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateProfileInput {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 8, max = 128))]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddressInput {
    #[validate(length(min = 1, max = 255))]
    pub address_place: String,
    #[validate(length(min = 3, max = 10))]
    pub postal_code: String,
    #[validate(length(min = 6, max = 20))]
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthTokenResponse {
    pub message: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddressView {
    pub id: Uuid,
    pub address_place: String,
    pub postal_code: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
}

impl From<address::Model> for AddressView {
    fn from(model: address::Model) -> Self {
        Self {
            id: model.id,
            address_place: model.address_place,
            postal_code: model.postal_code,
            phone_number: model.phone_number,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserModel> for UserSummary {
    fn from(model: UserModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            role: model.role.as_str().to_string(),
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: UserSummary,
    pub addresses: Vec<AddressView>,
}

/// Phone number of the user's most recently created address.
pub async fn latest_phone_number<C>(conn: &C, user_id: Uuid) -> Result<Option<String>, DbErr>
where
    C: ConnectionTrait,
{
    Ok(Address::find()
        .filter(address::Column::UserId.eq(user_id))
        .order_by_desc(address::Column::CreatedAt)
        .one(conn)
        .await?
        .map(|address| address.phone_number))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn email_taken(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Customer accounts, credentials and addresses
#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DatabaseConnection>,
    auth_service: Arc<AuthService>,
}

impl CustomerService {
    pub fn new(db: Arc<DatabaseConnection>, auth_service: Arc<AuthService>) -> Self {
        Self { db, auth_service }
    }

    /// Register a new user and sign them in
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn sign_up(&self, input: SignUpInput) -> Result<AuthTokenResponse, ServiceError> {
        input.validate()?;
        let email = normalize_email(&input.email);

        let existing = User::find()
            .filter(user::Column::Email.eq(email.as_str()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }

        let password_hash = hash_password_blocking(input.password).await?;
        let now = Utc::now();

        let user = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(password_hash),
            role: Set(UserRole::User),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            if email_taken(&e) {
                ServiceError::Conflict("Email already registered".to_string())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(user_id = %user.id, "user registered");
        let token = self.issue_token(&user)?;
        Ok(AuthTokenResponse {
            message: "Sign up successful".to_string(),
            token,
        })
    }

    /// Unknown email and wrong password are indistinguishable to the caller
    #[instrument(skip(self, input))]
    pub async fn sign_in(&self, input: SignInInput) -> Result<AuthTokenResponse, ServiceError> {
        input.validate()?;

        let user = User::find()
            .filter(user::Column::Email.eq(normalize_email(&input.email)))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

        if !verify_password_blocking(input.password, user.password_hash.clone()).await? {
            return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        info!(user_id = %user.id, "user signed in");
        let token = self.issue_token(&user)?;
        Ok(AuthTokenResponse {
            message: "Sign in successful".to_string(),
            token,
        })
    }

    fn issue_token(&self, user: &UserModel) -> Result<String, ServiceError> {
        Ok(self
            .auth_service
            .generate_token(user.id, &user.email, user.role.as_str())?)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<UserModel, ServiceError> {
        User::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }

    /// Profile with addresses, newest address first
    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, ServiceError> {
        let user = self.find_user(user_id).await?;
        let addresses = self.list_addresses(user_id).await?;
        Ok(UserProfile {
            user: user.into(),
            addresses,
        })
    }

    #[instrument(skip(self, input))]
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        input: UpdateProfileInput,
    ) -> Result<UserSummary, ServiceError> {
        input.validate()?;
        let user = self.find_user(user_id).await?;
        let mut active: user::ActiveModel = user.into();

        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(email) = input.email {
            let email = normalize_email(&email);
            let taken = User::find()
                .filter(user::Column::Email.eq(email.as_str()))
                .filter(user::Column::Id.ne(user_id))
                .one(&*self.db)
                .await?;
            if taken.is_some() {
                return Err(ServiceError::Conflict("Email already registered".to_string()));
            }
            active.email = Set(email);
        }
        if let Some(password) = input.password {
            active.password_hash = Set(hash_password_blocking(password).await?);
        }
        active.updated_at = Set(Utc::now());

        let user = active.update(&*self.db).await.map_err(|e| {
            if email_taken(&e) {
                ServiceError::Conflict("Email already registered".to_string())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;
        Ok(user.into())
    }

    /// Deletes the account; carts, orders and addresses go with it
    #[instrument(skip(self))]
    pub async fn delete_account(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let result = User::delete_by_id(user_id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("User {} not found", user_id)));
        }
        info!(user_id = %user_id, "user deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<UserSummary>, ServiceError> {
        let users = User::find()
            .order_by_desc(user::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(users.into_iter().map(UserSummary::from).collect())
    }

    pub async fn list_addresses(&self, user_id: Uuid) -> Result<Vec<AddressView>, ServiceError> {
        let addresses = Address::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_desc(address::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(addresses.into_iter().map(AddressView::from).collect())
    }

    #[instrument(skip(self, input))]
    pub async fn create_address(
        &self,
        user_id: Uuid,
        input: AddressInput,
    ) -> Result<AddressView, ServiceError> {
        input.validate()?;
        let now = Utc::now();
        let address = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            address_place: Set(input.address_place),
            postal_code: Set(input.postal_code),
            phone_number: Set(input.phone_number),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;
        Ok(address.into())
    }

    #[instrument(skip(self, input))]
    pub async fn update_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
        input: AddressInput,
    ) -> Result<AddressView, ServiceError> {
        input.validate()?;
        let mut address: address::ActiveModel = self.owned_address(user_id, address_id).await?.into();
        address.address_place = Set(input.address_place);
        address.postal_code = Set(input.postal_code);
        address.phone_number = Set(input.phone_number);
        address.updated_at = Set(Utc::now());
        Ok(address.update(&*self.db).await?.into())
    }

    #[instrument(skip(self))]
    pub async fn delete_address(&self, user_id: Uuid, address_id: Uuid) -> Result<(), ServiceError> {
        let address = self.owned_address(user_id, address_id).await?;
        Address::delete_by_id(address.id).exec(&*self.db).await?;
        Ok(())
    }

    async fn owned_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<address::Model, ServiceError> {
        Address::find_by_id(address_id)
            .filter(address::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))
    }
}
