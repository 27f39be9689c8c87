/*!
 * Transaction Helper Utilities
 *
 * Runs a closure inside a database transaction: commit on `Ok`, rollback
 * on `Err`. The closure's own error type is preserved.
 */

use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionError, TransactionTrait};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Execute a function within a database transaction
///
/// # Example
///
/// ```rust,ignore
/// use crate::db::transaction::with_transaction;
///
/// let item = with_transaction(&db, |txn| {
///     Box::pin(async move {
///         let cart = find_or_create_active_cart(txn, user_id).await?;
///         insert_item(txn, cart.id, product_id, quantity).await
///     })
/// }).await?;
/// ```
pub async fn with_transaction<F, T, E>(db: &DatabaseConnection, f: F) -> Result<T, E>
where
    F: for<'a> FnOnce(&'a DatabaseTransaction) -> BoxFuture<'a, Result<T, E>> + Send,
    T: Send,
    E: From<DbErr> + std::error::Error + Send,
{
    db.transaction(f).await.map_err(|e| match e {
        TransactionError::Connection(db_err) => E::from(db_err),
        TransactionError::Transaction(err) => err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ServiceError;
    use sea_orm::{ConnectOptions, ConnectionTrait, Database, Statement};

    async fn memory_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1);
        let db = Database::connect(opt).await.unwrap();
        db.execute_unprepared("CREATE TABLE t (v INTEGER NOT NULL)")
            .await
            .unwrap();
        db
    }

    async fn count(db: &DatabaseConnection) -> i64 {
        let row = db
            .query_one(Statement::from_string(
                db.get_database_backend(),
                "SELECT COUNT(*) AS n FROM t",
            ))
            .await
            .unwrap()
            .unwrap();
        row.try_get::<i64>("", "n").unwrap()
    }

    #[tokio::test]
    async fn commits_on_success() {
        let db = memory_db().await;
        let out: Result<i32, ServiceError> = with_transaction(&db, |txn| {
            Box::pin(async move {
                txn.execute_unprepared("INSERT INTO t (v) VALUES (1)").await?;
                Ok(7)
            })
        })
        .await;

        assert_eq!(out.unwrap(), 7);
        assert_eq!(count(&db).await, 1);
    }

    #[tokio::test]
    async fn rolls_back_and_keeps_error_type() {
        let db = memory_db().await;
        let out: Result<(), ServiceError> = with_transaction(&db, |txn| {
            Box::pin(async move {
                txn.execute_unprepared("INSERT INTO t (v) VALUES (1)").await?;
                Err(ServiceError::EmptyCart)
            })
        })
        .await;

        assert!(matches!(out, Err(ServiceError::EmptyCart)));
        assert_eq!(count(&db).await, 0);
    }
}
