//! Data Access Layer
//!
//! PostgreSQL-backed implementations of the prompt and response stores. The
//! relay only creates prompts and reads both tables; the generator owns
//! every other write.

use anyhow::Result;
use async_trait::async_trait;
use spokify_core::store::{PromptStore, ResponseStore, StoreError};
use spokify_core::{PromptRecord, ResponseRecord};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{PromptRow, ResponseRow};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Connection-class failures are `Unavailable`; everything else is a query
/// failure.
pub fn classify(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StoreError::Unavailable(err.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

#[async_trait]
impl PromptStore for Db {
    async fn create_prompt(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<PromptRecord, StoreError> {
        let row = sqlx::query_as::<_, PromptRow>(
            r#"
            INSERT INTO prompts (id, user_id, message)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, message, created_at, response_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(message)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        Ok(row.into())
    }

    async fn find_prompt(&self, id: Uuid) -> Result<Option<PromptRecord>, StoreError> {
        let row = sqlx::query_as::<_, PromptRow>(
            r#"
            SELECT id, user_id, message, created_at, response_id
            FROM prompts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        Ok(row.map(Into::into))
    }

    /// Proves the pool can hand out a live connection again.
    async fn reconnect(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(classify)?;
        tracing::info!("Prompt store connection re-established");
        Ok(())
    }
}

#[async_trait]
impl ResponseStore for Db {
    async fn find_response(&self, id: Uuid) -> Result<Option<ResponseRecord>, StoreError> {
        let row = sqlx::query_as::<_, ResponseRow>(
            "SELECT id, tokens, complete FROM responses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        Ok(row.map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failures_are_unavailable() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(classify(io).is_unavailable());
        assert!(classify(sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(classify(sqlx::Error::PoolClosed).is_unavailable());
    }

    #[test]
    fn test_other_failures_are_query_errors() {
        let err = classify(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Query(_)));
        let err = classify(sqlx::Error::ColumnNotFound("tokens".to_string()));
        assert!(!err.is_unavailable());
    }
}
