//! Prompt and Response Stores
//!
//! The persisted collections shared with the external generator. The relay
//! only ever creates prompts and reads both collections; tokens are written
//! by the generator alone.

mod memory;

pub use memory::MemoryStore;

use crate::records::{PromptRecord, ResponseRecord};
use async_trait::async_trait;
use uuid::Uuid;

/// Failures reported by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The backend was reachable but the operation failed.
    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Access to the prompt collection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Persists a new prompt with no response link.
    async fn create_prompt(&self, user_id: &str, message: &str)
    -> Result<PromptRecord, StoreError>;

    /// Looks a prompt up by id.
    async fn find_prompt(&self, id: Uuid) -> Result<Option<PromptRecord>, StoreError>;

    /// Re-establishes connectivity after an `Unavailable` failure.
    async fn reconnect(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Read access to the response collection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn find_response(&self, id: Uuid) -> Result<Option<ResponseRecord>, StoreError>;
}

/// Creates a prompt, retrying exactly once after a reconnect when the store
/// reports itself unreachable.
pub async fn create_prompt_with_reconnect(
    store: &dyn PromptStore,
    user_id: &str,
    message: &str,
) -> Result<PromptRecord, StoreError> {
    match store.create_prompt(user_id, message).await {
        Err(e) if e.is_unavailable() => {
            tracing::warn!(error = %e, "Prompt store unreachable, reconnecting once");
            store.reconnect().await?;
            store.create_prompt(user_id, message).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockall::Sequence;

    fn record(user_id: &str, message: &str) -> PromptRecord {
        PromptRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
            response_id: None,
        }
    }

    #[tokio::test]
    async fn test_reconnect_then_retry_succeeds() {
        let mut store = MockPromptStore::new();
        let mut seq = Sequence::new();
        store
            .expect_create_prompt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(StoreError::Unavailable("connection refused".into())));
        store
            .expect_reconnect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        store
            .expect_create_prompt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|user, msg| Ok(record(user, msg)));

        let prompt = create_prompt_with_reconnect(&store, "u1", "hello")
            .await
            .unwrap();
        assert_eq!(prompt.message, "hello");
    }

    #[tokio::test]
    async fn test_second_unavailable_is_reported() {
        let mut store = MockPromptStore::new();
        store
            .expect_create_prompt()
            .times(2)
            .returning(|_, _| Err(StoreError::Unavailable("down".into())));
        store.expect_reconnect().times(1).returning(|| Ok(()));

        let err = create_prompt_with_reconnect(&store, "u1", "hello")
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_query_errors_are_not_retried() {
        let mut store = MockPromptStore::new();
        store
            .expect_create_prompt()
            .times(1)
            .returning(|_, _| Err(StoreError::Query("constraint".into())));
        store.expect_reconnect().never();

        let err = create_prompt_with_reconnect(&store, "u1", "hello")
            .await
            .unwrap_err();
        assert!(!err.is_unavailable());
    }
}
