use super::{PromptStore, ResponseStore, StoreError};
use crate::records::{PromptRecord, ResponseRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Collections {
    prompts: HashMap<Uuid, PromptRecord>,
    responses: HashMap<Uuid, ResponseRecord>,
    unavailable: bool,
}

/// An in-process store holding both collections.
///
/// Besides the read/create side used by the relay it exposes the mutations
/// the external generator performs (`link_response`, `append_tokens`,
/// `mark_complete`), which makes it suitable for local runs and for driving
/// relay scenarios in tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        // A poisoned lock only means a test thread panicked mid-update.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulates the backend going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn prompt_count(&self) -> usize {
        self.lock().prompts.len()
    }

    /// Attaches a raw response reference to a prompt, as the generator does.
    pub fn link_response(&self, prompt_id: Uuid, response_id: &str) {
        if let Some(prompt) = self.lock().prompts.get_mut(&prompt_id) {
            prompt.response_id = Some(response_id.to_string());
        }
    }

    /// Deletes a response record, as if the generator discarded it.
    pub fn remove_response(&self, id: Uuid) {
        self.lock().responses.remove(&id);
    }

    pub fn append_tokens(&self, id: Uuid, tokens: &[&str]) {
        let mut guard = self.lock();
        let response = guard
            .responses
            .entry(id)
            .or_insert_with(|| ResponseRecord::new(id));
        response
            .tokens
            .extend(tokens.iter().map(|t| (*t).to_string()));
    }

    pub fn mark_complete(&self, id: Uuid) {
        if let Some(response) = self.lock().responses.get_mut(&id) {
            response.complete = true;
        }
    }

    fn check_available(guard: &Collections) -> Result<(), StoreError> {
        if guard.unavailable {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PromptStore for MemoryStore {
    async fn create_prompt(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<PromptRecord, StoreError> {
        let mut guard = self.lock();
        Self::check_available(&guard)?;
        let prompt = PromptRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
            response_id: None,
        };
        guard.prompts.insert(prompt.id, prompt.clone());
        Ok(prompt)
    }

    async fn find_prompt(&self, id: Uuid) -> Result<Option<PromptRecord>, StoreError> {
        let guard = self.lock();
        Self::check_available(&guard)?;
        Ok(guard.prompts.get(&id).cloned())
    }
}

#[async_trait]
impl ResponseStore for MemoryStore {
    async fn find_response(&self, id: Uuid) -> Result<Option<ResponseRecord>, StoreError> {
        let guard = self.lock();
        Self::check_available(&guard)?;
        Ok(guard.responses.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_link() {
        let store = MemoryStore::new();
        let prompt = store.create_prompt("anonymous", "hi").await.unwrap();
        assert!(prompt.response_id.is_none());

        let response_id = Uuid::new_v4();
        store.link_response(prompt.id, &response_id.to_string());
        let found = store.find_prompt(prompt.id).await.unwrap().unwrap();
        assert_eq!(found.response_ref().unwrap().unwrap(), response_id);
    }

    #[tokio::test]
    async fn test_generator_mutations() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        assert!(store.find_response(id).await.unwrap().is_none());

        store.append_tokens(id, &["Hi", " there"]);
        store.mark_complete(id);
        let response = store.find_response(id).await.unwrap().unwrap();
        assert_eq!(response.tokens, vec!["Hi", " there"]);
        assert!(response.complete);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.create_prompt("u", "m").await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.prompt_count(), 0);
    }
}
