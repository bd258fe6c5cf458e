//! In-memory store double for tests and single-process experiments.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use zapmux_core::traits::{CredentialStore, GroupStore};
use zapmux_core::types::{Credentials, GroupRecord};
use zapmux_core::ZapError;

/// Map-backed implementation of both store traits. Same semantics as
/// [`SqlxStore`](crate::SqlxStore), no durability.
#[derive(Default)]
pub struct MemoryStore {
    credentials: Mutex<HashMap<String, Credentials>>,
    groups: Mutex<HashMap<String, Vec<GroupRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self, connection_id: &str) -> Result<Option<Credentials>, ZapError> {
        Ok(self.credentials.lock().await.get(connection_id).cloned())
    }

    async fn save(&self, connection_id: &str, credentials: &Credentials) -> Result<(), ZapError> {
        self.credentials
            .lock()
            .await
            .insert(connection_id.to_string(), credentials.clone());
        Ok(())
    }

    async fn delete(&self, connection_id: &str) -> Result<(), ZapError> {
        self.credentials.lock().await.remove(connection_id);
        Ok(())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn replace(&self, connection_id: &str, groups: &[GroupRecord]) -> Result<(), ZapError> {
        self.groups
            .lock()
            .await
            .insert(connection_id.to_string(), groups.to_vec());
        Ok(())
    }

    async fn list(&self, connection_id: &str) -> Result<Vec<GroupRecord>, ZapError> {
        Ok(self
            .groups
            .lock()
            .await
            .get(connection_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, connection_id: &str) -> Result<(), ZapError> {
        self.groups.lock().await.remove(connection_id);
        Ok(())
    }
}
