//! `ctx.resource`: blob read/download/upload against a resource store
//! (§4.9). The spec treats the resource store as an external collaborator
//! the same way it treats the model store, so this crate only defines the
//! contract plus an in-memory implementation for embedding and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::error::ContextError;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn download(&self, key: &str) -> Result<Vec<u8>, ContextError>;
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), ContextError>;
}

#[derive(Default)]
pub struct InMemoryResourceStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn download(&self, key: &str) -> Result<Vec<u8>, ContextError> {
        self.blobs
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ContextError::ResourceNotFound(key.to_string()))
    }

    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), ContextError> {
        self.blobs.write().insert(key.to_string(), data);
        Ok(())
    }
}

#[derive(Clone)]
pub struct ResourceAccessor {
    store: Arc<dyn ResourceStore>,
}

impl ResourceAccessor {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    pub async fn download(&self, key: &str) -> Result<Vec<u8>, ContextError> {
        self.store.download(key).await
    }

    pub async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), ContextError> {
        self.store.upload(key, data).await
    }
}
