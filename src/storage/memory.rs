//! In-memory document store

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DocumentStore, StorageError};

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<BTreeMap<String, String>>,
    initialized: RwLock<bool>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_document(&self, name: &str) -> Result<String, StorageError> {
        self.documents
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::DocumentNotFound(name.to_string()))
    }

    async fn write_document(&self, name: &str, content: &str) -> Result<(), StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidName("empty name".to_string()));
        }
        self.documents
            .write()
            .await
            .insert(name.to_string(), content.to_string());
        Ok(())
    }

    async fn list_documents(&self, extension: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .documents
            .read()
            .await
            .keys()
            .filter(|name| name.ends_with(extension))
            .cloned()
            .collect())
    }

    async fn document_exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.documents.read().await.contains_key(name))
    }

    async fn delete_document(&self, name: &str) -> Result<(), StorageError> {
        self.documents
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::DocumentNotFound(name.to_string()))
    }

    async fn ensure_root(&self) -> Result<bool, StorageError> {
        let mut initialized = self.initialized.write().await;
        let created = !*initialized;
        *initialized = true;
        Ok(created)
    }
}
