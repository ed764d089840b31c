//! File-backed vendor knowledge
//!
//! Detection patterns and interface specifications live as one JSON
//! document per entry in a [`DocumentStore`]. Both repositories share
//! [`JsonRepository`]: a read-through cache with a freshness window,
//! refreshed by loading into a new map and swapping it in, and seeded with
//! built-in documents when the store is first created.

mod defaults;
mod location;
mod patterns;
mod specifications;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::RepositoryConfig;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::storage::DocumentStore;

pub use defaults::{default_patterns, default_specifications};
pub use location::{PATTERNS_DIR_ENV, SPECS_DIR_ENV, StorageLocation};
pub use patterns::VendorPatternRepository;
pub use specifications::VendorSpecificationRepository;

const DOCUMENT_EXTENSION: &str = ".json";

/// A JSON document with a stable identifier
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Singular noun used in log and error messages
    const KIND: &'static str;

    fn document_id(&self) -> &str;
}

/// Restrict an id to characters safe in a file name
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

fn document_name(id: &str) -> String {
    format!("{}{DOCUMENT_EXTENSION}", sanitize_id(id))
}

struct CacheState<T> {
    loaded_at: Instant,
    documents: Arc<BTreeMap<String, T>>,
}

/// Cached repository of JSON documents keyed by id
pub struct JsonRepository<T: Document> {
    store: Arc<dyn DocumentStore>,
    config: RepositoryConfig,
    defaults: fn() -> Vec<T>,
    cache: RwLock<Option<CacheState<T>>>,
}

impl<T: Document> JsonRepository<T> {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: RepositoryConfig,
        defaults: fn() -> Vec<T>,
    ) -> Self {
        Self {
            store,
            config,
            defaults,
            cache: RwLock::new(None),
        }
    }

    /// All documents, from cache while it is fresh
    pub async fn load_all(
        &self,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Arc<BTreeMap<String, T>>> {
        {
            let cache = self.cache.read().await;
            if let Some(state) = cache.as_ref()
                && state.loaded_at.elapsed() < self.config.cache_ttl
            {
                return Ok(state.documents.clone());
            }
        }
        self.refresh(cancel).await
    }

    /// Reload every document from the store, ignoring the cache.
    ///
    /// Unreadable or malformed documents are logged and skipped.
    pub async fn refresh(
        &self,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Arc<BTreeMap<String, T>>> {
        cancel.check()?;
        if self.store.ensure_root().await? && self.config.seed_defaults {
            self.seed(cancel).await?;
        }

        let mut documents = BTreeMap::new();
        for name in self.store.list_documents(DOCUMENT_EXTENSION).await? {
            cancel.check()?;
            let content = match self.store.read_document(&name).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(kind = T::KIND, document = %name, error = %e, "Skipping unreadable document");
                    continue;
                }
            };
            match serde_json::from_str::<T>(&content) {
                Ok(document) => {
                    documents.insert(document.document_id().to_string(), document);
                }
                Err(e) => {
                    warn!(kind = T::KIND, document = %name, error = %e, "Skipping malformed document");
                }
            }
        }

        let documents = Arc::new(documents);
        *self.cache.write().await = Some(CacheState {
            loaded_at: Instant::now(),
            documents: documents.clone(),
        });
        debug!(kind = T::KIND, count = documents.len(), "Repository refreshed");
        Ok(documents)
    }

    pub async fn get(&self, id: &str, cancel: &CancellationToken) -> IntelligenceResult<Option<T>> {
        Ok(self.load_all(cancel).await?.get(id).cloned())
    }

    /// Write a document and invalidate the cache
    pub async fn save(&self, document: &T, cancel: &CancellationToken) -> IntelligenceResult<()> {
        let id = document.document_id();
        if id.trim().is_empty() {
            return Err(IntelligenceError::validation(format!(
                "{} id must not be empty",
                T::KIND
            )));
        }
        cancel.check()?;
        let content = serde_json::to_string_pretty(document)?;
        self.store.write_document(&document_name(id), &content).await?;
        self.invalidate().await;
        info!(kind = T::KIND, id, "Saved document");
        Ok(())
    }

    /// Delete a document; `false` when it did not exist
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> IntelligenceResult<bool> {
        cancel.check()?;
        let name = document_name(id);
        if !self.store.document_exists(&name).await? {
            return Ok(false);
        }
        self.store.delete_document(&name).await?;
        self.invalidate().await;
        info!(kind = T::KIND, id, "Deleted document");
        Ok(true)
    }

    async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn seed(&self, cancel: &CancellationToken) -> IntelligenceResult<()> {
        let defaults = (self.defaults)();
        for document in &defaults {
            cancel.check()?;
            let content = serde_json::to_string_pretty(document)?;
            self.store
                .write_document(&document_name(document.document_id()), &content)
                .await?;
        }
        info!(kind = T::KIND, count = defaults.len(), "Seeded built-in documents");
        Ok(())
    }
}

impl<T: Document> std::fmt::Debug for JsonRepository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRepository")
            .field("kind", &T::KIND)
            .field("config", &self.config)
            .finish()
    }
}
