//! Document storage abstraction
//!
//! Defines the [`DocumentStore`] trait used by the vendor repositories and
//! catalog snapshots, with two implementations:
//! - [`FileSystemDocumentStore`]: one file per document under a root
//!   directory (feature `native-fs`, on by default)
//! - [`MemoryDocumentStore`]: process-local map, for tests and embedding

use async_trait::async_trait;

/// Error type for storage operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid document name: {0}")]
    InvalidName(String),
}

/// Flat store of named text documents.
///
/// Names are plain file names (`epic.json`); nested paths are rejected by
/// the file system implementation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document
    async fn read_document(&self, name: &str) -> Result<String, StorageError>;

    /// Create or replace a document
    async fn write_document(&self, name: &str, content: &str) -> Result<(), StorageError>;

    /// Names of documents ending in `extension` (e.g. `".json"`), sorted
    async fn list_documents(&self, extension: &str) -> Result<Vec<String>, StorageError>;

    /// Check if a document exists
    async fn document_exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Delete a document
    async fn delete_document(&self, name: &str) -> Result<(), StorageError>;

    /// Make sure the store can be written to. Returns `true` when the store
    /// was created by this call, which is when defaults get seeded.
    async fn ensure_root(&self) -> Result<bool, StorageError>;
}

#[cfg(feature = "native-fs")]
pub mod filesystem;
pub mod memory;

#[cfg(feature = "native-fs")]
pub use filesystem::FileSystemDocumentStore;
pub use memory::MemoryDocumentStore;
